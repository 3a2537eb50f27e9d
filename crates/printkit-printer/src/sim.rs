//! Simulated collaborators
//!
//! Stand-ins for the hardware a [`Printer`](crate::Printer) drives, used by
//! the simulator binary and the tests. Every simulator is a cheap handle
//! around shared state: keep a clone to inspect or steer it while the
//! printer owns the boxed original.

use crate::hardware::{CurrentControl, Hardware};
use crate::timers::ManualClock;
use parking_lot::Mutex;
use printkit_communication::{BlockDevice, BlockEvent, SerialPort, BLOCK_SIZE};
use printkit_core::StorageError;
use printkit_motion::{
    HeaterCell, Homer, HomerEvent, HomingParams, MotionPlanner, PlannerCommand, PlannerEvent,
    StepperDriver, TemperatureSensor,
};
use printkit_settings::MachineConfig;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// In-memory serial port
#[derive(Debug, Clone, Default)]
pub struct MemorySerialPort {
    inner: Arc<Mutex<SerialBuffers>>,
}

#[derive(Debug, Default)]
struct SerialBuffers {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl MemorySerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue text as if the host had sent it
    pub fn send(&self, text: &str) {
        self.inner.lock().input.extend(text.bytes());
    }

    /// Take everything the printer wrote so far
    pub fn take_output(&self) -> String {
        let bytes = std::mem::take(&mut self.inner.lock().output);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn pending_input(&self) -> usize {
        self.inner.lock().input.len()
    }
}

impl SerialPort for MemorySerialPort {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.lock().output.extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        let n = buf.len().min(inner.input.len());
        for (slot, byte) in buf.iter_mut().zip(inner.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

/// Something the simulated planner executed
#[derive(Debug, Clone, PartialEq)]
pub enum Executed {
    /// Signed steps per axis
    Move(Vec<i64>),
    /// A side-channel payload reached the execution point
    Channel(printkit_motion::AuxPayload),
}

#[derive(Debug)]
struct PlannerSim {
    capacity: usize,
    active: bool,
    watch_probe: bool,
    pull_outstanding: bool,
    stalled: bool,
    pull_held: bool,
    draining: bool,
    buffer: VecDeque<PlannerCommand>,
    events: VecDeque<PlannerEvent>,
    positions: Vec<i64>,
    executed: Vec<Executed>,
    surface: Option<(usize, i64)>,
    aborted_rem: Vec<i64>,
    sessions: usize,
}

/// Step-counting planner
///
/// Buffers up to `capacity` submissions and executes the oldest one when a
/// new one does not fit, or everything on `wait_finished`. A stalled planner
/// holds back its pulls the way a full planner would. Optionally models
/// a probe surface: during a watched session, a move of the surface axis
/// stops where it reaches the surface and the session is aborted.
#[derive(Debug, Clone)]
pub struct SimPlanner {
    inner: Arc<Mutex<PlannerSim>>,
}

impl SimPlanner {
    pub fn new(num_axes: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlannerSim {
                capacity: capacity.max(1),
                active: false,
                watch_probe: false,
                pull_outstanding: false,
                stalled: false,
                pull_held: false,
                draining: false,
                buffer: VecDeque::new(),
                events: VecDeque::new(),
                positions: vec![0; num_axes],
                executed: Vec::new(),
                surface: None,
                aborted_rem: vec![0; num_axes],
                sessions: 0,
            })),
        }
    }

    /// Place a probe surface at `steps` on `axis`
    pub fn set_surface(&self, axis: usize, steps: i64) {
        self.inner.lock().surface = Some((axis, steps));
    }

    /// Step position of every axis after the executed moves
    pub fn positions(&self) -> Vec<i64> {
        self.inner.lock().positions.clone()
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.inner.lock().executed.clone()
    }

    pub fn buffered(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Number of sessions started so far
    pub fn sessions(&self) -> usize {
        self.inner.lock().sessions
    }

    /// Report an arbitrary event, e.g. an underrun
    pub fn inject(&self, event: PlannerEvent) {
        self.inner.lock().events.push_back(event);
    }

    /// Hold back pulls until [`SimPlanner::release`]
    pub fn stall(&self) {
        self.inner.lock().stalled = true;
    }

    /// Deliver a held pull and stop stalling
    pub fn release(&self) {
        let mut sim = self.inner.lock();
        sim.stalled = false;
        if std::mem::take(&mut sim.pull_held) {
            sim.events.push_back(PlannerEvent::Pull);
        }
    }
}

impl PlannerSim {
    fn request_pull(&mut self) {
        self.pull_outstanding = true;
        if self.stalled {
            self.pull_held = true;
        } else {
            self.events.push_back(PlannerEvent::Pull);
        }
    }

    /// Execute one buffered command. Returns false if it was cut short by
    /// the probe.
    fn execute_front(&mut self) -> bool {
        let Some(command) = self.buffer.pop_front() else {
            return true;
        };
        match command {
            PlannerCommand::Empty => true,
            PlannerCommand::Channel(payload) => {
                self.events.push_back(PlannerEvent::Channel(payload));
                self.executed.push(Executed::Channel(payload));
                true
            }
            PlannerCommand::Axes(cmd) => {
                let mut steps: Vec<i64> = cmd.axes.iter().map(|a| a.signed_steps()).collect();
                let mut complete = true;
                if let (true, Some((axis, surface))) = (self.watch_probe, self.surface) {
                    let from = self.positions[axis];
                    let to = from + steps[axis];
                    if from > surface && to < surface {
                        let done = surface - from;
                        let frac = done as f64 / steps[axis] as f64;
                        for (i, s) in steps.iter_mut().enumerate() {
                            let full = *s;
                            *s = if i == axis { done } else { (full as f64 * frac).round() as i64 };
                            self.aborted_rem[i] = full - *s;
                        }
                        complete = false;
                    }
                }
                for (pos, s) in self.positions.iter_mut().zip(&steps) {
                    *pos += s;
                }
                self.executed.push(Executed::Move(steps));
                complete
            }
        }
    }
}

impl MotionPlanner for SimPlanner {
    fn init(&mut self, watch_probe: bool) {
        let mut sim = self.inner.lock();
        assert!(!sim.active, "planner initialized twice");
        sim.active = true;
        sim.watch_probe = watch_probe;
        sim.draining = false;
        sim.sessions += 1;
        sim.aborted_rem.iter_mut().for_each(|r| *r = 0);
        sim.request_pull();
    }

    fn deinit(&mut self) {
        let mut sim = self.inner.lock();
        sim.active = false;
        sim.pull_outstanding = false;
        sim.pull_held = false;
        sim.buffer.clear();
    }

    fn submit(&mut self, command: PlannerCommand) {
        let mut sim = self.inner.lock();
        assert!(sim.active && sim.pull_outstanding, "submission without a pull");
        sim.pull_outstanding = false;
        sim.buffer.push_back(command);
        while sim.buffer.len() > sim.capacity {
            sim.execute_front();
        }
        sim.request_pull();
    }

    fn wait_finished(&mut self) {
        let mut sim = self.inner.lock();
        assert!(sim.active, "drain without a session");
        sim.draining = true;
        while !sim.buffer.is_empty() {
            if !sim.execute_front() {
                sim.buffer.clear();
                sim.events.push_back(PlannerEvent::Aborted);
                return;
            }
        }
        sim.events.push_back(PlannerEvent::Finished);
    }

    fn aborted_rem_steps(&self, axis: usize) -> i64 {
        self.inner.lock().aborted_rem[axis]
    }

    fn poll_event(&mut self) -> Option<PlannerEvent> {
        let mut sim = self.inner.lock();
        // A pull already answered by wait_finished is not repeated
        loop {
            let event = sim.events.pop_front()?;
            if event == PlannerEvent::Pull && sim.draining {
                continue;
            }
            return Some(event);
        }
    }
}

#[derive(Debug, Default)]
struct HomerSim {
    manual: bool,
    running: Vec<usize>,
    events: VecDeque<HomerEvent>,
    endstops: Vec<bool>,
    failing: Vec<usize>,
}

/// Homer completing each axis immediately, or on request in manual mode
#[derive(Debug, Clone, Default)]
pub struct SimHomer {
    inner: Arc<Mutex<HomerSim>>,
}

impl SimHomer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold completions until [`SimHomer::complete`] is called
    pub fn manual(self) -> Self {
        self.inner.lock().manual = true;
        self
    }

    /// Make `axis` report failure
    pub fn fail_axis(&self, axis: usize) {
        self.inner.lock().failing.push(axis);
    }

    /// Axes currently homing
    pub fn running(&self) -> Vec<usize> {
        self.inner.lock().running.clone()
    }

    /// Complete a running axis in manual mode
    pub fn complete(&self, axis: usize) {
        let mut sim = self.inner.lock();
        if let Some(at) = sim.running.iter().position(|a| *a == axis) {
            sim.running.remove(at);
            let success = !sim.failing.contains(&axis);
            sim.events.push_back(HomerEvent { axis, success });
        }
    }

    pub fn set_endstop(&self, axis: usize, triggered: bool) {
        let mut sim = self.inner.lock();
        if sim.endstops.len() <= axis {
            sim.endstops.resize(axis + 1, false);
        }
        sim.endstops[axis] = triggered;
    }
}

impl Homer for SimHomer {
    fn start(&mut self, axis: usize, params: &HomingParams) {
        tracing::debug!(axis, max_dir = params.home_dir_max, "sim homing started");
        let manual = {
            let mut sim = self.inner.lock();
            sim.running.push(axis);
            sim.manual
        };
        if !manual {
            self.complete(axis);
        }
    }

    fn cancel(&mut self, axis: usize) {
        self.inner.lock().running.retain(|a| *a != axis);
    }

    fn endstop_triggered(&self, axis: usize) -> bool {
        self.inner.lock().endstops.get(axis).copied().unwrap_or(false)
    }

    fn poll_event(&mut self) -> Option<HomerEvent> {
        self.inner.lock().events.pop_front()
    }
}

/// Storage backed by a byte image
#[derive(Debug, Clone, Default)]
pub struct RamBlockDevice {
    inner: Arc<Mutex<RamDisk>>,
}

#[derive(Debug, Default)]
struct RamDisk {
    data: Vec<u8>,
    active: bool,
    events: VecDeque<BlockEvent>,
    init_error: Option<u8>,
    fail_reads: usize,
    reads: usize,
}

impl RamBlockDevice {
    /// Device holding `text`, padded with newlines to whole blocks
    pub fn with_text(text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        let blocks = data.len().div_ceil(BLOCK_SIZE).max(1);
        data.resize(blocks * BLOCK_SIZE, b'\n');
        Self {
            inner: Arc::new(Mutex::new(RamDisk {
                data,
                ..RamDisk::default()
            })),
        }
    }

    /// Make the next activation fail with `code`
    pub fn fail_init(&self, code: u8) {
        self.inner.lock().init_error = Some(code);
    }

    /// Make the next `count` reads fail
    pub fn fail_reads(&self, count: usize) {
        self.inner.lock().fail_reads = count;
    }

    /// Completed read requests, failed ones included
    pub fn reads(&self) -> usize {
        self.inner.lock().reads
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }
}

impl BlockDevice for RamBlockDevice {
    fn activate(&mut self) {
        let mut disk = self.inner.lock();
        let result = match disk.init_error.take() {
            Some(code) => Err(StorageError::Init(code)),
            None => {
                disk.active = true;
                Ok((disk.data.len() / BLOCK_SIZE) as u32)
            }
        };
        disk.events.push_back(BlockEvent::InitDone(result));
    }

    fn deactivate(&mut self) {
        let mut disk = self.inner.lock();
        disk.active = false;
        disk.events.clear();
    }

    fn queue_read(&mut self, block: u32) {
        let mut disk = self.inner.lock();
        disk.reads += 1;
        if disk.fail_reads > 0 {
            disk.fail_reads -= 1;
            disk.events
                .push_back(BlockEvent::ReadDone(Err(StorageError::Read { block })));
            return;
        }
        let at = block as usize * BLOCK_SIZE;
        let result = match disk.data.get(at..at + BLOCK_SIZE) {
            Some(bytes) => {
                let mut buf = Box::new([0u8; BLOCK_SIZE]);
                buf.copy_from_slice(bytes);
                Ok(buf)
            }
            None => Err(StorageError::Read { block }),
        };
        disk.events.push_back(BlockEvent::ReadDone(result));
    }

    fn poll_event(&mut self) -> Option<BlockEvent> {
        self.inner.lock().events.pop_front()
    }
}

/// First-order thermal model of every heater
#[derive(Debug, Clone)]
pub struct SimThermal {
    inner: Arc<Mutex<ThermalSim>>,
}

#[derive(Debug)]
struct ThermalSim {
    ambient: f64,
    temperatures: Vec<f64>,
    cells: Vec<HeaterCell>,
}

impl SimThermal {
    /// Heat gained per second at full power
    const HEAT_RATE: f64 = 4.0;
    /// Fraction of the excess over ambient lost per second
    const LOSS_RATE: f64 = 0.01;

    pub fn new(num_heaters: usize, ambient: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ThermalSim {
                ambient,
                temperatures: vec![ambient; num_heaters],
                cells: Vec::new(),
            })),
        }
    }

    /// Follow the output power of these heaters in [`SimThermal::advance`]
    pub fn attach(&self, cells: Vec<HeaterCell>) {
        self.inner.lock().cells = cells;
    }

    pub fn set_temperature(&self, heater: usize, temperature: f64) {
        self.inner.lock().temperatures[heater] = temperature;
    }

    pub fn temperature_of(&self, heater: usize) -> f64 {
        self.inner.lock().temperatures[heater]
    }

    /// Integrate the model over `dt`
    pub fn advance(&self, dt: Duration) {
        let mut sim = self.inner.lock();
        let dt = dt.as_secs_f64();
        let ambient = sim.ambient;
        let powers: Vec<f64> = sim.cells.iter().map(|c| c.snapshot().output_power).collect();
        for (i, temp) in sim.temperatures.iter_mut().enumerate() {
            let power = powers.get(i).copied().unwrap_or(0.0);
            *temp += (power * Self::HEAT_RATE - (*temp - ambient) * Self::LOSS_RATE) * dt;
        }
    }
}

impl TemperatureSensor for SimThermal {
    fn temperature(&self, heater: usize) -> f64 {
        self.inner.lock().temperatures.get(heater).copied().unwrap_or(f64::NAN)
    }

    fn raw_reading(&self, heater: usize) -> f64 {
        let temp = self.temperature(heater);
        (temp / 300.0).clamp(0.0, 1.0)
    }
}

/// Stepper enable lines
#[derive(Debug, Clone, Default)]
pub struct SimSteppers {
    inner: Arc<Mutex<Vec<bool>>>,
}

impl SimSteppers {
    pub fn new(num_axes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![false; num_axes])),
        }
    }

    pub fn enabled(&self) -> Vec<bool> {
        self.inner.lock().clone()
    }

    pub fn any_enabled(&self) -> bool {
        self.inner.lock().iter().any(|e| *e)
    }
}

impl StepperDriver for SimSteppers {
    fn enable(&mut self, axis: usize) {
        self.inner.lock()[axis] = true;
    }

    fn disable(&mut self, axis: usize) {
        self.inner.lock()[axis] = false;
    }

    fn emergency(&mut self) {
        self.inner.lock().iter_mut().for_each(|e| *e = false);
    }
}

/// Current driver recording every request
#[derive(Debug, Clone, Default)]
pub struct SimCurrent {
    inner: Arc<Mutex<Vec<(usize, f64)>>>,
}

impl SimCurrent {
    pub fn requests(&self) -> Vec<(usize, f64)> {
        self.inner.lock().clone()
    }
}

impl CurrentControl for SimCurrent {
    fn set_current(&mut self, axis: usize, current: f64) {
        self.inner.lock().push((axis, current));
    }
}

/// Handles to a full set of simulated hardware
#[derive(Debug, Clone)]
pub struct SimMachine {
    pub clock: ManualClock,
    pub planner: SimPlanner,
    pub homer: SimHomer,
    pub steppers: SimSteppers,
    pub thermal: SimThermal,
    pub serial: MemorySerialPort,
    pub storage: RamBlockDevice,
    pub current: SimCurrent,
}

impl SimMachine {
    /// Simulated hardware matching `config`, with an empty storage image
    pub fn new(config: &MachineConfig) -> Self {
        Self::with_storage(config, RamBlockDevice::with_text(""))
    }

    pub fn with_storage(config: &MachineConfig, storage: RamBlockDevice) -> Self {
        let num_axes = config.axes.len();
        Self {
            clock: ManualClock::new(),
            planner: SimPlanner::new(num_axes, config.timing.lookahead_buffer_size),
            homer: SimHomer::new(),
            steppers: SimSteppers::new(num_axes),
            thermal: SimThermal::new(config.heaters.len(), 22.0),
            serial: MemorySerialPort::new(),
            storage,
            current: SimCurrent::default(),
        }
    }

    /// Boxed collaborators for [`crate::Printer::new`], sharing state with
    /// these handles
    pub fn hardware(&self) -> Hardware {
        Hardware {
            clock: Box::new(self.clock.clone()),
            planner: Box::new(self.planner.clone()),
            homer: Box::new(self.homer.clone()),
            steppers: Box::new(self.steppers.clone()),
            sensor: Box::new(self.thermal.clone()),
            serial: Box::new(self.serial.clone()),
            storage: Some(Box::new(self.storage.clone())),
            current: Some(Box::new(self.current.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printkit_motion::{AxesCommand, AxisSplit};

    fn axes(steps: &[i64]) -> PlannerCommand {
        PlannerCommand::Axes(AxesCommand {
            axes: steps
                .iter()
                .map(|&s| AxisSplit {
                    dir: s >= 0,
                    steps: s.unsigned_abs(),
                    max_v_rec: 0.0,
                    max_a_rec: 0.0,
                })
                .collect(),
            rel_max_v_rec: 0.0,
        })
    }

    #[test]
    fn test_stalled_planner_holds_pull() {
        let mut planner = SimPlanner::new(2, 4);
        planner.stall();
        planner.init(false);
        assert_eq!(planner.poll_event(), None);
        planner.release();
        assert_eq!(planner.poll_event(), Some(PlannerEvent::Pull));
        assert_eq!(planner.poll_event(), None);
    }

    #[test]
    fn test_planner_pulls_after_each_submit() {
        let mut planner = SimPlanner::new(2, 4);
        planner.init(false);
        assert_eq!(planner.poll_event(), Some(PlannerEvent::Pull));
        planner.submit(axes(&[10, -5]));
        assert_eq!(planner.poll_event(), Some(PlannerEvent::Pull));
        assert_eq!(planner.buffered(), 1);
        planner.wait_finished();
        assert_eq!(planner.poll_event(), Some(PlannerEvent::Finished));
        assert_eq!(planner.positions(), vec![10, -5]);
    }

    #[test]
    fn test_planner_executes_when_full() {
        let mut planner = SimPlanner::new(1, 1);
        planner.init(false);
        planner.submit(axes(&[1]));
        planner.submit(axes(&[2]));
        assert_eq!(planner.positions(), vec![1]);
        assert_eq!(planner.buffered(), 1);
    }

    #[test]
    fn test_probe_surface_aborts_watched_move() {
        let mut planner = SimPlanner::new(3, 4);
        planner.set_surface(2, 400);
        planner.init(true);
        planner.poll_event();
        planner.submit(axes(&[0, 0, 1000]));
        planner.wait_finished();
        planner.poll_event();
        planner.deinit();

        planner.init(true);
        planner.poll_event();
        planner.submit(axes(&[0, 0, -1000]));
        planner.wait_finished();
        assert_eq!(planner.poll_event(), Some(PlannerEvent::Aborted));
        assert_eq!(planner.poll_event(), None);
        assert_eq!(planner.positions()[2], 400);
        assert_eq!(planner.aborted_rem_steps(2), -400);
    }

    #[test]
    fn test_ram_device_reads_blocks() {
        let mut dev = RamBlockDevice::with_text("G21\n");
        dev.activate();
        assert_eq!(dev.poll_event(), Some(BlockEvent::InitDone(Ok(1))));
        dev.queue_read(0);
        match dev.poll_event() {
            Some(BlockEvent::ReadDone(Ok(block))) => assert_eq!(&block[..4], b"G21\n"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_thermal_cools_without_power() {
        let thermal = SimThermal::new(1, 20.0);
        let cell = HeaterCell::default();
        cell.set(100.0);
        thermal.attach(vec![cell]);
        thermal.set_temperature(0, 120.0);
        thermal.advance(Duration::from_secs(1));
        assert!((thermal.temperature(0) - 119.0).abs() < 1e-9);
    }
}
