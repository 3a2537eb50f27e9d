//! The orchestrator
//!
//! [`Printer`] owns every piece of controller state and all collaborators.
//! It runs on a single thread: [`Printer::run_once`] handles one round of
//! pending work (deferred lock hand-over, planner, homer and storage
//! callbacks, serial input, timers) and every handler runs to completion
//! before the next one starts.

use crate::arbiter::Arbiter;
use crate::commands::SdWait;
use crate::hardware::{CurrentControl, Hardware};
use crate::probe::{ProbePlan, ProbeSession};
use crate::supervisor::{PlannerState, Supervisor};
use crate::timers::{Clock, Timer};
use printkit_communication::{reply, PollResult, SdCardChannel, SdNext, SdNotice, SerialChannel};
use printkit_core::{
    ChannelKind, ConfigError, EventDispatcher, GcodeCommand, PrinterEvent, Result,
};
use printkit_motion::{
    Fan, Heater, HomingSession, Homer, Motion, MotionPlanner, StepperDriver, TemperatureSensor,
};
use printkit_settings::MachineConfig;
use std::time::Duration;
use tokio::sync::broadcast;

/// Period of the simulated PWM interrupt
const PWM_TICK: Duration = Duration::from_millis(10);

/// Upper bound on rounds run by [`Printer::run_until_idle`]
const MAX_IDLE_ROUNDS: usize = 1_000_000;

/// Command and motion orchestrator
pub struct Printer {
    pub(crate) config: MachineConfig,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) planner: Box<dyn MotionPlanner>,
    pub(crate) homer: Box<dyn Homer>,
    pub(crate) steppers: Box<dyn StepperDriver>,
    pub(crate) sensor: Box<dyn TemperatureSensor>,
    pub(crate) current: Option<Box<dyn CurrentControl>>,
    pub(crate) serial: SerialChannel,
    pub(crate) sdcard: Option<SdCardChannel>,
    pub(crate) arbiter: Arbiter,
    pub(crate) supervisor: Supervisor,
    pub(crate) motion: Motion,
    pub(crate) heaters: Vec<Heater>,
    pub(crate) fans: Vec<Fan>,
    pub(crate) homing: Option<HomingSession>,
    pub(crate) probe: Option<ProbeSession>,
    pub(crate) probe_plan: Option<ProbePlan>,
    pub(crate) probe_samples: Vec<Option<f64>>,
    pub(crate) sd_wait: Option<SdWait>,
    pub(crate) inactive_time: Duration,
    pub(crate) last_active: Duration,
    pub(crate) disable_timer: Timer,
    pwm_timer: Timer,
    pub(crate) events: EventDispatcher,
}

impl Printer {
    /// Build the printer for `config` and greet on the serial channel
    pub fn new(config: MachineConfig, hardware: Hardware) -> Result<Self> {
        config.validate()?;
        let Hardware {
            clock,
            planner,
            homer,
            steppers,
            sensor,
            serial,
            storage,
            current,
        } = hardware;

        let motion = Motion::from_config(&config)?;
        let sdcard = match (&config.storage, storage) {
            (Some(settings), Some(device)) => Some(SdCardChannel::new(
                device,
                settings,
                config.serial.max_parts,
            )),
            (Some(_), None) => return Err(ConfigError::Missing("storage device".to_string()).into()),
            (None, _) => None,
        };
        if config.current.is_some() && current.is_none() {
            return Err(ConfigError::Missing("current control driver".to_string()).into());
        }
        let probe_plan = match &config.probe {
            Some(settings) => Some(ProbePlan::new(settings.clone(), &motion)?),
            None => None,
        };
        let probe_samples = vec![None; probe_plan.as_ref().map_or(0, |p| p.num_points())];

        let now = clock.now();
        let mut heaters: Vec<Heater> = config
            .heaters
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, s)| Heater::new(i, s))
            .collect();
        for heater in &mut heaters {
            heater.start_control(now);
        }
        let fans = config
            .fans
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, s)| Fan::new(i, s))
            .collect();

        let mut pwm_timer = Timer::default();
        pwm_timer.set(now + PWM_TICK);

        let mut printer = Self {
            clock,
            planner,
            homer,
            steppers,
            sensor,
            current,
            serial: SerialChannel::new(serial, &config.serial),
            sdcard,
            arbiter: Arbiter::new(),
            supervisor: Supervisor::new(Duration::from_secs_f64(config.timing.force_timeout_s)),
            motion,
            heaters,
            fans,
            homing: None,
            probe: None,
            probe_plan,
            probe_samples,
            sd_wait: None,
            inactive_time: Duration::from_secs_f64(config.timing.inactive_time_s),
            last_active: now,
            disable_timer: Timer::default(),
            pwm_timer,
            events: EventDispatcher::new(config.timing.event_channel_buffer_size),
            config,
        };

        printer.serial.reply(reply::BANNER);
        printer.flush(ChannelKind::Serial);
        tracing::info!("Printer started on {}", printer.serial.port_name());
        printer.events.publish(PrinterEvent::Booted);
        Ok(printer)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    pub fn heaters(&self) -> &[Heater] {
        &self.heaters
    }

    pub fn fans(&self) -> &[Fan] {
        &self.fans
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn planner_state(&self) -> PlannerState {
        self.supervisor.state()
    }

    pub fn is_pull_pending(&self) -> bool {
        self.supervisor.is_pull_pending()
    }

    pub fn underrun_count(&self) -> u32 {
        self.supervisor.underrun_count()
    }

    pub fn sdcard(&self) -> Option<&SdCardChannel> {
        self.sdcard.as_ref()
    }

    pub fn homing(&self) -> Option<&HomingSession> {
        self.homing.as_ref()
    }

    pub fn probe(&self) -> Option<&ProbeSession> {
        self.probe.as_ref()
    }

    /// Heights measured by the last probe run, one per point
    pub fn probe_samples(&self) -> &[Option<f64>] {
        &self.probe_samples
    }

    /// Seconds of inactivity before steppers are disabled
    pub fn inactive_time(&self) -> Duration {
        self.inactive_time
    }

    pub fn disable_deadline(&self) -> Option<Duration> {
        self.disable_timer.deadline()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Handle one round of pending work. Returns false when nothing was
    /// pending.
    pub fn run_once(&mut self) -> bool {
        if self.arbiter.take_unlocked_pending() {
            self.unlocked();
            return true;
        }
        if let Some(event) = self.planner.poll_event() {
            self.handle_planner_event(event);
            return true;
        }
        if let Some(event) = self.homer.poll_event() {
            self.homing_axis_finished(event.axis, event.success);
            return true;
        }
        if self.poll_storage() {
            return true;
        }

        let mut worked = self.poll_serial();
        worked |= self.run_timers();
        worked
    }

    /// Run until nothing is pending. Returns the number of busy rounds.
    pub fn run_until_idle(&mut self) -> usize {
        let mut rounds = 0;
        while rounds < MAX_IDLE_ROUNDS && self.run_once() {
            rounds += 1;
        }
        if rounds == MAX_IDLE_ROUNDS {
            tracing::warn!("Printer still busy after {} rounds", rounds);
        }
        rounds
    }

    /// Force every output off
    pub fn emergency(&mut self) {
        tracing::error!("Emergency stop");
        self.steppers.emergency();
        for heater in &self.heaters {
            heater.cell().emergency();
        }
        for fan in &self.fans {
            fan.cell().set(0.0);
        }
    }

    fn unlocked(&mut self) {
        if self.arbiter.is_locked() {
            return;
        }
        if let Some(kind) = self.arbiter.first_locking() {
            self.work_command(kind);
        }
    }

    fn poll_storage(&mut self) -> bool {
        let has_command = self.arbiter.has_command(ChannelKind::SdCard);
        let Some(sd) = self.sdcard.as_mut() else {
            return false;
        };
        match sd.poll_device(has_command) {
            PollResult::Idle => {}
            PollResult::Handled => return true,
            PollResult::Notice(notice) => {
                self.storage_notice(notice);
                return true;
            }
        }
        if sd.take_next_event() {
            self.storage_next();
            return true;
        }
        false
    }

    fn storage_notice(&mut self, notice: SdNotice) {
        match notice {
            SdNotice::Mounted(result) => {
                assert_eq!(self.sd_wait.take(), Some(SdWait::Mount), "unexpected mount completion");
                let text = match result {
                    Ok(blocks) => {
                        self.events.publish(PrinterEvent::StorageMounted { blocks });
                        format!("SD blocks {}\n", blocks)
                    }
                    Err(e) => format!("{}\n", e),
                };
                self.reply_locked(&text);
                self.finish_locked();
            }
            SdNotice::Paused => {
                assert_eq!(self.sd_wait.take(), Some(SdWait::Pause), "unexpected pause completion");
                self.finish_locked();
            }
            SdNotice::Message(text) => {
                self.serial.reply(text);
                self.flush(ChannelKind::Serial);
            }
        }
    }

    fn storage_next(&mut self) {
        assert!(
            !self.arbiter.has_command(ChannelKind::SdCard),
            "storage produced a command while busy"
        );
        let Some(sd) = self.sdcard.as_mut() else {
            return;
        };
        match sd.next_command() {
            SdNext::Wait => {}
            SdNext::Command(cmd) => self.start_command(ChannelKind::SdCard, cmd),
            SdNext::End(text) => {
                self.serial.reply(text);
                self.flush(ChannelKind::Serial);
                self.events.publish(PrinterEvent::StorageEof);
            }
        }
    }

    fn poll_serial(&mut self) -> bool {
        let received = match self.serial.poll_port() {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("Serial read failed: {}", e);
                false
            }
        };
        if self.arbiter.has_command(ChannelKind::Serial) {
            return received;
        }
        match self.serial.next_command() {
            Some(cmd) => {
                self.start_command(ChannelKind::Serial, cmd);
                true
            }
            None => received,
        }
    }

    fn run_timers(&mut self) -> bool {
        let now = self.clock.now();
        let mut worked = false;

        if self.supervisor.force_timer.take_expired(now) {
            self.force_timer_expired();
            worked = true;
        }
        if self.disable_timer.take_expired(now) {
            tracing::info!("Inactive for {:?}, disabling steppers", self.inactive_time);
            self.disable_all_steppers();
            self.events.publish(PrinterEvent::SteppersDisabled);
            worked = true;
        }
        for i in 0..self.heaters.len() {
            if self.heaters[i].next_control().is_some_and(|at| at <= now) {
                self.heaters[i].control_step(self.sensor.as_ref());
                worked = true;
            }
            let due = self.heaters[i].observer().is_some_and(|o| o.next_sample() <= now);
            if due && self.heaters[i].observer_step(now, self.sensor.as_ref()) {
                tracing::info!("Heater {} reached its target", self.heaters[i].name());
                self.now_inactive();
                self.finish_locked();
            }
            worked |= due;
        }
        if self.pwm_timer.take_expired(now) {
            for heater in &self.heaters {
                let power = heater.pwm_tick(self.sensor.temperature(heater.index()));
                tracing::trace!(heater = heater.index(), power, "pwm");
            }
            self.pwm_timer.set(now + PWM_TICK);
        }
        worked
    }

    /// Accept a command from a channel and run it
    pub(crate) fn start_command(&mut self, kind: ChannelKind, cmd: GcodeCommand) {
        let error = cmd.error();
        let line = match (kind, error) {
            (ChannelKind::Serial, None) => self.serial.start_command(&cmd),
            _ => Ok(()),
        };
        self.arbiter.start_command(kind, cmd);

        if let Some(error) = error {
            self.reply(kind, &reply::parse_error(error));
            self.finish_command(kind, true);
            return;
        }
        if let Err(e) = line {
            self.reply(kind, &format!("Error:{}\n", e));
            self.finish_command(kind, true);
            return;
        }
        self.work_command(kind);
    }

    /// End the command of `kind`, replying `ok` unless `no_ok`
    pub(crate) fn finish_command(&mut self, kind: ChannelKind, no_ok: bool) {
        let cmd = self.arbiter.finish_command(kind);
        match kind {
            ChannelKind::Serial => {
                self.serial.finish_command(cmd.length(), no_ok);
                self.flush(kind);
            }
            ChannelKind::SdCard => {
                if let Some(sd) = self.sdcard.as_mut() {
                    sd.finish_command(cmd.length());
                }
            }
        }
        self.events.publish(PrinterEvent::CommandFinished(kind));
    }

    /// Finish whichever command holds the lock
    pub(crate) fn finish_locked(&mut self) {
        let Some(kind) = self.arbiter.locked_channel() else {
            panic!("no channel holds the lock");
        };
        self.finish_command(kind, false);
    }

    /// Re-run the command holding the lock
    pub(crate) fn continue_locked(&mut self) {
        let Some(kind) = self.arbiter.locked_channel() else {
            panic!("no channel holds the lock");
        };
        self.work_command(kind);
    }

    pub(crate) fn reply(&mut self, kind: ChannelKind, text: &str) {
        match kind {
            ChannelKind::Serial => self.serial.reply(text),
            ChannelKind::SdCard => tracing::trace!("Discarding storage reply: {}", text.trim_end()),
        }
    }

    fn reply_locked(&mut self, text: &str) {
        if let Some(kind) = self.arbiter.locked_channel() {
            self.reply(kind, text);
        }
    }

    pub(crate) fn flush(&mut self, kind: ChannelKind) {
        if kind != ChannelKind::Serial {
            return;
        }
        if let Err(e) = self.serial.flush() {
            tracing::warn!("Serial write failed: {}", e);
        }
    }

    pub(crate) fn now_active(&mut self) {
        self.disable_timer.unset();
    }

    pub(crate) fn now_inactive(&mut self) {
        let now = self.clock.now();
        self.last_active = now;
        self.disable_timer.set(now.saturating_add(self.inactive_time));
    }

    pub(crate) fn disable_all_steppers(&mut self) {
        for axis in 0..self.motion.axes().len() {
            self.steppers.disable(axis);
        }
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer")
            .field("arbiter", &self.arbiter)
            .field("supervisor", &self.supervisor)
            .field("motion", &self.motion)
            .field("homing", &self.homing)
            .field("probe", &self.probe)
            .field("sd_wait", &self.sd_wait)
            .finish()
    }
}
