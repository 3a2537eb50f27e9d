//! Heaters
//!
//! A heater is split between two execution contexts. The control loop runs
//! on the orchestrator and computes an output power; the PWM tick runs at
//! interrupt priority, reads that power and cuts the output when the
//! measured temperature leaves the safe range. The only state they share is
//! the [`HeaterCell`].

use parking_lot::Mutex;
use printkit_core::GcodeCommand;
use printkit_settings::{HeaterSettings, ObserverSettings};
use std::sync::Arc;
use std::time::Duration;

/// Heater state shared with the PWM interrupt
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeaterShared {
    /// Output is allowed
    pub enabled: bool,
    /// Target temperature
    pub target: f64,
    /// The control loop has seen the heater enabled since the last unset
    pub was_not_unset: bool,
    /// Power driven by the PWM, `0.0..=1.0`
    pub output_power: f64,
}

/// Cross-context cell guarding [`HeaterShared`]
///
/// Every access takes the lock for a handful of field copies, the
/// equivalent of a short interrupts-disabled section.
#[derive(Debug, Clone, Default)]
pub struct HeaterCell(Arc<Mutex<HeaterShared>>);

impl HeaterCell {
    /// Enable the heater with a new target
    pub fn set(&self, target: f64) {
        let mut shared = self.0.lock();
        shared.target = target;
        shared.enabled = true;
    }

    /// Disable the heater and zero its output
    pub fn unset(&self) {
        let mut shared = self.0.lock();
        shared.enabled = false;
        shared.was_not_unset = false;
        shared.output_power = 0.0;
    }

    /// Copy of the shared fields
    pub fn snapshot(&self) -> HeaterShared {
        *self.0.lock()
    }

    /// Start of a control step: returns `(enabled, target, was_not_unset)`
    /// and records whether the heater is enabled now
    fn begin_control(&self) -> (bool, f64, bool) {
        let mut shared = self.0.lock();
        let result = (shared.enabled, shared.target, shared.was_not_unset);
        shared.was_not_unset = shared.enabled;
        result
    }

    /// End of a control step; the power is dropped if the heater was unset
    /// in the meantime
    fn publish_power(&self, power: f64) {
        let mut shared = self.0.lock();
        if shared.was_not_unset {
            shared.output_power = power;
        }
    }

    /// Interrupt-side PWM tick. Disables the heater when the measured
    /// temperature is not within `min_safe..=max_safe` and returns the
    /// power to drive.
    pub fn pwm_tick(&self, temperature: f64, min_safe: f64, max_safe: f64) -> f64 {
        let mut shared = self.0.lock();
        if !(temperature > min_safe && temperature < max_safe) {
            shared.enabled = false;
            shared.was_not_unset = false;
            shared.output_power = 0.0;
        }
        shared.output_power
    }

    /// Force the output off regardless of context
    pub fn emergency(&self) {
        self.unset();
    }
}

/// Temperature source
pub trait TemperatureSensor: Send {
    /// Current temperature of a heater
    fn temperature(&self, heater: usize) -> f64;

    /// Raw converter reading of a heater, `0.0..1.0`
    fn raw_reading(&self, heater: usize) -> f64;
}

/// Heater control law
pub trait HeaterControl: Send {
    /// Reset internal state; called when the heater becomes enabled
    fn reset(&mut self);

    /// Output power for one measurement
    fn add_measurement(&mut self, temperature: f64, target: f64) -> f64;

    /// Apply configuration parameters from a command
    fn set_config(&mut self, command: &GcodeCommand);

    /// Configuration as command parameters, e.g. ` H2 P1`
    fn print_config(&self) -> String;
}

/// Two-level control with hysteresis
#[derive(Debug, Clone, PartialEq)]
pub struct BangBangControl {
    /// Half-width of the dead band around the target
    pub hysteresis: f64,
    /// Power used while below the band
    pub high_power: f64,
    heating: bool,
}

impl Default for BangBangControl {
    fn default() -> Self {
        Self {
            hysteresis: 2.0,
            high_power: 1.0,
            heating: false,
        }
    }
}

impl HeaterControl for BangBangControl {
    fn reset(&mut self) {
        self.heating = false;
    }

    fn add_measurement(&mut self, temperature: f64, target: f64) -> f64 {
        if temperature < target - self.hysteresis {
            self.heating = true;
        } else if temperature > target + self.hysteresis {
            self.heating = false;
        }
        if self.heating {
            self.high_power
        } else {
            0.0
        }
    }

    fn set_config(&mut self, command: &GcodeCommand) {
        self.hysteresis = command.get_param_fp('H', self.hysteresis).max(0.0);
        self.high_power = command.get_param_fp('P', self.high_power).clamp(0.0, 1.0);
    }

    fn print_config(&self) -> String {
        format!(
            " H{} P{}",
            printkit_core::format_fp(self.hysteresis),
            printkit_core::format_fp(self.high_power)
        )
    }
}

/// Waits until a temperature stays near a target for a while
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureObserver {
    target: f64,
    settings: ObserverSettings,
    in_range_since: Option<Duration>,
    next_sample: Duration,
}

impl TemperatureObserver {
    /// Start observing at `now`
    pub fn new(target: f64, settings: ObserverSettings, now: Duration) -> Self {
        let next_sample = now + Duration::from_secs_f64(settings.interval_s);
        Self {
            target,
            settings,
            in_range_since: None,
            next_sample,
        }
    }

    /// Target being observed
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Time of the next sample
    pub fn next_sample(&self) -> Duration {
        self.next_sample
    }

    /// Take one sample; returns `true` once the temperature has stayed in
    /// tolerance for the configured time
    pub fn sample(&mut self, now: Duration, temperature: f64) -> bool {
        self.next_sample += Duration::from_secs_f64(self.settings.interval_s);
        if (temperature - self.target).abs() <= self.settings.tolerance {
            let since = *self.in_range_since.get_or_insert(now);
            now.saturating_sub(since).as_secs_f64() >= self.settings.min_time_s
        } else {
            self.in_range_since = None;
            false
        }
    }
}

/// One configured heater
pub struct Heater {
    index: usize,
    settings: HeaterSettings,
    cell: HeaterCell,
    control: Box<dyn HeaterControl>,
    observer: Option<TemperatureObserver>,
    next_control: Option<Duration>,
}

impl Heater {
    /// Create a heater with bang-bang control
    pub fn new(index: usize, settings: HeaterSettings) -> Self {
        Self::with_control(index, settings, Box::new(BangBangControl::default()))
    }

    /// Create a heater with a custom control law
    pub fn with_control(index: usize, settings: HeaterSettings, control: Box<dyn HeaterControl>) -> Self {
        Self {
            index,
            settings,
            cell: HeaterCell::default(),
            control,
            observer: None,
            next_control: None,
        }
    }

    /// Heater index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name letter
    pub fn name(&self) -> char {
        self.settings.name
    }

    /// Configuration
    pub fn settings(&self) -> &HeaterSettings {
        &self.settings
    }

    /// Shared output cell
    pub fn cell(&self) -> &HeaterCell {
        &self.cell
    }

    /// Whether `target` lies within the safe range
    pub fn is_safe_target(&self, target: f64) -> bool {
        target >= self.settings.min_safe_temp && target <= self.settings.max_safe_temp
    }

    /// Apply a target immediately, disabling the heater if it is unsafe
    pub fn set_target_now(&self, target: f64) {
        if self.is_safe_target(target) {
            self.cell.set(target);
        } else {
            tracing::warn!("Heater {}: unsafe target {}, disabling", self.name(), target);
            self.cell.unset();
        }
    }

    /// Schedule the control loop, first run shortly after `now`
    pub fn start_control(&mut self, now: Duration) {
        let offset = 0.05 + 0.6 * self.settings.control_interval_s;
        self.next_control = Some(now + Duration::from_secs_f64(offset));
    }

    /// Time the control loop runs next
    pub fn next_control(&self) -> Option<Duration> {
        self.next_control
    }

    /// Run one control step and schedule the next
    pub fn control_step(&mut self, sensor: &dyn TemperatureSensor) {
        if let Some(at) = self.next_control {
            self.next_control = Some(at + Duration::from_secs_f64(self.settings.control_interval_s));
        }
        let (enabled, target, was_not_unset) = self.cell.begin_control();
        if !enabled {
            return;
        }
        if !was_not_unset {
            self.control.reset();
        }
        let temperature = sensor.temperature(self.index);
        let power = self.control.add_measurement(temperature, target).clamp(0.0, 1.0);
        self.cell.publish_power(power);
    }

    /// Interrupt-side tick for this heater
    pub fn pwm_tick(&self, temperature: f64) -> f64 {
        self.cell
            .pwm_tick(temperature, self.settings.min_safe_temp, self.settings.max_safe_temp)
    }

    /// Begin waiting for `target`
    pub fn start_observer(&mut self, target: f64, now: Duration) {
        assert!(self.observer.is_none(), "heater {} already observed", self.name());
        self.observer = Some(TemperatureObserver::new(target, self.settings.observer.clone(), now));
    }

    /// Active observer, if any
    pub fn observer(&self) -> Option<&TemperatureObserver> {
        self.observer.as_ref()
    }

    /// Sample the observer; returns `true` and drops it once satisfied
    pub fn observer_step(&mut self, now: Duration, sensor: &dyn TemperatureSensor) -> bool {
        let temperature = sensor.temperature(self.index);
        let done = match self.observer.as_mut() {
            Some(observer) => observer.sample(now, temperature),
            None => return false,
        };
        if done {
            self.observer = None;
        }
        done
    }

    /// Apply control configuration
    pub fn set_config(&mut self, command: &GcodeCommand) {
        self.control.set_config(command);
    }

    /// Control configuration as a command line, without the newline
    pub fn print_config(&self) -> String {
        format!("M{}{}", self.settings.set_config_mcommand, self.control.print_config())
    }
}

impl std::fmt::Debug for Heater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heater")
            .field("index", &self.index)
            .field("name", &self.settings.name)
            .field("shared", &self.cell.snapshot())
            .finish()
    }
}
