//! Fans

use parking_lot::Mutex;
use printkit_core::GcodeCommand;
use printkit_settings::FanSettings;
use std::sync::Arc;

/// Fan power shared with the PWM interrupt
#[derive(Debug, Clone, Default)]
pub struct FanCell(Arc<Mutex<f64>>);

impl FanCell {
    /// Set the power, `0.0..=1.0`
    pub fn set(&self, power: f64) {
        *self.0.lock() = power;
    }

    /// Current power
    pub fn power(&self) -> f64 {
        *self.0.lock()
    }
}

/// One configured fan
#[derive(Debug)]
pub struct Fan {
    index: usize,
    settings: FanSettings,
    cell: FanCell,
}

impl Fan {
    /// Create a fan
    pub fn new(index: usize, settings: FanSettings) -> Self {
        Self {
            index,
            settings,
            cell: FanCell::default(),
        }
    }

    /// Fan index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Configuration
    pub fn settings(&self) -> &FanSettings {
        &self.settings
    }

    /// Shared output cell
    pub fn cell(&self) -> &FanCell {
        &self.cell
    }

    /// Whether this fan handles M-command `number`
    pub fn handles(&self, number: u16) -> bool {
        number == self.settings.set_mcommand || number == self.settings.off_mcommand
    }

    /// Power requested by a set or off command. Set defaults to full
    /// power; `S` is scaled by the speed multiplier.
    pub fn requested_power(&self, command: &GcodeCommand) -> f64 {
        if command.number() != self.settings.set_mcommand {
            return 0.0;
        }
        match command.find_param_fp('S') {
            Some(s) => s * self.settings.speed_multiply,
            None => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printkit_core::GcodePart;

    fn fan() -> Fan {
        Fan::new(
            0,
            FanSettings {
                set_mcommand: 106,
                off_mcommand: 107,
                speed_multiply: 1.0 / 255.0,
            },
        )
    }

    #[test]
    fn test_requested_power() {
        let fan = fan();
        assert_eq!(fan.requested_power(&GcodeCommand::new('M', 106, vec![])), 1.0);
        let half = GcodeCommand::new('M', 106, vec![GcodePart::new('S', "127.5")]);
        assert!((fan.requested_power(&half) - 0.5).abs() < 1e-9);
        assert_eq!(fan.requested_power(&GcodeCommand::new('M', 107, vec![])), 0.0);
        assert!(fan.handles(107));
        assert!(!fan.handles(104));
    }
}
