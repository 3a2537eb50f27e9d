//! Command dispatch
//!
//! [`Printer::work_command`] runs the command held by a channel. A handler
//! that cannot proceed yet (lock held elsewhere, planner busy, split in
//! progress) simply returns; the command stays with its channel and the
//! same handler runs again when the blocking condition clears.

use crate::printer::Printer;
use printkit_communication::{reply, PauseResult};
use printkit_core::{AxisMask, ChannelKind, ControllerError, GcodeCommand, PrinterEvent};
use printkit_motion::{AuxPayload, HomingSession, PlannerCommand};
use std::time::Duration;

/// Wait started by a storage command, completed by a device notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SdWait {
    Mount,
    Pause,
}

impl Printer {
    pub(crate) fn work_command(&mut self, kind: ChannelKind) {
        let Some(cmd) = self.arbiter.command(kind).cloned() else {
            panic!("{} has no command to run", kind);
        };
        tracing::trace!("{}: {}", kind, cmd);

        let handled = match cmd.code() {
            'M' => self.work_m_command(kind, &cmd),
            'G' => self.work_g_command(kind, &cmd),
            _ => false,
        };
        if !handled {
            self.reply(kind, &reply::unknown_command(cmd.code(), cmd.number()));
            self.finish_command(kind, true);
        }
    }

    fn work_m_command(&mut self, kind: ChannelKind, cmd: &GcodeCommand) -> bool {
        match cmd.number() {
            110 => self.finish_command(kind, false),
            17 => {
                if !self.try_unplanned(kind) {
                    return true;
                }
                for axis in 0..self.motion.axes().len() {
                    self.steppers.enable(axis);
                }
                self.now_inactive();
                self.finish_command(kind, false);
            }
            18 | 84 => {
                if !self.try_unplanned(kind) {
                    return true;
                }
                match cmd.find_param_fp('S') {
                    Some(seconds) => {
                        self.inactive_time =
                            Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);
                        if self.disable_timer.is_set() {
                            self.disable_timer
                                .set(self.last_active.saturating_add(self.inactive_time));
                        }
                    }
                    None => {
                        self.disable_all_steppers();
                        self.disable_timer.unset();
                    }
                }
                self.finish_command(kind, false);
            }
            105 => {
                let mut text = String::from("ok");
                for heater in &self.heaters {
                    let temp = self.sensor.temperature(heater.index());
                    text.push_str(&format!(" {}:{}", heater.name(), printkit_core::format_fp(temp)));
                }
                text.push('\n');
                self.reply(kind, &text);
                self.finish_command(kind, true);
            }
            114 => {
                let text = format!("{}\n", self.motion.position_report());
                self.reply(kind, &text);
                self.finish_command(kind, false);
            }
            119 => {
                let mut text = String::from("endstops:");
                for axis in self.motion.axes().iter().filter(|a| a.is_homing()) {
                    let triggered = self.homer.endstop_triggered(axis.index());
                    text.push_str(&format!(" {}:{}", axis.name(), u8::from(triggered)));
                }
                text.push('\n');
                self.reply(kind, &text);
                self.finish_command(kind, true);
            }
            136 => {
                let text: String = self
                    .heaters
                    .iter()
                    .map(|h| format!("{}\n", h.print_config()))
                    .collect();
                self.reply(kind, &text);
                self.finish_command(kind, false);
            }
            920 => {
                let text = format!("{}\n", self.supervisor.underrun_count());
                self.reply(kind, &text);
                self.finish_command(kind, false);
            }
            921 => {
                let mut text = String::from("ok");
                for heater in &self.heaters {
                    let raw = self.sensor.raw_reading(heater.index());
                    text.push_str(&format!(" {}A:{}", heater.name(), printkit_core::format_fp(raw)));
                }
                text.push('\n');
                self.reply(kind, &text);
                self.finish_command(kind, true);
            }
            _ => {
                return self.heater_command(kind, cmd)
                    || self.fan_command(kind, cmd)
                    || self.sd_command(kind, cmd)
                    || self.current_command(kind, cmd);
            }
        }
        true
    }

    fn heater_command(&mut self, kind: ChannelKind, cmd: &GcodeCommand) -> bool {
        let number = cmd.number();
        let Some(index) = self.heaters.iter().position(|h| {
            let s = h.settings();
            number == s.wait_mcommand || number == s.set_mcommand || number == s.set_config_mcommand
        }) else {
            return false;
        };
        let settings = self.heaters[index].settings().clone();

        if number == settings.wait_mcommand {
            if !self.try_unplanned(kind) {
                return true;
            }
            let target = cmd.get_param_fp('S', 0.0);
            let now = self.clock.now();
            let heater = &mut self.heaters[index];
            heater.set_target_now(target);
            heater.start_observer(target, now);
            tracing::info!("Waiting for heater {} to reach {}", heater.name(), target);
            self.now_active();
        } else if number == settings.set_mcommand {
            if !self.try_planned(kind) {
                return true;
            }
            let target = cmd.get_param_fp('S', 0.0);
            self.finish_command(kind, false);
            let payload = AuxPayload::heater_target(&self.heaters[index], target);
            self.submit(PlannerCommand::Channel(payload));
        } else {
            if !self.try_unplanned(kind) {
                return true;
            }
            self.heaters[index].set_config(cmd);
            self.finish_command(kind, false);
        }
        true
    }

    fn fan_command(&mut self, kind: ChannelKind, cmd: &GcodeCommand) -> bool {
        let Some(index) = self.fans.iter().position(|f| f.handles(cmd.number())) else {
            return false;
        };
        if !self.try_planned(kind) {
            return true;
        }
        let power = self.fans[index].requested_power(cmd);
        self.finish_command(kind, false);
        let payload = AuxPayload::fan_power(&self.fans[index], power);
        self.submit(PlannerCommand::Channel(payload));
        true
    }

    fn sd_command(&mut self, kind: ChannelKind, cmd: &GcodeCommand) -> bool {
        if kind == ChannelKind::SdCard || self.sdcard.is_none() {
            return false;
        }
        if !matches!(cmd.number(), 21 | 22 | 24 | 25) {
            return false;
        }
        if !self.try_unplanned(kind) {
            return true;
        }
        let Some(sd) = self.sdcard.as_mut() else {
            return false;
        };
        match cmd.number() {
            21 => {
                if sd.mount() {
                    self.sd_wait = Some(SdWait::Mount);
                } else {
                    self.finish_command(kind, false);
                }
            }
            22 => {
                let unmounted = sd.unmount();
                self.finish_command(kind, false);
                if unmounted {
                    self.arbiter.cancel_locking(ChannelKind::SdCard);
                }
            }
            24 => {
                let started = sd.start();
                self.finish_command(kind, false);
                if started && !self.arbiter.resume_locking(ChannelKind::SdCard) {
                    if let Some(sd) = self.sdcard.as_mut() {
                        sd.kick();
                    }
                }
            }
            _ => match sd.pause() {
                PauseResult::NotRunning => self.finish_command(kind, false),
                result => {
                    self.arbiter.pause_locking(ChannelKind::SdCard);
                    if result == PauseResult::Paused {
                        self.finish_command(kind, false);
                    } else {
                        self.sd_wait = Some(SdWait::Pause);
                    }
                }
            },
        }
        true
    }

    fn current_command(&mut self, kind: ChannelKind, cmd: &GcodeCommand) -> bool {
        let Some(settings) = self.config.current.as_ref() else {
            return false;
        };
        if cmd.number() != 906 {
            return false;
        }
        if let Some(current) = self.current.as_mut() {
            for part in cmd.parts() {
                if !settings.axes.contains(&part.code) {
                    continue;
                }
                if let Some(axis) = self.motion.axes().iter().position(|a| a.name() == part.code) {
                    current.set_current(axis, part.fp_value());
                }
            }
        }
        self.finish_command(kind, false);
        true
    }

    fn work_g_command(&mut self, kind: ChannelKind, cmd: &GcodeCommand) -> bool {
        match cmd.number() {
            0 | 1 => {
                if !self.try_planned(kind) {
                    return true;
                }
                self.motion.move_begin();
                self.motion.collect_command(cmd);
                self.finish_command(kind, false);
                let command = self.motion.move_end(self.steppers.as_mut());
                self.submit(command);
            }
            21 => self.finish_command(kind, false),
            28 => self.start_homing(kind, cmd),
            32 if self.probe_plan.is_some() => {
                if !self.try_unplanned(kind) {
                    return true;
                }
                self.start_probe();
            }
            90 | 91 => {
                self.motion.set_relative(cmd.number() == 91);
                self.finish_command(kind, false);
            }
            92 => {
                if !self.try_split_clear(kind) {
                    return true;
                }
                self.motion.set_position(cmd);
                self.finish_command(kind, false);
            }
            _ => return false,
        }
        true
    }

    fn start_homing(&mut self, kind: ChannelKind, cmd: &GcodeCommand) {
        if !self.try_unplanned(kind) {
            return;
        }
        let mut mask = AxisMask::empty();
        for part in cmd.parts() {
            if let Some(axis) = self
                .motion
                .axes()
                .iter()
                .find(|a| a.name() == part.code && a.is_homing())
            {
                mask.insert(axis.index());
            }
        }
        assert!(self.homing.is_none(), "homing already in progress");
        let mut session = HomingSession::new(mask);
        for index in 0..self.motion.axes().len() {
            if !session.selects(index) {
                continue;
            }
            let Some(params) = self.motion.axis(index).homing_params() else {
                continue;
            };
            self.steppers.enable(index);
            self.motion.start_homing(index);
            self.homer.start(index, &params);
            session.axis_started();
        }
        if session.remaining() == 0 {
            self.finish_command(kind, false);
            return;
        }
        tracing::info!("Homing {} axes", session.remaining());
        self.homing = Some(session);
        self.now_active();
    }

    pub(crate) fn homing_axis_finished(&mut self, axis: usize, success: bool) {
        let Some(session) = self.homing.as_mut() else {
            panic!("homing completion for axis {} outside a homing session", axis);
        };
        if !success {
            let err = ControllerError::HomingFailed {
                axis: self.motion.axis(axis).name(),
            };
            tracing::warn!("{}", err);
            self.events.publish(PrinterEvent::Fault(err));
        }
        let done = session.axis_finished();
        self.motion.finish_homing(axis);
        if !done {
            return;
        }
        self.homing = None;
        self.motion.do_pending_virt_update();
        self.now_inactive();
        self.finish_locked();
        tracing::info!("Homing finished");
        self.events.publish(PrinterEvent::HomingFinished);
    }
}
