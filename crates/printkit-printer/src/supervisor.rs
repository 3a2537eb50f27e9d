//! Planner supervision
//!
//! The external planner asks for work with a pull and each pull is answered
//! with exactly one submission. The supervisor tracks the session state and
//! the single outstanding pull, and decides what a pull, a completion or an
//! abort means for the command holding the lock:
//!
//! ```text
//! None --planned command--> Running --unplanned command--> Stopping --finished--> None
//!                           Running --no pull ready--> Waiting --pull--> Running
//! None --G32--> Probe --sequence done--> None
//! ```
//!
//! While `Running` with a pull outstanding, a force timer makes the planner
//! execute whatever it buffered if no further command shows up.

use crate::printer::Printer;
use crate::timers::Timer;
use printkit_core::{ChannelKind, PrinterEvent};
use printkit_motion::{PlannerCommand, PlannerEvent};
use std::time::Duration;

/// Planner session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    /// No session
    None,
    /// Commands flow into the planner
    Running,
    /// Draining before an unplanned command
    Stopping,
    /// A planned command waits for the next pull
    Waiting,
    /// The probe sequence owns the planner
    Probe,
}

/// Planner session book-keeping
#[derive(Debug, Clone)]
pub struct Supervisor {
    state: PlannerState,
    pull_pending: bool,
    force_timeout: Duration,
    pub(crate) force_timer: Timer,
    underrun_count: u32,
}

impl Supervisor {
    pub fn new(force_timeout: Duration) -> Self {
        Self {
            state: PlannerState::None,
            pull_pending: false,
            force_timeout,
            force_timer: Timer::default(),
            underrun_count: 0,
        }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn is_pull_pending(&self) -> bool {
        self.pull_pending
    }

    pub fn underrun_count(&self) -> u32 {
        self.underrun_count
    }

    fn set_state(&mut self, state: PlannerState) {
        if self.state != state {
            tracing::debug!("Planner {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn start(&mut self, state: PlannerState) {
        self.set_state(state);
        self.pull_pending = false;
    }

    fn pulled(&mut self) {
        assert!(self.state != PlannerState::None, "planner pull without a session");
        assert!(!self.pull_pending, "planner pulled twice");
        self.pull_pending = true;
    }

    fn submitted(&mut self) {
        assert!(self.state != PlannerState::None, "submission without a session");
        assert!(self.pull_pending, "submission without a pull");
        self.pull_pending = false;
        self.force_timer.unset();
    }
}

impl Printer {
    /// Hand one command to the planner in answer to the outstanding pull
    pub(crate) fn submit(&mut self, command: PlannerCommand) {
        self.supervisor.submitted();
        tracing::trace!("Submit {}", command);
        self.planner.submit(command);
    }

    /// Lock for a command that must run with the planner idle. Parks the
    /// command until a running planner has drained.
    pub(crate) fn try_unplanned(&mut self, kind: ChannelKind) -> bool {
        if !self.arbiter.try_locked(kind) {
            return false;
        }
        let state = self.supervisor.state();
        assert!(
            matches!(state, PlannerState::None | PlannerState::Running),
            "unplanned command with planner {:?}",
            state
        );
        if state == PlannerState::None {
            return true;
        }
        self.supervisor.set_state(PlannerState::Stopping);
        if self.supervisor.pull_pending {
            self.planner.wait_finished();
            self.supervisor.force_timer.unset();
        }
        false
    }

    /// Lock for a command that submits to the planner. Returns true only
    /// with a pull outstanding; otherwise the command is retried on the
    /// next pull.
    pub(crate) fn try_planned(&mut self, kind: ChannelKind) -> bool {
        if !self.arbiter.try_locked(kind) {
            return false;
        }
        let state = self.supervisor.state();
        assert!(
            matches!(state, PlannerState::None | PlannerState::Running),
            "planned command with planner {:?}",
            state
        );
        if state == PlannerState::None {
            self.planner.init(false);
            self.supervisor.start(PlannerState::Running);
            self.now_active();
        }
        if self.supervisor.pull_pending {
            return true;
        }
        self.supervisor.set_state(PlannerState::Waiting);
        false
    }

    /// Lock for a command that must not interleave with a split move
    pub(crate) fn try_split_clear(&mut self, kind: ChannelKind) -> bool {
        self.arbiter.try_locked(kind) && self.motion.try_split_clear()
    }

    pub(crate) fn handle_planner_event(&mut self, event: PlannerEvent) {
        match event {
            PlannerEvent::Pull => self.planner_pull(),
            PlannerEvent::Finished => self.planner_finished(),
            PlannerEvent::Aborted => self.planner_aborted(),
            PlannerEvent::Underrun => {
                self.supervisor.underrun_count += 1;
                tracing::warn!("Planner underrun #{}", self.supervisor.underrun_count);
                self.events
                    .publish(PrinterEvent::PlannerUnderrun(self.supervisor.underrun_count));
            }
            PlannerEvent::Channel(payload) => {
                tracing::debug!("Side channel: {}", payload);
                payload.apply(&self.heaters, &self.fans);
            }
        }
    }

    fn planner_pull(&mut self) {
        self.supervisor.pulled();
        if self.motion.is_splitting() {
            let command = self.motion.split_more(self.steppers.as_mut());
            self.submit(command);
            if self.motion.take_splitclear_pending() {
                assert!(self.arbiter.is_locked(), "split-clear without a lock");
                assert_eq!(self.supervisor.state(), PlannerState::Running);
                self.continue_locked();
            }
            return;
        }
        match self.supervisor.state() {
            PlannerState::Stopping => self.planner.wait_finished(),
            PlannerState::Waiting => {
                self.supervisor.set_state(PlannerState::Running);
                self.continue_locked();
            }
            PlannerState::Running => {
                let at = self.clock.now() + self.supervisor.force_timeout;
                self.supervisor.force_timer.set(at);
            }
            PlannerState::Probe => self.probe_pull(),
            PlannerState::None => unreachable!("pull checked against a missing session"),
        }
    }

    fn planner_finished(&mut self) {
        let state = self.supervisor.state();
        assert!(state != PlannerState::None, "planner finished without a session");
        assert!(self.supervisor.pull_pending, "planner finished without a pull");
        assert!(state != PlannerState::Waiting, "planner finished while a command waits");

        if state == PlannerState::Probe {
            self.probe_finished();
            return;
        }
        self.planner.deinit();
        self.supervisor.force_timer.unset();
        self.supervisor.set_state(PlannerState::None);
        self.now_inactive();
        if state == PlannerState::Stopping {
            self.continue_locked();
        }
    }

    fn planner_aborted(&mut self) {
        assert_eq!(
            self.supervisor.state(),
            PlannerState::Probe,
            "abort outside the probe sequence"
        );
        let planner = &self.planner;
        self.motion.fix_aborted_pos(|axis| planner.aborted_rem_steps(axis));
        self.motion.abort_split();
        self.motion.do_pending_virt_update();
        self.probe_finished();
    }

    pub(crate) fn force_timer_expired(&mut self) {
        assert_eq!(self.supervisor.state(), PlannerState::Running);
        assert!(self.supervisor.pull_pending, "force timer without a pull");
        tracing::trace!("Forcing planner to execute buffered moves");
        self.planner.wait_finished();
    }

    /// Begin an exclusive planner session for the probe sequence
    pub(crate) fn custom_planner_init(&mut self, watch_probe: bool) {
        assert!(self.arbiter.is_locked(), "probe planner without a lock");
        assert_eq!(self.supervisor.state(), PlannerState::None);
        self.planner.init(watch_probe);
        self.supervisor.start(PlannerState::Probe);
        self.now_active();
    }

    pub(crate) fn custom_planner_deinit(&mut self) {
        assert_eq!(self.supervisor.state(), PlannerState::Probe);
        self.planner.deinit();
        self.supervisor.set_state(PlannerState::None);
        self.now_inactive();
    }

    pub(crate) fn custom_wait_finished(&mut self) {
        assert!(self.supervisor.pull_pending, "probe drain without a pull");
        self.planner.wait_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_then_submit() {
        let mut sup = Supervisor::new(Duration::from_millis(100));
        sup.start(PlannerState::Running);
        sup.pulled();
        assert!(sup.is_pull_pending());
        sup.force_timer.set(Duration::from_secs(1));
        sup.submitted();
        assert!(!sup.is_pull_pending());
        assert!(!sup.force_timer.is_set());
    }

    #[test]
    #[should_panic(expected = "planner pulled twice")]
    fn test_double_pull_is_fatal() {
        let mut sup = Supervisor::new(Duration::from_millis(100));
        sup.start(PlannerState::Running);
        sup.pulled();
        sup.pulled();
    }

    #[test]
    #[should_panic(expected = "submission without a pull")]
    fn test_submit_without_pull_is_fatal() {
        let mut sup = Supervisor::new(Duration::from_millis(100));
        sup.start(PlannerState::Running);
        sup.submitted();
    }
}
