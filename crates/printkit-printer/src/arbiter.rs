//! Channel arbitration
//!
//! Each command source holds at most one command at a time and moves
//! through `Idle -> Locking -> Locked -> Idle` while executing it. The
//! single global lock is owned by the one channel in `Locked`. When the
//! lock is released, the first channel parked in `Locking` (in the fixed
//! order serial, then storage) gets to retry its command.
//!
//! A streaming channel can be paused while it waits for the lock; pausing
//! drops it back to `Idle` but keeps its command, so resuming picks up the
//! same command again.

use printkit_core::{ChannelKind, GcodeCommand};

/// Execution state of a channel's command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Locking,
    Locked,
}

/// One command source
#[derive(Debug, Clone)]
pub struct ChannelState {
    kind: ChannelKind,
    state: CommandState,
    cmd: Option<GcodeCommand>,
}

impl ChannelState {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            state: CommandState::Idle,
            cmd: None,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn command(&self) -> Option<&GcodeCommand> {
        self.cmd.as_ref()
    }
}

/// Channel states plus the global lock
#[derive(Debug, Clone)]
pub struct Arbiter {
    channels: [ChannelState; 2],
    locked: bool,
    unlocked_pending: bool,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    pub fn new() -> Self {
        Self {
            channels: [
                ChannelState::new(ChannelKind::Serial),
                ChannelState::new(ChannelKind::SdCard),
            ],
            locked: false,
            unlocked_pending: false,
        }
    }

    fn slot(kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Serial => 0,
            ChannelKind::SdCard => 1,
        }
    }

    pub fn channel(&self, kind: ChannelKind) -> &ChannelState {
        &self.channels[Self::slot(kind)]
    }

    fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelState {
        &mut self.channels[Self::slot(kind)]
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn has_command(&self, kind: ChannelKind) -> bool {
        self.channel(kind).cmd.is_some()
    }

    pub fn command(&self, kind: ChannelKind) -> Option<&GcodeCommand> {
        self.channel(kind).cmd.as_ref()
    }

    /// Channel currently owning the lock
    pub fn locked_channel(&self) -> Option<ChannelKind> {
        self.channels
            .iter()
            .find(|c| c.state == CommandState::Locked)
            .map(|c| c.kind)
    }

    /// First channel waiting for the lock, in priority order
    pub fn first_locking(&self) -> Option<ChannelKind> {
        self.channels
            .iter()
            .find(|c| c.state == CommandState::Locking)
            .map(|c| c.kind)
    }

    /// Accept a new command on an idle channel
    pub fn start_command(&mut self, kind: ChannelKind, cmd: GcodeCommand) {
        let channel = self.channel_mut(kind);
        assert_eq!(channel.state, CommandState::Idle, "{} started a command while busy", kind);
        assert!(channel.cmd.is_none(), "{} started a second command", kind);
        channel.cmd = Some(cmd);
    }

    /// Get the lock for `kind`, or park it in `Locking` if another channel
    /// holds it
    pub fn try_locked(&mut self, kind: ChannelKind) -> bool {
        let locked = self.locked;
        let channel = self.channel_mut(kind);
        assert!(channel.cmd.is_some(), "{} asked for the lock without a command", kind);
        assert!(
            channel.state != CommandState::Locking || !locked,
            "{} is locking while the lock is held",
            kind
        );
        assert!(
            channel.state != CommandState::Locked || locked,
            "{} is locked but the lock is free",
            kind
        );

        match channel.state {
            CommandState::Locked => true,
            _ if locked => {
                channel.state = CommandState::Locking;
                false
            }
            _ => {
                channel.state = CommandState::Locked;
                self.locked = true;
                tracing::debug!("Lock taken by {}", kind);
                true
            }
        }
    }

    /// Drop the finished command. Releasing the lock schedules a rescan of
    /// waiting channels.
    pub fn finish_command(&mut self, kind: ChannelKind) -> GcodeCommand {
        let was_locked = self.locked;
        let channel = self.channel_mut(kind);
        assert!(
            matches!(channel.state, CommandState::Idle | CommandState::Locked),
            "{} finished a command while {:?}",
            kind,
            channel.state
        );
        let Some(cmd) = channel.cmd.take() else {
            panic!("{} finished a command it does not have", kind);
        };
        if channel.state == CommandState::Locked {
            assert!(was_locked, "{} released a lock nobody holds", kind);
            channel.state = CommandState::Idle;
            self.locked = false;
            self.unlocked_pending = true;
            tracing::debug!("Lock released by {}", kind);
        }
        cmd
    }

    /// Stop waiting for the lock; the command is kept
    pub fn pause_locking(&mut self, kind: ChannelKind) {
        let channel = self.channel_mut(kind);
        assert!(
            channel.cmd.is_none() || channel.state == CommandState::Locking,
            "{} paused while holding the lock",
            kind
        );
        assert!(
            channel.cmd.is_some() || channel.state == CommandState::Idle,
            "{} is busy without a command",
            kind
        );
        channel.state = CommandState::Idle;
    }

    /// Wait for the lock again with a paused command. Returns false when
    /// there is no command to resume.
    pub fn resume_locking(&mut self, kind: ChannelKind) -> bool {
        let channel = self.channel_mut(kind);
        assert_eq!(channel.state, CommandState::Idle, "{} resumed while busy", kind);
        if channel.cmd.is_none() {
            return false;
        }
        channel.state = CommandState::Locking;
        self.unlocked_pending = true;
        true
    }

    /// Forget a command that never got the lock
    pub fn cancel_locking(&mut self, kind: ChannelKind) {
        let channel = self.channel_mut(kind);
        assert!(channel.state != CommandState::Locked, "{} cancelled while locked", kind);
        channel.state = CommandState::Idle;
        channel.cmd = None;
    }

    /// Consume the request to rescan waiting channels
    pub fn take_unlocked_pending(&mut self) -> bool {
        std::mem::replace(&mut self.unlocked_pending, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd() -> GcodeCommand {
        GcodeCommand::new('G', 21, vec![])
    }

    #[test]
    fn test_second_channel_parks() {
        let mut arb = Arbiter::new();
        arb.start_command(ChannelKind::Serial, cmd());
        arb.start_command(ChannelKind::SdCard, cmd());

        assert!(arb.try_locked(ChannelKind::SdCard));
        assert!(!arb.try_locked(ChannelKind::Serial));
        assert_eq!(arb.channel(ChannelKind::Serial).state(), CommandState::Locking);
        assert_eq!(arb.locked_channel(), Some(ChannelKind::SdCard));

        arb.finish_command(ChannelKind::SdCard);
        assert!(!arb.is_locked());
        assert!(arb.take_unlocked_pending());
        assert_eq!(arb.first_locking(), Some(ChannelKind::Serial));
        assert!(arb.try_locked(ChannelKind::Serial));
    }

    #[test]
    fn test_finish_releases_held_lock() {
        let mut arb = Arbiter::new();
        arb.start_command(ChannelKind::Serial, cmd());
        assert!(arb.try_locked(ChannelKind::Serial));

        let finished = arb.finish_command(ChannelKind::Serial);
        assert_eq!(finished.number(), 21);
        assert!(!arb.is_locked());
        assert_eq!(arb.locked_channel(), None);
        assert_eq!(arb.channel(ChannelKind::Serial).state(), CommandState::Idle);
        assert!(arb.take_unlocked_pending());
    }

    #[test]
    fn test_relock_is_idempotent() {
        let mut arb = Arbiter::new();
        arb.start_command(ChannelKind::Serial, cmd());
        assert!(arb.try_locked(ChannelKind::Serial));
        assert!(arb.try_locked(ChannelKind::Serial));
        assert!(arb.is_locked());
    }

    #[test]
    fn test_finish_without_lock_keeps_lock_state() {
        let mut arb = Arbiter::new();
        arb.start_command(ChannelKind::Serial, cmd());
        arb.finish_command(ChannelKind::Serial);
        assert!(!arb.is_locked());
        assert!(!arb.take_unlocked_pending());
        assert!(!arb.has_command(ChannelKind::Serial));
    }

    #[test]
    fn test_pause_and_resume_keep_command() {
        let mut arb = Arbiter::new();
        arb.start_command(ChannelKind::Serial, cmd());
        arb.start_command(ChannelKind::SdCard, cmd());
        assert!(arb.try_locked(ChannelKind::Serial));
        assert!(!arb.try_locked(ChannelKind::SdCard));

        arb.pause_locking(ChannelKind::SdCard);
        assert_eq!(arb.channel(ChannelKind::SdCard).state(), CommandState::Idle);
        assert!(arb.has_command(ChannelKind::SdCard));

        assert!(arb.resume_locking(ChannelKind::SdCard));
        assert_eq!(arb.channel(ChannelKind::SdCard).state(), CommandState::Locking);

        arb.cancel_locking(ChannelKind::SdCard);
        assert!(!arb.has_command(ChannelKind::SdCard));
        assert!(!arb.resume_locking(ChannelKind::SdCard));
    }

    #[test]
    #[should_panic(expected = "finished a command it does not have")]
    fn test_finish_without_command_panics() {
        let mut arb = Arbiter::new();
        arb.finish_command(ChannelKind::Serial);
    }

    #[test]
    #[should_panic(expected = "started a second command")]
    fn test_double_start_panics() {
        let mut arb = Arbiter::new();
        arb.start_command(ChannelKind::Serial, cmd());
        arb.start_command(ChannelKind::Serial, cmd());
    }
}
