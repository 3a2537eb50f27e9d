//! Property tests for channel arbitration

use printkit_core::{ChannelKind, GcodeCommand};
use printkit_printer::{Arbiter, CommandState};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Start(ChannelKind),
    Lock(ChannelKind),
    Finish(ChannelKind),
    Pause(ChannelKind),
    Resume(ChannelKind),
    Rescan,
}

fn kind() -> impl Strategy<Value = ChannelKind> {
    prop_oneof![Just(ChannelKind::Serial), Just(ChannelKind::SdCard)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        kind().prop_map(Op::Start),
        kind().prop_map(Op::Lock),
        kind().prop_map(Op::Finish),
        kind().prop_map(Op::Pause),
        kind().prop_map(Op::Resume),
        Just(Op::Rescan),
    ]
}

/// Apply `op` if its preconditions hold
fn apply(arbiter: &mut Arbiter, op: Op) {
    match op {
        Op::Start(k) => {
            let ch = arbiter.channel(k);
            if ch.state() == CommandState::Idle && ch.command().is_none() {
                arbiter.start_command(k, GcodeCommand::new('G', 21, vec![]));
            }
        }
        Op::Lock(k) => {
            let ch = arbiter.channel(k);
            let waiting_while_held = ch.state() == CommandState::Locking && arbiter.is_locked();
            if ch.command().is_some() && !waiting_while_held {
                arbiter.try_locked(k);
            }
        }
        Op::Finish(k) => {
            let ch = arbiter.channel(k);
            if ch.command().is_some() && ch.state() != CommandState::Locking {
                arbiter.finish_command(k);
            }
        }
        Op::Pause(k) => {
            let ch = arbiter.channel(k);
            if ch.state() == CommandState::Locking {
                arbiter.pause_locking(k);
            }
        }
        Op::Resume(k) => {
            if arbiter.channel(k).state() == CommandState::Idle {
                arbiter.resume_locking(k);
            }
        }
        Op::Rescan => {
            if arbiter.take_unlocked_pending() && !arbiter.is_locked() {
                if let Some(k) = arbiter.first_locking() {
                    assert!(arbiter.try_locked(k));
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn test_at_most_one_channel_holds_the_lock(ops in prop::collection::vec(op(), 0..64)) {
        let mut arbiter = Arbiter::new();
        for op in ops {
            apply(&mut arbiter, op);

            let locked = arbiter
                .channels()
                .iter()
                .filter(|c| c.state() == CommandState::Locked)
                .count();
            prop_assert!(locked <= 1);
            prop_assert_eq!(locked == 1, arbiter.is_locked());
            for channel in arbiter.channels() {
                if channel.state() != CommandState::Idle {
                    prop_assert!(channel.command().is_some());
                }
            }
        }
    }
}
