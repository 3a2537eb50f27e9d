//! # PrintKit Printer
//!
//! The single-threaded orchestrator tying PrintKit together:
//!
//! - channel arbitration under one global lock ([`arbiter`])
//! - the planner supervisor answering pulls, drains and aborts ([`supervisor`])
//! - command dispatch for the supported M and G codes ([`commands`])
//! - bed probing ([`probe`])
//! - the event loop itself ([`printer::Printer`])
//! - simulated hardware for the simulator and tests ([`sim`])

pub mod arbiter;
pub mod commands;
pub mod hardware;
pub mod printer;
pub mod probe;
pub mod sim;
pub mod supervisor;
pub mod timers;

pub use arbiter::{Arbiter, ChannelState, CommandState};
pub use hardware::{CurrentControl, Hardware};
pub use printer::Printer;
pub use probe::{ProbePlan, ProbeSession};
pub use supervisor::{PlannerState, Supervisor};
pub use timers::{Clock, ManualClock, SystemClock, Timer};
