//! # PrintKit
//!
//! Command and motion orchestration core for 3D printer controllers:
//! - Interactive (serial) and storage-backed (SD) command channels
//! - Exclusive channel arbitration under a global lock
//! - A pull-driven planner supervisor with move splitting for delta kinematics
//! - Homing, bed probing, heaters and fans
//!
//! ## Architecture
//!
//! PrintKit is organized as a workspace with multiple crates:
//!
//! 1. **printkit-core** - Errors, parsed commands, step positions, events
//! 2. **printkit-settings** - Machine configuration and persistence
//! 3. **printkit-motion** - Axes, move builder, transform, homing, outputs
//! 4. **printkit-communication** - Tokenizer, serial and SD channels
//! 5. **printkit-printer** - The orchestrator and simulated hardware
//! 6. **printkit** - This crate: logging setup and the simulator binary

pub use printkit_communication::{GcodeParser, SdCardChannel, SerialChannel};
pub use printkit_core::{
    ChannelKind, ConfigError, ControllerError, Error, EventDispatcher, GcodeCommand, GcodeError,
    PrinterEvent, Result, StorageError,
};
pub use printkit_motion::{Motion, MotionPlanner, PlannerCommand, PlannerEvent};
pub use printkit_printer::{sim, Hardware, PlannerState, Printer};
pub use printkit_settings::MachineConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Log lines go to stderr so stdout only carries printer replies. The
/// level defaults to `info` and follows `RUST_LOG` when set.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
