//! # PrintKit Core
//!
//! Core types shared by every PrintKit crate: the error taxonomy, the
//! parsed command model handed from tokenizers to channels, axis masks and
//! fixed-point step positions, number formatting for replies, and the
//! printer event bus.

pub mod command;
pub mod error;
pub mod event;
pub mod types;
pub mod units;

pub use command::{GcodeCommand, GcodePart};
pub use error::{ConfigError, ControllerError, Error, GcodeError, Result, StorageError};
pub use event::{ChannelKind, EventDispatcher, PrinterEvent};
pub use types::{AxisMask, StepPosition};
pub use units::{format_fp, time_per_unit_from_feed};
