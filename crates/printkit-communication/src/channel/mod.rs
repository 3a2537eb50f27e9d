//! Command sources
//!
//! Each channel turns its input into [`printkit_core::GcodeCommand`]s and
//! consumes a command's bytes once the printer finishes it. Locking and
//! dispatch live in the printer; channels only handle their transport.

pub mod sdcard;
pub mod serial;

pub use sdcard::{
    BlockDevice, BlockEvent, PauseResult, PollResult, SdCardChannel, SdNext, SdNotice, SdState,
    BLOCK_SIZE,
};
pub use serial::{LineNumberError, SerialChannel, SerialPort};
