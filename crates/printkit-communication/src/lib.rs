//! # PrintKit Communication
//!
//! Command channels and tokenizing for PrintKit:
//! - a G-code line tokenizer with line numbers and checksums
//! - the interactive serial channel
//! - the SD card channel streaming commands from a block device
//! - the fixed reply texts of the protocol

pub mod channel;
pub mod parser;
pub mod reply;

pub use channel::{
    BlockDevice, BlockEvent, LineNumberError, PauseResult, PollResult, SdCardChannel, SdNext,
    SdNotice, SdState, SerialChannel, SerialPort, BLOCK_SIZE,
};
pub use parser::GcodeParser;
