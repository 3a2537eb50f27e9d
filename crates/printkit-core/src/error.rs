//! Error handling for PrintKit
//!
//! Provides error types for all layers of the controller:
//! - G-Code errors (tokenizing/validation of a received line)
//! - Configuration errors (machine description)
//! - Storage errors (block device backing the SD channel)
//! - Controller errors (collaborator failures published as events)
//!
//! All error types use `thiserror` for ergonomic error handling.
//! Invariant violations inside the orchestrator are not represented here:
//! they are programming defects and halt the controller.

use thiserror::Error;

/// G-Code error type
///
/// Represents the ways a received line can fail to become a command.
/// The `Display` text is exactly the reason sent back after `Error:`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcodeError {
    /// The line contained no command letter at all
    #[error("empty command")]
    EmptyCommand,

    /// The line had more parameters than the parser accepts
    #[error("too many parts")]
    TooManyParts,

    /// A parameter was not a letter followed by a value
    #[error("invalid part")]
    InvalidPart,

    /// The `*` checksum did not match the line contents
    #[error("incorrect checksum")]
    Checksum,

    /// Bytes were lost because the receive buffer overflowed
    #[error("receive buffer overrun")]
    RecvOverrun,

    /// End-of-file marker in a stored program
    #[error("end of file")]
    Eof,
}

/// Configuration error type
///
/// Raised when a machine description cannot be used as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required section or list is empty
    #[error("Missing configuration: {0}")]
    Missing(String),

    /// Two entries share a name that must be unique
    #[error("Duplicate axis name '{0}'")]
    DuplicateAxis(char),

    /// A name refers to an axis that does not exist
    #[error("Unknown axis '{0}'")]
    UnknownAxis(char),

    /// A value is outside of its valid range
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// The setting with the invalid value.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Storage error type
///
/// Errors reported by the block device behind the SD channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Card initialization failed with a driver-specific code
    #[error("SD error {0}")]
    Init(u8),

    /// A block read failed; the channel retries the same block
    #[error("Read error at block {block}")]
    Read {
        /// The block that could not be read.
        block: u32,
    },
}

/// Controller error type
///
/// Represents failures of external collaborators that are published on the
/// event bus rather than treated as defects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Homing of an axis did not complete successfully
    #[error("Homing failed on axis {axis}")]
    HomingFailed {
        /// The axis that failed to home.
        axis: char,
    },
}

/// Main error type for PrintKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a G-Code error
    pub fn is_gcode_error(&self) -> bool {
        matches!(self, Error::Gcode(_))
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this is a storage error
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcode_error_reasons_match_protocol() {
        assert_eq!(GcodeError::EmptyCommand.to_string(), "empty command");
        assert_eq!(GcodeError::TooManyParts.to_string(), "too many parts");
        assert_eq!(GcodeError::InvalidPart.to_string(), "invalid part");
        assert_eq!(GcodeError::Checksum.to_string(), "incorrect checksum");
        assert_eq!(GcodeError::RecvOverrun.to_string(), "receive buffer overrun");
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ConfigError::DuplicateAxis('X').into();
        assert!(err.is_config_error());
        assert_eq!(err.to_string(), "Duplicate axis name 'X'");

        let err: Error = ControllerError::HomingFailed { axis: 'Z' }.into();
        assert_eq!(err.to_string(), "Homing failed on axis Z");

        let err: Error = StorageError::Init(3).into();
        assert!(err.is_storage_error());
        assert_eq!(err.to_string(), "SD error 3");
    }
}
