//! Fixed reply texts of the command protocol

use printkit_core::GcodeError;

/// Emitted once on the interactive channel at startup
pub const BANNER: &str = "start\nPrintKit\n";

/// Completion acknowledgement
pub const OK: &str = "ok\n";

/// A block read failed and is being retried
pub const SD_READ_ERROR: &str = "//SdRdEr\n";

/// The stored program ended with an `EOF` line
pub const SD_EOF: &str = "//SdEof\n";

/// A stored line was longer than the command buffer
pub const SD_LINE_ERROR: &str = "//SdLnEr\n";

/// Every block was consumed without an `EOF` line
pub const SD_END: &str = "//SdEnd\n";

/// `Error:<reason>\n` for a command that could not be tokenized
pub fn parse_error(error: GcodeError) -> String {
    format!("Error:{}\n", error)
}

/// `Error:Unknown command <letter><number>\n`
pub fn unknown_command(code: char, number: u16) -> String {
    format!("Error:Unknown command {}{}\n", code, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_replies() {
        assert_eq!(parse_error(GcodeError::Checksum), "Error:incorrect checksum\n");
        assert_eq!(unknown_command('M', 999), "Error:Unknown command M999\n");
    }
}
