//! G-code line tokenizer
//!
//! Splits one newline-terminated line into a [`GcodeCommand`]. Supports an
//! optional leading `N<line>` number, a trailing `*<checksum>` (XOR of all
//! bytes before the `*`) and `;` comments. Letters and values may be run
//! together (`G1X10Y5`) or separated by whitespace.

use printkit_core::{GcodeCommand, GcodeError, GcodePart};

/// Line tokenizer
#[derive(Debug, Clone)]
pub struct GcodeParser {
    max_parts: usize,
    eof_marker: bool,
}

impl GcodeParser {
    /// Create a tokenizer accepting at most `max_parts` parameters
    pub fn new(max_parts: usize) -> Self {
        Self {
            max_parts,
            eof_marker: false,
        }
    }

    /// Treat a line reading `EOF` as the end of a stored program
    pub fn with_eof_marker(mut self) -> Self {
        self.eof_marker = true;
        self
    }

    /// Tokenize the first line of `buf`.
    ///
    /// Returns `None` while no complete line is available. The command's
    /// length includes the terminating newline.
    pub fn parse_line(&self, buf: &[u8]) -> Option<GcodeCommand> {
        let end = buf.iter().position(|&b| b == b'\n')?;
        let length = end + 1;
        let line = &buf[..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Some(match self.parse(line) {
            Ok(command) => command.with_length(length),
            Err(error) => GcodeCommand::with_error(error, length),
        })
    }

    /// Tokenize a line without its terminator
    pub fn parse(&self, line: &[u8]) -> Result<GcodeCommand, GcodeError> {
        let line = match line.iter().position(|&b| b == b';') {
            Some(comment) => &line[..comment],
            None => line,
        };
        let line = match line.iter().rposition(|&b| b == b'*') {
            Some(star) => {
                let expected = std::str::from_utf8(&line[star + 1..])
                    .ok()
                    .and_then(|s| s.trim().parse::<u8>().ok())
                    .ok_or(GcodeError::Checksum)?;
                let actual = line[..star].iter().fold(0u8, |acc, b| acc ^ b);
                if actual != expected {
                    return Err(GcodeError::Checksum);
                }
                &line[..star]
            }
            None => line,
        };

        let text = std::str::from_utf8(line).map_err(|_| GcodeError::InvalidPart)?;
        if self.eof_marker && text.trim() == "EOF" {
            return Err(GcodeError::Eof);
        }

        let mut parts = tokenize(text)?.into_iter().peekable();
        let line_number = match parts.peek() {
            Some(part) if part.code == 'N' => {
                let number = part.text.parse::<u32>().map_err(|_| GcodeError::InvalidPart)?;
                parts.next();
                Some(number)
            }
            _ => None,
        };

        let head = parts.next().ok_or(GcodeError::EmptyCommand)?;
        if !head.text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GcodeError::InvalidPart);
        }
        let number = head.text.parse::<u16>().map_err(|_| GcodeError::InvalidPart)?;

        let params: Vec<GcodePart> = parts.collect();
        if params.len() > self.max_parts {
            return Err(GcodeError::TooManyParts);
        }
        Ok(GcodeCommand::new(head.code, number, params).with_line_number(line_number))
    }
}

fn tokenize(text: &str) -> Result<Vec<GcodePart>, GcodeError> {
    let mut parts = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_whitespace() {
            chars.next();
            continue;
        }
        if !c.is_ascii_alphabetic() {
            return Err(GcodeError::InvalidPart);
        }
        chars.next();
        let mut value = String::new();
        while let Some(&v) = chars.peek() {
            if v.is_ascii_whitespace() || v.is_ascii_alphabetic() {
                break;
            }
            value.push(v);
            chars.next();
        }
        parts.push(GcodePart::new(c, value));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> GcodeParser {
        GcodeParser::new(16)
    }

    #[test]
    fn test_parse_simple_move() {
        let cmd = parser().parse_line(b"G1 X10 Y-2.5 F3000\n").unwrap();
        assert!(cmd.is('G', 1));
        assert_eq!(cmd.parts().len(), 3);
        assert_eq!(cmd.find_param_fp('Y'), Some(-2.5));
        assert_eq!(cmd.length(), 19);
        assert_eq!(cmd.error(), None);
    }

    #[test]
    fn test_parse_packed_and_lowercase() {
        let cmd = parser().parse_line(b"g1x5y6\r\n").unwrap();
        assert!(cmd.is('G', 1));
        assert_eq!(cmd.find_param_fp('X'), Some(5.0));
        assert_eq!(cmd.find_param_fp('Y'), Some(6.0));
        assert_eq!(cmd.length(), 8);
    }

    #[test]
    fn test_incomplete_line() {
        assert!(parser().parse_line(b"G1 X1").is_none());
    }

    #[test]
    fn test_line_number_and_checksum() {
        let body = b"N7 M105";
        let sum = body.iter().fold(0u8, |a, b| a ^ b);
        let line = format!("N7 M105*{}\n", sum);
        let cmd = parser().parse_line(line.as_bytes()).unwrap();
        assert_eq!(cmd.error(), None);
        assert_eq!(cmd.line_number(), Some(7));
        assert!(cmd.is('M', 105));

        let bad = format!("N7 M105*{}\n", sum.wrapping_add(1));
        let cmd = parser().parse_line(bad.as_bytes()).unwrap();
        assert_eq!(cmd.error(), Some(GcodeError::Checksum));
    }

    #[test]
    fn test_errors() {
        let p = GcodeParser::new(2);
        assert_eq!(p.parse(b"").unwrap_err(), GcodeError::EmptyCommand);
        assert_eq!(p.parse(b"   ; only a comment").unwrap_err(), GcodeError::EmptyCommand);
        assert_eq!(p.parse(b"N3").unwrap_err(), GcodeError::EmptyCommand);
        assert_eq!(p.parse(b"G1 X1 Y2 Z3").unwrap_err(), GcodeError::TooManyParts);
        assert_eq!(p.parse(b"G1.5 X1").unwrap_err(), GcodeError::InvalidPart);
        assert_eq!(p.parse(b"#1").unwrap_err(), GcodeError::InvalidPart);
    }

    #[test]
    fn test_comment_stripped() {
        let cmd = parser().parse(b"M104 S200 ; heat up").unwrap();
        assert_eq!(cmd.parts().len(), 1);
        assert_eq!(cmd.get_param_fp('S', 0.0), 200.0);
    }

    #[test]
    fn test_eof_marker() {
        assert_eq!(
            parser().with_eof_marker().parse(b"EOF").unwrap_err(),
            GcodeError::Eof
        );
        // Without the marker the same text is an ordinary (odd) command
        assert_eq!(parser().parse(b"EOF").unwrap_err(), GcodeError::InvalidPart);
    }
}
