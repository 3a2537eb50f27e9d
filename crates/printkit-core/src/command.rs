//! Parsed command model
//!
//! A `GcodeCommand` is what a tokenizer hands to a channel: the command
//! letter and number, its letter/value parameters, an optional line number
//! and, if tokenizing failed, the reason. Values are kept as text and
//! converted on access, matching how firmware parsers defer `strtod`.

use crate::error::GcodeError;
use std::fmt;

/// One `<letter><value>` parameter of a command
#[derive(Debug, Clone, PartialEq)]
pub struct GcodePart {
    /// Upper-case parameter letter
    pub code: char,
    /// Raw value text following the letter
    pub text: String,
}

impl GcodePart {
    /// Create a part from its letter and raw text
    pub fn new(code: char, text: impl Into<String>) -> Self {
        Self {
            code: code.to_ascii_uppercase(),
            text: text.into(),
        }
    }

    /// Value as floating point; unparsable text reads as zero
    pub fn fp_value(&self) -> f64 {
        self.text.trim().parse::<f64>().unwrap_or(0.0)
    }

    /// Value as unsigned integer; unparsable or negative text reads as zero
    pub fn u32_value(&self) -> u32 {
        let text = self.text.trim();
        text.parse::<u32>()
            .ok()
            .or_else(|| text.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u32))
            .unwrap_or(0)
    }
}

/// A tokenized command line
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeCommand {
    code: char,
    number: u16,
    parts: Vec<GcodePart>,
    line_number: Option<u32>,
    error: Option<GcodeError>,
    length: usize,
}

impl GcodeCommand {
    /// Create a well-formed command
    pub fn new(code: char, number: u16, parts: Vec<GcodePart>) -> Self {
        Self {
            code: code.to_ascii_uppercase(),
            number,
            parts,
            line_number: None,
            error: None,
            length: 0,
        }
    }

    /// Create a command that failed to tokenize
    pub fn with_error(error: GcodeError, length: usize) -> Self {
        Self {
            code: '\0',
            number: 0,
            parts: Vec::new(),
            line_number: None,
            error: Some(error),
            length,
        }
    }

    /// Attach the `N` line number
    pub fn with_line_number(mut self, line_number: Option<u32>) -> Self {
        self.line_number = line_number;
        self
    }

    /// Record how many input bytes this command consumed
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Command letter (`G`, `M`, ...)
    pub fn code(&self) -> char {
        self.code
    }

    /// Command number
    pub fn number(&self) -> u16 {
        self.number
    }

    /// True for `<code><number>`
    pub fn is(&self, code: char, number: u16) -> bool {
        self.code == code && self.number == number
    }

    /// Parameters in input order
    pub fn parts(&self) -> &[GcodePart] {
        &self.parts
    }

    /// Line number given with `N`, if any
    pub fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    /// Tokenizer failure, if any
    pub fn error(&self) -> Option<GcodeError> {
        self.error
    }

    /// Number of input bytes consumed, including the line terminator
    pub fn length(&self) -> usize {
        self.length
    }

    /// First parameter with the given letter
    pub fn find_param(&self, code: char) -> Option<&GcodePart> {
        self.parts.iter().find(|p| p.code == code)
    }

    /// Floating point parameter, if present
    pub fn find_param_fp(&self, code: char) -> Option<f64> {
        self.find_param(code).map(GcodePart::fp_value)
    }

    /// Floating point parameter or a default
    pub fn get_param_fp(&self, code: char, default: f64) -> f64 {
        self.find_param_fp(code).unwrap_or(default)
    }

    /// Unsigned parameter or a default
    pub fn get_param_u32(&self, code: char, default: u32) -> u32 {
        self.find_param(code).map(GcodePart::u32_value).unwrap_or(default)
    }
}

impl fmt::Display for GcodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = self.error {
            return write!(f, "<{}>", err);
        }
        write!(f, "{}{}", self.code, self.number)?;
        for part in &self.parts {
            write!(f, " {}{}", part.code, part.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g1() -> GcodeCommand {
        GcodeCommand::new(
            'G',
            1,
            vec![
                GcodePart::new('X', "10.5"),
                GcodePart::new('F', "3000"),
                GcodePart::new('X', "99"),
            ],
        )
    }

    #[test]
    fn test_param_lookup_uses_first_occurrence() {
        let cmd = g1();
        assert_eq!(cmd.find_param_fp('X'), Some(10.5));
        assert_eq!(cmd.get_param_u32('F', 0), 3000);
        assert_eq!(cmd.get_param_fp('Y', 7.0), 7.0);
        assert!(cmd.is('G', 1));
    }

    #[test]
    fn test_bad_values_read_as_zero() {
        let part = GcodePart::new('s', "abc");
        assert_eq!(part.code, 'S');
        assert_eq!(part.fp_value(), 0.0);
        assert_eq!(part.u32_value(), 0);
        assert_eq!(GcodePart::new('L', "-4").u32_value(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(g1().to_string(), "G1 X10.5 F3000 X99");
        let bad = GcodeCommand::with_error(GcodeError::Checksum, 12);
        assert_eq!(bad.to_string(), "<incorrect checksum>");
        assert_eq!(bad.length(), 12);
    }
}
