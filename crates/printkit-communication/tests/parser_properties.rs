//! Tokenizer properties over generated input

use printkit_communication::GcodeParser;
use printkit_core::GcodeError;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_never_panics_and_consumes_line(line in "[ -~]{0,80}") {
        let parser = GcodeParser::new(16);
        let mut input = line.clone().into_bytes();
        input.push(b'\n');
        input.extend_from_slice(b"G21\n");
        let cmd = parser.parse_line(&input).unwrap();
        prop_assert_eq!(cmd.length(), line.len() + 1);
    }

    #[test]
    fn test_valid_checksum_accepted(
        number in 0u32..100_000,
        x in -1000i32..1000,
    ) {
        let body = format!("N{} G1 X{}", number, x);
        let sum = body.bytes().fold(0u8, |a, b| a ^ b);
        let line = format!("{}*{}\n", body, sum);
        let cmd = GcodeParser::new(16).parse_line(line.as_bytes()).unwrap();
        prop_assert_eq!(cmd.error(), None);
        prop_assert_eq!(cmd.line_number(), Some(number));
        prop_assert_eq!(cmd.find_param_fp('X'), Some(x as f64));
    }

    #[test]
    fn test_corrupted_checksum_rejected(x in 0i32..1000, flip in 1u8..=255) {
        let body = format!("G1 X{}", x);
        let sum = body.bytes().fold(0u8, |a, b| a ^ b) ^ flip;
        let line = format!("{}*{}\n", body, sum);
        let cmd = GcodeParser::new(16).parse_line(line.as_bytes()).unwrap();
        prop_assert_eq!(cmd.error(), Some(GcodeError::Checksum));
    }
}
