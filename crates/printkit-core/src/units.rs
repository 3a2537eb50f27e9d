//! Unit conversion and number formatting
//!
//! Replies print numbers with up to six decimals and no trailing zeros.
//! Feed rates convert to a time-per-unit that the motion code multiplies
//! by distances.

/// Format a value for a reply line
///
/// Prints at most six decimals and strips trailing zeros, so `200.0`
/// prints as `200` and `0.5` as `0.5`. Non-finite values print as `nan`,
/// `inf` or `-inf`.
pub fn format_fp(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let text = format!("{:.6}", value);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Convert a feed rate to seconds per unit of distance
///
/// * `feed` - Value of the `F` parameter
/// * `speed_limit_multiply` - Factor converting `F` to units per second
///
/// Non-positive feeds give zero, meaning the move is only limited by the
/// axis limits.
pub fn time_per_unit_from_feed(feed: f64, speed_limit_multiply: f64) -> f64 {
    let speed = feed * speed_limit_multiply;
    if speed > 0.0 && speed.is_finite() {
        1.0 / speed
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fp() {
        assert_eq!(format_fp(200.0), "200");
        assert_eq!(format_fp(0.5), "0.5");
        assert_eq!(format_fp(-12.25), "-12.25");
        assert_eq!(format_fp(1.0 / 3.0), "0.333333");
        assert_eq!(format_fp(-0.0000001), "0");
        assert_eq!(format_fp(f64::NAN), "nan");
    }

    #[test]
    fn test_feed_conversion() {
        assert_eq!(time_per_unit_from_feed(3000.0, 1.0 / 60.0), 1.0 / 50.0);
        assert_eq!(time_per_unit_from_feed(0.0, 1.0 / 60.0), 0.0);
        assert_eq!(time_per_unit_from_feed(-5.0, 1.0 / 60.0), 0.0);
    }
}
