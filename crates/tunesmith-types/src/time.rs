//! Millisecond/second conversions shared by the client and codec layers.

/// Render milliseconds as the `S.mmm` seconds string codec tools accept.
pub fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Milliseconds to fractional seconds.
pub fn ms_to_seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Fractional seconds to whole milliseconds, rounding to nearest.
///
/// Returns `None` for negative, NaN or infinite input.
pub fn seconds_to_ms(seconds: f64) -> Option<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_millisecond_precision() {
        assert_eq!(format_seconds(0), "0.000");
        assert_eq!(format_seconds(1500), "1.500");
        assert_eq!(format_seconds(61_007), "61.007");
    }

    #[test]
    fn converts_seconds_back_to_ms() {
        assert_eq!(seconds_to_ms(3.0), Some(3000));
        assert_eq!(seconds_to_ms(12.3456), Some(12_346));
        assert_eq!(seconds_to_ms(-1.0), None);
        assert_eq!(seconds_to_ms(f64::NAN), None);
    }
}
