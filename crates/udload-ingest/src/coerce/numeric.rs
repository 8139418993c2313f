//! Integer and float cells with thousands separators and percent markers

/// Parse a numeric cell: `"1,234"`, `"95%"`, `" -3.5 "`
///
/// A trailing percent marker divides the value by 100. Blank, non-numeric
/// and non-finite input yields `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let percent = trimmed.ends_with('%');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| *c != ',' && *c != '%')
        .collect();

    let value: f64 = cleaned.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(if percent { value / 100.0 } else { value })
}

/// Nearest whole number, `None` outside the `i64` range
pub fn parse_int(raw: &str) -> Option<i64> {
    let rounded = parse_number(raw)?.round();
    // i64::MAX is not representable; 2^63 is the first value out of range
    if rounded >= -(2f64.powi(63)) && rounded < 2f64.powi(63) {
        Some(rounded as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_values() {
        assert_eq!(parse_number("95%"), Some(0.95));
        assert_eq!(parse_int("95%"), Some(1));
        assert_eq!(parse_int("49%"), Some(0));
        assert_eq!(parse_number("12.5 %"), Some(0.125));
    }

    #[test]
    fn test_thousands_separators() {
        assert_eq!(parse_number("1,234,567.5"), Some(1_234_567.5));
        assert_eq!(parse_int("1,234"), Some(1234));
        assert_eq!(parse_int("-2.5"), Some(-3));
    }

    #[test]
    fn test_zero_is_a_value() {
        assert_eq!(parse_number("0"), Some(0.0));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("0%"), Some(0));
    }

    #[test]
    fn test_rejects() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("   "), None);
        assert_eq!(parse_number("N/A"), None);
        assert_eq!(parse_number("%"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_int("1e30"), None);
    }
}
