//! Monetary values are integer minor units (cents) everywhere.

/// Format minor units as a major-unit string with 2 decimal places
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(11000), "110.00");
        assert_eq!(format_amount(50), "0.50");
        assert_eq!(format_amount(12345), "123.45");
        assert_eq!(format_amount(-250), "-2.50");
    }
}
