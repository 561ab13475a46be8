//! Number formatting utilities.

/// Format a byte count in decimal units (B, KB, MB, GB).
#[must_use]
pub fn format_bytes(value: u64) -> String {
    fn format_compact(value: u64, divisor: u64, suffix: &str) -> String {
        let major = value / divisor;
        let minor = (value % divisor) / (divisor / 10);
        format!("{major}.{minor} {suffix}")
    }

    if value >= 1_000_000_000 {
        format_compact(value, 1_000_000_000, "GB")
    } else if value >= 1_000_000 {
        format_compact(value, 1_000_000, "MB")
    } else if value >= 1_000 {
        format_compact(value, 1_000, "KB")
    } else {
        format!("{value} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_megabytes() {
        assert_eq!(format_bytes(2_048_000), "2.0 MB");
    }

    #[test]
    fn format_bytes_kilobytes() {
        assert_eq!(format_bytes(12_500), "12.5 KB");
    }

    #[test]
    fn format_bytes_small() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(0), "0 B");
    }
}
