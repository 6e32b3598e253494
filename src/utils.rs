use std::time::{Duration, Instant};

/// Format a `Duration` as a human-readable string with automatic unit scaling.
///
/// Produces output like `1.94ms`, `2.34s`, `150.00µs` using Rust's Debug format.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Log a warning if the elapsed time since `start` exceeds `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(duration = fmt_duration(elapsed), "slow operation: {label}");
    }
}

/// Format integer cents as a dollar amount, e.g. `2550` -> `$25.50`.
pub fn fmt_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_cents() {
        assert_eq!(fmt_cents(0), "$0.00");
        assert_eq!(fmt_cents(2550), "$25.50");
        assert_eq!(fmt_cents(7), "$0.07");
        assert_eq!(fmt_cents(-1299), "-$12.99");
    }

    #[test]
    fn formats_duration_compactly() {
        assert_eq!(fmt_duration(Duration::from_millis(1500)), "1.50s");
    }
}
