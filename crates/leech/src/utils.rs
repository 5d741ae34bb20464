//! Utility functions

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Format a byte count with SI units, two decimals above 1000 bytes.
pub fn to_human_readable(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{bytes} B");
    }

    let mut n = bytes as f64;
    let mut unit = 0;

    // round before comparing so 999_999 is "1.00 MB" and not "1000.00 KB"
    while (n * 100.0).round() / 100.0 >= 1000.0 && unit < UNITS.len() - 1 {
        n /= 1000.0;
        unit += 1;
    }

    format!("{:.2} {}", n, UNITS[unit])
}
