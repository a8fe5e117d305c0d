//! # Utility Functions
//!
//! Numeric rounding and cell formatting for the output tables, message
//! truncation for error cells, and human-readable formatting used in log
//! lines.

use std::path::Path;

/// Round to `decimals` places, correctly rounded from the exact binary value
///
/// Formatting with a fixed precision rounds the exact value of the float,
/// so `2.675` (stored as `2.67499999...`) becomes `2.67`.
///
/// ## Examples
///
/// ```rust
/// # use protobench_metrics::utils::round_to;
/// assert_eq!(round_to(1.23456789, 6), 1.234568);
/// assert_eq!(round_to(422.0, 3), 422.0);
/// ```
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", decimals as usize, value)
        .parse()
        .unwrap_or(value)
}

/// Render a float for a CSV cell, always keeping a decimal point
pub fn format_float(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') {
        format!("{}.0", s)
    } else {
        s
    }
}

/// Rounded optional float; `None` becomes an empty cell
pub fn float_cell(value: Option<f64>, decimals: u32) -> String {
    value
        .map(|v| format_float(round_to(v, decimals)))
        .unwrap_or_default()
}

/// Optional integer-like value; `None` becomes an empty cell
pub fn int_cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Keep at most `limit` characters of a message
pub fn truncate_message(message: &str, limit: usize) -> String {
    message.chars().take(limit).collect()
}

/// True if `path` has one of `extensions` (case-insensitive, without dot)
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Expand a leading `~` against `$HOME`
pub fn expand_home(path: &Path) -> std::path::PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Format a byte count with binary units
///
/// ```rust
/// # use protobench_metrics::utils::format_bytes;
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Format a byte rate for log output
pub fn format_rate(bytes_per_second: f64) -> String {
    if bytes_per_second < 1024.0 {
        format!("{:.2} B/s", bytes_per_second)
    } else if bytes_per_second < 1024.0 * 1024.0 {
        format!("{:.2} KB/s", bytes_per_second / 1024.0)
    } else if bytes_per_second < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_second / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB/s", bytes_per_second / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(10.0, 6), 10.0);
        assert_eq!(round_to(0.1234565, 3), 0.123);
        assert_eq!(round_to(-2.71828, 2), -2.72);
    }

    #[test]
    fn test_round_to_uses_exact_binary_value() {
        // 5e-7 is stored slightly below the halfway point
        assert_eq!(round_to(5e-7, 6), 0.0);
        assert_eq!(round_to(2.675, 2), 2.67);
        // 2.5e-6 is stored slightly above it
        assert_eq!(round_to(0.0000025, 6), 0.000003);
        assert_eq!(float_cell(Some(5e-7), 6), "0.0");
    }

    #[test]
    fn test_float_cell() {
        assert_eq!(float_cell(Some(10.0), 6), "10.0");
        assert_eq!(float_cell(Some(12.3456789), 6), "12.345679");
        assert_eq!(float_cell(None, 6), "");
    }

    #[test]
    fn test_int_cell() {
        assert_eq!(int_cell(Some(3u64)), "3");
        assert_eq!(int_cell::<u32>(None), "");
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("abcdef", 3), "abc");
        assert_eq!(truncate_message("ab", 3), "ab");
        assert_eq!(truncate_message("żółw", 2), "żó");
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("x/run.PCAPNG"), &["pcap", "pcapng"]));
        assert!(!has_extension(Path::new("x/run.pcap.gz"), &["pcap"]));
        assert!(!has_extension(Path::new("x/README"), &["txt"]));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home(Path::new("/abs/path")), Path::new("/abs/path"));
        assert_eq!(expand_home(Path::new("rel/~x")), Path::new("rel/~x"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(500.0), "500.00 B/s");
        assert_eq!(format_rate(1536.0), "1.50 KB/s");
        assert_eq!(format_rate(1572864.0), "1.50 MB/s");
    }
}
