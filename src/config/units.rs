//! Pure unit-parsing helpers for the sizes/latencies that appear in a
//! Hermes configuration document. Grounded in the original implementation's
//! `hshm::ConfigParse` (`ParseSize`/`ParseLatency`): suffixes are
//! decimal-1024 (`KB|MB|GB|TB`, 1024-based despite the decimal-looking
//! letters) and `inf` is a valid capacity sentinel mapped to `u64::MAX`.
//!
//! Hostname bracket expansion (`host[00-09,12]-net`) is intentionally not
//! implemented here — it belongs to the RPC collaborator's host-file
//! parsing, out of scope for the core (spec.md §1).

use crate::error::HermesError;

/// Parse a size string such as `"4KB"`, `"512MB"`, `"2TB"`, or `"inf"`.
/// A bare number with no suffix is interpreted as bytes.
pub fn parse_size(text: &str) -> crate::Result<u64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("inf") {
        return Ok(u64::MAX);
    }
    let split_at = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (num_part, suffix) = text.split_at(split_at);
    let value: f64 = num_part
        .parse()
        .map_err(|_| HermesError::ConfigInvalid(format!("invalid size: {text}")))?;
    let multiplier: f64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => {
            return Err(HermesError::ConfigInvalid(format!(
                "unknown size suffix '{other}' in '{text}'"
            )))
        }
    };
    Ok((value * multiplier) as u64)
}

/// Parse a latency string such as `"500ns"`, `"10us"`, `"2ms"`, `"1s"`.
/// Returns the duration in nanoseconds.
pub fn parse_latency_ns(text: &str) -> crate::Result<u64> {
    let text = text.trim();
    let split_at = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (num_part, suffix) = text.split_at(split_at);
    let value: f64 = num_part
        .parse()
        .map_err(|_| HermesError::ConfigInvalid(format!("invalid latency: {text}")))?;
    let multiplier: f64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "ns" => 1.0,
        "us" => 1_000.0,
        "ms" => 1_000_000.0,
        "s" => 1_000_000_000.0,
        other => {
            return Err(HermesError::ConfigInvalid(format!(
                "unknown latency suffix '{other}' in '{text}'"
            )))
        }
    };
    Ok((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn parses_decimal_1024_suffixes() {
        assert_eq!(parse_size("4KB").unwrap(), 4 * 1024);
        assert_eq!(parse_size("2MB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parses_inf_sentinel() {
        assert_eq!(parse_size("inf").unwrap(), u64::MAX);
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert!(parse_size("5XB").is_err());
    }

    #[test]
    fn parses_latencies() {
        assert_eq!(parse_latency_ns("500ns").unwrap(), 500);
        assert_eq!(parse_latency_ns("10us").unwrap(), 10_000);
        assert_eq!(parse_latency_ns("2ms").unwrap(), 2_000_000);
        assert_eq!(parse_latency_ns("1s").unwrap(), 1_000_000_000);
    }
}
