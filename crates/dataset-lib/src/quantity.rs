//! Resource quantity normalization
//!
//! Converts Kubernetes resource strings into millicores (CPU) and MiB
//! (memory). Values are truncated toward zero, matching integer casts of
//! the parsed amount.

use crate::error::ParseError;

const MIB: f64 = 1024.0 * 1024.0;

/// Binary and decimal memory suffixes with their byte multipliers
const MEMORY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", MIB),
    ("Gi", MIB * 1024.0),
    ("Ti", MIB * 1024.0 * 1024.0),
    ("Pi", MIB * 1024.0 * 1024.0 * 1024.0),
    ("Ei", MIB * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("k", 1e3),
    // Lenient; the API itself only accepts `k`
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
    ("m", 1e-3),
];

fn parse_number(raw: &str, original: &str) -> Result<f64, ParseError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidQuantity(original.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::InvalidQuantity(original.to_string()));
    }
    Ok(value)
}

/// Parse a CPU quantity into millicores
///
/// `"500m"` is 500, `"2"` is 2000, `"0.25"` is 250.
pub fn parse_cpu_millicores(quantity: &str) -> Result<u64, ParseError> {
    let s = quantity.trim();
    if s.is_empty() {
        return Err(ParseError::InvalidQuantity(quantity.to_string()));
    }
    let millicores = match s.strip_suffix('m') {
        Some(milli) => parse_number(milli, quantity)?,
        None => parse_number(s, quantity)? * 1000.0,
    };
    Ok(millicores as u64)
}

/// Parse a memory quantity into MiB
///
/// `"128Mi"` is 128, `"1Gi"` is 1024, `"1048576"` (bytes) is 1.
pub fn parse_memory_mib(quantity: &str) -> Result<u64, ParseError> {
    let s = quantity.trim();
    if s.is_empty() {
        return Err(ParseError::InvalidQuantity(quantity.to_string()));
    }
    for (suffix, multiplier) in MEMORY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            let bytes = parse_number(number, quantity)? * multiplier;
            return Ok((bytes / MIB) as u64);
        }
    }
    let bytes = parse_number(s, quantity)?;
    Ok((bytes / MIB) as u64)
}

/// CPU millicores with unparseable or missing values treated as 0
pub fn cpu_or_zero(quantity: Option<&str>) -> u64 {
    quantity
        .map(|q| {
            parse_cpu_millicores(q).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Treating unparseable CPU quantity as 0");
                0
            })
        })
        .unwrap_or(0)
}

/// Memory MiB with unparseable or missing values treated as 0
pub fn memory_or_zero(quantity: Option<&str>) -> u64 {
    quantity
        .map(|q| {
            parse_memory_mib(q).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Treating unparseable memory quantity as 0");
                0
            })
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_quantities() {
        assert_eq!(parse_cpu_millicores("500m").unwrap(), 500);
        assert_eq!(parse_cpu_millicores("2").unwrap(), 2000);
        assert_eq!(parse_cpu_millicores("0.25").unwrap(), 250);
        assert_eq!(parse_cpu_millicores(" 1.5 ").unwrap(), 1500);
    }

    #[test]
    fn test_memory_quantities() {
        assert_eq!(parse_memory_mib("128Mi").unwrap(), 128);
        assert_eq!(parse_memory_mib("1Gi").unwrap(), 1024);
        assert_eq!(parse_memory_mib("1048576").unwrap(), 1);
        assert_eq!(parse_memory_mib("2048Ki").unwrap(), 2);
        assert_eq!(parse_memory_mib("1Ti").unwrap(), 1024 * 1024);
    }

    #[test]
    fn test_decimal_memory_suffixes() {
        // 128 * 10^6 bytes is just over 122 MiB
        assert_eq!(parse_memory_mib("128M").unwrap(), 122);
        assert_eq!(parse_memory_mib("1G").unwrap(), 953);
        assert_eq!(parse_memory_mib("4096k").unwrap(), 3);
        assert_eq!(parse_memory_mib("4096K").unwrap(), 3);
        assert_eq!(memory_or_zero(Some("4096K")), 3);
    }

    #[test]
    fn test_invalid_quantities_are_errors() {
        assert!(parse_cpu_millicores("").is_err());
        assert!(parse_cpu_millicores("lots").is_err());
        assert!(parse_cpu_millicores("-1").is_err());
        assert!(parse_memory_mib("12Xi").is_err());
        assert!(parse_memory_mib("Mi").is_err());
    }

    #[test]
    fn test_lenient_helpers_default_to_zero() {
        assert_eq!(cpu_or_zero(None), 0);
        assert_eq!(cpu_or_zero(Some("garbage")), 0);
        assert_eq!(cpu_or_zero(Some("100m")), 100);
        assert_eq!(memory_or_zero(Some("??")), 0);
        assert_eq!(memory_or_zero(Some("64Mi")), 64);
    }
}
