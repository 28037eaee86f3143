//! Kubernetes quantity parsing (`250m`, `129Mi`, `156481065n`, plain
//! integers, exponent notation).

/// Parses a quantity into its base unit (cores for CPU, bytes for
/// memory) as a float. Returns `None` for unparseable input.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, multiplier) = split_suffix(raw)?;
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value * multiplier)
}

/// CPU quantity in millicores: `250m` → 250, `2` → 2000,
/// `156481065n` → 156.
pub fn parse_cpu_milli(raw: &str) -> Option<i64> {
    parse_quantity(raw).map(|cores| (cores * 1000.0).round() as i64)
}

/// CPU capacity in whole cores, rounded up (`3900m` → 4).
pub fn parse_cpu_cores_ceil(raw: &str) -> Option<i64> {
    parse_quantity(raw).map(|cores| cores.ceil() as i64)
}

/// Memory quantity in bytes: `129Mi` → 135266304, `128974848` → as-is.
pub fn parse_memory_bytes(raw: &str) -> Option<i64> {
    parse_quantity(raw).map(|bytes| bytes.round() as i64)
}

fn split_suffix(raw: &str) -> Option<(&str, f64)> {
    const BINARY: [(&str, f64); 6] = [
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
        ("Ei", 1152921504606846976.0),
    ];
    const DECIMAL: [(&str, f64); 9] = [
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    for (suffix, mult) in BINARY {
        if let Some(number) = raw.strip_suffix(suffix) {
            return Some((number, mult));
        }
    }
    for (suffix, mult) in DECIMAL {
        if let Some(number) = raw.strip_suffix(suffix) {
            // `1E3` is exponent notation, not exabytes; only treat a
            // trailing letter as a unit when the rest parses on its
            // own.
            if number.parse::<f64>().is_ok() {
                return Some((number, mult));
            }
        }
    }
    Some((raw, 1.0))
}
