//! Byte-size units and conversions.
//!
//! Everything is binary: 1 MiB = 1024² bytes, 1 GiB = 1024³ bytes. Partitioning
//! commands are always issued in MiB so the numbers handed to `parted` and
//! `sgdisk` use the same unit the planner computed with.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// MiB needed to hold `bytes`, rounding up.
pub fn bytes_to_mib_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(MIB)
}

/// Converts a (possibly fractional) GiB amount to bytes.
pub fn gib_to_bytes(gib: f64) -> u64 {
    if gib <= 0.0 || !gib.is_finite() {
        return 0;
    }
    (gib * GIB as f64).round() as u64
}

/// Human-readable size, e.g. `"40.0 GiB"`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mib_rounding() {
        assert_eq!(bytes_to_mib_ceil(MIB - 1), 1);
        assert_eq!(bytes_to_mib_ceil(40 * GIB), 40 * 1024);
        assert_eq!(bytes_to_mib_ceil(40 * GIB + 1), 40 * 1024 + 1);
    }

    #[test]
    fn test_gib_to_bytes() {
        assert_eq!(gib_to_bytes(1.0), GIB);
        assert_eq!(gib_to_bytes(0.5), 512 * MIB);
        assert_eq!(gib_to_bytes(-3.0), 0);
        assert_eq!(gib_to_bytes(f64::NAN), 0);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512.0 B");
        assert_eq!(human_bytes(40 * GIB), "40.0 GiB");
        assert_eq!(human_bytes(1536 * MIB), "1.5 GiB");
    }
}
