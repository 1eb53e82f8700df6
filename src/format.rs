//! Formatting helpers for byte counts, rates, ETAs and percentages.

/// Formats a byte count as a human-readable string (B, KiB, MiB, GiB, TiB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    const TIB: u64 = GIB * 1024;

    if bytes >= TIB {
        format!("{:.2} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[must_use]
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Formats an ETA in seconds ("45s", "1m 05s", "1h 01m 05s"), or "--" when
/// unknown.
#[must_use]
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    let Some(secs) = eta_seconds else {
        return "--".to_string();
    };
    if secs >= 3600 {
        format!(
            "{}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[must_use]
pub fn format_percent(percent: Option<f64>) -> String {
    percent.map_or_else(|| "--".to_string(), |p| format!("{:.1}%", p.clamp(0.0, 100.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(1_048_576), "1.00 MiB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GiB");
        assert_eq!(format_bytes(1_099_511_627_776), "1.00 TiB");
    }

    #[test]
    fn format_bytes_zero() {
        assert_eq!(format_bytes(0), "0 B");
    }

    #[test]
    fn format_speed_appends_per_second() {
        assert_eq!(format_speed(0), "0 B/s");
        assert_eq!(format_speed(2048), "2.00 KiB/s");
    }

    #[test]
    fn format_eta_units() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(0)), "0s");
        assert_eq!(format_eta(Some(45)), "45s");
        assert_eq!(format_eta(Some(65)), "1m 05s");
        assert_eq!(format_eta(Some(3665)), "1h 01m 05s");
    }

    #[test]
    fn format_percent_rounds_and_clamps() {
        assert_eq!(format_percent(None), "--");
        assert_eq!(format_percent(Some(50.0)), "50.0%");
        assert_eq!(format_percent(Some(33.333)), "33.3%");
        assert_eq!(format_percent(Some(120.0)), "100.0%");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn format_bytes_never_panics(bytes in 0u64..u64::MAX) {
                let _ = format_bytes(bytes);
            }

            #[test]
            fn format_eta_never_panics(secs in proptest::option::of(0u64..u64::MAX)) {
                let _ = format_eta(secs);
            }
        }
    }
}
