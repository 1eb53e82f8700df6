//! Line-oriented parsing of `aria2c` console output.
//!
//! Every line yields at most one [`ProgressEvent`]. Lines that match nothing
//! are ignored, and a field that fails to parse becomes `None` without
//! dropping the rest of the event.

use std::sync::LazyLock;

use regex::Regex;

static READOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[#[0-9A-Fa-f]+\s+([^\]]*)\]").expect("valid regex"));

static SIZES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^/()]+)/([^/()]+)(?:\(([^)]*)\))?$").expect("valid regex"));

static QUANTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*([A-Za-z]*)$").expect("valid regex"));

static ETA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([0-9]+)d)?(?:([0-9]+)h)?(?:([0-9]+)m)?(?:([0-9]+)s?)?$").expect("valid regex")
});

static RESULT_OK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[0-9A-Fa-f]+\s*\|\s*OK\s*\|").expect("valid regex"));

static RESULT_ERR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[0-9A-Fa-f]+\s*\|\s*ERR\s*\|[^|]*\|\s*(.*)$").expect("valid regex")
});

static ERROR_LOG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ERROR\]\s*(.*)$").expect("valid regex"));

/// A structured progress reading. `None` means the field was missing or
/// could not be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSample {
    pub percent: Option<f64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<u64>,
    pub eta_seconds: Option<u64>,
}

/// What a single output line means.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(ProgressSample),
    Completed,
    Failed(String),
}

/// Per-download parser. Remembers whether a completion marker was seen and
/// the last error line, which together with the exit status decide the
/// outcome of a run.
#[derive(Debug, Default)]
pub struct ProgressParser {
    completed: bool,
    last_error: Option<String>,
}

impl ProgressParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one line and records markers.
    pub fn feed(&mut self, line: &str) -> Option<ProgressEvent> {
        let event = parse_line(line)?;
        match &event {
            ProgressEvent::Completed => self.completed = true,
            ProgressEvent::Failed(reason) => self.last_error = Some(reason.clone()),
            ProgressEvent::Progress(_) => {}
        }
        Some(event)
    }

    #[must_use]
    pub const fn saw_completion(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Parses one line of downloader output.
#[must_use]
pub fn parse_line(raw: &str) -> Option<ProgressEvent> {
    // Console redraws arrive as `\r`-separated frames; the last one wins.
    let line = raw
        .rsplit('\r')
        .map(str::trim)
        .find(|s| !s.is_empty())?;

    if let Some(caps) = READOUT_RE.captures(line) {
        return Some(ProgressEvent::Progress(parse_readout(&caps[1])));
    }

    if line.contains("Download complete:")
        || line.contains("(OK):download completed")
        || RESULT_OK_RE.is_match(line)
    {
        return Some(ProgressEvent::Completed);
    }

    if let Some(caps) = ERROR_LOG_RE.captures(line) {
        let reason = caps[1].trim();
        let reason = if reason.is_empty() { line } else { reason };
        return Some(ProgressEvent::Failed(reason.to_string()));
    }
    if let Some(caps) = RESULT_ERR_RE.captures(line) {
        return Some(ProgressEvent::Failed(format!(
            "download failed: {}",
            caps[1].trim()
        )));
    }
    if line.contains("(ERR):error occurred") {
        return Some(ProgressEvent::Failed("error occurred".to_string()));
    }

    None
}

/// Parses the inside of a `[#gid ...]` readout.
#[allow(clippy::cast_precision_loss)]
fn parse_readout(body: &str) -> ProgressSample {
    let mut sample = ProgressSample::default();

    for token in body.split_whitespace() {
        if let Some(rate) = token
            .strip_prefix("DL:")
            .or_else(|| token.strip_prefix("SPD:"))
        {
            sample.speed_bytes_per_sec = parse_rate(rate);
        } else if let Some(eta) = token.strip_prefix("ETA:") {
            sample.eta_seconds = parse_eta(eta);
        } else if token.starts_with("SIZE:") || !token.contains(':') {
            let sizes = token.strip_prefix("SIZE:").unwrap_or(token);
            if let Some(caps) = SIZES_RE.captures(sizes) {
                sample.downloaded_bytes = parse_size(&caps[1]);
                sample.total_bytes = parse_size(&caps[2]);
                sample.percent = caps.get(3).and_then(|m| parse_percent(m.as_str()));
            }
        }
    }

    if sample.percent.is_none() {
        sample.percent = match (sample.downloaded_bytes, sample.total_bytes) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 * 100.0 / total as f64),
            _ => None,
        };
    }

    sample
}

fn parse_percent(s: &str) -> Option<f64> {
    let value: f64 = s.trim().trim_end_matches('%').trim().parse().ok()?;
    value.is_finite().then_some(value)
}

/// Parses a size such as `400.0KiB`, `33MB`, `12Mb` or `512` into bytes.
///
/// Byte units use binary multiples. Bit units use decimal multiples and are
/// divided by eight.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn parse_size(s: &str) -> Option<u64> {
    let caps = QUANTITY_RE.captures(s.trim())?;
    let value: f64 = caps[1].parse().ok()?;
    let bytes = value * unit_factor(&caps[2])?;
    (bytes.is_finite() && bytes >= 0.0 && bytes < u64::MAX as f64).then(|| bytes.round() as u64)
}

/// Parses a transfer rate into bytes per second. Accepts an optional `/s`
/// or `ps` suffix (`115.7KiB/s`, `8Mbps`).
#[must_use]
pub fn parse_rate(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s
        .strip_suffix("/s")
        .or_else(|| s.strip_suffix("ps"))
        .unwrap_or(s);
    parse_size(s)
}

/// Parses an ETA such as `4m51s`, `1h38m7s`, `2d3h` or `15` into seconds.
#[must_use]
pub fn parse_eta(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let caps = ETA_RE.captures(s)?;
    let part = |i: usize, scale: u64| -> Option<u64> {
        caps.get(i)
            .map_or(Some(0), |m| m.as_str().parse::<u64>().ok()?.checked_mul(scale))
    };
    part(1, 86_400)?
        .checked_add(part(2, 3_600)?)?
        .checked_add(part(3, 60)?)?
        .checked_add(part(4, 1)?)
}

fn unit_factor(unit: &str) -> Option<f64> {
    match unit {
        "" | "B" => return Some(1.0),
        "b" | "bit" | "bits" => return Some(1.0 / 8.0),
        _ => {}
    }
    let mut chars = unit.chars();
    let exponent = match chars.next()?.to_ascii_uppercase() {
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        _ => return None,
    };
    match chars.as_str() {
        "" | "B" | "iB" => Some(1024f64.powi(exponent)),
        "b" | "bit" | "bits" => Some(1000f64.powi(exponent) / 8.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    fn progress(line: &str) -> ProgressSample {
        match parse_line(line) {
            Some(ProgressEvent::Progress(sample)) => sample,
            other => panic!("expected progress for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses_modern_readout() {
        let s = progress("[#2089b0 400.0KiB/33.2MiB(1%) CN:16 DL:115.7KiB ETA:4m51s]");
        assert_eq!(s.downloaded_bytes, Some(400 * KIB));
        assert_eq!(s.total_bytes, Some((33.2 * MIB as f64).round() as u64));
        assert_eq!(s.percent, Some(1.0));
        assert_eq!(s.speed_bytes_per_sec, Some((115.7 * KIB as f64).round() as u64));
        assert_eq!(s.eta_seconds, Some(291));
    }

    #[test]
    fn parses_legacy_readout() {
        let s = progress("[#1 SIZE:1.0MiB/2.0MiB(50%) CN:2 SPD:512KiB/s ETA:2s]");
        assert_eq!(s.downloaded_bytes, Some(MIB));
        assert_eq!(s.total_bytes, Some(2 * MIB));
        assert_eq!(s.percent, Some(50.0));
        assert_eq!(s.speed_bytes_per_sec, Some(512 * KIB));
        assert_eq!(s.eta_seconds, Some(2));
    }

    #[test]
    fn readout_without_percent_or_eta() {
        let s = progress("[#a1b2c3 0B/0B CN:1 DL:0B]");
        assert_eq!(s.downloaded_bytes, Some(0));
        assert_eq!(s.total_bytes, Some(0));
        assert_eq!(s.percent, None);
        assert_eq!(s.speed_bytes_per_sec, Some(0));
        assert_eq!(s.eta_seconds, None);
    }

    #[test]
    fn malformed_field_is_unknown_not_dropped() {
        let s = progress("[#abc 1.0MiB/2.0MiB(50%) CN:1 DL:fast ETA:soon]");
        assert_eq!(s.downloaded_bytes, Some(MIB));
        assert_eq!(s.speed_bytes_per_sec, None);
        assert_eq!(s.eta_seconds, None);

        let s = progress("[#abc ??/2.0MiB(x%) DL:1KiB]");
        assert_eq!(s.downloaded_bytes, None);
        assert_eq!(s.total_bytes, Some(2 * MIB));
        assert_eq!(s.percent, None);
        assert_eq!(s.speed_bytes_per_sec, Some(KIB));
    }

    #[test]
    fn percent_is_derived_when_missing() {
        let s = progress("[#abc 1.0MiB/4.0MiB CN:1]");
        assert_eq!(s.percent, Some(25.0));
    }

    #[test]
    fn carriage_return_frames_use_the_last_one() {
        let s = progress("[#a 1B/4B(25%)]\r[#a 2B/4B(50%)]\r");
        assert_eq!(s.downloaded_bytes, Some(2));
    }

    #[test]
    fn completion_markers() {
        for line in [
            "01/19 12:00:01 [NOTICE] Download complete: /tmp/f.zip",
            "Status Legend:\n(OK):download completed.",
            "2089b0|OK  |   1.2MiB/s|/tmp/f.zip",
        ] {
            let last = line.lines().last().unwrap_or(line);
            assert_eq!(parse_line(last), Some(ProgressEvent::Completed), "{line}");
        }
    }

    #[test]
    fn error_markers() {
        assert_eq!(
            parse_line(
                "01/19 12:00:01 [ERROR] CUID#7 - Download aborted. URI=https://example.com/f.zip"
            ),
            Some(ProgressEvent::Failed(
                "CUID#7 - Download aborted. URI=https://example.com/f.zip".to_string()
            ))
        );
        assert_eq!(
            parse_line("2089b0|ERR |       0B/s|/tmp/f.zip"),
            Some(ProgressEvent::Failed("download failed: /tmp/f.zip".to_string()))
        );
        assert_eq!(
            parse_line("(ERR):error occurred."),
            Some(ProgressEvent::Failed("error occurred".to_string()))
        );
    }

    #[test]
    fn unknown_lines_are_ignored() {
        for line in [
            "",
            "   ",
            "*** Download Progress Summary as of Mon Jan 19 12:00:00 2026 ***",
            "================================================================",
            "FILE: /tmp/f.zip",
            "Download Results:",
            "gid   |stat|avg speed  |path/URI",
        ] {
            assert_eq!(parse_line(line), None, "{line}");
        }
    }

    #[test]
    fn size_units() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("1K"), Some(KIB));
        assert_eq!(parse_size("1KB"), Some(KIB));
        assert_eq!(parse_size("1.5KiB"), Some(1536));
        assert_eq!(parse_size("2MiB"), Some(2 * MIB));
        assert_eq!(parse_size("1GiB"), Some(1024 * MIB));
        assert_eq!(parse_size("1TiB"), Some(1024 * 1024 * MIB));
        assert_eq!(parse_size("8b"), Some(1));
        assert_eq!(parse_size("8Kb"), Some(1000));
        assert_eq!(parse_size("8Mbit"), Some(1_000_000));
        assert_eq!(parse_size("1XB"), None);
        assert_eq!(parse_size("-1KiB"), None);
        assert_eq!(parse_size("abc"), None);
    }

    #[test]
    fn rate_units() {
        assert_eq!(parse_rate("115KiB"), Some(115 * KIB));
        assert_eq!(parse_rate("1MiB/s"), Some(MIB));
        assert_eq!(parse_rate("8Mbps"), Some(1_000_000));
        assert_eq!(parse_rate("2KBps"), Some(2 * KIB));
        assert_eq!(parse_rate("0B"), Some(0));
    }

    #[test]
    fn eta_forms() {
        assert_eq!(parse_eta("15s"), Some(15));
        assert_eq!(parse_eta("15"), Some(15));
        assert_eq!(parse_eta("4m51s"), Some(291));
        assert_eq!(parse_eta("1h38m7s"), Some(5887));
        assert_eq!(parse_eta("1h38m7"), Some(5887));
        assert_eq!(parse_eta("2d3h"), Some(2 * 86_400 + 3 * 3_600));
        assert_eq!(parse_eta(""), None);
        assert_eq!(parse_eta("soon"), None);
        assert_eq!(parse_eta("99999999999999999999s"), None);
    }

    #[test]
    fn parser_tracks_markers() {
        let mut parser = ProgressParser::new();
        assert!(!parser.saw_completion());
        parser.feed("[ERROR] CUID#7 - timeout");
        parser.feed("[ERROR] CUID#8 - connection refused");
        assert_eq!(parser.last_error(), Some("CUID#8 - connection refused"));
        parser.feed("[#abc 1B/1B(100%)]");
        parser.feed("Download complete: /tmp/x");
        assert!(parser.saw_completion());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_line_never_panics(line in ".*") {
                let _ = parse_line(&line);
            }

            #[test]
            fn readout_with_garbage_fields_still_yields_progress(done in "\\PC*", eta in "\\PC*") {
                let done = done.replace([']', '[', ' ', '\r', '\n'], "");
                let eta = eta.replace([']', '[', ' ', '\r', '\n'], "");
                let line = format!("[#abc {done}/1MiB(10%) DL:1KiB ETA:{eta}]");
                let event = parse_line(&line);
                prop_assert!(matches!(event, Some(ProgressEvent::Progress(_))));
            }

            #[test]
            fn kib_sizes_normalize_exactly(n in 0u64..1_000_000) {
                prop_assert_eq!(parse_size(&format!("{n}KiB")), Some(n * 1024));
                prop_assert_eq!(parse_size(&format!("{n}B")), Some(n));
            }

            #[test]
            fn hms_eta_round_trips(h in 0u64..100, m in 0u64..60, s in 0u64..60) {
                prop_assert_eq!(parse_eta(&format!("{h}h{m}m{s}s")), Some(h * 3600 + m * 60 + s));
            }
        }
    }
}
