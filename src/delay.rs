//! Parsing/formatting for the two human-facing duration surfaces in the persistent store: the
//! per-account delay string and the expiry timestamp (§6).

use jiff::Timestamp;
use jiff::civil::DateTime;
use regex::Regex;
use std::sync::LazyLock;

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*([hms])").unwrap());
static BARE_INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+\s*$").unwrap());

/// Parses a delay string like `"2m 45s"` (any subset of h/m/s, any order, whitespace-tolerant,
/// case-insensitive). A bare integer means seconds. Empty or unparsable input falls back to the
/// 60s default; the result is always floored at 1s (B1).
pub fn parse(raw: &str) -> u64 {
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return 1;
	}

	if BARE_INT.is_match(trimmed) {
		let secs: u64 = trimmed.trim().parse().unwrap_or(1);
		return secs.max(1);
	}

	let mut total = 0u64;
	let mut matched_any = false;
	for cap in COMPONENT.captures_iter(trimmed) {
		matched_any = true;
		let value: u64 = cap[1].parse().unwrap_or(0);
		total += match cap[2].to_ascii_lowercase().as_str() {
			"h" => value * 3600,
			"m" => value * 60,
			"s" => value,
			_ => 0,
		};
	}

	if !matched_any {
		return 60;
	}
	total.max(1)
}

/// Renders a delay back to the canonical `"<h>h <m>m <s>s"` form (only non-zero components).
pub fn format(total_secs: u64) -> String {
	let h = total_secs / 3600;
	let m = (total_secs % 3600) / 60;
	let s = total_secs % 60;
	let mut parts = Vec::new();
	if h > 0 {
		parts.push(format!("{h}h"));
	}
	if m > 0 {
		parts.push(format!("{m}m"));
	}
	if s > 0 || parts.is_empty() {
		parts.push(format!("{s}s"));
	}
	parts.join(" ")
}

const EXPIRY_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Parses `"YYYY-MM-DD-HH:MM:SS"` in local time, per §6.
pub fn parse_expiry(raw: &str) -> Option<Timestamp> {
	let dt = DateTime::strptime(EXPIRY_FORMAT, raw).ok()?;
	dt.to_zoned(jiff::tz::TimeZone::system()).ok().map(|z| z.timestamp())
}

pub fn format_expiry(ts: Timestamp) -> String {
	let zoned = ts.to_zoned(jiff::tz::TimeZone::system());
	zoned.strftime(EXPIRY_FORMAT).to_string()
}

/// One of the admin bot's expiry presets (§4.7).
pub enum ExpiryPreset {
	Unlimited,
	Plus1Month,
	Plus3Months,
	Plus6Months,
	Plus1Year,
}

pub fn resolve_preset(preset: ExpiryPreset, now: Timestamp) -> Option<Timestamp> {
	use jiff::SignedDuration;
	match preset {
		ExpiryPreset::Unlimited => None,
		ExpiryPreset::Plus1Month => Some(now + SignedDuration::from_hours(30 * 24)),
		ExpiryPreset::Plus3Months => Some(now + SignedDuration::from_hours(90 * 24)),
		ExpiryPreset::Plus6Months => Some(now + SignedDuration::from_hours(180 * 24)),
		ExpiryPreset::Plus1Year => Some(now + SignedDuration::from_hours(365 * 24)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_string_floors_to_one_second() {
		assert_eq!(parse(""), 1);
	}

	#[test]
	fn zero_floors_to_one_second() {
		assert_eq!(parse("0"), 1);
	}

	#[test]
	fn combined_components_sum_correctly() {
		assert_eq!(parse("5m30s"), 330);
		assert_eq!(parse("1h"), 3600);
		assert_eq!(parse("2m 45s"), 165);
	}

	#[test]
	fn garbage_falls_back_to_default() {
		assert_eq!(parse("not a duration"), 60);
	}

	#[test]
	fn bare_integer_means_seconds() {
		assert_eq!(parse("90"), 90);
	}

	#[test]
	fn expiry_round_trips() {
		let raw = "2026-03-05-14:30:00";
		let ts = parse_expiry(raw).unwrap();
		assert_eq!(format_expiry(ts), raw);
	}
}
