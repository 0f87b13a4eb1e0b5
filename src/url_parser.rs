//! Parses a user-supplied target string into a typed, kind-tagged [`ParsedTarget`].
//!
//! Priority-ordered rules per §4.1: the first matching pattern wins, mirroring the ordered
//! `URL_PATTERNS` table of the engine this was distilled from, but as an exhaustive match over
//! tagged variants rather than dynamic regex dispatch.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::TargetKind;

/// The outcome of parsing a target string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedTarget {
	pub original: String,
	pub kind: TargetKind,
	/// Username (without `@`), chat id as text, or invite hash, depending on `kind`.
	pub identifier: String,
	pub topic_id: Option<i32>,
	pub chat_id: Option<i64>,
	pub invite_hash: Option<String>,
	pub requires_join: bool,
}

static PRIVATE_TOPIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://t\.me/c/(\d+)/(\d+)/?$").unwrap());
static PRIVATE_CHANNEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://t\.me/c/(\d+)/?$").unwrap());
static JOINCHAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://t\.me/joinchat/([A-Za-z0-9_-]+)/?$").unwrap());
static INVITE_PLUS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://t\.me/\+([A-Za-z0-9_-]+)/?$").unwrap());
static PUBLIC_TOPIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://t\.me/([A-Za-z][A-Za-z0-9_]{3,31})/(\d+)/?$").unwrap());
static PUBLIC_CHANNEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://t\.me/([A-Za-z0-9_]+)/?$").unwrap());
static USERNAME_AT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^@([A-Za-z0-9_]+)$").unwrap());
static CHAT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());

/// Parses `raw` into a [`ParsedTarget`], or `None` if nothing matched (`is_valid = false`).
pub fn parse(raw: &str) -> Option<ParsedTarget> {
	let trimmed = raw.trim();

	if let Some(c) = PRIVATE_TOPIC.captures(trimmed) {
		let id: i64 = c[1].parse().ok()?;
		let topic: i32 = c[2].parse().ok()?;
		if topic <= 0 {
			return None;
		}
		let chat_id = normalize_private_chat_id(id);
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::PrivateTopic,
			identifier: chat_id.to_string(),
			topic_id: Some(topic),
			chat_id: Some(chat_id),
			invite_hash: None,
			requires_join: false,
		});
	}

	if let Some(c) = PRIVATE_CHANNEL.captures(trimmed) {
		let id: i64 = c[1].parse().ok()?;
		let chat_id = normalize_private_chat_id(id);
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::PrivateChannel,
			identifier: chat_id.to_string(),
			topic_id: None,
			chat_id: Some(chat_id),
			invite_hash: None,
			requires_join: false,
		});
	}

	if let Some(c) = JOINCHAT.captures(trimmed) {
		let hash = c[1].to_string();
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::InviteLink,
			identifier: hash.clone(),
			topic_id: None,
			chat_id: None,
			invite_hash: Some(hash),
			requires_join: true,
		});
	}

	if let Some(c) = INVITE_PLUS.captures(trimmed) {
		let hash = c[1].to_string();
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::InviteLink,
			identifier: hash.clone(),
			topic_id: None,
			chat_id: None,
			invite_hash: Some(hash),
			requires_join: true,
		});
	}

	// Bare `https://t.me/<name>` is always a username, never an invite hash, regardless of
	// length — resolving the Open Question in spec §9 per its own recommendation.
	if let Some(c) = PUBLIC_TOPIC.captures(trimmed) {
		let name = c[1].to_string();
		let topic: i32 = c[2].parse().ok()?;
		if topic <= 0 || !is_valid_username(&name) {
			return None;
		}
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::PublicTopic,
			identifier: name,
			topic_id: Some(topic),
			chat_id: None,
			invite_hash: None,
			requires_join: false,
		});
	}

	if let Some(c) = PUBLIC_CHANNEL.captures(trimmed) {
		let name = c[1].to_string();
		if is_valid_username(&name) {
			return Some(ParsedTarget {
				original: raw.to_string(),
				kind: TargetKind::PublicChannel,
				identifier: name,
				topic_id: None,
				chat_id: None,
				invite_hash: None,
				requires_join: false,
			});
		}
	}

	if let Some(c) = USERNAME_AT.captures(trimmed) {
		let name = c[1].to_string();
		if is_valid_username(&name) {
			return Some(ParsedTarget {
				original: raw.to_string(),
				kind: TargetKind::Username,
				identifier: name,
				topic_id: None,
				chat_id: None,
				invite_hash: None,
				requires_join: false,
			});
		}
	}

	if CHAT_ID.is_match(trimmed) {
		let id: i64 = trimmed.parse().ok()?;
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::ChatId,
			identifier: trimmed.to_string(),
			topic_id: None,
			chat_id: Some(id),
			invite_hash: None,
			requires_join: false,
		});
	}

	if is_valid_username(trimmed) {
		return Some(ParsedTarget {
			original: raw.to_string(),
			kind: TargetKind::Username,
			identifier: trimmed.to_string(),
			topic_id: None,
			chat_id: None,
			invite_hash: None,
			requires_join: false,
		});
	}

	None
}

/// Renders a parsed target back to its canonical textual form, for the round-trip law R1.
pub fn format(parsed: &ParsedTarget) -> String {
	match parsed.kind {
		TargetKind::PrivateTopic => format!("https://t.me/c/{}/{}", strip_private_prefix(parsed.chat_id.unwrap()), parsed.topic_id.unwrap()),
		TargetKind::PrivateChannel => format!("https://t.me/c/{}", strip_private_prefix(parsed.chat_id.unwrap())),
		TargetKind::InviteLink => format!("https://t.me/+{}", parsed.identifier),
		TargetKind::PublicTopic => format!("https://t.me/{}/{}", parsed.identifier, parsed.topic_id.unwrap()),
		TargetKind::PublicChannel => format!("https://t.me/{}", parsed.identifier),
		TargetKind::Username => format!("@{}", parsed.identifier),
		TargetKind::ChatId => parsed.identifier.clone(),
	}
}

/// Rewrites a positive private chat id to the `-100<id>` supergroup convention (normalisation,
/// B3). Already-negative ids are left untouched.
fn normalize_private_chat_id(id: i64) -> i64 {
	if id > 0 { format!("-100{id}").parse().unwrap() } else { id }
}

/// Inverse of [`normalize_private_chat_id`] for rendering the bare `/c/<id>` form back out.
fn strip_private_prefix(chat_id: i64) -> i64 {
	let s = chat_id.to_string();
	if let Some(rest) = s.strip_prefix("-100") { rest.parse().unwrap_or(chat_id) } else { chat_id }
}

/// Username grammar: 5–32 chars, first char alphabetic, last char alphanumeric, no `__`.
pub fn is_valid_username(name: &str) -> bool {
	let len = name.chars().count();
	if !(5..=32).contains(&len) {
		return false;
	}
	let mut chars = name.chars();
	let Some(first) = chars.next() else { return false };
	if !first.is_ascii_alphabetic() {
		return false;
	}
	let Some(last) = name.chars().last() else { return false };
	if !last.is_ascii_alphanumeric() {
		return false;
	}
	if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
		return false;
	}
	if name.contains("__") {
		return false;
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn private_topic_normalises_and_extracts_topic() {
		let p = parse("https://t.me/c/1234567890/55").unwrap();
		assert_eq!(p.kind, TargetKind::PrivateTopic);
		assert_eq!(p.chat_id, Some(-1001234567890));
		assert_eq!(p.topic_id, Some(55));
	}

	#[test]
	fn private_chat_id_normalises_to_minus_100_prefix() {
		let p = parse("https://t.me/c/1234567890").unwrap();
		assert_eq!(p.chat_id, Some(-1001234567890));
	}

	#[test]
	fn invite_link_plus_and_joinchat_both_require_join() {
		let a = parse("https://t.me/+AAAAAAAAAAAAAAAAAAAAAA").unwrap();
		assert_eq!(a.kind, TargetKind::InviteLink);
		assert!(a.requires_join);
		assert_eq!(a.invite_hash.as_deref(), Some("AAAAAAAAAAAAAAAAAAAAAA"));

		let b = parse("https://t.me/joinchat/BBBBBBBBBBBBBBBBBBBBBB").unwrap();
		assert_eq!(b.kind, TargetKind::InviteLink);
		assert!(b.requires_join);
	}

	#[test]
	fn bare_public_channel_is_never_mistaken_for_invite_hash() {
		// Regardless of length, without a `+`/`joinchat` prefix this is a username.
		let p = parse("https://t.me/abcdefghijklmnopqrstuv").unwrap();
		assert_eq!(p.kind, TargetKind::PublicChannel);
	}

	#[test]
	fn public_topic_requires_positive_topic_id() {
		assert!(parse("https://t.me/somechannel/0").is_none());
		assert!(parse("https://t.me/somechannel/-1").is_none());
		assert_eq!(parse("https://t.me/somechannel/7").unwrap().kind, TargetKind::PublicTopic);
	}

	#[test]
	fn username_with_at_and_bare_both_validated() {
		assert_eq!(parse("@good_name").unwrap().kind, TargetKind::Username);
		assert!(parse("@__bad").is_none());
		assert!(parse("ab").is_none());
		assert_eq!(parse("good_name").unwrap().kind, TargetKind::Username);
	}

	#[test]
	fn chat_id_matches_signed_integers() {
		assert_eq!(parse("-1001234567890").unwrap().kind, TargetKind::ChatId);
		assert_eq!(parse("12345").unwrap().kind, TargetKind::ChatId);
	}

	#[test]
	fn garbage_is_invalid() {
		assert!(parse("not a url at all!!").is_none());
	}

	#[test]
	fn round_trip_holds_for_canonical_forms() {
		for raw in ["https://t.me/somechannel", "https://t.me/somechannel/7", "@good_name", "-1001234567890"] {
			let parsed = parse(raw).unwrap();
			let rendered = format(&parsed);
			let reparsed = parse(&rendered).unwrap();
			assert_eq!(parsed, reparsed);
		}
	}
}
