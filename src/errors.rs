//! Closed error taxonomy for forwarding attempts, and the retry/backoff policy over it.

use std::time::Duration;

use grammers_client::InvocationError;

/// A classified forwarding failure. Closed set — anything unrecognised is `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	FloodWait,
	SlowMode,
	AccessDenied,
	WriteForbidden,
	NotParticipant,
	InvalidTarget,
	TopicClosed,
	InviteInvalid,
	AlreadyParticipant,
	Unknown,
}

impl ErrorKind {
	/// Fallback-triggering topic errors (§4.2 routing).
	pub fn triggers_topic_fallback(self) -> bool {
		matches!(self, Self::TopicClosed)
	}
}

/// A classified error, carrying whatever extra data the RPC response attached.
#[derive(Clone, Debug)]
pub struct ClassifiedError {
	pub kind: ErrorKind,
	pub message: String,
	pub retry_after: Option<u64>,
}

/// Maps a raw RPC error to the closed taxonomy. Grammers surfaces the Telegram error code as a
/// string on `InvocationError::Rpc`; classification is a straight match over that string.
pub fn classify(err: &InvocationError) -> ClassifiedError {
	let message = err.to_string();
	let (name, value) = split_rpc_error(&message);

	let kind = match name {
		"FLOOD_WAIT" => ErrorKind::FloodWait,
		"SLOWMODE_WAIT" => ErrorKind::SlowMode,
		"CHAT_WRITE_FORBIDDEN" | "CHANNEL_WRITE_FORBIDDEN" => ErrorKind::WriteForbidden,
		"CHAT_ADMIN_REQUIRED" | "CHANNEL_PRIVATE" | "USER_BANNED_IN_CHANNEL" => ErrorKind::AccessDenied,
		"USER_NOT_PARTICIPANT" | "CHANNEL_NOT_FOUND_IN_HISTORY" => ErrorKind::NotParticipant,
		"USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID" | "PEER_ID_INVALID" => ErrorKind::InvalidTarget,
		"TOPIC_CLOSED" | "MESSAGE_ID_INVALID" => ErrorKind::TopicClosed,
		"INVITE_HASH_EXPIRED" | "INVITE_HASH_INVALID" => ErrorKind::InviteInvalid,
		"USER_ALREADY_PARTICIPANT" => ErrorKind::AlreadyParticipant,
		_ => ErrorKind::Unknown,
	};

	ClassifiedError { kind, message, retry_after: value }
}

/// Telegram RPC errors are surfaced as `NAME` or `NAME_123`; split off the trailing integer.
fn split_rpc_error(message: &str) -> (&str, Option<u64>) {
	let upper_run_end = message.find(|c: char| !(c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())).unwrap_or(message.len());
	let token = &message[..upper_run_end];
	match token.rsplit_once('_') {
		Some((name, digits)) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => (name, digits.parse().ok()),
		_ => (token, None),
	}
}

/// What a worker should do next after a classified failure on a single target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryDecision {
	/// Stop attempting this target this cycle; advance to the next one.
	Abort,
	/// Sleep `after`, then retry the same target. `charged_as_inter_target_delay` tells the
	/// caller whether this sleep should substitute the normal inter-target delay or is extra.
	Retry { after: Duration, counts_as_inter_target_delay: bool },
}

const RETRY_BASE: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;

/// Decides what to do after attempt number `attempt` (1-based) failed with `err`.
pub fn retry_decision(err: &ClassifiedError, attempt: u32) -> RetryDecision {
	match err.kind {
		ErrorKind::AccessDenied | ErrorKind::InvalidTarget | ErrorKind::WriteForbidden | ErrorKind::InviteInvalid | ErrorKind::AlreadyParticipant => RetryDecision::Abort,
		ErrorKind::FloodWait => {
			let wait = err.retry_after.unwrap_or(0) + 1;
			RetryDecision::Retry { after: Duration::from_secs(wait), counts_as_inter_target_delay: false }
		}
		ErrorKind::SlowMode => {
			let wait = err.retry_after.unwrap_or(0);
			RetryDecision::Retry { after: Duration::from_secs(wait), counts_as_inter_target_delay: false }
		}
		ErrorKind::TopicClosed => RetryDecision::Abort,
		ErrorKind::NotParticipant | ErrorKind::Unknown => {
			if attempt > MAX_RETRIES {
				RetryDecision::Abort
			} else {
				let secs = RETRY_BASE.as_secs() * 2u64.pow(attempt.saturating_sub(1));
				RetryDecision::Retry { after: Duration::from_secs(secs), counts_as_inter_target_delay: false }
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn classified(kind: ErrorKind, retry_after: Option<u64>) -> ClassifiedError {
		ClassifiedError { kind, message: String::new(), retry_after }
	}

	#[test]
	fn split_rpc_error_extracts_trailing_digits() {
		assert_eq!(split_rpc_error("FLOOD_WAIT_12"), ("FLOOD_WAIT", Some(12)));
		assert_eq!(split_rpc_error("CHANNEL_PRIVATE"), ("CHANNEL_PRIVATE", None));
	}

	#[test]
	fn flood_wait_retries_after_retry_after_plus_one() {
		let e = classified(ErrorKind::FloodWait, Some(12));
		match retry_decision(&e, 1) {
			RetryDecision::Retry { after, counts_as_inter_target_delay } => {
				assert_eq!(after, Duration::from_secs(13));
				assert!(!counts_as_inter_target_delay);
			}
			RetryDecision::Abort => panic!("flood_wait must retry"),
		}
	}

	#[test]
	fn non_retryable_kinds_abort_immediately() {
		for kind in [ErrorKind::AccessDenied, ErrorKind::InvalidTarget, ErrorKind::WriteForbidden, ErrorKind::InviteInvalid, ErrorKind::AlreadyParticipant] {
			let e = classified(kind, None);
			assert_eq!(retry_decision(&e, 1), RetryDecision::Abort);
		}
	}

	#[test]
	fn unknown_backs_off_exponentially_then_aborts() {
		let e = classified(ErrorKind::Unknown, None);
		assert_eq!(retry_decision(&e, 1), RetryDecision::Retry { after: Duration::from_secs(30), counts_as_inter_target_delay: false });
		assert_eq!(retry_decision(&e, 2), RetryDecision::Retry { after: Duration::from_secs(60), counts_as_inter_target_delay: false });
		assert_eq!(retry_decision(&e, 3), RetryDecision::Retry { after: Duration::from_secs(120), counts_as_inter_target_delay: false });
		assert_eq!(retry_decision(&e, 4), RetryDecision::Abort);
	}
}
