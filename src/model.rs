//! Persisted and derived entities shared across the store, worker and admin bot.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// One principal allowed to drive the admin bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
	pub operator_id: i64,
	pub role: OperatorRole,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorRole {
	Primary,
	Secondary,
}

impl Operator {
	pub fn is_primary(&self) -> bool {
		self.role == OperatorRole::Primary
	}
}

/// Process-wide defaults read from the global-policy document.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalPolicy {
	pub auto_start_forwarding: bool,
	pub skip_confirmation: bool,
	/// Informative only; workers are always independent regardless of this flag.
	pub concurrent_users: bool,
	pub default_delay_secs: u64,
	pub default_forward_mode: ForwardMode,
}

impl Default for GlobalPolicy {
	fn default() -> Self {
		Self {
			auto_start_forwarding: true,
			skip_confirmation: false,
			concurrent_users: true,
			default_delay_secs: 60,
			default_forward_mode: ForwardMode::PreserveOriginal,
		}
	}
}

/// The three ways a source message can be re-posted to a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ForwardMode {
	#[default]
	PreserveOriginal,
	Silent,
	AsCopy,
}

impl ForwardMode {
	/// Parses the on-disk `"1"|"2"|"3"` code. Unknown values fall back to `PreserveOriginal` (B2).
	pub fn from_code(code: &str) -> Self {
		match code {
			"2" => Self::Silent,
			"3" => Self::AsCopy,
			_ => Self::PreserveOriginal,
		}
	}

	pub fn to_code(self) -> &'static str {
		match self {
			Self::PreserveOriginal => "1",
			Self::Silent => "2",
			Self::AsCopy => "3",
		}
	}
}

/// A Telegram user account the engine forwards on behalf of.
#[derive(Clone, Debug)]
pub struct Account {
	pub account_id: String,
	pub api_id: i32,
	pub api_hash: String,
	pub phone: String,
	pub session_file: Option<String>,
	pub start: bool,
	pub auto_start_forwarding: bool,
	pub delay_secs: u64,
	pub forward_mode: ForwardMode,
	pub mode_set: bool,
	pub expiry_date: Option<Timestamp>,
	pub last_updated: Timestamp,
}

impl Account {
	pub fn is_expired(&self, now: Timestamp) -> bool {
		match self.expiry_date {
			Some(expiry) => now > expiry,
			None => false,
		}
	}

	/// An expired account is treated as `start=false` regardless of the persisted flag.
	pub fn should_run(&self, now: Timestamp) -> bool {
		self.start && !self.is_expired(now)
	}

	pub fn effective_delay_secs(&self, policy: &GlobalPolicy) -> u64 {
		if self.mode_set { self.delay_secs } else { policy.default_delay_secs }
	}

	pub fn effective_forward_mode(&self, policy: &GlobalPolicy) -> ForwardMode {
		if self.mode_set { self.forward_mode } else { policy.default_forward_mode }
	}
}

/// Where a parsed target URL points, and what's needed to resolve/reach it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
	PublicChannel,
	PublicTopic,
	PrivateChannel,
	PrivateTopic,
	Username,
	ChatId,
	InviteLink,
}

/// A single forwarding destination attached to one account.
#[derive(Clone, Debug)]
pub struct Target {
	pub url: String,
	pub active: bool,
	pub added_at: Timestamp,
	/// Cached resolution outcome; `None` until the worker resolves it the first time it is used.
	pub resolved: Option<ResolvedEntity>,
}

impl Target {
	pub fn new(url: String) -> Self {
		Self { url, active: true, added_at: Timestamp::now(), resolved: None }
	}
}

/// Entity metadata extracted by the resolver, cached on a `Target` for the worker's lifetime.
/// `peer` is the live handle forwarding actually dispatches against; the rest is descriptive,
/// kept for statistics and admin-facing summaries.
#[derive(Clone, Debug)]
pub struct ResolvedEntity {
	pub peer: grammers_client::types::Peer,
	pub id: i64,
	pub title: Option<String>,
	pub username: Option<String>,
	pub kind: EntityKind,
	pub participants_count: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
	Channel,
	Supergroup,
	Group,
	User,
	Other,
}

/// The detected content shape of a source message, used for statistics/preview only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
	Text,
	Photo,
	Video,
	Document,
	Audio,
	Sticker,
	Voice,
	VideoNote,
	Poll,
	Location,
	Contact,
	Unknown,
}

/// One pass over a worker's target list.
#[derive(Clone, Debug)]
pub struct CycleSession {
	pub session_id: u64,
	pub start_time: Timestamp,
	pub end_time: Option<Timestamp>,
	pub total_targets: usize,
	pub successful: usize,
	pub failed: usize,
	pub errors: Vec<String>,
	pub source_preview: Option<String>,
}

impl CycleSession {
	pub fn new(session_id: u64, total_targets: usize) -> Self {
		Self {
			session_id,
			start_time: Timestamp::now(),
			end_time: None,
			total_targets,
			successful: 0,
			failed: 0,
			errors: Vec::new(),
			source_preview: None,
		}
	}

	pub fn finish(&mut self) {
		self.end_time = Some(Timestamp::now());
	}
}

/// Accumulated, worker-visible statistics across all cycles run so far.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerStats {
	pub success_count: u64,
	pub failed_count: u64,
	pub last_total_targets: usize,
	pub start_time: Option<Timestamp>,
}
