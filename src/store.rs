//! The persistent data store: four on-disk documents (credentials, targets, operators,
//! global-policy), read with trailing-comma forgiveness and written atomically (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{Account, ForwardMode, GlobalPolicy, Operator, OperatorRole, Target};

pub struct Store {
	dir: PathBuf,
}

const CREDENTIALS_FILE: &str = "credentials.json";
const TARGETS_FILE: &str = "targets.json";
const OPERATORS_FILE: &str = "operators.json";
const GLOBAL_POLICY_FILE: &str = "global_policy.json";

impl Store {
	pub fn new(dir: PathBuf) -> Self {
		Self { dir }
	}

	fn path(&self, name: &str) -> PathBuf {
		self.dir.join(name)
	}

	/// The store's root directory, watched by the supervisor for changes to any of its documents.
	pub fn root(&self) -> &Path {
		&self.dir
	}

	/// Default session path for a key that has no `session_file` of its own recorded yet (a
	/// brand-new enrolment in progress). Once an account exists, its persisted `session_file` is
	/// authoritative — callers must not recompute this from `account_id`, since the enrolment flow
	/// names the file by phone rather than by api_id.
	pub fn session_file_for(&self, key: &str) -> PathBuf {
		self.dir.join("sessions").join(format!("{key}.session"))
	}

	// -- credentials -----------------------------------------------------

	pub fn load_accounts(&self) -> Result<HashMap<String, Account>> {
		let raw: HashMap<String, CredentialsRecord> = read_forgiving(&self.path(CREDENTIALS_FILE))?.unwrap_or_default();
		Ok(raw
			.into_iter()
			.filter_map(|(account_id, record)| match record.into_account(account_id.clone()) {
				Ok(account) => Some((account_id, account)),
				Err(e) => {
					tracing::warn!("skipping malformed credentials record for {account_id}: {e}");
					None
				}
			})
			.collect())
	}

	pub fn save_accounts(&self, accounts: &HashMap<String, Account>) -> Result<()> {
		let raw: HashMap<&str, CredentialsRecord> = accounts.iter().map(|(id, a)| (id.as_str(), CredentialsRecord::from_account(a))).collect();
		write_atomic(&self.path(CREDENTIALS_FILE), &raw)
	}

	// -- targets -----------------------------------------------------------

	pub fn load_targets(&self) -> Result<HashMap<String, Vec<Target>>> {
		let raw: HashMap<String, Vec<TargetEntry>> = read_forgiving(&self.path(TARGETS_FILE))?.unwrap_or_default();
		Ok(raw.into_iter().map(|(id, entries)| (id, entries.into_iter().map(TargetEntry::into_target).collect())).collect())
	}

	pub fn save_targets(&self, targets: &HashMap<String, Vec<Target>>) -> Result<()> {
		let raw: HashMap<&str, Vec<TargetEntry>> = targets.iter().map(|(id, ts)| (id.as_str(), ts.iter().map(TargetEntry::from_target).collect())).collect();
		write_atomic(&self.path(TARGETS_FILE), &raw)
	}

	// -- operators -----------------------------------------------------------

	pub fn load_operators(&self, bootstrap_primary: i64) -> Result<(Vec<Operator>, u32)> {
		let doc: Option<OperatorsDoc> = read_forgiving(&self.path(OPERATORS_FILE))?;
		let doc = doc.unwrap_or(OperatorsDoc { primary_admin: bootstrap_primary, admin_limit: 5, secondary_admins: Vec::new() });
		let mut operators = vec![Operator { operator_id: doc.primary_admin, role: OperatorRole::Primary }];
		operators.extend(doc.secondary_admins.into_iter().map(|id| Operator { operator_id: id, role: OperatorRole::Secondary }));
		Ok((operators, doc.admin_limit))
	}

	pub fn save_operators(&self, operators: &[Operator], admin_limit: u32) -> Result<()> {
		let primary = operators.iter().find(|o| o.is_primary()).map(|o| o.operator_id).unwrap_or_default();
		let secondary_admins = operators.iter().filter(|o| !o.is_primary()).map(|o| o.operator_id).collect();
		write_atomic(&self.path(OPERATORS_FILE), &OperatorsDoc { primary_admin: primary, admin_limit, secondary_admins })
	}

	// -- global policy -----------------------------------------------------

	pub fn load_global_policy(&self) -> Result<GlobalPolicy> {
		let doc: Option<GlobalPolicyDoc> = read_forgiving(&self.path(GLOBAL_POLICY_FILE))?;
		Ok(doc.map(GlobalPolicyDoc::into_policy).unwrap_or_default())
	}

	pub fn save_global_policy(&self, policy: &GlobalPolicy) -> Result<()> {
		write_atomic(&self.path(GLOBAL_POLICY_FILE), &GlobalPolicyDoc::from_policy(policy))
	}
}

// ---------------------------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct CredentialsRecord {
	api_id: String,
	api_hash: String,
	phone: String,
	#[serde(default)]
	session_file: Option<String>,
	#[serde(default)]
	start: bool,
	#[serde(default = "default_true")]
	auto_start_forwarding: bool,
	#[serde(default = "default_delay_string")]
	delay: String,
	#[serde(default = "default_forward_mode_code")]
	forward_mode: String,
	#[serde(default)]
	mode_set: bool,
	#[serde(default)]
	expiry_date: Option<String>,
	#[serde(default = "default_last_updated")]
	last_updated: String,
}

fn default_true() -> bool {
	true
}
fn default_delay_string() -> String {
	"1m".to_string()
}
fn default_forward_mode_code() -> String {
	"1".to_string()
}
fn default_last_updated() -> String {
	Timestamp::now().to_string()
}

impl CredentialsRecord {
	fn into_account(self, account_id: String) -> Result<Account> {
		let api_id: i32 = self.api_id.parse().with_context(|| format!("api_id '{}' is not an integer", self.api_id))?;
		Ok(Account {
			account_id,
			api_id,
			api_hash: self.api_hash,
			phone: self.phone,
			session_file: self.session_file,
			start: self.start,
			auto_start_forwarding: self.auto_start_forwarding,
			delay_secs: crate::delay::parse(&self.delay),
			forward_mode: ForwardMode::from_code(&self.forward_mode),
			mode_set: self.mode_set,
			expiry_date: self.expiry_date.as_deref().and_then(crate::delay::parse_expiry),
			last_updated: self.last_updated.parse().unwrap_or_else(|_| Timestamp::now()),
		})
	}

	fn from_account(account: &Account) -> Self {
		Self {
			api_id: account.api_id.to_string(),
			api_hash: account.api_hash.clone(),
			phone: account.phone.clone(),
			session_file: account.session_file.clone(),
			start: account.start,
			auto_start_forwarding: account.auto_start_forwarding,
			delay: crate::delay::format(account.delay_secs),
			forward_mode: account.forward_mode.to_code().to_string(),
			mode_set: account.mode_set,
			expiry_date: account.expiry_date.map(crate::delay::format_expiry),
			last_updated: account.last_updated.to_string(),
		}
	}
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TargetEntry {
	Simple(String),
	Full {
		url: String,
		#[serde(default, alias = "added_date")]
		added_at: Option<String>,
		#[serde(default = "default_true")]
		active: bool,
	},
}

impl TargetEntry {
	fn into_target(self) -> Target {
		match self {
			Self::Simple(url) => Target { url, active: true, added_at: Timestamp::now(), resolved: None },
			Self::Full { url, added_at, active } => Target { url, active, added_at: added_at.and_then(|s| s.parse().ok()).unwrap_or_else(Timestamp::now), resolved: None },
		}
	}

	fn from_target(target: &Target) -> Self {
		Self::Full { url: target.url.clone(), added_at: Some(target.added_at.to_string()), active: target.active }
	}
}

#[derive(Serialize, Deserialize)]
struct OperatorsDoc {
	primary_admin: i64,
	admin_limit: u32,
	secondary_admins: Vec<i64>,
}

#[derive(Serialize, Deserialize)]
struct GlobalPolicyDoc {
	#[serde(default = "default_true")]
	auto_start_forwarding: bool,
	#[serde(default)]
	skip_confirmation: bool,
	#[serde(default = "default_true")]
	concurrent_users: bool,
	#[serde(default = "default_policy_delay")]
	default_delay: u64,
	#[serde(default = "default_forward_mode_code")]
	default_forward_mode: String,
}

fn default_policy_delay() -> u64 {
	60
}

impl GlobalPolicyDoc {
	fn into_policy(self) -> GlobalPolicy {
		GlobalPolicy {
			auto_start_forwarding: self.auto_start_forwarding,
			skip_confirmation: self.skip_confirmation,
			concurrent_users: self.concurrent_users,
			default_delay_secs: self.default_delay,
			default_forward_mode: ForwardMode::from_code(&self.default_forward_mode),
		}
	}

	fn from_policy(policy: &GlobalPolicy) -> Self {
		Self {
			auto_start_forwarding: policy.auto_start_forwarding,
			skip_confirmation: policy.skip_confirmation,
			concurrent_users: policy.concurrent_users,
			default_delay: policy.default_delay_secs,
			default_forward_mode: policy.default_forward_mode.to_code().to_string(),
		}
	}
}

// ---------------------------------------------------------------------------------------------
// Read/write discipline
// ---------------------------------------------------------------------------------------------

/// Reads and parses `path` as JSON, tolerating a single stray trailing comma before a closing
/// `}`/`]` (the one forgiveness rule §4.6 requires, to ride out a watcher observing a
/// half-written file from a concurrent writer). Returns `None` if the file doesn't exist yet.
fn read_forgiving<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
	if !path.exists() {
		return Ok(None);
	}
	let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
	match serde_json::from_str(&content) {
		Ok(value) => Ok(Some(value)),
		Err(_) => {
			let fixed = strip_one_trailing_comma(&content);
			match serde_json::from_str(&fixed) {
				Ok(value) => Ok(Some(value)),
				Err(e) => {
					tracing::warn!("failed to parse {} even after trailing-comma forgiveness: {e}", path.display());
					Ok(None)
				}
			}
		}
	}
}

fn strip_one_trailing_comma(content: &str) -> String {
	let bytes = content.as_bytes();
	let mut out = String::with_capacity(content.len());
	let mut i = 0;
	while i < bytes.len() {
		let c = bytes[i] as char;
		if c == ',' {
			let mut j = i + 1;
			while j < bytes.len() && (bytes[j] as char).is_whitespace() {
				j += 1;
			}
			if j < bytes.len() && matches!(bytes[j] as char, '}' | ']') {
				i += 1;
				continue;
			}
		}
		out.push(c);
		i += 1;
	}
	out
}

/// Serializes `value` and writes it to `path` via a sibling temp file plus rename, so readers
/// (the supervisor's watcher included) never observe a half-written document.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let tmp_path = path.with_extension("json.tmp");
	let content = serde_json::to_string_pretty(value)?;
	std::fs::write(&tmp_path, content)?;
	std::fs::rename(&tmp_path, path)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn trailing_comma_before_closing_brace_is_stripped() {
		let input = r#"{"a": 1, "b": 2,}"#;
		let fixed = strip_one_trailing_comma(input);
		assert_eq!(fixed, r#"{"a": 1, "b": 2}"#);
		let _: serde_json::Value = serde_json::from_str(&fixed).unwrap();
	}

	#[test]
	fn trailing_comma_before_closing_bracket_is_stripped() {
		let input = r#"[1, 2, 3,]"#;
		let fixed = strip_one_trailing_comma(input);
		assert_eq!(fixed, r#"[1, 2, 3]"#);
	}

	#[test]
	fn round_trips_accounts_through_disk() {
		let dir = tempfile::tempdir().unwrap();
		let store = Store::new(dir.path().to_path_buf());

		let mut accounts = HashMap::new();
		accounts.insert(
			"25910392".to_string(),
			Account {
				account_id: "25910392".to_string(),
				api_id: 25910392,
				api_hash: "9e32cad6393a8598cc3a693ddfc2d66e".to_string(),
				phone: "+919098769260".to_string(),
				session_file: None,
				start: false,
				auto_start_forwarding: true,
				delay_secs: 60,
				forward_mode: ForwardMode::PreserveOriginal,
				mode_set: true,
				expiry_date: None,
				last_updated: Timestamp::now(),
			},
		);

		store.save_accounts(&accounts).unwrap();
		let loaded = store.load_accounts().unwrap();
		assert_eq!(loaded.len(), 1);
		let reloaded = &loaded["25910392"];
		assert_eq!(reloaded.api_id, 25910392);
		assert_eq!(reloaded.delay_secs, 60);
	}

	#[test]
	fn simple_string_target_entries_default_to_active() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(TARGETS_FILE), r#"{"1": ["https://t.me/somechannel"]}"#).unwrap();
		let store = Store::new(dir.path().to_path_buf());
		let targets = store.load_targets().unwrap();
		assert_eq!(targets["1"].len(), 1);
		assert!(targets["1"][0].active);
		assert_eq!(targets["1"][0].url, "https://t.me/somechannel");
	}

	#[test]
	fn admin_limit_cannot_go_below_current_secondary_count() {
		use crate::admin_bot::validate_admin_limit;
		let operators = vec![Operator { operator_id: 1, role: OperatorRole::Primary }, Operator { operator_id: 2, role: OperatorRole::Secondary }, Operator { operator_id: 3, role: OperatorRole::Secondary }];
		assert!(validate_admin_limit(&operators, 1).is_err());
		assert!(validate_admin_limit(&operators, 2).is_ok());
	}
}
