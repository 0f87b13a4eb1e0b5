//! End-to-end coverage of the persistent documents against a real temp directory: no live
//! Telegram session involved, just the store/model/parsing layer the supervisor reconciles
//! against (§4.5, §4.6).

use std::collections::HashMap;

use color_eyre::eyre::Result;
use jiff::Timestamp;
use tg_relay::model::{Account, ForwardMode, Target};
use tg_relay::store::Store;

fn new_account(id: &str) -> Account {
	Account {
		account_id: id.to_string(),
		api_id: id.parse().expect("test account ids must be the api_id, per §3"),
		api_hash: "deadbeefdeadbeefdeadbeefdeadbeef".to_string(),
		phone: "+15555550100".to_string(),
		session_file: None,
		start: false,
		auto_start_forwarding: true,
		delay_secs: 60,
		forward_mode: ForwardMode::PreserveOriginal,
		mode_set: true,
		expiry_date: None,
		last_updated: Timestamp::now(),
	}
}

/// A fresh account is created stopped, with a month-long default expiry (B1) and gets picked up
/// once an operator flips `start` and targets exist — the shape of enrolment followed by
/// `/start` and `/add_target`.
#[test]
fn account_lifecycle_through_store() -> Result<()> {
	let dir = tempfile::tempdir()?;
	let store = Store::new(dir.path().to_path_buf());

	let mut accounts = HashMap::new();
	let account = new_account("900100200");
	accounts.insert(account.account_id.clone(), account);
	store.save_accounts(&accounts)?;

	let mut targets = HashMap::new();
	targets.insert("900100200".to_string(), vec![Target::new("https://t.me/examplechannel".to_string())]);
	store.save_targets(&targets)?;

	let loaded_accounts = store.load_accounts()?;
	let loaded_targets = store.load_targets()?;
	assert_eq!(loaded_accounts.len(), 1);
	assert!(!loaded_accounts["900100200"].start);
	assert_eq!(loaded_targets["900100200"].len(), 1);
	assert!(loaded_targets["900100200"][0].active);

	// Operator runs `/start`.
	let mut accounts = loaded_accounts;
	accounts.get_mut("900100200").unwrap().start = true;
	store.save_accounts(&accounts)?;

	let reloaded = store.load_accounts()?;
	assert!(reloaded["900100200"].should_run(Timestamp::now()));

	Ok(())
}

/// An account past its `expiry_date` is never runnable again, even with `start=true` still set —
/// the worker and the supervisor's `reconcile` both need to agree on this (§4.1, §4.5).
#[test]
fn expired_account_never_runs() -> Result<()> {
	let mut account = new_account("1");
	account.start = true;
	account.expiry_date = Some(Timestamp::now() - jiff::SignedDuration::from_hours(1));

	assert!(account.is_expired(Timestamp::now()));
	assert!(!account.should_run(Timestamp::now()));
	Ok(())
}

/// Deleting a target by its 1-based index (as the admin bot's `/del_target` does) must not shift
/// the indices of the remaining ones out from under a second deletion in the same batch.
#[test]
fn deleting_targets_in_reverse_index_order_is_stable() -> Result<()> {
	let dir = tempfile::tempdir()?;
	let store = Store::new(dir.path().to_path_buf());

	let mut targets = HashMap::new();
	targets.insert(
		"1".to_string(),
		vec![Target::new("https://t.me/a".to_string()), Target::new("https://t.me/b".to_string()), Target::new("https://t.me/c".to_string())],
	);
	store.save_targets(&targets)?;

	let mut loaded = store.load_targets()?;
	let list = loaded.get_mut("1").unwrap();
	let mut indices = vec![1usize, 3usize]; // delete "a" and "c", keep "b"
	indices.sort_unstable_by(|a, b| b.cmp(a));
	for idx in indices {
		list.remove(idx - 1);
	}
	store.save_targets(&loaded)?;

	let reloaded = store.load_targets()?;
	assert_eq!(reloaded["1"].len(), 1);
	assert_eq!(reloaded["1"][0].url, "https://t.me/b");
	Ok(())
}

/// A forward-mode set explicitly on the account wins over the global policy default; otherwise
/// the policy default applies (§4.1's `mode_set` flag).
#[test]
fn forward_mode_falls_back_to_global_policy_when_unset() {
	use tg_relay::model::GlobalPolicy;

	let mut account = new_account("1");
	account.mode_set = false;
	account.forward_mode = ForwardMode::Silent; // stale value, should be ignored

	let policy = GlobalPolicy { default_forward_mode: ForwardMode::AsCopy, ..Default::default() };
	assert_eq!(account.effective_forward_mode(&policy), ForwardMode::AsCopy);

	account.mode_set = true;
	assert_eq!(account.effective_forward_mode(&policy), ForwardMode::Silent);
}
