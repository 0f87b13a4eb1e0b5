//! The per-account worker: owns one authenticated Telegram session, runs the infinite cycle, and
//! honours the account's delay, forwarding mode and expiry (§4.4).
//!
//! State machine: INIT → AUTH → READY → RUNNING ⇄ WAITING → TERMINATED. Modelled as independent
//! task-per-worker per the REDESIGN FLAGS in §9, rather than the cooperative polling loop the
//! single-tenant ancestor of this module used — each worker here has its own lifetime, started
//! and stopped independently by the supervisor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use grammers_client::Client;
use jiff::Timestamp;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::errors::RetryDecision;
use crate::model::{Account, CycleSession, ForwardMode, Target, WorkerStats};
use crate::telegram_conn::{self, Auth};

/// The subset of an account's configuration a worker re-reads between suspension points. Writes
/// come from the supervisor; reads come from exactly one worker — the single-writer/single-reader
/// discipline §5 requires.
#[derive(Clone, Debug)]
pub struct LiveConfig {
	pub start: bool,
	pub delay_secs: u64,
	pub forward_mode: ForwardMode,
	pub expiry_date: Option<Timestamp>,
	pub targets: Vec<Target>,
}

impl LiveConfig {
	pub fn from_account(account: &Account, targets: Vec<Target>, policy: &crate::model::GlobalPolicy) -> Self {
		Self { start: account.start, delay_secs: account.effective_delay_secs(policy), forward_mode: account.effective_forward_mode(policy), expiry_date: account.expiry_date, targets }
	}

	fn is_expired(&self, now: Timestamp) -> bool {
		self.expiry_date.is_some_and(|e| now >= e)
	}
}

/// Handle the supervisor keeps per running worker.
pub struct WorkerHandle {
	pub config_tx: watch::Sender<LiveConfig>,
	pub stop: Arc<tokio::sync::Notify>,
	pub join: tokio::task::JoinHandle<()>,
	pub stats: Arc<tokio::sync::RwLock<WorkerStats>>,
}

/// Spawns the worker task. Returns immediately after authorising the session; the caller decides
/// whether a failure here should skip the account (matching §4.5's "for authorisation failures,
/// skip that account").
pub async fn spawn(account_id: String, api_id: i32, api_hash: String, phone: String, session_file: PathBuf, initial: LiveConfig) -> color_eyre::eyre::Result<WorkerHandle> {
	let conn = telegram_conn::connect(&session_file, api_id, &api_hash, Auth::ExistingUser { phone: &phone }).await?;
	// The worker only ever issues direct RPCs (fetch source, resolve, forward); it never reacts to
	// pushed updates, so the runner is driven in the background and the update stream is dropped.
	tokio::spawn(conn.runner);
	drop(conn.updates);
	let client = conn.client;

	let (config_tx, config_rx) = watch::channel(initial);
	let stop = Arc::new(tokio::sync::Notify::new());
	let stats = Arc::new(tokio::sync::RwLock::new(WorkerStats { start_time: Some(Timestamp::now()), ..Default::default() }));

	let join = {
		let stop = Arc::clone(&stop);
		let stats = Arc::clone(&stats);
		let account_id = account_id.clone();
		tokio::spawn(async move {
			run(account_id, client, config_rx, stop, stats).await;
		})
	};

	Ok(WorkerHandle { config_tx, stop, join, stats })
}

/// Drives one worker from READY through RUNNING/WAITING until TERMINATED.
async fn run(account_id: String, client: Client, mut config_rx: watch::Receiver<LiveConfig>, stop: Arc<tokio::sync::Notify>, stats: Arc<tokio::sync::RwLock<WorkerStats>>) {
	let mut session_id: u64 = 0;

	loop {
		let cfg = config_rx.borrow().clone();
		if !cfg.start || cfg.is_expired(Timestamp::now()) {
			// READY/WAITING → TERMINATED: operator stopped us, or we expired.
			info!(account_id, "worker terminating: start={} expired={}", cfg.start, cfg.is_expired(Timestamp::now()));
			return;
		}

		if crate::utils::should_reconnect_for_stack() {
			warn!(account_id, "stack usage critical before cycle, terminating for supervisor restart");
			return;
		}
		crate::utils::log_stack_usage("worker loop start");

		session_id += 1;
		let ran_to_completion = tokio::select! {
			_ = stop.notified() => {
				info!(account_id, "stop signal received, terminating");
				return;
			}
			res = run_cycle(&account_id, session_id, &client, &cfg, &stats) => res,
		};

		if !ran_to_completion {
			error!(account_id, "cycle aborted on a catastrophic error, ending worker");
			return;
		}

		let wait = Duration::from_secs(cfg.delay_secs);
		tokio::select! {
			_ = stop.notified() => {
				info!(account_id, "stop signal received during inter-cycle wait, terminating");
				return;
			}
			_ = sleep(wait) => {}
			changed = config_rx.changed() => {
				if changed.is_err() {
					return;
				}
			}
		}
	}
}

/// Runs one full cycle: snapshot → fetch source → iterate targets → summarise. Returns `false`
/// only on a catastrophic per-cycle error (source fetch failed fatally, auth revoked) that should
/// terminate the worker; ordinary per-target failures never abort the cycle.
async fn run_cycle(account_id: &str, session_id: u64, client: &Client, cfg: &LiveConfig, stats: &Arc<tokio::sync::RwLock<WorkerStats>>) -> bool {
	let active_targets: Vec<&Target> = cfg.targets.iter().filter(|t| t.active).collect();

	if active_targets.is_empty() {
		sleep(Duration::from_secs(30)).await;
		return true;
	}

	let source = match fetch_latest_saved_message(client).await {
		Ok(Some(m)) => m,
		Ok(None) => {
			info!(account_id, "no saved messages to forward this cycle");
			return true;
		}
		Err(e) => {
			error!(account_id, "fatal error fetching source message: {e}");
			return false;
		}
	};

	let mut session = CycleSession::new(session_id, active_targets.len());
	session.source_preview = Some(source.text().chars().take(80).collect());

	for target in &active_targets {
		let resolution = match &target.resolved {
			Some(entity) => Ok(crate::entity_resolver::Resolution { entity: entity.clone(), join: crate::entity_resolver::JoinOutcome::default() }),
			None => match crate::url_parser::parse(&target.url) {
				Some(parsed) => crate::entity_resolver::resolve(client, &parsed).await,
				None => Err(color_eyre::eyre::eyre!("invalid_target: '{}' does not parse", target.url)),
			},
		};

		let entity = match resolution {
			Ok(r) => r.entity,
			Err(e) => {
				session.failed += 1;
				session.errors.push(format!("{}: {e}", target.url));
				crate::logging::log_target_outcome(account_id, &target.url, &crate::forward::ForwardResult { success: false, message: e.to_string(), elapsed: Duration::ZERO, message_type: crate::model::MessageType::Unknown, error_kind: None, retry_after: None, used_fallback_to_main_chat: false });
				continue;
			}
		};

		let parsed_topic = crate::url_parser::parse(&target.url).and_then(|p| p.topic_id);
		let outcome = forward_with_retry(client, &source, &entity, parsed_topic, cfg.forward_mode).await;

		crate::logging::log_target_outcome(account_id, &target.url, &outcome);
		if outcome.success {
			session.successful += 1;
		} else {
			session.failed += 1;
			session.errors.push(format!("{}: {}", target.url, outcome.message));
		}

		let inter_target_wait = match outcome.retry_after {
			Some(secs) if secs > 0 => Duration::from_secs(secs),
			_ => Duration::from_secs(cfg.delay_secs),
		};
		sleep(inter_target_wait).await;
	}

	session.finish();
	crate::logging::log_cycle_summary(account_id, &session);

	{
		let mut s = stats.write().await;
		s.success_count += session.successful as u64;
		s.failed_count += session.failed as u64;
		s.last_total_targets = session.total_targets;
	}

	true
}

/// Forwards to one target, applying the retry policy in §4.3 within this single target attempt.
async fn forward_with_retry(client: &Client, source: &grammers_client::types::Message, entity: &crate::model::ResolvedEntity, topic_id: Option<i32>, mode: ForwardMode) -> crate::forward::ForwardResult {
	let mut attempt_no = 0u32;
	loop {
		attempt_no += 1;
		let result = crate::forward::forward(client, source, entity, topic_id, mode).await;
		if result.success {
			return result;
		}
		let Some(kind) = result.error_kind else { return result };
		let classified = crate::errors::ClassifiedError { kind, message: result.message.clone(), retry_after: result.retry_after };
		match crate::errors::retry_decision(&classified, attempt_no) {
			RetryDecision::Abort => return result,
			RetryDecision::Retry { after, .. } => {
				sleep(after).await;
			}
		}
	}
}

/// Fetches the single most-recent message from the account's Saved Messages (`me`).
async fn fetch_latest_saved_message(client: &Client) -> color_eyre::eyre::Result<Option<grammers_client::types::Message>> {
	let me = client.get_me().await?;
	let saved_messages = grammers_client::types::Peer::User(me);
	let mut history = client.iter_messages(saved_messages).limit(1);
	Ok(history.next().await?)
}
