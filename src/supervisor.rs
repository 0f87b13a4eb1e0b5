//! Owns the worker registry, applies startup authorisation, and reacts to changes in the
//! persistent store (§4.5): accounts, targets and global policy are all plain JSON files an
//! operator (through the admin bot, or by hand) may edit at any time, and the supervisor is the
//! only thing that ever turns those edits into running or stopped workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;
use jiff::Timestamp;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::model::{Account, ForwardMode, GlobalPolicy, Target, WorkerStats};
use crate::store::Store;
use crate::worker::{self, LiveConfig};

const WATCH_DEBOUNCE: Duration = Duration::from_secs(2);

/// Published after every reconcile/exit/tick so the admin bot's `/status` command can read
/// current per-account stats without touching a live worker or the registry directly.
pub type StatsBoard = Arc<tokio::sync::RwLock<HashMap<String, WorkerStats>>>;

/// The part of a running worker's config that `reconcile` needs to detect as changed. Built from
/// *effective* values (delay/mode resolved against the policy in force at the time, targets
/// reduced to `(url, active)`) rather than raw `Account`/`Target` fields, so a global-policy
/// default change or a target's `active` toggle is never missed just because the raw account row
/// didn't change (§4.5).
#[derive(Clone, PartialEq)]
struct LiveSnapshot {
	delay_secs: u64,
	forward_mode: ForwardMode,
	expiry_date: Option<Timestamp>,
	targets: Vec<(String, bool)>,
}

impl LiveSnapshot {
	fn compute(account: &Account, targets: &[Target], policy: &GlobalPolicy) -> Self {
		Self {
			delay_secs: account.effective_delay_secs(policy),
			forward_mode: account.effective_forward_mode(policy),
			expiry_date: account.expiry_date,
			targets: targets.iter().map(|t| (t.url.clone(), t.active)).collect(),
		}
	}
}

struct Registered {
	config_tx: watch::Sender<LiveConfig>,
	stop: Arc<tokio::sync::Notify>,
	stats: Arc<tokio::sync::RwLock<WorkerStats>>,
	live: LiveSnapshot,
}

pub struct Supervisor {
	store: Arc<Store>,
	policy: GlobalPolicy,
	workers: HashMap<String, Registered>,
	/// Cloned into every spawned worker's exit-watcher task; a worker that returns on its own
	/// (expired, stopped, or a fatal cycle error) reports back here instead of the supervisor
	/// polling join handles.
	exit_tx: mpsc::Sender<String>,
}

impl Supervisor {
	pub fn new(store: Arc<Store>, exit_tx: mpsc::Sender<String>) -> Result<Self> {
		let policy = store.load_global_policy()?;
		Ok(Self { store, policy, workers: HashMap::new(), exit_tx })
	}

	/// Starts every account that should currently be running, skipping (not aborting on) accounts
	/// whose session fails to authorise (§4.5).
	async fn start_all(&mut self) -> Result<()> {
		let accounts = self.store.load_accounts()?;
		let targets = self.store.load_targets()?;
		for account in accounts.values() {
			if account.should_run(Timestamp::now()) {
				let t = targets.get(&account.account_id).cloned().unwrap_or_default();
				self.start_account(account, t).await;
			}
		}
		Ok(())
	}

	async fn start_account(&mut self, account: &Account, targets: Vec<Target>) {
		// The session file is wherever enrolment actually wrote it (keyed by phone, not
		// account_id=api_id); only accounts with no persisted path at all fall back to the default.
		let session_file = account.session_file.clone().map(std::path::PathBuf::from).unwrap_or_else(|| self.store.session_file_for(&account.account_id));
		let live_snapshot = LiveSnapshot::compute(account, &targets, &self.policy);
		let live = LiveConfig::from_account(account, targets, &self.policy);

		match worker::spawn(account.account_id.clone(), account.api_id, account.api_hash.clone(), account.phone.clone(), session_file, live).await {
			Ok(handle) => {
				info!(account_id = %account.account_id, "worker started");
				let account_id = account.account_id.clone();
				let exit_tx = self.exit_tx.clone();
				tokio::spawn(async move {
					let _ = handle.join.await;
					let _ = exit_tx.send(account_id).await;
				});
				self.workers.insert(account.account_id.clone(), Registered { config_tx: handle.config_tx, stop: handle.stop, stats: handle.stats, live: live_snapshot });
			}
			Err(e) => {
				warn!(account_id = %account.account_id, "skipping account, authorisation failed: {e}");
			}
		}
	}

	fn stop_account(&mut self, account_id: &str) {
		if let Some(reg) = self.workers.remove(account_id) {
			reg.stop.notify_one();
			info!(account_id, "worker stop signalled");
		}
	}

	/// Diffs the on-disk documents against the running registry and applies every change: new
	/// accounts are started, removed/disabled/expired accounts are stopped, and everything else
	/// gets its live config pushed through the watch channel (§5's single-writer discipline — the
	/// supervisor is the sole writer into every worker's `LiveConfig`).
	async fn reconcile(&mut self) -> Result<()> {
		self.policy = self.store.load_global_policy()?;
		let accounts = self.store.load_accounts()?;
		let mut targets_by_account = self.store.load_targets()?;
		let now = Timestamp::now();

		let mut seen = std::collections::HashSet::new();
		for account in accounts.values() {
			seen.insert(account.account_id.clone());
			let targets = targets_by_account.remove(&account.account_id).unwrap_or_default();

			let currently_running = self.workers.contains_key(&account.account_id);
			if currently_running && !account.should_run(now) {
				self.stop_account(&account.account_id);
				continue;
			}
			if !currently_running {
				if account.should_run(now) {
					self.start_account(account, targets).await;
				}
				continue;
			}

			let live_snapshot = LiveSnapshot::compute(account, &targets, &self.policy);
			let reg = self.workers.get(&account.account_id).unwrap();
			let changed = reg.live != live_snapshot;
			if changed {
				let live = LiveConfig::from_account(account, targets, &self.policy);
				let reg = self.workers.get_mut(&account.account_id).unwrap();
				if reg.config_tx.send(live).is_ok() {
					reg.live = live_snapshot;
					info!(account_id = %account.account_id, "live config updated");
				}
			}
		}

		let gone: Vec<String> = self.workers.keys().filter(|id| !seen.contains(*id)).cloned().collect();
		for id in gone {
			self.stop_account(&id);
		}

		Ok(())
	}

	/// Reports that aggregate stats for a quick status line; used by the admin bot's `/status`.
	pub async fn snapshot_stats(&self) -> Vec<(String, WorkerStats)> {
		let mut out = Vec::with_capacity(self.workers.len());
		for (id, reg) in &self.workers {
			out.push((id.clone(), reg.stats.read().await.clone()));
		}
		out
	}
}

/// Runs the supervisor until the process is asked to shut down. Spawns a background thread
/// running a `notify` watcher over the store directory (the same pattern used for config
/// reloading elsewhere in this codebase: raw events cross into async-land over a channel, never
/// touching the registry from the watcher thread itself), debounces bursts of filesystem events,
/// and reconciles the registry against disk on every debounced batch and whenever a worker exits
/// on its own.
pub async fn run(store: Arc<Store>, stats_board: StatsBoard) -> Result<()> {
	let (exit_tx, mut exit_rx) = mpsc::channel::<String>(32);
	let mut supervisor = Supervisor::new(Arc::clone(&store), exit_tx)?;
	supervisor.start_all().await?;
	*stats_board.write().await = supervisor.snapshot_stats().await.into_iter().collect();

	let (watch_tx, mut watch_rx) = mpsc::channel::<()>(32);
	let watch_dir = store.root().to_path_buf();
	std::thread::spawn(move || watch_store_dir(&watch_dir, watch_tx));

	let log_dir = v_utils::xdg_state_file!("logs");
	let mut daily_summary = tokio::time::interval(Duration::from_secs(24 * 3600));
	daily_summary.tick().await; // first tick fires immediately; skip it so day one isn't a no-op summary

	loop {
		tokio::select! {
			Some(()) = watch_rx.recv() => {
				drain_then_wait(&mut watch_rx).await;
				if let Err(e) = supervisor.reconcile().await {
					warn!("reconcile failed: {e}");
				}
				*stats_board.write().await = supervisor.snapshot_stats().await.into_iter().collect();
			}
			Some(account_id) = exit_rx.recv() => {
				info!(account_id, "worker exited on its own");
				supervisor.workers.remove(&account_id);
				*stats_board.write().await = supervisor.snapshot_stats().await.into_iter().collect();
			}
			_ = daily_summary.tick() => {
				crate::logging::log_daily_summary(&log_dir, supervisor.workers.len());
			}
			else => break,
		}
	}

	Ok(())
}

async fn drain_then_wait(rx: &mut mpsc::Receiver<()>) {
	tokio::time::sleep(WATCH_DEBOUNCE).await;
	while rx.try_recv().is_ok() {}
}

fn watch_store_dir(dir: &std::path::Path, tx: mpsc::Sender<()>) {
	use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
	let (ntx, nrx) = std::sync::mpsc::channel();
	let mut watcher = match RecommendedWatcher::new(ntx, Config::default().with_poll_interval(WATCH_DEBOUNCE)) {
		Ok(w) => w,
		Err(e) => {
			warn!("failed to create store watcher: {e}");
			return;
		}
	};
	if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
		warn!("failed to watch store directory {}: {e}", dir.display());
		return;
	}
	for event in nrx {
		if event.is_ok() && tx.blocking_send(()).is_err() {
			return;
		}
	}
}
