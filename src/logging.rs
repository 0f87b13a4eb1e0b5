//! Multi-sink structured logging (§4.8): main activity, success-only, error-only, debug, and
//! stats, each a non-blocking rolling file appender layered under one `tracing_subscriber`
//! registry. Logging is purely descriptive — nothing here feeds back into engine behaviour.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Guards for the non-blocking writers; dropping these stops flushing, so the caller must hold
/// them for the process lifetime.
pub struct LoggingGuards {
	_main: tracing_appender::non_blocking::WorkerGuard,
	_success: tracing_appender::non_blocking::WorkerGuard,
	_error: tracing_appender::non_blocking::WorkerGuard,
	_debug: tracing_appender::non_blocking::WorkerGuard,
	_stats: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init() -> LoggingGuards {
	let log_dir = v_utils::xdg_state_file!("logs");
	std::fs::create_dir_all(&log_dir).expect("failed to create log directory");

	let (main_writer, main_guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "activity.log"));
	let (success_writer, success_guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "success.log"));
	let (error_writer, error_guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "error.log"));
	let (debug_writer, debug_guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "debug.log"));
	let (stats_writer, stats_guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "stats.log"));

	let main_layer = tracing_subscriber::fmt::layer().with_writer(main_writer).with_ansi(false).with_filter(EnvFilter::new("info"));

	let success_layer = tracing_subscriber::fmt::layer().with_writer(success_writer).with_ansi(false).with_filter(tracing_subscriber::filter::filter_fn(|meta| meta.target() == "success"));

	let error_layer = tracing_subscriber::fmt::layer().with_writer(error_writer).with_ansi(false).with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

	let debug_layer = tracing_subscriber::fmt::layer().with_writer(debug_writer).with_ansi(false).with_filter(EnvFilter::new("debug"));

	let stats_layer = tracing_subscriber::fmt::layer().with_writer(stats_writer).with_ansi(false).with_filter(tracing_subscriber::filter::filter_fn(|meta| meta.target() == "stats"));

	let stdout_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()));

	let subscriber = Registry::default().with(main_layer).with(success_layer).with(error_layer).with(debug_layer).with(stats_layer).with(stdout_layer);

	tracing::subscriber::set_global_default(subscriber).expect("failed to install tracing subscriber");

	LoggingGuards { _main: main_guard, _success: success_guard, _error: error_guard, _debug: debug_guard, _stats: stats_guard }
}

/// Logs a per-target outcome to the `success`/`error` sinks per §4.8, tagged with the target so
/// the stats sink can be parsed mechanically for the daily summary.
pub fn log_target_outcome(account_id: &str, target_url: &str, result: &crate::forward::ForwardResult) {
	if result.success {
		tracing::info!(target: "success", account_id, target_url, elapsed_ms = result.elapsed.as_millis() as u64, "forwarded");
	} else {
		tracing::error!(target: "error", account_id, target_url, error_kind = ?result.error_kind, message = %result.message, "forward failed");
	}
}

/// Logs the end-of-cycle summary to the `stats` sink.
pub fn log_cycle_summary(account_id: &str, session: &crate::model::CycleSession) {
	tracing::info!(
		target: "stats",
		account_id,
		session_id = session.session_id,
		total_targets = session.total_targets,
		successful = session.successful,
		failed = session.failed,
		"cycle complete"
	);
}

/// Aggregates the current day's stats-sink records into a single summary line. The stats sink
/// rolls daily, so "today" is always the currently-open file; this reads it directly rather than
/// re-deriving the date format tracing-appender uses internally.
pub fn log_daily_summary(log_dir: &std::path::Path, accounts_run: usize) {
	let today_path = log_dir.join(format!("stats.log.{}", jiff::Zoned::now().strftime("%Y-%m-%d")));
	let cycles = std::fs::read_to_string(&today_path).map(|content| content.lines().filter(|l| l.contains("cycle complete")).count()).unwrap_or(0);
	tracing::info!(target: "stats", accounts_run, cycles_today = cycles, "daily summary");
}
