use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use colored::Colorize;
use tg_relay::config::AppConfig;
use tg_relay::{admin_bot, logging, store, supervisor};
use v_utils::io::ExpandedPath;
use v_utils::utils::exit_on_error;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	/// Path to the config file; defaults to the XDG config location.
	#[arg(long, global = true)]
	config: Option<ExpandedPath>,
}

#[derive(Subcommand)]
enum Commands {
	/// Runs the supervisor and admin bot until interrupted. This is the normal, long-running mode.
	Supervisor(SupervisorArgs),
	/// Loads and validates the persistent documents and global config without opening any
	/// Telegram sessions; exits non-zero on the first problem found.
	CheckConfig,
}

#[derive(Args)]
struct SupervisorArgs {}

fn main() {
	let cli = Cli::parse();
	exit_on_error(color_eyre::install());

	let config: AppConfig = exit_on_error(AppConfig::read(cli.config));

	let success = match cli.command {
		Commands::Supervisor(args) => run_supervisor(config, args),
		Commands::CheckConfig => check_config(config),
	};
	exit_on_error(success);
}

fn run_supervisor(config: AppConfig, _args: SupervisorArgs) -> Result<()> {
	let _guards = logging::init();

	// Grammers' TL deserialization recurses with the shape of the wire data, so the default 2MB
	// tokio thread stack isn't enough headroom for a pathological update.
	let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().thread_stack_size(8 * 1024 * 1024).build()?;
	runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
	let store = Arc::new(store::Store::new(std::path::PathBuf::from(&config.paths.data_dir)));
	std::fs::create_dir_all(store.root())?;
	std::fs::create_dir_all(store.root().join("sessions"))?;

	let admin_bot_session = store.root().join("sessions").join("admin_bot.session");
	let admin_bot_config = config.admin_bot.clone();
	let admin_store = Arc::clone(&store);
	let stats_board: tg_relay::supervisor::StatsBoard = Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new()));
	let admin_stats_board = Arc::clone(&stats_board);

	let admin_bot = tokio::spawn(async move {
		if let Err(e) = admin_bot::run(admin_bot_config, admin_store, admin_stats_board, admin_bot_session).await {
			tracing::error!("admin bot exited: {e}");
		}
	});

	let supervisor = tokio::spawn(async move {
		if let Err(e) = supervisor::run(store, stats_board).await {
			tracing::error!("supervisor exited: {e}");
		}
	});

	tokio::select! {
		_ = admin_bot => {},
		_ = supervisor => {},
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("shutdown requested");
		}
	}
	Ok(())
}

fn check_config(config: AppConfig) -> Result<()> {
	let store = store::Store::new(std::path::PathBuf::from(&config.paths.data_dir));
	let accounts = store.load_accounts()?;
	let targets = store.load_targets()?;
	let (operators, admin_limit) = store.load_operators(config.admin_bot.bootstrap_primary_admin)?;
	let policy = store.load_global_policy()?;

	println!("{}", "config OK".green());
	println!("  data dir: {}", config.paths.data_dir);
	println!("  accounts: {}", accounts.len());
	println!("  targets: {}", targets.values().map(Vec::len).sum::<usize>());
	println!("  operators: {} (admin_limit={admin_limit})", operators.len());
	println!("  global policy: {policy:?}");
	Ok(())
}
