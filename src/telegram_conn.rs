//! Per-account MTProto connection handling: session storage, authorisation, dialog-cache
//! warm-up, and the runner/update-stream split used for structured concurrency.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use color_eyre::eyre::{Result, bail};
use grammers_client::{Client, SignInError, UpdatesConfiguration};
use grammers_mtsender::SenderPool;
use grammers_session::storages::SqliteSession;
use tracing::{debug, error, info};

/// A pinned future representing the MTProto runner; poll it alongside other futures via `select`.
pub type RunnerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct TelegramConnection {
	pub client: Client,
	pub updates: grammers_client::client::updates::UpdateStream,
	pub runner: RunnerFuture,
}

/// What kind of login this connection performs.
pub enum Auth<'a> {
	/// An already-enrolled user account. Ordinarily the session must already be authorised (the
	/// admin bot's enrolment flow is how an account gets there, §4.7); if it isn't and
	/// `TELEGRAM_HEADLESS` is unset, falls back to the interactive terminal prompt below, mirroring
	/// how a freshly-bootstrapped session is authorised outside of chat.
	ExistingUser { phone: &'a str },
	/// Bot-token sign-in for the admin bot's own session.
	Bot { token: &'a str },
}

/// Establishes a connection against `session_file`, requiring it to already be authorised
/// unless `auth` says otherwise. Warms the dialog cache so that bare chat-id lookups later
/// succeed (access hashes are only known once a chat has appeared in a dialog).
pub async fn connect(session_file: &std::path::Path, api_id: i32, api_hash: &str, auth: Auth<'_>) -> Result<TelegramConnection> {
	info!("Opening session database at {}", session_file.display());
	let session = match SqliteSession::open(session_file) {
		Ok(s) => Arc::new(s),
		Err(e) => {
			let err_str = e.to_string();
			if err_str.contains("not a database") || err_str.contains("code 26") {
				error!("Session database is corrupted: {e}");
				std::fs::remove_file(session_file)?;
				Arc::new(SqliteSession::open(session_file)?)
			} else {
				return Err(e.into());
			}
		}
	};

	let pool = SenderPool::new(Arc::clone(&session), api_id);
	let client = Client::new(&pool);
	let SenderPool { runner, updates, .. } = pool;
	let runner: RunnerFuture = Box::pin(runner.run());

	if !client.is_authorized().await? {
		match auth {
			Auth::ExistingUser { .. } if crate::config::headless() => {
				bail!("session at {} is not authorised and TELEGRAM_HEADLESS is set; enrol the account via the admin bot instead", session_file.display());
			}
			Auth::ExistingUser { phone } => authenticate_interactive(&client, phone, api_hash).await?,
			Auth::Bot { token } => {
				info!("Bot session not authorised, signing in with bot token");
				client.bot_sign_in(token).await?;
			}
		}
	}

	info!("Pre-fetching dialogs to warm peer cache...");
	let mut dialog_count = 0;
	let mut dialogs = client.iter_dialogs();
	while let Some(dialog) = dialogs.next().await? {
		dialog_count += 1;
		debug!("Cached dialog: {} ({})", dialog.peer().name().unwrap_or_default(), dialog.peer().id());
	}
	info!("Cached {dialog_count} dialogs");

	let updates = client.stream_updates(updates, UpdatesConfiguration { catch_up: false, ..Default::default() });

	Ok(TelegramConnection { client, updates, runner })
}

/// The enrolment flow keeps a half-authorised client alive between "send code" and "verify code"
/// (§4.7). This mirrors `connect` but stops right after requesting the code, handing the caller
/// the live client plus the token needed to complete sign-in.
pub struct PendingSignIn {
	pub client: Client,
	pub runner: RunnerFuture,
	pub token: grammers_client::types::LoginToken,
}

pub async fn begin_enrolment(session_file: &std::path::Path, api_id: i32, api_hash: &str, phone: &str) -> Result<PendingSignIn> {
	if session_file.exists() {
		std::fs::remove_file(session_file)?;
	}
	let session = Arc::new(SqliteSession::open(session_file)?);
	let pool = SenderPool::new(Arc::clone(&session), api_id);
	let client = Client::new(&pool);
	let SenderPool { runner, .. } = pool;
	let runner: RunnerFuture = Box::pin(runner.run());

	info!("Requesting login code for {phone}");
	let token = client.request_login_code(phone, api_hash).await?;
	Ok(PendingSignIn { client, runner, token })
}

/// Completes an enrolment started by [`begin_enrolment`]. `Err` carrying
/// [`SignInError::PasswordRequired`] means the account has 2FA enabled, which §4.7(iv) treats
/// as an abort rather than a retry.
pub async fn complete_enrolment(pending: &PendingSignIn, code: &str) -> Result<(), SignInError> {
	pending.client.sign_in(&pending.token, code).await.map(|_| ())
}

/// Terminal-driven sign-in for an unauthorised `ExistingUser` session, used outside of the admin
/// bot's chat-based enrolment (e.g. bootstrapping a session by hand on the machine running the
/// process). Disabled entirely by `TELEGRAM_HEADLESS`.
async fn authenticate_interactive(client: &Client, phone: &str, api_hash: &str) -> Result<()> {
	info!("Not authorized, requesting login code for {phone}");
	let token = client.request_login_code(phone, api_hash).await?;
	info!("Login code requested successfully, check your Telegram app");

	println!("Enter the code you received: ");
	let mut code = String::new();
	std::io::stdin().read_line(&mut code)?;
	let code = code.trim();

	match client.sign_in(&token, code).await {
		Ok(_) => info!("Sign in successful"),
		Err(SignInError::PasswordRequired(password_token)) => {
			print!("Enter your 2FA password: ");
			std::io::Write::flush(&mut std::io::stderr())?;
			let mut password = String::new();
			std::io::stdin().read_line(&mut password)?;
			let password = password.trim();

			client.check_password(password_token, password).await?;
			info!("2FA authentication successful");
		}
		Err(e) => bail!("sign in failed: {e}"),
	}
	Ok(())
}
