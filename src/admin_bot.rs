//! The admin bot: a second Telegram session, authenticated by bot token, exposing the store's
//! account/operator operations as operator-gated plain-text commands (§4.7). Its only effect on
//! the running engine is through the persistent store — the supervisor picks up every change via
//! its own file watcher, so this module never touches a live worker directly.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::eyre::{Result, eyre};
use grammers_client::types::Message;
use grammers_client::{Client, Update};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::AdminBotConfig;
use crate::model::{Account, ForwardMode, Operator, OperatorRole, Target};
use crate::store::Store;
use crate::supervisor::StatsBoard;
use crate::telegram_conn::{self, Auth, PendingSignIn};

/// State an operator's in-flight enrolment carries between messages; kept keyed by operator id
/// until the flow completes or is cancelled (§5).
enum Enrolment {
	AwaitingApiId,
	AwaitingApiHash { api_id: i32 },
	AwaitingPhone { api_id: i32, api_hash: String },
	AwaitingCode { api_id: i32, api_hash: String, phone: String, pending: PendingSignIn, attempts: u32 },
}

pub struct AdminBot {
	client: Client,
	store: Arc<Store>,
	bootstrap_primary: i64,
	stats_board: StatsBoard,
	enrolments: Mutex<HashMap<i64, Enrolment>>,
}

const MAX_CODE_ATTEMPTS: u32 = 3;

/// Runs the admin bot until its connection ends. Errors here are fatal to the process (the admin
/// bot has no sibling to fail over to), so the caller should treat a returned `Err` as a reason to
/// exit rather than retry silently.
pub async fn run(config: AdminBotConfig, store: Arc<Store>, stats_board: StatsBoard, session_file: std::path::PathBuf) -> Result<()> {
	let conn = telegram_conn::connect(&session_file, config.api_id, &config.api_hash, Auth::Bot { token: &config.bot_token }).await?;
	tokio::spawn(conn.runner);

	let bot = AdminBot { client: conn.client, store, bootstrap_primary: config.bootstrap_primary_admin, stats_board, enrolments: Mutex::new(HashMap::new()) };

	let mut updates = conn.updates;
	while let Ok(update) = updates.next().await {
		if let Update::NewMessage(message) = update
			&& !message.outgoing()
			&& let Err(e) = bot.handle_message(&message).await
		{
			warn!("admin bot failed to handle message: {e}");
		}
	}
	Ok(())
}

impl AdminBot {
	async fn handle_message(&self, message: &Message) -> Result<()> {
		let operator_id = message.sender().map(|chat| chat.id()).unwrap_or(0);
		let text = message.text().trim().to_string();

		// An enrolment conversation in progress for this operator takes priority over command
		// parsing, since the phone/code steps aren't prefixed with a command word.
		if self.enrolments.lock().await.contains_key(&operator_id) {
			return self.continue_enrolment(operator_id, message, &text).await;
		}

		let (operators, admin_limit) = self.store.load_operators(self.bootstrap_primary)?;
		let Some(caller) = operators.iter().find(|o| o.operator_id == operator_id) else {
			self.reply(message, "You are not authorised to use this bot.").await;
			return Ok(());
		};

		let mut parts = text.split_whitespace();
		let Some(cmd) = parts.next() else { return Ok(()) };
		let args: Vec<&str> = parts.collect();

		match cmd {
			"/add_account" => {
				self.enrolments.lock().await.insert(operator_id, Enrolment::AwaitingApiId);
				self.reply(message, "Send the api_id for the new account.").await;
			}
			"/status" => self.status(message).await?,
			"/start" => self.toggle_start(message, &args, true).await?,
			"/stop" => self.toggle_start(message, &args, false).await?,
			"/delay" => self.set_delay(message, &args).await?,
			"/mode" => self.set_mode(message, &args).await?,
			"/expiry" => self.set_expiry(message, &args).await?,
			"/targets" => self.list_targets(message, &args).await?,
			"/add_target" => self.add_targets(message, &args).await?,
			"/del_target" => self.delete_targets(message, &args).await?,
			"/del_account" => self.delete_account(message, &args).await?,
			"/add_operator" if caller.is_primary() => self.add_operator(message, &args, admin_limit).await?,
			"/remove_operator" if caller.is_primary() => self.remove_operator(message, &args).await?,
			"/set_admin_limit" if caller.is_primary() => self.set_admin_limit(message, &args).await?,
			"/add_operator" | "/remove_operator" | "/set_admin_limit" => {
				self.reply(message, "Only the primary operator can change operator settings.").await;
			}
			_ => {
				self.reply(message, "Unknown command.").await;
			}
		}
		Ok(())
	}

	// -- enrolment -----------------------------------------------------------------------------

	async fn continue_enrolment(&self, operator_id: i64, message: &Message, text: &str) -> Result<()> {
		let mut guard = self.enrolments.lock().await;
		let state = guard.remove(&operator_id).unwrap();

		let next = match state {
			Enrolment::AwaitingApiId => match text.parse::<i32>() {
				Ok(api_id) => {
					self.reply(message, "Send the api_hash.").await;
					Some(Enrolment::AwaitingApiHash { api_id })
				}
				Err(_) => {
					self.reply(message, "api_id must be an integer. Send it again.").await;
					Some(Enrolment::AwaitingApiId)
				}
			},
			Enrolment::AwaitingApiHash { api_id } => {
				self.reply(message, "Send the phone number, with country code.").await;
				Some(Enrolment::AwaitingPhone { api_id, api_hash: text.to_string() })
			}
			Enrolment::AwaitingPhone { api_id, api_hash } => {
				let phone = text.to_string();
				let session_file = self.store.session_file_for(&phone);
				match telegram_conn::begin_enrolment(&session_file, api_id, &api_hash, &phone).await {
					Ok(pending) => {
						self.reply(message, "Code sent. Reply with the code Telegram sent you.").await;
						Some(Enrolment::AwaitingCode { api_id, api_hash, phone, pending, attempts: 0 })
					}
					Err(e) => {
						self.reply(message, &format!("Failed to request a login code: {e}")).await;
						None
					}
				}
			}
			Enrolment::AwaitingCode { api_id, api_hash, phone, pending, attempts } => {
				match telegram_conn::complete_enrolment(&pending, text).await {
					Ok(()) => {
						self.finish_enrolment(message, &api_id, &api_hash, &phone).await?;
						None
					}
					Err(grammers_client::SignInError::PasswordRequired(_)) => {
						self.reply(message, "This account has two-factor authentication enabled and cannot be enrolled.").await;
						let _ = std::fs::remove_file(self.store.session_file_for(&phone));
						None
					}
					Err(grammers_client::SignInError::InvalidCode) if attempts + 1 < MAX_CODE_ATTEMPTS => {
						self.reply(message, "Invalid code, try again.").await;
						Some(Enrolment::AwaitingCode { api_id, api_hash, phone, pending, attempts: attempts + 1 })
					}
					Err(e) => {
						self.reply(message, &format!("Enrolment failed: {e}")).await;
						let _ = std::fs::remove_file(self.store.session_file_for(&phone));
						None
					}
				}
			}
		};

		match next {
			Some(s) => {
				guard.insert(operator_id, s);
			}
			None => {
				guard.remove(&operator_id);
			}
		}
		Ok(())
	}

	async fn finish_enrolment(&self, message: &Message, api_id: &i32, api_hash: &str, phone: &str) -> Result<()> {
		// account_id is the api_id (§3, §6's credentials schema), not the phone — the session file
		// on disk is keyed by phone instead, since that's what the enrolment conversation already
		// created it as (see the AwaitingPhone branch above).
		let account_id = api_id.to_string();
		let now = jiff::Timestamp::now();
		let account = Account {
			account_id: account_id.clone(),
			api_id: *api_id,
			api_hash: api_hash.to_string(),
			phone: phone.to_string(),
			session_file: Some(self.store.session_file_for(phone).display().to_string()),
			start: false,
			auto_start_forwarding: true,
			delay_secs: crate::delay::parse("1m"),
			forward_mode: ForwardMode::PreserveOriginal,
			mode_set: true,
			expiry_date: Some(now + jiff::SignedDuration::from_hours(30 * 24)),
			last_updated: now,
		};

		let mut accounts = self.store.load_accounts()?;
		accounts.insert(account_id.clone(), account);
		self.store.save_accounts(&accounts)?;

		let mut targets = self.store.load_targets()?;
		targets.entry(account_id.clone()).or_default();
		self.store.save_targets(&targets)?;

		self.reply(message, &format!("Account {account_id} enrolled. It is stopped by default; use /start {account_id} to begin forwarding.")).await;
		Ok(())
	}

	/// A quick per-account status line sourced from the supervisor's published stats board, not
	/// from a live worker (this module never talks to one directly, §4.7).
	async fn status(&self, message: &Message) -> Result<()> {
		let board = self.stats_board.read().await;
		if board.is_empty() {
			self.reply(message, "No accounts running.").await;
			return Ok(());
		}
		let mut lines: Vec<String> = board.iter().map(|(id, stats)| format!("{id}: success={} failed={} last_targets={}", stats.success_count, stats.failed_count, stats.last_total_targets)).collect();
		lines.sort();
		self.reply(message, &lines.join("\n")).await;
		Ok(())
	}

	// -- account operations ----------------------------------------------------------------------

	async fn toggle_start(&self, message: &Message, args: &[&str], start: bool) -> Result<()> {
		self.mutate_account(message, args, |account| {
			account.start = start;
			account.last_updated = jiff::Timestamp::now();
			Ok(format!("Account {} {}.", account.account_id, if start { "started" } else { "stopped" }))
		})
		.await
	}

	async fn set_delay(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some((account_id, rest)) = args.split_first() else {
			self.reply(message, "Usage: /delay <account_id> <duration>").await;
			return Ok(());
		};
		let raw = rest.join(" ");
		self.mutate_account_by_id(message, account_id, |account| {
			account.delay_secs = crate::delay::parse(&raw);
			account.mode_set = true;
			account.last_updated = jiff::Timestamp::now();
			Ok(format!("Delay for {} set to {}.", account.account_id, crate::delay::format(account.delay_secs)))
		})
		.await
	}

	async fn set_mode(&self, message: &Message, args: &[&str]) -> Result<()> {
		let [account_id, code] = args else {
			self.reply(message, "Usage: /mode <account_id> <1|2|3>").await;
			return Ok(());
		};
		let code = (*code).to_string();
		self.mutate_account_by_id(message, account_id, |account| {
			account.forward_mode = ForwardMode::from_code(&code);
			account.mode_set = true;
			account.last_updated = jiff::Timestamp::now();
			Ok(format!("Forward mode for {} set to {}.", account.account_id, account.forward_mode.to_code()))
		})
		.await
	}

	async fn set_expiry(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some((account_id, rest)) = args.split_first() else {
			self.reply(message, "Usage: /expiry <account_id> <unlimited|+1m|+3m|+6m|+1y|YYYY-MM-DD-HH:MM:SS>").await;
			return Ok(());
		};
		let preset = rest.first().copied().unwrap_or("unlimited");
		let now = jiff::Timestamp::now();
		let resolved = match preset {
			"unlimited" => crate::delay::resolve_preset(crate::delay::ExpiryPreset::Unlimited, now),
			"+1m" => crate::delay::resolve_preset(crate::delay::ExpiryPreset::Plus1Month, now),
			"+3m" => crate::delay::resolve_preset(crate::delay::ExpiryPreset::Plus3Months, now),
			"+6m" => crate::delay::resolve_preset(crate::delay::ExpiryPreset::Plus6Months, now),
			"+1y" => crate::delay::resolve_preset(crate::delay::ExpiryPreset::Plus1Year, now),
			custom => match crate::delay::parse_expiry(custom) {
				Some(ts) => Some(ts),
				None => {
					self.reply(message, "Couldn't parse that expiry. Use a preset or YYYY-MM-DD-HH:MM:SS.").await;
					return Ok(());
				}
			},
		};
		self.mutate_account_by_id(message, account_id, |account| {
			account.expiry_date = resolved;
			account.last_updated = jiff::Timestamp::now();
			Ok(format!("Expiry for {} updated.", account.account_id))
		})
		.await
	}

	async fn list_targets(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some(account_id) = args.first() else {
			self.reply(message, "Usage: /targets <account_id>").await;
			return Ok(());
		};
		let targets = self.store.load_targets()?;
		let list = targets.get(*account_id).cloned().unwrap_or_default();
		if list.is_empty() {
			self.reply(message, "No targets.").await;
			return Ok(());
		}
		let body = list.iter().enumerate().map(|(i, t)| format!("{}. {} {}", i + 1, t.url, if t.active { "" } else { "(inactive)" })).collect::<Vec<_>>().join("\n");
		self.reply(message, &body).await;
		Ok(())
	}

	async fn add_targets(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some((account_id, urls)) = args.split_first() else {
			self.reply(message, "Usage: /add_target <account_id> <url> [url...]").await;
			return Ok(());
		};
		if urls.is_empty() {
			self.reply(message, "No URLs given.").await;
			return Ok(());
		}
		let mut targets = self.store.load_targets()?;
		let entry = targets.entry((*account_id).to_string()).or_default();
		let mut added = 0;
		for url in urls {
			if crate::url_parser::parse(url).is_none() {
				self.reply(message, &format!("Skipping unparsable target: {url}")).await;
				continue;
			}
			entry.push(Target::new((*url).to_string()));
			added += 1;
		}
		self.store.save_targets(&targets)?;
		self.reply(message, &format!("Added {added} target(s) to {account_id}.")).await;
		Ok(())
	}

	/// Deletes by 1-based index; indices are applied in reverse order so earlier ones stay valid
	/// as later ones are removed (§4.7).
	async fn delete_targets(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some((account_id, idx_strs)) = args.split_first() else {
			self.reply(message, "Usage: /del_target <account_id> <index> [index...]").await;
			return Ok(());
		};
		let mut indices: Vec<usize> = idx_strs.iter().filter_map(|s| s.parse::<usize>().ok()).collect();
		indices.sort_unstable();
		indices.dedup();
		indices.reverse();

		let mut targets = self.store.load_targets()?;
		let Some(list) = targets.get_mut(*account_id) else {
			self.reply(message, "Unknown account.").await;
			return Ok(());
		};
		let mut removed = 0;
		for idx in indices {
			if idx >= 1 && idx <= list.len() {
				list.remove(idx - 1);
				removed += 1;
			}
		}
		self.store.save_targets(&targets)?;
		self.reply(message, &format!("Removed {removed} target(s) from {account_id}.")).await;
		Ok(())
	}

	async fn delete_account(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some(account_id) = args.first() else {
			self.reply(message, "Usage: /del_account <account_id>").await;
			return Ok(());
		};
		let mut accounts = self.store.load_accounts()?;
		let Some(removed) = accounts.remove(*account_id) else {
			self.reply(message, "Unknown account.").await;
			return Ok(());
		};
		self.store.save_accounts(&accounts)?;

		let mut targets = self.store.load_targets()?;
		targets.remove(*account_id);
		self.store.save_targets(&targets)?;

		if let Some(session_file) = removed.session_file {
			let _ = std::fs::remove_file(session_file);
		}
		self.reply(message, &format!("Account {account_id} deleted.")).await;
		Ok(())
	}

	// -- operator operations (primary only) -------------------------------------------------------

	async fn add_operator(&self, message: &Message, args: &[&str], admin_limit: u32) -> Result<()> {
		let Some(id_str) = args.first() else {
			self.reply(message, "Usage: /add_operator <telegram_user_id>").await;
			return Ok(());
		};
		let Ok(new_id) = id_str.parse::<i64>() else {
			self.reply(message, "Operator id must be an integer.").await;
			return Ok(());
		};
		let (mut operators, limit) = self.store.load_operators(self.bootstrap_primary)?;
		let secondary_count = operators.iter().filter(|o| !o.is_primary()).count() as u32;
		if secondary_count >= admin_limit.max(limit) {
			self.reply(message, "Admin limit reached; raise it with /set_admin_limit first.").await;
			return Ok(());
		}
		if operators.iter().any(|o| o.operator_id == new_id) {
			self.reply(message, "Already an operator.").await;
			return Ok(());
		}
		operators.push(Operator { operator_id: new_id, role: OperatorRole::Secondary });
		self.store.save_operators(&operators, limit)?;
		self.reply(message, &format!("Added operator {new_id}.")).await;
		Ok(())
	}

	async fn remove_operator(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some(id_str) = args.first() else {
			self.reply(message, "Usage: /remove_operator <telegram_user_id>").await;
			return Ok(());
		};
		let Ok(target_id) = id_str.parse::<i64>() else {
			self.reply(message, "Operator id must be an integer.").await;
			return Ok(());
		};
		let (mut operators, limit) = self.store.load_operators(self.bootstrap_primary)?;
		let before = operators.len();
		operators.retain(|o| !(o.operator_id == target_id && !o.is_primary()));
		if operators.len() == before {
			self.reply(message, "No such secondary operator.").await;
			return Ok(());
		}
		self.store.save_operators(&operators, limit)?;
		self.reply(message, &format!("Removed operator {target_id}.")).await;
		Ok(())
	}

	async fn set_admin_limit(&self, message: &Message, args: &[&str]) -> Result<()> {
		let Some(n_str) = args.first() else {
			self.reply(message, "Usage: /set_admin_limit <n>").await;
			return Ok(());
		};
		let Ok(new_limit) = n_str.parse::<u32>() else {
			self.reply(message, "Limit must be a non-negative integer.").await;
			return Ok(());
		};
		let (operators, _) = self.store.load_operators(self.bootstrap_primary)?;
		match validate_admin_limit(&operators, new_limit) {
			Ok(()) => {
				self.store.save_operators(&operators, new_limit)?;
				self.reply(message, &format!("admin_limit set to {new_limit}.")).await;
			}
			Err(e) => {
				self.reply(message, &e.to_string()).await;
			}
		}
		Ok(())
	}

	// -- helpers --------------------------------------------------------------------------------

	async fn mutate_account(&self, message: &Message, args: &[&str], f: impl FnOnce(&mut Account) -> Result<String>) -> Result<()> {
		let Some(account_id) = args.first() else {
			self.reply(message, "Missing account_id.").await;
			return Ok(());
		};
		self.mutate_account_by_id(message, account_id, f).await
	}

	async fn mutate_account_by_id(&self, message: &Message, account_id: &str, f: impl FnOnce(&mut Account) -> Result<String>) -> Result<()> {
		let mut accounts = self.store.load_accounts()?;
		let Some(account) = accounts.get_mut(account_id) else {
			self.reply(message, "Unknown account.").await;
			return Ok(());
		};
		let reply = f(account)?;
		self.store.save_accounts(&accounts)?;
		self.reply(message, &reply).await;
		Ok(())
	}

	async fn reply(&self, message: &Message, text: &str) {
		if let Err(e) = message.reply(text).await {
			warn!("failed to send admin bot reply: {e}");
		}
	}
}

/// `admin_limit` may never drop below the current number of secondary operators (B5).
pub fn validate_admin_limit(operators: &[Operator], new_limit: u32) -> Result<()> {
	let secondary_count = operators.iter().filter(|o| !o.is_primary()).count() as u32;
	if new_limit < secondary_count {
		return Err(eyre!("admin_limit {new_limit} is below the current secondary operator count ({secondary_count})"));
	}
	info!(new_limit, secondary_count, "admin_limit validated");
	Ok(())
}
