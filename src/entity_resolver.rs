//! Resolves a [`ParsedTarget`] to a live Telegram entity, joining via invite hash when required.
//!
//! Grounded on `_resolve_invite_link`/`_resolve_private_entity`/`_resolve_public_entity` of the
//! forwarding engine this was distilled from: query first, join only when the metadata says a
//! join is required, and treat "already a participant" as success rather than an error.

use color_eyre::eyre::{Result, eyre};
use grammers_client::Client;
use grammers_tl_types::{enums, functions};

use crate::model::{EntityKind, ResolvedEntity, TargetKind};
use crate::url_parser::ParsedTarget;

/// Outcome of resolving an invite link, surfaced for per-target result reporting (§4.2).
#[derive(Clone, Copy, Debug, Default)]
pub struct JoinOutcome {
	pub join_attempted: bool,
	pub join_successful: bool,
}

pub struct Resolution {
	pub entity: ResolvedEntity,
	pub join: JoinOutcome,
}

/// Resolves `parsed` against `client`. The dialog cache is assumed pre-warmed (see
/// `telegram_conn::connect`), since chat-id based lookups depend on access hashes that are only
/// known once a chat has appeared in the account's dialog list.
pub async fn resolve(client: &Client, parsed: &ParsedTarget) -> Result<Resolution> {
	match parsed.kind {
		TargetKind::PublicChannel | TargetKind::PublicTopic | TargetKind::Username => resolve_public(client, &parsed.identifier).await,
		TargetKind::PrivateChannel | TargetKind::PrivateTopic | TargetKind::ChatId => resolve_by_id(client, parsed.chat_id.ok_or_else(|| eyre!("parsed target missing chat_id"))?).await,
		TargetKind::InviteLink => resolve_invite(client, parsed.invite_hash.as_deref().ok_or_else(|| eyre!("parsed target missing invite_hash"))?).await,
	}
}

async fn resolve_public(client: &Client, username: &str) -> Result<Resolution> {
	let trimmed = username.trim_start_matches('@');
	let peer = client.resolve_username(trimmed).await?.ok_or_else(|| eyre!("invalid_target: no such username '{trimmed}'"))?;
	Ok(Resolution { entity: entity_from_peer(peer), join: JoinOutcome::default() })
}

async fn resolve_by_id(client: &Client, chat_id: i64) -> Result<Resolution> {
	if let Some(peer) = find_dialog_peer(client, chat_id).await? {
		return Ok(Resolution { entity: entity_from_peer(peer), join: JoinOutcome::default() });
	}

	// Retry with the id stripped of its `-100` supergroup prefix, against an equivalent
	// `PeerChannel` — the fallback `_resolve_private_entity` takes when the straightforward
	// lookup misses.
	let stripped = chat_id.to_string().strip_prefix("-100").and_then(|s| s.parse::<i64>().ok());
	if let Some(alt_id) = stripped
		&& let Some(peer) = find_dialog_peer(client, alt_id).await?
	{
		return Ok(Resolution { entity: entity_from_peer(peer), join: JoinOutcome::default() });
	}

	Err(eyre!("invalid_target: chat_id {chat_id} not found among known dialogs"))
}

/// Scans the account's dialog list for a peer whose bot-API id matches `chat_id`. This is the
/// only way to recover an access hash for a bare id in grammers, which is why every connection
/// pre-fetches dialogs on startup (see `telegram_conn::connect`).
async fn find_dialog_peer(client: &Client, chat_id: i64) -> Result<Option<grammers_client::types::Peer>> {
	let mut dialogs = client.iter_dialogs();
	while let Some(dialog) = dialogs.next().await? {
		let peer = dialog.peer();
		if peer.id().bot_api_dialog_id() == chat_id {
			return Ok(Some(peer.clone()));
		}
	}
	Ok(None)
}

async fn resolve_invite(client: &Client, hash: &str) -> Result<Resolution> {
	let checked = client.invoke(&functions::messages::CheckChatInvite { hash: hash.to_string() }).await;

	match checked {
		Ok(enums::ChatInvite::Already(take)) => {
			// Caller is already a participant; not an error, resolve the already-known chat.
			let id = chat_id_of(&take.chat);
			let peer = find_dialog_peer(client, id).await?.ok_or_else(|| eyre!("invite_invalid: already-participant chat {id} missing from dialog cache"))?;
			Ok(Resolution { entity: entity_from_peer(peer), join: JoinOutcome { join_attempted: true, join_successful: false } })
		}
		Ok(enums::ChatInvite::Invite(_)) | Ok(enums::ChatInvite::InvitePeek(_)) => {
			let imported = client.invoke(&functions::messages::ImportChatInvite { hash: hash.to_string() }).await.map_err(|e| match crate::errors::classify(&e).kind {
				crate::errors::ErrorKind::AlreadyParticipant => eyre!("already_participant"),
				_ => eyre!("invite_invalid: {e}"),
			})?;
			let chat = extract_first_chat(&imported).ok_or_else(|| eyre!("invite_invalid: import produced no chat"))?;
			let id = chat_id_of(&chat);
			// The newly joined chat now shows up in the dialog list; re-query to get its peer.
			let peer = find_dialog_peer(client, id).await?.ok_or_else(|| eyre!("invite_invalid: joined chat {id} missing from dialog cache"))?;
			Ok(Resolution { entity: entity_from_peer(peer), join: JoinOutcome { join_attempted: true, join_successful: true } })
		}
		Err(e) => Err(eyre!("invite_invalid: {e}")),
	}
}

fn chat_id_of(chat: &enums::Chat) -> i64 {
	match chat {
		enums::Chat::Channel(c) => -1_000_000_000_000 - c.id,
		enums::Chat::Chat(c) => -c.id,
		enums::Chat::ChatForbidden(c) => -c.id,
		enums::Chat::ChannelForbidden(c) => -1_000_000_000_000 - c.id,
		enums::Chat::Empty(c) => c.id,
	}
}

fn extract_first_chat(updates: &enums::Updates) -> Option<enums::Chat> {
	match updates {
		enums::Updates::Updates(u) => u.chats.first().cloned(),
		enums::Updates::Combined(u) => u.chats.first().cloned(),
		_ => None,
	}
}

fn entity_from_peer(peer: grammers_client::types::Peer) -> ResolvedEntity {
	let kind = match &peer {
		grammers_client::types::Peer::User(_) => EntityKind::User,
		grammers_client::types::Peer::Chat(_) => EntityKind::Group,
		grammers_client::types::Peer::Channel(_) => EntityKind::Channel,
		_ => EntityKind::Other,
	};
	let id = peer.id().bot_api_dialog_id();
	let title = peer.name().map(str::to_string);
	let username = peer.username().map(str::to_string);
	ResolvedEntity { peer, id, title, username, kind, participants_count: None }
}
