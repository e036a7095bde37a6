#![forbid(unsafe_code)]

//! Identity commands: login, logout, quit, nick, session_info and heartbeat.

use std::sync::Arc;

use parley_domain::{EventKind, UserId};
use parley_protocol::InboundFrame;
use parley_protocol::commands::{
	ChannelSummary, HeartbeatResponse, LoginRequest, LoginResponse, LogoutRequest, LogoutResponse, NickRequest,
	NickResponse, QuitRequest, QuitResponse, SessionInfoResponse,
};
use tracing::{info, warn};

use super::{HandlerError, HandlerResult, Reply, ServerContext, append_and_broadcast, depart_channel, require_identity};
use crate::server::session::{Identity, Session};
use crate::store::NewEvent;
use crate::util::time::{unix_ms_now, unix_secs};

const LOGOUT_REASON: &str = "Logged out";
const QUIT_REASON: &str = "has quit";

fn non_empty(text: Option<String>) -> Option<String> {
	text.filter(|t| !t.trim().is_empty())
}

pub async fn login(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: LoginRequest = frame.payload()?;

	if session.identity().await.is_some() {
		return Err(HandlerError::validation("Already logged in"));
	}

	// Stored and claimed exactly as sent.
	let nickname = req.nickname.as_str();
	if nickname.trim().is_empty() {
		return Err(HandlerError::validation("Nickname is required"));
	}

	if ctx.registry.is_nickname_claimed(nickname, session.token()).await {
		return Err(HandlerError::validation("Nickname already in use"));
	}

	let user = ctx
		.store
		.create_or_fetch_user(nickname)
		.await
		.map_err(HandlerError::store("Database error"))?;

	session
		.bind_identity(Identity {
			user_id: user.id,
			nickname: user.nickname.clone(),
			is_service: user.is_service,
		})
		.await;

	info!(session = %session.token(), user_id = %user.id, nickname = %user.nickname, "logged in");

	Reply::data(&LoginResponse {
		user_id: user.id,
		nickname: user.nickname,
		session_id: session.token().to_string(),
	})
}

/// Leave every subscribed channel with `reason`; individual failures are logged.
async fn leave_all_channels(ctx: &ServerContext, session: &Session, identity: &Identity, reason: &str) -> usize {
	let mut left = 0;
	for channel in session.channels().await {
		if !session.unsubscribe(channel).await {
			continue;
		}
		match depart_channel(ctx, identity, channel, reason).await {
			Ok(_) => left += 1,
			Err(e) => warn!(session = %session.token(), channel_id = %channel, error = %e, "failed to record leave"),
		}
	}
	left
}

pub async fn logout(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: LogoutRequest = frame.payload()?;
	let identity = require_identity(session, "Not logged in").await?;

	let dying_message = non_empty(req.dying_message);
	let reason = dying_message.as_deref().unwrap_or(LOGOUT_REASON);
	let left = leave_all_channels(ctx, session, &identity, reason).await;
	session.clear_identity().await;

	info!(session = %session.token(), user_id = %identity.user_id, channels = left, "logged out");

	Reply::data(&LogoutResponse {
		message: "Logged out successfully".to_string(),
		dying_message,
	})
}

/// The session itself is removed by the connection once the reply is written.
pub async fn quit(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: QuitRequest = frame.payload()?;

	if let Some(identity) = session.identity().await {
		let dying_message = non_empty(req.dying_message);
		let reason = dying_message.as_deref().unwrap_or(QUIT_REASON);
		let left = leave_all_channels(ctx, session, &identity, reason).await;
		session.clear_identity().await;
		info!(session = %session.token(), user_id = %identity.user_id, channels = left, "quit");
	}

	Ok(Reply::data(&QuitResponse {
		message: "Goodbye!".to_string(),
	})?
	.and_terminate())
}

pub async fn session_info(ctx: &ServerContext, session: &Arc<Session>, _frame: &InboundFrame) -> HandlerResult {
	let (identity, channel_ids) = {
		let state = session.state().await;
		(state.identity.clone(), state.channels.clone())
	};

	let mut channels = Vec::with_capacity(channel_ids.len());
	for id in channel_ids {
		let channel = ctx
			.store
			.channel_by_id(id)
			.await
			.map_err(HandlerError::store("Database error"))?;
		if let Some(channel) = channel {
			channels.push(ChannelSummary {
				id: channel.id,
				name: channel.name,
				topic: channel.topic,
			});
		}
	}

	Reply::data(&SessionInfoResponse {
		session_id: session.token().to_string(),
		user_id: identity.as_ref().map(|i| i.user_id),
		nickname: identity.map(|i| i.nickname),
		channels,
	})
}

pub async fn heartbeat(_ctx: &ServerContext, session: &Arc<Session>, _frame: &InboundFrame) -> HandlerResult {
	let stamped = session.touch().await;
	Reply::data(&HeartbeatResponse {
		timestamp: unix_secs(stamped),
	})
}

pub async fn nick(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: NickRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to change nickname").await?;

	let new_nickname = req.new_nickname.as_str();
	if new_nickname.trim().is_empty() {
		return Err(HandlerError::validation("New nickname is required"));
	}
	if new_nickname == identity.nickname {
		return Err(HandlerError::validation(
			"New nickname must be different from current nickname",
		));
	}

	if ctx.registry.is_nickname_claimed(new_nickname, session.token()).await {
		return Err(HandlerError::validation("Nickname already in use"));
	}
	let holder = ctx
		.store
		.user_by_nickname(new_nickname)
		.await
		.map_err(HandlerError::store("Database error"))?;
	if holder.is_some_and(|u| u.id != identity.user_id) {
		return Err(HandlerError::validation("Nickname already in use"));
	}

	ctx.store
		.rename_user(identity.user_id, new_nickname)
		.await
		.map_err(HandlerError::store("Database error"))?;

	rebind_user_sessions(ctx, identity.user_id, new_nickname).await;

	let now = unix_ms_now();
	for channel in session.channels().await {
		let event = NewEvent::new(
			Some(channel),
			identity.user_id,
			new_nickname,
			EventKind::NickChange,
			"",
			now,
		);
		if let Err(e) = append_and_broadcast(ctx, event).await {
			warn!(channel_id = %channel, user_id = %identity.user_id, error = %e, "failed to record nick change");
		}
	}

	info!(user_id = %identity.user_id, old = %identity.nickname, new = %new_nickname, "nickname changed");

	Reply::data(&NickResponse {
		user_id: identity.user_id,
		old_nickname: identity.nickname,
		new_nickname: new_nickname.to_string(),
	})
}

async fn rebind_user_sessions(ctx: &ServerContext, user: UserId, nickname: &str) {
	for other in ctx.registry.sessions_for_user(user).await {
		other.rebind_nickname(user, nickname).await;
	}
}
