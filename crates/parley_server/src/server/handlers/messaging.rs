#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_domain::{ChannelId, EventKind};
use parley_protocol::commands::{HistoryRequest, HistoryResponse, MeRequest, MessageRequest, nonzero_channel};
use parley_protocol::{InboundFrame, ServerFrame};

use super::{HandlerError, HandlerResult, Reply, ServerContext, append_and_broadcast, require_identity};
use crate::server::session::{Identity, Session};
use crate::store::{HistoryQuery, NewEvent};
use crate::util::time::unix_ms_now;

pub async fn message(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: MessageRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to send messages").await?;
	post(ctx, session, identity, req.channel_id, req.message, req.is_passive).await
}

/// An action line; always passive.
pub async fn me(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: MeRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to send messages").await?;
	post(ctx, session, identity, req.channel_id, req.message, true).await
}

async fn post(
	ctx: &ServerContext,
	session: &Session,
	identity: Identity,
	channel: Option<ChannelId>,
	text: String,
	is_passive: bool,
) -> HandlerResult {
	if text.trim().is_empty() {
		return Err(HandlerError::validation("Message cannot be empty"));
	}

	let channel = nonzero_channel(channel).ok_or_else(|| HandlerError::not_found("Channel not found"))?;
	ctx.store
		.channel_by_id(channel)
		.await
		.map_err(HandlerError::store("Failed to send message"))?
		.ok_or_else(|| HandlerError::not_found("Channel not found"))?;

	if !session.is_subscribed(channel).await {
		return Err(HandlerError::validation("Not in channel"));
	}

	let event = NewEvent::new(
		Some(channel),
		identity.user_id,
		identity.nickname,
		EventKind::Message,
		text,
		unix_ms_now(),
	)
	.passive(is_passive);
	append_and_broadcast(ctx, event)
		.await
		.map_err(HandlerError::store("Failed to send message"))?;

	Ok(Reply::empty())
}

pub async fn get_history(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: HistoryRequest = frame.payload()?;
	require_identity(session, "Must be logged in to get message history").await?;

	let channel = nonzero_channel(req.channel_id).ok_or_else(|| HandlerError::not_found("Channel not found"))?;
	if !session.is_subscribed(channel).await {
		return Err(HandlerError::validation(
			"You must be in the channel to view its history",
		));
	}

	ctx.store
		.channel_by_id(channel)
		.await
		.map_err(HandlerError::store("Failed to retrieve message history"))?
		.ok_or_else(|| HandlerError::not_found("Channel not found"))?;

	let page = ctx
		.store
		.query_events(channel, HistoryQuery::new(req.limit, req.before, req.after))
		.await
		.map_err(HandlerError::store("Failed to retrieve message history"))?;

	Reply::data(&HistoryResponse {
		messages: page.records.iter().map(ServerFrame::from_record).collect(),
		has_more: page.has_more,
	})
}
