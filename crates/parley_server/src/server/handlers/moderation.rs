#![forbid(unsafe_code)]

//! Operator and service-account commands: kick, topic, announce.

use std::sync::Arc;

use parley_domain::authority::{ModeratedAction, check_kick_target, require_operator, require_service_account};
use parley_domain::{ChannelId, EventKind, UserId};
use parley_protocol::commands::{
	AnnounceRequest, AnnounceResponse, AnnouncementScope, KickRequest, KickResponse, TopicRequest, TopicResponse,
	nonzero_channel, nonzero_user,
};
use parley_protocol::{InboundFrame, ServerFrame};
use tracing::{info, warn};

use super::{HandlerError, HandlerResult, Reply, ServerContext, append_and_broadcast, require_identity};
use crate::server::session::Session;
use crate::store::{Channel, NewEvent};
use crate::util::time::unix_ms_now;

const DEFAULT_KICK_REASON: &str = "Kicked";
const CLEARED_TOPIC: &str = "Topic cleared";

async fn existing_channel(ctx: &ServerContext, id: Option<ChannelId>, store_msg: &'static str) -> Result<Channel, HandlerError> {
	let id = nonzero_channel(id).ok_or_else(|| HandlerError::not_found("Channel not found"))?;
	ctx.store
		.channel_by_id(id)
		.await
		.map_err(HandlerError::store(store_msg))?
		.ok_or_else(|| HandlerError::not_found("Channel not found"))
}

async fn is_operator(ctx: &ServerContext, user: UserId, channel: ChannelId, store_msg: &'static str) -> Result<bool, HandlerError> {
	ctx.store
		.is_operator(user, channel)
		.await
		.map_err(HandlerError::store(store_msg))
}

pub async fn kick(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: KickRequest = frame.payload()?;
	let actor = require_identity(session, "Must be logged in to kick users").await?;

	let target_id = nonzero_user(req.user_id).ok_or_else(|| HandlerError::validation("User ID is required"))?;
	if nonzero_channel(req.channel_id).is_none() {
		return Err(HandlerError::validation("Channel ID is required"));
	}
	let channel = existing_channel(ctx, req.channel_id, "Database error").await?;

	require_operator(
		ModeratedAction::Kick,
		is_operator(ctx, actor.user_id, channel.id, "Database error").await?,
	)?;

	let target = ctx
		.store
		.user_by_id(target_id)
		.await
		.map_err(HandlerError::store("Database error"))?
		.ok_or_else(|| HandlerError::not_found("Target user not found"))?;
	check_kick_target(actor.user_id, target.id, target.is_service)?;

	// Requires a subscription held by one of the target's sessions.
	let mut kicked_sessions = Vec::new();
	for s in ctx.registry.sessions_for_user(target.id).await {
		if s.unsubscribe(channel.id).await {
			kicked_sessions.push(s);
		}
	}
	if kicked_sessions.is_empty() {
		return Err(HandlerError::validation("User is not in the channel"));
	}

	let reason = req
		.reason
		.filter(|r| !r.trim().is_empty())
		.unwrap_or_else(|| DEFAULT_KICK_REASON.to_string());
	let event = NewEvent::new(
		Some(channel.id),
		target.id,
		&target.nickname,
		EventKind::Kicked,
		reason.as_str(),
		unix_ms_now(),
	);
	let record = append_and_broadcast(ctx, event)
		.await
		.map_err(HandlerError::store("Database error"))?;

	let frame = ServerFrame::from_record(&record);
	for s in &kicked_sessions {
		ctx.registry.deliver_to(s, &frame).await;
	}

	info!(
		channel_id = %channel.id,
		actor = %actor.user_id,
		target = %target.id,
		sessions = kicked_sessions.len(),
		"user kicked"
	);

	Reply::data(&KickResponse {
		user_id: target.id,
		channel_id: channel.id,
		reason,
	})
}

pub async fn topic(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: TopicRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to change topic").await?;
	let channel = existing_channel(ctx, req.channel_id, "Failed to update topic").await?;

	require_operator(
		ModeratedAction::Topic,
		is_operator(ctx, identity.user_id, channel.id, "Failed to update topic").await?,
	)?;

	ctx.store
		.set_topic(channel.id, &req.topic)
		.await
		.map_err(HandlerError::store("Failed to update topic"))?;

	let payload = if req.topic.is_empty() { CLEARED_TOPIC } else { req.topic.as_str() };
	let event = NewEvent::new(
		Some(channel.id),
		identity.user_id,
		&identity.nickname,
		EventKind::TopicChange,
		payload,
		unix_ms_now(),
	);
	if let Err(e) = append_and_broadcast(ctx, event).await {
		warn!(channel_id = %channel.id, error = %e, "failed to record topic change");
	}

	info!(channel_id = %channel.id, user_id = %identity.user_id, "topic changed");
	Reply::data(&TopicResponse {
		channel_id: channel.id,
		topic: req.topic,
	})
}

pub async fn announce(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: AnnounceRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to make announcements").await?;

	if req.message.trim().is_empty() {
		return Err(HandlerError::validation("Announcement message is required"));
	}

	let (channel_id, scope) = match nonzero_channel(req.channel_id) {
		Some(_) => {
			let channel = existing_channel(ctx, req.channel_id, "Failed to create announcement").await?;
			require_operator(
				ModeratedAction::ChannelAnnouncement,
				is_operator(ctx, identity.user_id, channel.id, "Failed to create announcement").await?,
			)?;
			(Some(channel.id), AnnouncementScope::Channel)
		}
		None => {
			let is_service = ctx
				.store
				.user_by_id(identity.user_id)
				.await
				.map_err(HandlerError::store("Failed to create announcement"))?
				.is_some_and(|u| u.is_service);
			require_service_account(is_service)?;
			(None, AnnouncementScope::Server)
		}
	};

	let event = NewEvent::new(
		channel_id,
		identity.user_id,
		&identity.nickname,
		EventKind::Announcement,
		req.message.as_str(),
		unix_ms_now(),
	);
	append_and_broadcast(ctx, event)
		.await
		.map_err(HandlerError::store("Failed to create announcement"))?;

	info!(user_id = %identity.user_id, channel_id = ?channel_id, scope = ?scope, "announcement made");
	Reply::data(&AnnounceResponse {
		channel_id,
		message: req.message,
		scope,
	})
}
