#![forbid(unsafe_code)]

//! Channel membership and discovery: join, leave, list_channels, my_channels, channel_users.

use std::sync::Arc;

use parley_domain::authority::grants_operator_on_join;
use parley_domain::{ChannelId, ChannelName, EventKind, SYSTEM_USER_ID};
use parley_protocol::commands::{
	ChannelInfo, ChannelListResponse, ChannelRef, ChannelUser, ChannelUsersRequest, ChannelUsersResponse,
	JoinRequest, LeaveRequest, nonzero_channel,
};
use parley_protocol::{InboundFrame, ServerFrame};
use tracing::{debug, info, warn};

use super::{HandlerError, HandlerResult, Reply, ServerContext, append_and_broadcast, depart_channel, require_identity};
use crate::server::session::Session;
use crate::store::{Channel, HistoryQuery, NewEvent};
use crate::util::time::unix_ms_now;

/// Records replayed to a session right after it joins.
pub const JOIN_REPLAY_LIMIT: usize = 100;

const DEFAULT_LEAVE_REASON: &str = "left";

fn channel_ref(channel: &Channel) -> ChannelRef {
	ChannelRef {
		channel_id: channel.id,
		channel_name: channel.name.clone(),
	}
}

async fn resolve_join_target(ctx: &ServerContext, req: &JoinRequest) -> Result<Channel, HandlerError> {
	if let Some(raw) = req.channel_name.as_deref().filter(|n| !n.trim().is_empty()) {
		let name = ChannelName::parse(raw).map_err(|e| HandlerError::validation(e.to_string()))?;
		let existing = ctx
			.store
			.channel_by_name(name.as_str())
			.await
			.map_err(HandlerError::store("Database error"))?;
		return match existing {
			Some(channel) => Ok(channel),
			None => {
				let channel = ctx
					.store
					.create_channel(name.as_str())
					.await
					.map_err(HandlerError::store("Failed to create channel"))?;
				info!(channel_id = %channel.id, name = %channel.name, "channel created");
				Ok(channel)
			}
		};
	}

	match nonzero_channel(req.channel_id) {
		Some(id) => lookup_channel(ctx, id).await,
		None => Err(HandlerError::validation("Channel name or ID required")),
	}
}

async fn lookup_channel(ctx: &ServerContext, id: ChannelId) -> Result<Channel, HandlerError> {
	ctx.store
		.channel_by_id(id)
		.await
		.map_err(HandlerError::store("Database error"))?
		.ok_or_else(|| HandlerError::not_found("Channel not found"))
}

pub async fn join(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: JoinRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to join channels").await?;
	let channel = resolve_join_target(ctx, &req).await?;

	if !session.subscribe(channel.id).await {
		return Err(HandlerError::validation("Already in channel"));
	}

	match ctx.store.channel_presence(channel.id).await {
		Ok(ledger) if grants_operator_on_join(ledger.occupancy()) => {
			match ctx.store.grant_operator(identity.user_id, channel.id, SYSTEM_USER_ID).await {
				Ok(()) => info!(channel_id = %channel.id, user_id = %identity.user_id, "operator granted to first joiner"),
				Err(e) => warn!(channel_id = %channel.id, user_id = %identity.user_id, error = %e, "failed to grant operator"),
			}
		}
		Ok(_) => {}
		Err(e) => warn!(channel_id = %channel.id, error = %e, "failed to derive channel presence"),
	}

	let joined = NewEvent::new(
		Some(channel.id),
		identity.user_id,
		&identity.nickname,
		EventKind::Joined,
		"",
		unix_ms_now(),
	);
	if let Err(cause) = append_and_broadcast(ctx, joined).await {
		session.unsubscribe(channel.id).await;
		return Err(HandlerError::Store {
			message: "Database error",
			cause,
		});
	}

	replay_recent(ctx, session, channel.id).await;

	debug!(session = %session.token(), channel_id = %channel.id, "joined channel");
	Reply::data(&channel_ref(&channel))
}

/// Send the latest records to the joiner only, oldest first.
async fn replay_recent(ctx: &ServerContext, session: &Session, channel: ChannelId) {
	let page = match ctx
		.store
		.query_events(channel, HistoryQuery::latest(JOIN_REPLAY_LIMIT))
		.await
	{
		Ok(page) => page,
		Err(e) => {
			warn!(channel_id = %channel, error = %e, "failed to load join replay");
			return;
		}
	};
	for record in &page.records {
		ctx.registry.deliver_to(session, &ServerFrame::from_record(record)).await;
	}
}

pub async fn leave(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: LeaveRequest = frame.payload()?;
	let identity = require_identity(session, "Must be logged in to leave channels").await?;

	let channel = if let Some(raw) = req.channel_name.as_deref().filter(|n| !n.trim().is_empty()) {
		ctx.store
			.channel_by_name(&ChannelName::normalize(raw))
			.await
			.map_err(HandlerError::store("Database error"))?
			.ok_or_else(|| HandlerError::not_found("Channel not found"))?
	} else if let Some(id) = nonzero_channel(req.channel_id) {
		lookup_channel(ctx, id).await?
	} else {
		return Err(HandlerError::validation("Channel name or ID required"));
	};

	if !session.unsubscribe(channel.id).await {
		return Err(HandlerError::validation("Not in channel"));
	}

	let reason = req
		.reason
		.as_deref()
		.filter(|r| !r.trim().is_empty())
		.unwrap_or(DEFAULT_LEAVE_REASON);
	depart_channel(ctx, &identity, channel.id, reason)
		.await
		.map_err(HandlerError::store("Database error"))?;

	debug!(session = %session.token(), channel_id = %channel.id, "left channel");
	Reply::data(&channel_ref(&channel))
}

async fn channel_info(ctx: &ServerContext, channel: Channel) -> ChannelInfo {
	let user_count = ctx.registry.live_channel_occupancy(channel.id).await;
	ChannelInfo {
		id: channel.id,
		name: channel.name,
		topic: channel.topic,
		user_count,
	}
}

pub async fn list_channels(ctx: &ServerContext, session: &Arc<Session>, _frame: &InboundFrame) -> HandlerResult {
	require_identity(session, "Must be logged in to list channels").await?;

	let all = ctx
		.store
		.list_channels()
		.await
		.map_err(HandlerError::store("Failed to retrieve channel list"))?;

	let mut channels = Vec::with_capacity(all.len());
	for channel in all {
		channels.push(channel_info(ctx, channel).await);
	}
	Reply::data(&ChannelListResponse { channels })
}

pub async fn my_channels(ctx: &ServerContext, session: &Arc<Session>, _frame: &InboundFrame) -> HandlerResult {
	require_identity(session, "Must be logged in to list your channels").await?;

	let mut channels = Vec::new();
	for id in session.channels().await {
		let found = ctx
			.store
			.channel_by_id(id)
			.await
			.map_err(HandlerError::store("Failed to retrieve channel list"))?;
		if let Some(channel) = found {
			channels.push(channel_info(ctx, channel).await);
		}
	}
	Reply::data(&ChannelListResponse { channels })
}

pub async fn channel_users(ctx: &ServerContext, session: &Arc<Session>, frame: &InboundFrame) -> HandlerResult {
	let req: ChannelUsersRequest = frame.payload()?;
	require_identity(session, "Not logged in").await?;

	let id = nonzero_channel(req.channel_id).ok_or_else(|| HandlerError::not_found("Channel not found"))?;
	let channel = lookup_channel(ctx, id).await?;

	if !session.is_subscribed(channel.id).await {
		return Err(HandlerError::validation("Not in channel"));
	}

	let operators = ctx
		.store
		.operators(channel.id)
		.await
		.map_err(HandlerError::store("Database error"))?;

	let mut users: Vec<ChannelUser> = ctx
		.registry
		.live_channel_users(channel.id)
		.await
		.into_iter()
		.map(|identity| ChannelUser {
			is_op: operators.contains(&identity.user_id),
			id: identity.user_id,
			nickname: identity.nickname,
			is_serv: identity.is_service,
		})
		.collect();
	sort_channel_users(&mut users);

	Reply::data(&ChannelUsersResponse { users })
}

/// Operators first, then service accounts, then by nickname.
pub fn sort_channel_users(users: &mut [ChannelUser]) {
	users.sort_by(|a, b| {
		b.is_op
			.cmp(&a.is_op)
			.then(b.is_serv.cmp(&a.is_serv))
			.then_with(|| a.nickname.cmp(&b.nickname))
	});
}

#[cfg(test)]
mod tests {
	use parley_domain::UserId;

	use super::*;

	fn user(id: i64, nickname: &str, is_serv: bool, is_op: bool) -> ChannelUser {
		ChannelUser {
			id: UserId(id),
			nickname: nickname.to_string(),
			is_serv,
			is_op,
		}
	}

	#[test]
	fn channel_users_order_ops_then_services_then_names() {
		let mut users = vec![
			user(4, "zed", false, false),
			user(1, "ChanServ", true, false),
			user(3, "bob", false, true),
			user(2, "alice", false, false),
		];
		sort_channel_users(&mut users);
		let names: Vec<_> = users.iter().map(|u| u.nickname.as_str()).collect();
		assert_eq!(names, vec!["bob", "ChanServ", "alice", "zed"]);
	}
}
