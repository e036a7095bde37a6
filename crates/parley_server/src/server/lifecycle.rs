#![forbid(unsafe_code)]

//! Session teardown on expiry, unexpected disconnect and quit, retention purge, plus reconnect presence.

use std::sync::Arc;
use std::time::Instant;

use parley_domain::EventKind;
use parley_protocol::{EventFrame, ServerFrame};
use tracing::{debug, info, warn};

use crate::server::handlers::{ServerContext, delete_channel_if_vacant};
use crate::server::registry::ExpiryHandler;
use crate::server::session::Session;
use crate::store::NewEvent;
use crate::util::time::unix_ms_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
	TimedOut,
	ConnectionLost,
}

impl DisconnectReason {
	/// Reason text stored on the synthesized `left` records.
	pub const fn as_str(self) -> &'static str {
		match self {
			DisconnectReason::TimedOut => "timed out",
			DisconnectReason::ConnectionLost => "connection lost",
		}
	}
}

/// Tear down connection `conn_id` of `session`.
///
/// Authenticated sessions get a `left` record per subscribed channel and keep their identity and
/// subscriptions for a later reconnect; anonymous ones are removed. Returns false when `conn_id` is
/// no longer the session's transport.
pub async fn teardown_connection(
	ctx: &ServerContext,
	session: &Arc<Session>,
	conn_id: u64,
	reason: DisconnectReason,
) -> bool {
	let _guard = session.teardown_guard().await;

	let (identity, channels) = {
		let state = session.state().await;
		if !state.is_current_conn(conn_id) {
			debug!(session = %session.token(), conn_id, "teardown skipped, connection superseded");
			return false;
		}
		(state.identity.clone(), state.channels.clone())
	};

	let Some(identity) = identity else {
		ctx.registry.remove(session.token()).await;
		debug!(session = %session.token(), conn_id, reason = reason.as_str(), "anonymous session removed");
		return true;
	};

	let now = unix_ms_now();
	for channel in &channels {
		let event = NewEvent::new(
			Some(*channel),
			identity.user_id,
			&identity.nickname,
			EventKind::Left,
			reason.as_str(),
			now,
		);
		match ctx.store.append_event(event).await {
			Ok(record) => {
				ctx.registry
					.broadcast_to_channel_except(*channel, &ServerFrame::from_record(&record), Some(session.token()))
					.await;
			}
			Err(e) => warn!(
				session = %session.token(),
				channel_id = %channel,
				error = %e,
				"failed to record disconnect leave"
			),
		}
	}

	session.close_transport_if(conn_id).await;
	info!(
		session = %session.token(),
		conn_id,
		user_id = %identity.user_id,
		channels = channels.len(),
		reason = reason.as_str(),
		"session disconnected"
	);
	true
}

/// Remove the session after a quit reply was queued on `conn_id`.
pub async fn remove_after_quit(ctx: &ServerContext, session: &Arc<Session>, conn_id: u64) -> bool {
	let _guard = session.teardown_guard().await;
	if !session.state().await.is_current_conn(conn_id) {
		return false;
	}
	ctx.registry.remove(session.token()).await.is_some()
}

/// Drop a retained session that was never resumed within the retention window.
///
/// Its `left` records were written when it disconnected; channels it was the last holder of are deleted if
/// the log agrees they are vacant. Returns false when the session was resumed or already gone.
pub async fn purge_abandoned(ctx: &ServerContext, session: &Arc<Session>) -> bool {
	let _guard = session.teardown_guard().await;

	let channels = {
		let state = session.state().await;
		if !state.is_abandoned(Instant::now(), ctx.registry.config().retention) {
			return false;
		}
		state.channels.clone()
	};

	if ctx.registry.remove(session.token()).await.is_none() {
		return false;
	}

	let mut deleted = 0;
	for channel in &channels {
		if delete_channel_if_vacant(ctx, *channel).await {
			deleted += 1;
		}
	}
	info!(session = %session.token(), channels = channels.len(), deleted, "retained session dropped");
	true
}

/// Tell the other occupants of every subscribed channel that the session is back. Nothing is logged.
pub async fn announce_reconnect(ctx: &ServerContext, session: &Arc<Session>) -> usize {
	let (identity, channels) = {
		let state = session.state().await;
		(state.identity.clone(), state.channels.clone())
	};
	let Some(identity) = identity else {
		return 0;
	};

	let now = unix_ms_now();
	let mut delivered = 0;
	for channel in channels {
		let frame = ServerFrame::Event(EventFrame::presence(
			channel,
			identity.user_id,
			identity.nickname.clone(),
			now,
		));
		delivered += ctx
			.registry
			.broadcast_to_channel_except(channel, &frame, Some(session.token()))
			.await;
	}
	delivered
}

/// Expiry callback handed to the registry sweep.
pub struct Lifecycle {
	ctx: ServerContext,
}

impl Lifecycle {
	pub fn new(ctx: ServerContext) -> Self {
		Self { ctx }
	}
}

#[async_trait::async_trait]
impl ExpiryHandler for Lifecycle {
	async fn on_expired(&self, session: Arc<Session>, conn_id: u64) {
		teardown_connection(&self.ctx, &session, conn_id, DisconnectReason::TimedOut).await;
	}

	async fn on_abandoned(&self, session: Arc<Session>) {
		purge_abandoned(&self.ctx, &session).await;
	}
}
