#![forbid(unsafe_code)]

//! Command handlers. Each validates, mutates the store, fans out, then returns the reply data.

use std::sync::Arc;

use parley_domain::authority::AuthorityError;
use parley_domain::{ChannelId, EventKind, EventRecord};
use parley_protocol::{FramingError, ServerFrame};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::registry::SessionRegistry;
use crate::server::session::{Identity, Session};
use crate::store::{NewEvent, SharedStore};
use crate::util::time::unix_ms_now;

pub mod auth;
pub mod channels;
pub mod messaging;
pub mod moderation;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct ServerContext {
	pub registry: Arc<SessionRegistry>,
	pub store: SharedStore,
}

impl ServerContext {
	pub fn new(registry: Arc<SessionRegistry>, store: SharedStore) -> Self {
		Self { registry, store }
	}
}

#[derive(Debug, Error)]
pub enum HandlerError {
	/// Payload could not be decoded; the connection is terminated.
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),

	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	NotFound(String),

	/// Store failure; only `message` reaches the client.
	#[error("{message}")]
	Store {
		message: &'static str,
		cause: anyhow::Error,
	},

	#[error("Internal server error")]
	Encode(#[from] serde_json::Error),
}

impl HandlerError {
	pub fn validation(msg: impl Into<String>) -> Self {
		Self::Validation(msg.into())
	}

	pub fn not_found(msg: impl Into<String>) -> Self {
		Self::NotFound(msg.into())
	}

	pub fn store(message: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
		move |cause| Self::Store { message, cause }
	}

	/// Text placed in the response `error` field.
	pub fn client_message(&self) -> String {
		match self {
			HandlerError::ProtocolViolation(_) => "Invalid request format".to_string(),
			other => other.to_string(),
		}
	}

	pub fn terminates(&self) -> bool {
		matches!(self, HandlerError::ProtocolViolation(_))
	}
}

impl From<FramingError> for HandlerError {
	fn from(e: FramingError) -> Self {
		HandlerError::ProtocolViolation(e.to_string())
	}
}

impl From<AuthorityError> for HandlerError {
	fn from(e: AuthorityError) -> Self {
		HandlerError::Validation(e.to_string())
	}
}

/// Successful handler outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
	pub data: Option<serde_json::Value>,
	/// Close the connection after the response is written.
	pub terminate: bool,
}

impl Reply {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn data<T: Serialize>(payload: &T) -> Result<Self, HandlerError> {
		Ok(Self {
			data: Some(serde_json::to_value(payload)?),
			terminate: false,
		})
	}

	pub fn and_terminate(mut self) -> Self {
		self.terminate = true;
		self
	}
}

pub type HandlerResult = Result<Reply, HandlerError>;

/// The bound identity, or a validation error carrying `msg`.
pub(crate) async fn require_identity(session: &Session, msg: &str) -> Result<Identity, HandlerError> {
	session.identity().await.ok_or_else(|| HandlerError::validation(msg))
}

/// Append a record and fan it out to the channel (or to everyone for server-wide records).
pub(crate) async fn append_and_broadcast(ctx: &ServerContext, event: NewEvent) -> anyhow::Result<EventRecord> {
	let record = ctx.store.append_event(event).await?;
	let frame = ServerFrame::from_record(&record);
	let delivered = match record.channel_id {
		Some(channel) => ctx.registry.broadcast_to_channel(channel, &frame).await,
		None => ctx.registry.broadcast_to_all(&frame).await,
	};
	debug!(event_id = %record.id, kind = %record.kind, delivered, "event fanned out");
	Ok(record)
}

/// Shared tail of leave, logout and quit for one channel the session already dropped.
///
/// Store failures past the `left` append are logged, never surfaced.
pub(crate) async fn depart_channel(
	ctx: &ServerContext,
	identity: &Identity,
	channel: ChannelId,
	reason: &str,
) -> anyhow::Result<EventRecord> {
	let record = append_and_broadcast(
		ctx,
		NewEvent::new(
			Some(channel),
			identity.user_id,
			&identity.nickname,
			EventKind::Left,
			reason,
			unix_ms_now(),
		),
	)
	.await?;

	if let Err(e) = ctx.store.revoke_operator(identity.user_id, channel).await {
		warn!(user_id = %identity.user_id, channel_id = %channel, error = %e, "failed to revoke operator");
	}

	delete_channel_if_vacant(ctx, channel).await;
	Ok(record)
}

/// Drop the channel once the log shows nobody present and no session, attached or retained, holds it.
pub(crate) async fn delete_channel_if_vacant(ctx: &ServerContext, channel: ChannelId) -> bool {
	let holders = ctx.registry.channel_holders(channel).await;
	if holders > 0 {
		debug!(channel_id = %channel, holders, "channel still held by sessions");
		return false;
	}
	match ctx.store.channel_presence(channel).await {
		Ok(ledger) if ledger.is_vacant() => match ctx.store.delete_channel(channel).await {
			Ok(()) => {
				debug!(channel_id = %channel, "deleted vacant channel");
				true
			}
			Err(e) => {
				warn!(channel_id = %channel, error = %e, "failed to delete vacant channel");
				false
			}
		},
		Ok(_) => false,
		Err(e) => {
			warn!(channel_id = %channel, error = %e, "failed to derive channel presence");
			false
		}
	}
}
