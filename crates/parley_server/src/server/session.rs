#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parley_domain::{ChannelId, SessionToken, UserId};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::debug;

use crate::util::time::unix_ms_now;

/// Items queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
	Text(String),
	Close,
}

/// Authenticated identity; id and nickname always travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	pub user_id: UserId,
	pub nickname: String,
	pub is_service: bool,
}

/// Live connection attached to a session. `conn_id` identifies the generation.
#[derive(Debug, Clone)]
pub struct Transport {
	pub conn_id: u64,
	pub tx: mpsc::Sender<Outbound>,
}

impl Transport {
	pub fn new(conn_id: u64, tx: mpsc::Sender<Outbound>) -> Self {
		Self { conn_id, tx }
	}

	/// Ask the writer to close; a full queue is skipped since dropping the sender closes it anyway.
	fn close(self) {
		if self.tx.try_send(Outbound::Close).is_err() {
			debug!(conn_id = self.conn_id, "close request not queued");
		}
	}
}

#[derive(Debug)]
pub struct SessionState {
	pub identity: Option<Identity>,
	pub last_seen: Instant,
	pub last_seen_unix_ms: i64,
	pub channels: BTreeSet<ChannelId>,
	pub transport: Option<Transport>,
	/// When the transport was last cleared; `None` while attached.
	pub detached_at: Option<Instant>,
}

impl SessionState {
	pub fn is_connected(&self) -> bool {
		self.transport.is_some()
	}

	pub fn is_authenticated(&self) -> bool {
		self.identity.is_some()
	}

	pub fn user_id(&self) -> Option<UserId> {
		self.identity.as_ref().map(|i| i.user_id)
	}

	pub fn is_current_conn(&self, conn_id: u64) -> bool {
		self.transport.as_ref().is_some_and(|t| t.conn_id == conn_id)
	}

	pub fn touch(&mut self) -> i64 {
		self.last_seen = Instant::now();
		self.last_seen_unix_ms = unix_ms_now();
		self.last_seen_unix_ms
	}

	/// Swap in a new transport, returning the previous one.
	pub fn replace_transport(&mut self, transport: Option<Transport>) -> Option<Transport> {
		self.detached_at = match transport {
			Some(_) => None,
			None => self.detached_at.or_else(|| Some(Instant::now())),
		};
		std::mem::replace(&mut self.transport, transport)
	}

	pub fn is_stale(&self, now: Instant, expiry: Duration) -> bool {
		now.saturating_duration_since(self.last_seen) > expiry
	}

	/// Detached for longer than `retention`.
	pub fn is_abandoned(&self, now: Instant, retention: Duration) -> bool {
		self.transport.is_none()
			&& self
				.detached_at
				.is_some_and(|at| now.saturating_duration_since(at) > retention)
	}
}

/// One logical client, surviving transport swaps on reconnect.
#[derive(Debug)]
pub struct Session {
	token: SessionToken,
	state: Mutex<SessionState>,
	/// Serializes teardown paths (quit, disconnect, expiry) for this session.
	teardown: Mutex<()>,
}

impl Session {
	pub fn new(token: SessionToken, transport: Option<Transport>) -> Self {
		Self {
			token,
			state: Mutex::new(SessionState {
				identity: None,
				last_seen: Instant::now(),
				last_seen_unix_ms: unix_ms_now(),
				channels: BTreeSet::new(),
				detached_at: transport.is_none().then(Instant::now),
				transport,
			}),
			teardown: Mutex::new(()),
		}
	}

	pub fn token(&self) -> &SessionToken {
		&self.token
	}

	pub async fn state(&self) -> MutexGuard<'_, SessionState> {
		self.state.lock().await
	}

	pub async fn teardown_guard(&self) -> MutexGuard<'_, ()> {
		self.teardown.lock().await
	}

	pub async fn identity(&self) -> Option<Identity> {
		self.state.lock().await.identity.clone()
	}

	pub async fn channels(&self) -> BTreeSet<ChannelId> {
		self.state.lock().await.channels.clone()
	}

	pub async fn is_subscribed(&self, channel: ChannelId) -> bool {
		self.state.lock().await.channels.contains(&channel)
	}

	/// Returns false when already subscribed.
	pub async fn subscribe(&self, channel: ChannelId) -> bool {
		self.state.lock().await.channels.insert(channel)
	}

	/// Returns false when not subscribed.
	pub async fn unsubscribe(&self, channel: ChannelId) -> bool {
		self.state.lock().await.channels.remove(&channel)
	}

	pub async fn bind_identity(&self, identity: Identity) {
		self.state.lock().await.identity = Some(identity);
	}

	pub async fn clear_identity(&self) -> Option<Identity> {
		self.state.lock().await.identity.take()
	}

	/// Rename in place if this session is bound to `user_id`.
	pub async fn rebind_nickname(&self, user_id: UserId, nickname: &str) -> bool {
		let mut state = self.state.lock().await;
		match state.identity.as_mut() {
			Some(identity) if identity.user_id == user_id => {
				identity.nickname = nickname.to_string();
				true
			}
			_ => false,
		}
	}

	pub async fn touch(&self) -> i64 {
		self.state.lock().await.touch()
	}

	/// Detach the transport and ask its writer to close.
	pub async fn close_transport(&self) -> Option<u64> {
		let prior = self.state.lock().await.replace_transport(None);
		prior.map(|t| {
			let conn_id = t.conn_id;
			t.close();
			conn_id
		})
	}

	/// Like [`Session::close_transport`], but only while `conn_id` is still the attached connection.
	pub async fn close_transport_if(&self, conn_id: u64) -> bool {
		let prior = {
			let mut state = self.state.lock().await;
			if !state.is_current_conn(conn_id) {
				return false;
			}
			state.replace_transport(None)
		};
		if let Some(prior) = prior {
			prior.close();
		}
		true
	}

	/// Attach a new transport, closing the one it replaces.
	pub async fn attach_transport(&self, transport: Transport) {
		let prior = {
			let mut state = self.state.lock().await;
			state.touch();
			state.replace_transport(Some(transport))
		};
		if let Some(prior) = prior {
			debug!(session = %self.token, conn_id = prior.conn_id, "closing superseded transport");
			prior.close();
		}
	}

	/// Outbound sender, if attached and `pred` holds for the current state.
	pub async fn sender_if(&self, pred: impl FnOnce(&SessionState) -> bool) -> Option<mpsc::Sender<Outbound>> {
		let state = self.state.lock().await;
		match state.transport.as_ref() {
			Some(t) if pred(&state) => Some(t.tx.clone()),
			_ => None,
		}
	}

	/// Best-effort enqueue; errors are returned for the caller to log.
	pub async fn try_deliver(&self, text: &str) -> Result<(), DeliveryError> {
		let tx = self.sender_if(|_| true).await.ok_or(DeliveryError::Detached)?;
		enqueue(&tx, text)
	}
}

pub(crate) fn enqueue(tx: &mpsc::Sender<Outbound>, text: &str) -> Result<(), DeliveryError> {
	tx.try_send(Outbound::Text(text.to_string())).map_err(|e| match e {
		mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
		mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
	})
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
	#[error("session has no transport")]
	Detached,
	#[error("outbound queue full")]
	QueueFull,
	#[error("outbound queue closed")]
	Closed,
}
