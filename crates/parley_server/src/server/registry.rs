#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parley_domain::{ChannelId, SessionToken, UserId};
use parley_protocol::{MAX_OUTBOUND_FRAME_SIZE, ServerFrame, encode_frame};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::session::{DeliveryError, Identity, Outbound, Session, Transport, enqueue};

/// Liveness sweep settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
	pub sweep_interval: Duration,
	pub expiry: Duration,
	/// How long a disconnected session is kept for a reconnect before it is dropped.
	pub retention: Duration,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			sweep_interval: Duration::from_secs(25),
			expiry: Duration::from_secs(60),
			retention: Duration::from_secs(3600),
		}
	}
}

/// Invoked by the sweep.
#[async_trait::async_trait]
pub trait ExpiryHandler: Send + Sync {
	/// A connected session missed the liveness deadline.
	async fn on_expired(&self, session: Arc<Session>, conn_id: u64);

	/// A disconnected session outlived the retention window.
	async fn on_abandoned(&self, session: Arc<Session>);
}

/// Directory of every session in this process.
///
/// Lock order: the map lock is never taken while a session lock is held. Fan-out iterates a
/// snapshot so no map lock is held across session locks either.
pub struct SessionRegistry {
	sessions: RwLock<HashMap<SessionToken, Arc<Session>>>,
	cfg: RegistryConfig,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
	pub fn new(cfg: RegistryConfig) -> Self {
		Self {
			sessions: RwLock::new(HashMap::new()),
			cfg,
			sweeper: Mutex::new(None),
		}
	}

	pub fn config(&self) -> &RegistryConfig {
		&self.cfg
	}

	/// Resume the session named by `token`, or mint a new one.
	///
	/// Returns the session and whether it was an existing one that received the transport.
	pub async fn create(&self, token: Option<&str>, transport: Transport) -> (Arc<Session>, bool) {
		if let Some(existing) = self.resolve(token).await {
			// Waits out any teardown of the previous connection.
			let guard = existing.teardown_guard().await;
			// A retention purge that ran first leaves nothing to resume.
			if self.is_registered(&existing).await {
				existing.attach_transport(transport).await;
				drop(guard);
				metrics::counter!("parley_server_sessions_reconnected_total").increment(1);
				info!(session = %existing.token(), "transport transferred to existing session");
				return (existing, true);
			}
			debug!(session = %existing.token(), "resume target was purged, minting a new session");
		}

		let session = Arc::new(Session::new(SessionToken::generate(), Some(transport)));
		let total = {
			let mut sessions = self.sessions.write().await;
			sessions.insert(session.token().clone(), Arc::clone(&session));
			sessions.len()
		};
		metrics::gauge!("parley_server_active_sessions").set(total as f64);
		debug!(session = %session.token(), total, "session created");
		(session, false)
	}

	async fn resolve(&self, token: Option<&str>) -> Option<Arc<Session>> {
		let token = SessionToken::new(token?).ok()?;
		self.lookup(&token).await
	}

	pub async fn lookup(&self, token: &SessionToken) -> Option<Arc<Session>> {
		self.sessions.read().await.get(token).cloned()
	}

	async fn is_registered(&self, session: &Arc<Session>) -> bool {
		self.sessions
			.read()
			.await
			.get(session.token())
			.is_some_and(|s| Arc::ptr_eq(s, session))
	}

	/// Delete the session, closing its transport if attached.
	pub async fn remove(&self, token: &SessionToken) -> Option<Arc<Session>> {
		let (removed, total) = {
			let mut sessions = self.sessions.write().await;
			let removed = sessions.remove(token);
			(removed, sessions.len())
		};
		let session = removed?;
		metrics::gauge!("parley_server_active_sessions").set(total as f64);
		session.close_transport().await;
		debug!(session = %token, total, "session removed");
		Some(session)
	}

	/// Close and clear the transport only; identity and subscriptions are retained.
	pub async fn disconnect(&self, token: &SessionToken) -> bool {
		let Some(session) = self.lookup(token).await else {
			return false;
		};
		let closed = session.close_transport().await;
		debug!(session = %token, conn_id = ?closed, "session disconnected (retained)");
		closed.is_some()
	}

	/// Stamp liveness, returning the unix-ms stamp.
	pub async fn update_liveness(&self, token: &SessionToken) -> Option<i64> {
		let session = self.lookup(token).await?;
		Some(session.touch().await)
	}

	pub async fn snapshot(&self) -> Vec<Arc<Session>> {
		self.sessions.read().await.values().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		self.sessions.read().await.len()
	}

	pub async fn sessions_for_user(&self, user: UserId) -> Vec<Arc<Session>> {
		let mut out = Vec::new();
		for session in self.snapshot().await {
			if session.state().await.user_id() == Some(user) {
				out.push(session);
			}
		}
		out
	}

	/// Deliver to every attached session subscribed to `channel`.
	pub async fn broadcast_to_channel(&self, channel: ChannelId, frame: &ServerFrame) -> usize {
		self.broadcast_to_channel_except(channel, frame, None).await
	}

	pub async fn broadcast_to_channel_except(
		&self,
		channel: ChannelId,
		frame: &ServerFrame,
		except: Option<&SessionToken>,
	) -> usize {
		let Some(text) = encode_outbound(frame) else {
			return 0;
		};

		let mut delivered = 0;
		for session in self.snapshot().await {
			if except == Some(session.token()) {
				continue;
			}
			if let Some(tx) = session.sender_if(|s| s.channels.contains(&channel)).await
				&& record_delivery(&session, &tx, &text)
			{
				delivered += 1;
			}
		}
		delivered
	}

	/// Deliver to every attached, authenticated session.
	pub async fn broadcast_to_all(&self, frame: &ServerFrame) -> usize {
		let Some(text) = encode_outbound(frame) else {
			return 0;
		};

		let mut delivered = 0;
		for session in self.snapshot().await {
			if let Some(tx) = session.sender_if(|s| s.is_authenticated()).await
				&& record_delivery(&session, &tx, &text)
			{
				delivered += 1;
			}
		}
		delivered
	}

	/// Deliver to one session regardless of its subscriptions.
	pub async fn deliver_to(&self, session: &Session, frame: &ServerFrame) -> bool {
		let Some(text) = encode_outbound(frame) else {
			return false;
		};
		match session.sender_if(|_| true).await {
			Some(tx) => record_delivery(session, &tx, &text),
			None => false,
		}
	}

	/// Distinct authenticated users with an attached session subscribed to `channel`.
	pub async fn live_channel_users(&self, channel: ChannelId) -> Vec<Identity> {
		let mut users: BTreeMap<UserId, Identity> = BTreeMap::new();
		for session in self.snapshot().await {
			let state = session.state().await;
			if !state.is_connected() || !state.channels.contains(&channel) {
				continue;
			}
			if let Some(identity) = state.identity.as_ref() {
				users.entry(identity.user_id).or_insert_with(|| identity.clone());
			}
		}
		users.into_values().collect()
	}

	pub async fn live_channel_occupancy(&self, channel: ChannelId) -> usize {
		self.live_channel_users(channel).await.len()
	}

	/// Sessions subscribed to `channel`, attached or retained.
	pub async fn channel_holders(&self, channel: ChannelId) -> usize {
		let mut holders = 0;
		for session in self.snapshot().await {
			if session.is_subscribed(channel).await {
				holders += 1;
			}
		}
		holders
	}

	/// Whether an attached session other than `except` is bound to exactly `nickname`.
	pub async fn is_nickname_claimed(&self, nickname: &str, except: &SessionToken) -> bool {
		for session in self.snapshot().await {
			if session.token() == except {
				continue;
			}
			let state = session.state().await;
			if state.is_connected() && state.identity.as_ref().is_some_and(|i| i.nickname == nickname) {
				return true;
			}
		}
		false
	}

	/// Connected sessions whose last liveness is older than the expiry, with their conn ids.
	pub async fn stale_sessions(&self, now: Instant) -> Vec<(Arc<Session>, u64)> {
		let mut out = Vec::new();
		for session in self.snapshot().await {
			let conn_id = {
				let state = session.state().await;
				match state.transport.as_ref() {
					Some(t) if state.is_stale(now, self.cfg.expiry) => t.conn_id,
					_ => continue,
				}
			};
			out.push((session, conn_id));
		}
		out
	}

	/// Disconnected sessions detached for longer than the retention window.
	pub async fn abandoned_sessions(&self, now: Instant) -> Vec<Arc<Session>> {
		let mut out = Vec::new();
		for session in self.snapshot().await {
			if session.state().await.is_abandoned(now, self.cfg.retention) {
				out.push(session);
			}
		}
		out
	}

	/// One sweep pass; returns the number of sessions handed to `handler`.
	pub async fn sweep_once(&self, handler: &dyn ExpiryHandler) -> usize {
		let now = Instant::now();
		let stale = self.stale_sessions(now).await;
		let abandoned = self.abandoned_sessions(now).await;
		let count = stale.len() + abandoned.len();
		for (session, conn_id) in stale {
			info!(session = %session.token(), conn_id, "session missed liveness deadline");
			metrics::counter!("parley_server_sessions_expired_total").increment(1);
			handler.on_expired(session, conn_id).await;
		}
		for session in abandoned {
			info!(session = %session.token(), "retained session was never resumed");
			metrics::counter!("parley_server_sessions_abandoned_total").increment(1);
			handler.on_abandoned(session).await;
		}
		count
	}

	/// Start the periodic sweep. A running sweep is replaced.
	pub async fn start_sweeper(self: &Arc<Self>, handler: Arc<dyn ExpiryHandler>) {
		let weak: Weak<Self> = Arc::downgrade(self);
		let period = self.cfg.sweep_interval;
		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let Some(registry) = weak.upgrade() else {
					break;
				};
				let expired = registry.sweep_once(handler.as_ref()).await;
				if expired > 0 {
					debug!(expired, "liveness sweep finished");
				}
			}
		});

		if let Some(prev) = self.sweeper.lock().await.replace(task) {
			prev.abort();
		}
	}

	/// Stop the sweep task.
	pub async fn shutdown(&self) {
		if let Some(task) = self.sweeper.lock().await.take() {
			task.abort();
		}
	}
}

fn encode_outbound(frame: &ServerFrame) -> Option<String> {
	match encode_frame(frame, MAX_OUTBOUND_FRAME_SIZE) {
		Ok(text) => Some(text),
		Err(e) => {
			warn!(error = %e, "failed to encode outbound frame");
			None
		}
	}
}

fn record_delivery(session: &Session, tx: &mpsc::Sender<Outbound>, text: &str) -> bool {
	match enqueue(tx, text) {
		Ok(()) => true,
		Err(e) => {
			metrics::counter!("parley_server_delivery_failures_total").increment(1);
			match e {
				DeliveryError::QueueFull => warn!(session = %session.token(), error = %e, "dropping frame for slow session"),
				_ => debug!(session = %session.token(), error = %e, "frame not delivered"),
			}
			false
		}
	}
}
