#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use parley_protocol::{Command, InboundFrame, ResponseFrame, decode_request};
use tracing::{debug, error, warn};

use crate::server::handlers::{self, HandlerError, HandlerResult, ServerContext};
use crate::server::session::Session;

struct TokenBucket {
	capacity: f64,
	tokens: f64,
	refill_per_sec: f64,
	last: Instant,
}

impl TokenBucket {
	fn new(capacity: u32, refill_per_minute: u32) -> Option<Self> {
		if capacity == 0 || refill_per_minute == 0 {
			return None;
		}
		Some(Self {
			capacity: capacity as f64,
			tokens: capacity as f64,
			refill_per_sec: refill_per_minute as f64 / 60.0,
			last: Instant::now(),
		})
	}

	fn allow(&mut self) -> bool {
		let now = Instant::now();
		let elapsed = now.duration_since(self.last).as_secs_f64();
		if elapsed > 0.0 {
			self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
			self.last = now;
		}
		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

/// Per-connection command budget. Zero burst or rate disables limiting.
pub struct CommandRateLimiter {
	per_connection: Option<TokenBucket>,
}

impl CommandRateLimiter {
	pub fn new(burst: u32, per_minute: u32) -> Self {
		Self {
			per_connection: TokenBucket::new(burst, per_minute),
		}
	}

	pub fn unlimited() -> Self {
		Self { per_connection: None }
	}

	fn allow(&mut self, cmd: Command) -> bool {
		// Liveness must never be starved by the budget.
		if cmd == Command::Heartbeat {
			return true;
		}
		match self.per_connection.as_mut() {
			Some(bucket) => bucket.allow(),
			None => true,
		}
	}
}

/// Outcome of one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
	pub response: ResponseFrame,
	pub command: Option<Command>,
	/// Close the connection once `response` is written.
	pub terminate: bool,
}

impl Dispatched {
	fn reply(response: ResponseFrame, command: Option<Command>) -> Self {
		Self {
			response,
			command,
			terminate: false,
		}
	}
}

/// [`dispatch`] for a frame read from connection `conn_id`.
///
/// Runs under the session's teardown guard, so a teardown racing the command sees every subscription it
/// made. Returns `None` once `conn_id` no longer owns the session.
pub async fn dispatch_on_connection(
	ctx: &ServerContext,
	session: &Arc<Session>,
	conn_id: u64,
	limiter: &mut CommandRateLimiter,
	text: &str,
	max_frame_bytes: usize,
) -> Option<Dispatched> {
	let _guard = session.teardown_guard().await;
	if !session.state().await.is_current_conn(conn_id) {
		debug!(session = %session.token(), conn_id, "frame dropped, connection no longer current");
		return None;
	}
	Some(dispatch(ctx, session, limiter, text, max_frame_bytes).await)
}

/// Decode, route and answer one text frame. Exactly one response is produced.
pub async fn dispatch(
	ctx: &ServerContext,
	session: &Arc<Session>,
	limiter: &mut CommandRateLimiter,
	text: &str,
	max_frame_bytes: usize,
) -> Dispatched {
	let frame = match decode_request(text, max_frame_bytes) {
		Ok(frame) => frame,
		Err(e) => {
			metrics::counter!("parley_server_protocol_violations_total").increment(1);
			warn!(session = %session.token(), error = %e, "undecodable frame");
			return Dispatched {
				response: ResponseFrame::failure("", "Invalid JSON"),
				command: None,
				terminate: true,
			};
		}
	};

	let Some(cmd) = frame.command() else {
		debug!(session = %session.token(), cmd = ?frame.cmd, "unknown command");
		return Dispatched::reply(ResponseFrame::failure(frame.req_id, "Unknown command"), None);
	};

	if !limiter.allow(cmd) {
		metrics::counter!("parley_server_commands_rate_limited_total").increment(1);
		debug!(session = %session.token(), %cmd, "command rate limited");
		return Dispatched::reply(ResponseFrame::failure(frame.req_id, "Rate limited"), Some(cmd));
	}

	metrics::counter!("parley_server_commands_total").increment(1);
	match route(ctx, session, cmd, &frame).await {
		Ok(reply) => Dispatched {
			response: ResponseFrame::success(frame.req_id, reply.data),
			command: Some(cmd),
			terminate: reply.terminate,
		},
		Err(err) => {
			metrics::counter!("parley_server_commands_failed_total").increment(1);
			log_failure(session, cmd, &err);
			Dispatched {
				response: ResponseFrame::failure(frame.req_id, err.client_message()),
				command: Some(cmd),
				terminate: err.terminates(),
			}
		}
	}
}

fn log_failure(session: &Session, cmd: Command, err: &HandlerError) {
	match err {
		HandlerError::ProtocolViolation(detail) => {
			metrics::counter!("parley_server_protocol_violations_total").increment(1);
			warn!(session = %session.token(), %cmd, detail = %detail, "malformed command payload");
		}
		HandlerError::Store { message, cause } => {
			error!(session = %session.token(), %cmd, reply = %message, cause = %format!("{cause:#}"), "store failure");
		}
		HandlerError::Encode(e) => error!(session = %session.token(), %cmd, error = %e, "failed to encode reply"),
		HandlerError::Validation(_) | HandlerError::NotFound(_) => {
			debug!(session = %session.token(), %cmd, error = %err, "command rejected");
		}
	}
}

async fn route(ctx: &ServerContext, session: &Arc<Session>, cmd: Command, frame: &InboundFrame) -> HandlerResult {
	use handlers::{auth, channels, messaging, moderation};

	match cmd {
		Command::Login => auth::login(ctx, session, frame).await,
		Command::Logout => auth::logout(ctx, session, frame).await,
		Command::Quit => auth::quit(ctx, session, frame).await,
		Command::SessionInfo => auth::session_info(ctx, session, frame).await,
		Command::Heartbeat => auth::heartbeat(ctx, session, frame).await,
		Command::Nick => auth::nick(ctx, session, frame).await,
		Command::Join => channels::join(ctx, session, frame).await,
		Command::Leave => channels::leave(ctx, session, frame).await,
		Command::ListChannels => channels::list_channels(ctx, session, frame).await,
		Command::MyChannels => channels::my_channels(ctx, session, frame).await,
		Command::ChannelUsers => channels::channel_users(ctx, session, frame).await,
		Command::Message => messaging::message(ctx, session, frame).await,
		Command::Me => messaging::me(ctx, session, frame).await,
		Command::GetHistory => messaging::get_history(ctx, session, frame).await,
		Command::Kick => moderation::kick(ctx, session, frame).await,
		Command::Topic => moderation::topic(ctx, session, frame).await,
		Command::Announce => moderation::announce(ctx, session, frame).await,
	}
}
