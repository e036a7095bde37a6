#![forbid(unsafe_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parley_domain::{ChannelId, UserId};
use parley_protocol::{DEFAULT_MAX_FRAME_SIZE, ResponseFrame, ServerFrame, decode_server_frame};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::server::dispatcher::{CommandRateLimiter, Dispatched, dispatch};
use crate::server::handlers::ServerContext;
use crate::server::registry::{RegistryConfig, SessionRegistry};
use crate::server::session::{Outbound, Session, Transport};
use crate::store::memory::InMemoryStore;

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("PARLEY_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

pub(crate) fn context() -> ServerContext {
	context_with(RegistryConfig::default())
}

pub(crate) fn context_with(cfg: RegistryConfig) -> ServerContext {
	init_test_logging();
	ServerContext::new(Arc::new(SessionRegistry::new(cfg)), Arc::new(InMemoryStore::new()))
}

/// A session driven directly through the dispatcher, with its outbound queue exposed.
pub(crate) struct TestClient {
	pub session: Arc<Session>,
	pub rx: mpsc::Receiver<Outbound>,
	pub conn_id: u64,
	limiter: CommandRateLimiter,
	next_req: u64,
}

pub(crate) fn transport(conn_id: u64) -> (Transport, mpsc::Receiver<Outbound>) {
	let (tx, rx) = mpsc::channel(64);
	(Transport::new(conn_id, tx), rx)
}

impl TestClient {
	pub async fn connect(ctx: &ServerContext, conn_id: u64) -> Self {
		Self::connect_with_token(ctx, conn_id, None).await
	}

	pub async fn connect_with_token(ctx: &ServerContext, conn_id: u64, token: Option<&str>) -> Self {
		let (t, rx) = transport(conn_id);
		let (session, _) = ctx.registry.create(token, t).await;
		Self {
			session,
			rx,
			conn_id,
			limiter: CommandRateLimiter::unlimited(),
			next_req: 1,
		}
	}

	pub async fn dispatch_raw(&mut self, ctx: &ServerContext, text: &str) -> Dispatched {
		dispatch(ctx, &self.session, &mut self.limiter, text, DEFAULT_MAX_FRAME_SIZE).await
	}

	pub async fn call(&mut self, ctx: &ServerContext, cmd: &str, mut body: Value) -> ResponseFrame {
		let req_id = format!("r{}", self.next_req);
		self.next_req += 1;
		if let Value::Object(map) = &mut body {
			map.insert("cmd".to_string(), Value::String(cmd.to_string()));
			map.insert("req_id".to_string(), Value::String(req_id.clone()));
		}
		let outcome = self.dispatch_raw(ctx, &body.to_string()).await;
		assert_eq!(outcome.response.req_id, req_id);
		outcome.response
	}

	pub async fn ok(&mut self, ctx: &ServerContext, cmd: &str, body: Value) -> Value {
		let resp = self.call(ctx, cmd, body).await;
		assert!(resp.okay, "{cmd} failed: {:?}", resp.error);
		resp.data.unwrap_or(Value::Null)
	}

	pub async fn err(&mut self, ctx: &ServerContext, cmd: &str, body: Value) -> String {
		let resp = self.call(ctx, cmd, body).await;
		assert!(!resp.okay, "{cmd} unexpectedly succeeded: {:?}", resp.data);
		resp.error.unwrap_or_default()
	}

	pub async fn login(&mut self, ctx: &ServerContext, nickname: &str) -> UserId {
		let data = self.ok(ctx, "login", json!({"nickname": nickname})).await;
		UserId(data["user_id"].as_i64().expect("user_id"))
	}

	pub async fn join(&mut self, ctx: &ServerContext, name: &str) -> ChannelId {
		let data = self.ok(ctx, "join", json!({"channel_name": name})).await;
		ChannelId(data["channel_id"].as_i64().expect("channel_id"))
	}

	/// Every frame queued so far, without waiting.
	pub fn drain(&mut self) -> Vec<ServerFrame> {
		let mut out = Vec::new();
		while let Ok(item) = self.rx.try_recv() {
			if let Outbound::Text(text) = item {
				out.push(decode_server_frame(&text, usize::MAX).expect("decode server frame"));
			}
		}
		out
	}

	/// Whether a close request is queued (frames before it are discarded).
	pub fn saw_close(&mut self) -> bool {
		while let Ok(item) = self.rx.try_recv() {
			if item == Outbound::Close {
				return true;
			}
		}
		false
	}
}

pub(crate) async fn recv_outbound(rx: &mut mpsc::Receiver<Outbound>) -> Outbound {
	match tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
		Ok(Some(item)) => item,
		other => panic!("expected outbound item, got: {other:?}"),
	}
}
