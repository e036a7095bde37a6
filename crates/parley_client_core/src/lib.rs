#![forbid(unsafe_code)]

//! WebSocket client for the parley chat server.
//!
//! [`Client::connect`] returns a request handle and a receiver of pushed frames (events and
//! messages). Requests are correlated to responses by `req_id`, so several may be in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_domain::ChannelId;
use parley_protocol::commands::{
	ChannelRef, HeartbeatResponse, JoinRequest, LoginRequest, LoginResponse, MessageRequest, QuitRequest, QuitResponse,
};
use parley_protocol::{
	Command, DEFAULT_MAX_FRAME_SIZE, FramingError, MAX_OUTBOUND_FRAME_SIZE, ResponseFrame, ServerFrame, decode_server_frame,
	encode_request,
};
use parley_util::endpoint::WsEndpoint;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, warn};

/// Local dev default.
pub const DEFAULT_SERVER_ENDPOINT: &str = "ws://127.0.0.1:8080";

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub endpoint: WsEndpoint,

	/// Prior session token; the server resumes that session when it still exists.
	pub session_id: Option<String>,

	/// Maximum outbound request size.
	pub max_frame_bytes: usize,

	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,

	/// How long to wait for a correlated response.
	pub request_timeout: Duration,

	/// Capacity of the pushed-frame channel handed to the caller.
	pub event_buffer: usize,
}

impl ClientConfig {
	/// Convenience: create a config from `ws://host:port[/path]`.
	pub fn from_ws_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let endpoint = WsEndpoint::parse(endpoint).map_err(ClientCoreError::Connect)?;
		Ok(Self {
			endpoint,
			..Self::default()
		})
	}

	pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	pub fn url(&self) -> String {
		self.endpoint.url(self.session_id.as_deref())
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint: WsEndpoint {
				host: "127.0.0.1".to_string(),
				port: 8080,
				path: "/".to_string(),
			},
			session_id: None,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			connect_timeout: Duration::from_secs(15),
			request_timeout: Duration::from_secs(10),
			event_buffer: 256,
		}
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// The server answered `okay: false`.
	#[error("request rejected: {0}")]
	Rejected(String),

	/// Protocol error (unexpected payload shape).
	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("timed out waiting for response to {0}")]
	Timeout(String),

	/// The connection is gone.
	#[error("connection closed")]
	Closed,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseFrame>>>>;

/// Request half of a connection.
pub struct Client {
	outbound: mpsc::Sender<Message>,
	pending: PendingMap,
	next_req: AtomicU64,
	max_frame_bytes: usize,
	request_timeout: Duration,
	reader: JoinHandle<()>,
	writer: JoinHandle<()>,
}

/// Server-pushed frames (events and chat messages), in arrival order.
pub struct ClientEvents {
	rx: mpsc::Receiver<ServerFrame>,
}

impl ClientEvents {
	/// Next pushed frame; `None` once the connection is closed and drained.
	pub async fn recv(&mut self) -> Option<ServerFrame> {
		self.rx.recv().await
	}

	/// Next pushed frame if one arrives within `timeout`.
	pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ServerFrame> {
		tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
	}

	/// Every frame already received, without waiting.
	pub fn drain(&mut self) -> Vec<ServerFrame> {
		let mut out = Vec::new();
		while let Ok(frame) = self.rx.try_recv() {
			out.push(frame);
		}
		out
	}
}

impl Client {
	/// Connect and perform the WebSocket handshake.
	pub async fn connect(cfg: ClientConfig) -> Result<(Self, ClientEvents), ClientCoreError> {
		let url = cfg.url();
		let ws_config = WebSocketConfig::default().max_message_size(Some(MAX_OUTBOUND_FRAME_SIZE));

		let (ws, _resp) = tokio::time::timeout(
			cfg.connect_timeout,
			tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), true),
		)
		.await
		.map_err(|_| ClientCoreError::Connect(format!("connect timeout after {:?} ({url})", cfg.connect_timeout)))?
		.map_err(|e| ClientCoreError::Connect(format!("{url}: {e}")))?;
		info!(endpoint = %cfg.endpoint.hostport(), resume = cfg.session_id.is_some(), "connected");

		let (mut sink, mut source) = ws.split();
		let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
		let (events_tx, events_rx) = mpsc::channel::<ServerFrame>(cfg.event_buffer.max(1));
		let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

		let writer = tokio::spawn(async move {
			while let Some(msg) = out_rx.recv().await {
				let closing = matches!(msg, Message::Close(_));
				if let Err(e) = sink.send(msg).await {
					debug!(error = %e, "websocket write failed");
					break;
				}
				if closing {
					break;
				}
			}
			let _ = sink.close().await;
		});

		let reader_pending = Arc::clone(&pending);
		let reader = tokio::spawn(async move {
			while let Some(next) = source.next().await {
				let text = match next {
					Ok(Message::Text(text)) => text,
					Ok(Message::Close(_)) => {
						debug!("server closed the connection");
						break;
					}
					Ok(_) => continue,
					Err(e) => {
						debug!(error = %e, "websocket read failed");
						break;
					}
				};

				let frame = match decode_server_frame(text.as_str(), MAX_OUTBOUND_FRAME_SIZE) {
					Ok(frame) => frame,
					Err(e) => {
						warn!(error = %e, "undecodable server frame");
						continue;
					}
				};

				match frame {
					ServerFrame::Response(resp) => {
						let waiter = reader_pending.lock().await.remove(&resp.req_id);
						match waiter {
							Some(tx) => {
								let _ = tx.send(resp);
							}
							None => warn!(req_id = %resp.req_id, error = ?resp.error, "uncorrelated response"),
						}
					}
					pushed => {
						if events_tx.send(pushed).await.is_err() {
							debug!("events receiver dropped");
						}
					}
				}
			}

			// Waiters observe the closed connection through their dropped senders.
			reader_pending.lock().await.clear();
		});

		let client = Self {
			outbound: out_tx,
			pending,
			next_req: AtomicU64::new(1),
			max_frame_bytes: cfg.max_frame_bytes,
			request_timeout: cfg.request_timeout,
			reader,
			writer,
		};

		Ok((client, ClientEvents { rx: events_rx }))
	}

	/// Send one command and wait for its correlated response, whatever its outcome.
	pub async fn request<T: Serialize>(&self, cmd: Command, payload: &T) -> Result<ResponseFrame, ClientCoreError> {
		let req_id = format!("c{}", self.next_req.fetch_add(1, Ordering::Relaxed));
		let text = encode_request(cmd, &req_id, payload, self.max_frame_bytes)?;

		let (tx, rx) = oneshot::channel();
		self.pending.lock().await.insert(req_id.clone(), tx);

		if self.outbound.send(Message::Text(text.into())).await.is_err() {
			self.pending.lock().await.remove(&req_id);
			return Err(ClientCoreError::Closed);
		}

		match tokio::time::timeout(self.request_timeout, rx).await {
			Ok(Ok(resp)) => Ok(resp),
			Ok(Err(_)) => Err(ClientCoreError::Closed),
			Err(_) => {
				self.pending.lock().await.remove(&req_id);
				Err(ClientCoreError::Timeout(cmd.as_str().to_string()))
			}
		}
	}

	/// Send one command and decode its success payload.
	pub async fn call<T: Serialize, R: DeserializeOwned>(&self, cmd: Command, payload: &T) -> Result<R, ClientCoreError> {
		let resp = self.request(cmd, payload).await?;
		if !resp.okay {
			return Err(ClientCoreError::Rejected(resp.error.unwrap_or_default()));
		}
		let data = resp.data.unwrap_or(serde_json::Value::Null);
		serde_json::from_value(data).map_err(|e| ClientCoreError::Protocol(format!("{} response: {e}", cmd.as_str())))
	}

	pub async fn login(&self, nickname: &str) -> Result<LoginResponse, ClientCoreError> {
		self.call(
			Command::Login,
			&LoginRequest {
				nickname: nickname.to_string(),
			},
		)
		.await
	}

	pub async fn join(&self, channel_name: &str) -> Result<ChannelRef, ClientCoreError> {
		self.call(
			Command::Join,
			&JoinRequest {
				channel_name: Some(channel_name.to_string()),
				channel_id: None,
			},
		)
		.await
	}

	pub async fn send_message(&self, channel_id: ChannelId, message: &str) -> Result<(), ClientCoreError> {
		let resp = self
			.request(
				Command::Message,
				&MessageRequest {
					channel_id: Some(channel_id),
					message: message.to_string(),
					is_passive: false,
				},
			)
			.await?;
		if resp.okay {
			Ok(())
		} else {
			Err(ClientCoreError::Rejected(resp.error.unwrap_or_default()))
		}
	}

	pub async fn heartbeat(&self) -> Result<HeartbeatResponse, ClientCoreError> {
		self.call(Command::Heartbeat, &serde_json::json!({})).await
	}

	/// Ends the session; the server closes the connection after answering.
	pub async fn quit(&self, dying_message: Option<&str>) -> Result<QuitResponse, ClientCoreError> {
		self.call(
			Command::Quit,
			&QuitRequest {
				dying_message: dying_message.map(str::to_string),
			},
		)
		.await
	}

	/// True once the server side of the connection is gone.
	pub fn is_closed(&self) -> bool {
		self.reader.is_finished()
	}

	/// Close the connection without ending the session, as a dropped network would.
	pub async fn close(mut self) {
		let _ = self.outbound.send(Message::Close(None)).await;
		let _ = tokio::time::timeout(Duration::from_secs(2), &mut self.writer).await;
	}
}

impl Drop for Client {
	fn drop(&mut self) {
		self.reader.abort();
		self.writer.abort();
	}
}
