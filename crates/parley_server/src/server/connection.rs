#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context as _;
use futures::{SinkExt, StreamExt};
use parley_protocol::{
	Command, DEFAULT_MAX_FRAME_SIZE, MAX_OUTBOUND_FRAME_SIZE, ResponseFrame, SESSION_QUERY_PARAM, ServerFrame,
	encode_frame,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, warn};

use crate::server::dispatcher::{CommandRateLimiter, dispatch_on_connection};
use crate::server::handlers::ServerContext;
use crate::server::lifecycle::{self, DisconnectReason};
use crate::server::session::{Outbound, Transport};

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,

	pub outbound_queue_capacity: usize,

	pub command_rate_limit_burst: u32,
	pub command_rate_limit_per_minute: u32,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			outbound_queue_capacity: 256,
			command_rate_limit_burst: 0,
			command_rate_limit_per_minute: 0,
		}
	}
}

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
	Quit,
	/// The client broke the protocol; treated as a lost connection after the reply.
	Violation,
	Lost,
	/// The writer finished first, e.g. the transport was superseded or expired.
	WriterClosed,
	/// A frame arrived after the session moved on from this connection.
	Superseded,
}

/// Prior session token from the upgrade request query string.
pub fn session_token_from_query(query: Option<&str>) -> Option<String> {
	query?
		.split('&')
		.filter_map(|pair| pair.split_once('='))
		.find(|(key, _)| *key == SESSION_QUERY_PARAM)
		.map(|(_, value)| value.trim().to_string())
		.filter(|value| !value.is_empty())
}

pub async fn handle_connection<S>(conn_id: u64, stream: S, ctx: ServerContext, settings: ConnectionSettings) -> anyhow::Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("parley_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("parley_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let ws_config = WebSocketConfig::default()
		.max_message_size(Some(settings.max_frame_bytes))
		.max_frame_size(Some(settings.max_frame_bytes));

	let mut requested_token: Option<String> = None;
	let ws = tokio_tungstenite::accept_hdr_async_with_config(
		stream,
		|req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
			requested_token = session_token_from_query(req.uri().query());
			Ok(resp)
		},
		Some(ws_config),
	)
	.await
	.context("websocket handshake")?;

	let (tx, mut rx) = mpsc::channel::<Outbound>(settings.outbound_queue_capacity.max(1));
	let (session, resumed) = ctx
		.registry
		.create(requested_token.as_deref(), Transport::new(conn_id, tx.clone()))
		.await;
	info!(conn_id, session = %session.token(), resumed, "connection established");

	if resumed {
		let notified = lifecycle::announce_reconnect(&ctx, &session).await;
		debug!(conn_id, session = %session.token(), notified, "reconnect announced");
	}

	let (mut sink, mut source) = ws.split();

	let mut writer = tokio::spawn(async move {
		while let Some(item) = rx.recv().await {
			match item {
				Outbound::Text(text) => {
					if let Err(e) = sink.send(Message::Text(text.into())).await {
						debug!(conn_id, error = %e, "websocket write failed");
						return;
					}
					metrics::counter!("parley_server_frames_out_total").increment(1);
				}
				Outbound::Close => {
					let _ = sink.send(Message::Close(None)).await;
					break;
				}
			}
		}
		let _ = sink.close().await;
	});

	let mut limiter = CommandRateLimiter::new(settings.command_rate_limit_burst, settings.command_rate_limit_per_minute);

	let end = loop {
		let next = tokio::select! {
			_ = &mut writer => break ReadEnd::WriterClosed,
			next = source.next() => next,
		};

		let msg = match next {
			Some(Ok(msg)) => msg,
			Some(Err(e)) => {
				debug!(conn_id, error = %e, "websocket read failed");
				break ReadEnd::Lost;
			}
			None => break ReadEnd::Lost,
		};

		metrics::counter!("parley_server_frames_in_total").increment(1);
		ctx.registry.update_liveness(session.token()).await;

		match msg {
			Message::Text(text) => {
				let Some(outcome) =
					dispatch_on_connection(&ctx, &session, conn_id, &mut limiter, text.as_str(), settings.max_frame_bytes)
						.await
				else {
					break ReadEnd::Superseded;
				};
				let req_id = outcome.response.req_id.clone();
				let encoded = encode_frame(&ServerFrame::Response(outcome.response), MAX_OUTBOUND_FRAME_SIZE)
					.or_else(|e| {
						warn!(conn_id, error = %e, "failed to encode response");
						encode_frame(
							&ServerFrame::Response(ResponseFrame::failure(req_id, "Internal server error")),
							MAX_OUTBOUND_FRAME_SIZE,
						)
					})
					.context("encode response")?;

				if tx.send(Outbound::Text(encoded)).await.is_err() {
					break ReadEnd::Lost;
				}

				if outcome.terminate {
					break if outcome.command == Some(Command::Quit) {
						ReadEnd::Quit
					} else {
						ReadEnd::Violation
					};
				}
			}
			Message::Binary(_) => {
				metrics::counter!("parley_server_protocol_violations_total").increment(1);
				warn!(conn_id, session = %session.token(), "binary frame rejected");
				break ReadEnd::Violation;
			}
			Message::Close(_) => break ReadEnd::Lost,
			Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
		}
	};

	match end {
		ReadEnd::Quit => {
			lifecycle::remove_after_quit(&ctx, &session, conn_id).await;
		}
		ReadEnd::Violation | ReadEnd::Lost | ReadEnd::WriterClosed | ReadEnd::Superseded => {
			lifecycle::teardown_connection(&ctx, &session, conn_id, DisconnectReason::ConnectionLost).await;
		}
	}
	drop(tx);

	if end != ReadEnd::WriterClosed && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
		debug!(conn_id, "writer did not drain in time");
		writer.abort();
	}

	info!(conn_id, session = %session.token(), end = ?end, "connection closed");
	Ok(())
}
