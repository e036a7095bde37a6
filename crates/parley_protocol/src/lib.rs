#![forbid(unsafe_code)]

pub mod commands;
pub mod envelope;
pub mod framing;

pub use commands::Command;
pub use envelope::{EventFrame, MessageFrame, ResponseFrame, SERVER_WIDE_CHANNEL, ServerFrame, format_sent_at};
pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, InboundFrame, MAX_OUTBOUND_FRAME_SIZE, decode_request, decode_server_frame, encode_frame,
	encode_request,
};

/// Query parameter carrying a prior session token on the upgrade request.
pub const SESSION_QUERY_PARAM: &str = "session_id";
