#![forbid(unsafe_code)]

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::Command;
use crate::envelope::ServerFrame;

/// Default maximum text frame size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024; // 64 KiB

/// Ceiling for server-written frames; history pages can be large.
pub const MAX_OUTBOUND_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("invalid json: {0}")]
	InvalidJson(#[source] serde_json::Error),

	#[error("frame is not a json object")]
	NotAnObject,

	#[error("invalid envelope: {0}")]
	InvalidEnvelope(#[source] serde_json::Error),

	#[error("invalid request format: {0}")]
	InvalidPayload(#[source] serde_json::Error),

	#[error("json encode error: {0}")]
	Encode(#[source] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
struct RequestHeader {
	#[serde(default)]
	cmd: Option<String>,
	#[serde(default)]
	req_id: Option<String>,
}

/// A decoded client frame: the routing header plus the raw body for typed payload decoding.
#[derive(Debug, Clone)]
pub struct InboundFrame {
	pub cmd: Option<String>,
	pub req_id: String,
	body: serde_json::Value,
}

impl InboundFrame {
	pub fn command(&self) -> Option<Command> {
		self.cmd.as_deref().and_then(Command::from_name)
	}

	/// Decode the command-specific fields.
	pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FramingError> {
		T::deserialize(&self.body).map_err(FramingError::InvalidPayload)
	}
}

/// Decode one client text frame into an `InboundFrame`.
pub fn decode_request(text: &str, max_frame_size: usize) -> Result<InboundFrame, FramingError> {
	if text.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}

	let body: serde_json::Value = serde_json::from_str(text).map_err(FramingError::InvalidJson)?;
	if !body.is_object() {
		return Err(FramingError::NotAnObject);
	}

	let header = RequestHeader::deserialize(&body).map_err(FramingError::InvalidEnvelope)?;
	Ok(InboundFrame {
		cmd: header.cmd,
		req_id: header.req_id.unwrap_or_default(),
		body,
	})
}

/// Encode any serializable frame, enforcing the size limit.
pub fn encode_frame<T: Serialize>(msg: &T, max_frame_size: usize) -> Result<String, FramingError> {
	let text = serde_json::to_string(msg).map_err(FramingError::Encode)?;
	if text.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	Ok(text)
}

/// Build a client request: the payload's fields flattened next to `cmd` and `req_id`.
pub fn encode_request<T: Serialize>(
	cmd: Command,
	req_id: &str,
	payload: &T,
	max_frame_size: usize,
) -> Result<String, FramingError> {
	let mut body = serde_json::to_value(payload).map_err(FramingError::Encode)?;
	let serde_json::Value::Object(map) = &mut body else {
		return Err(FramingError::NotAnObject);
	};
	map.insert("cmd".to_string(), serde_json::Value::String(cmd.as_str().to_string()));
	map.insert("req_id".to_string(), serde_json::Value::String(req_id.to_string()));
	encode_frame(&body, max_frame_size)
}

/// Decode one server text frame.
pub fn decode_server_frame(text: &str, max_frame_size: usize) -> Result<ServerFrame, FramingError> {
	if text.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	serde_json::from_str(text).map_err(FramingError::InvalidJson)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_fields_are_optional() {
		let frame = decode_request(r#"{"nickname":"alice"}"#, DEFAULT_MAX_FRAME_SIZE).expect("decode");
		assert_eq!(frame.cmd, None);
		assert_eq!(frame.req_id, "");
		assert_eq!(frame.command(), None);
	}

	#[test]
	fn non_string_req_id_is_an_envelope_error() {
		let err = decode_request(r#"{"cmd":"login","req_id":7}"#, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
		assert!(matches!(err, FramingError::InvalidEnvelope(_)), "unexpected error: {err:?}");
	}

	#[test]
	fn arrays_are_rejected() {
		let err = decode_request("[1,2]", DEFAULT_MAX_FRAME_SIZE).unwrap_err();
		assert!(matches!(err, FramingError::NotAnObject));
	}
}
