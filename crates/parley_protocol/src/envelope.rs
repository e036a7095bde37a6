#![forbid(unsafe_code)]

use chrono::{DateTime, SecondsFormat, Utc};
use parley_domain::{ChannelId, EventId, EventKind, EventRecord, UserId};
use serde::{Deserialize, Serialize};

/// Channel id used on the wire for server-wide events.
pub const SERVER_WIDE_CHANNEL: ChannelId = ChannelId(0);

/// Every frame the server writes, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
	Response(ResponseFrame),
	Event(EventFrame),
	Message(MessageFrame),
}

/// Reply correlated to one request by `req_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
	#[serde(default)]
	pub req_id: String,
	pub okay: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

impl ResponseFrame {
	pub fn success(req_id: impl Into<String>, data: Option<serde_json::Value>) -> Self {
		Self {
			req_id: req_id.into(),
			okay: true,
			error: None,
			data,
		}
	}

	pub fn failure(req_id: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			req_id: req_id.into(),
			okay: false,
			error: Some(error.into()),
			data: None,
		}
	}
}

/// Server-initiated structured event (join, leave, kick, topic, nick, announcement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
	/// Log id; absent for live-only events.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<EventId>,
	pub channel_id: ChannelId,
	pub event: EventKind,
	pub user_id: UserId,
	pub nickname: String,
	pub sent_at: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub topic: Option<String>,
	/// Reason or announcement text, when the record carries one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl EventFrame {
	/// Live re-announcement of a reconnected member; never backed by a log record.
	pub fn presence(channel_id: ChannelId, user_id: UserId, nickname: impl Into<String>, now_unix_ms: i64) -> Self {
		Self {
			id: None,
			channel_id,
			event: EventKind::Joined,
			user_id,
			nickname: nickname.into(),
			sent_at: format_sent_at(now_unix_ms),
			topic: None,
			message: None,
		}
	}
}

/// Chat line as delivered to channel members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFrame {
	/// Log id, usable as a `before`/`after` history cursor.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<EventId>,
	pub channel_id: ChannelId,
	pub message: String,
	pub is_passive: bool,
	pub sent_at: String,
	pub user_id: UserId,
	pub nickname: String,
}

impl ServerFrame {
	/// Render a log record the same way for live fan-out and history replay.
	pub fn from_record(record: &EventRecord) -> Self {
		let channel_id = record.channel_id.unwrap_or(SERVER_WIDE_CHANNEL);
		let sent_at = format_sent_at(record.sent_at_unix_ms);

		if record.kind.is_chat_message() {
			return ServerFrame::Message(MessageFrame {
				id: Some(record.id),
				channel_id,
				message: record.message.clone(),
				is_passive: record.is_passive,
				sent_at,
				user_id: record.user_id,
				nickname: record.nickname.clone(),
			});
		}

		let message = (!record.message.is_empty()).then(|| record.message.clone());
		let topic = match record.kind {
			EventKind::TopicChange => Some(record.message.clone()),
			_ => None,
		};

		ServerFrame::Event(EventFrame {
			id: Some(record.id),
			channel_id,
			event: record.kind,
			user_id: record.user_id,
			nickname: record.nickname.clone(),
			sent_at,
			topic,
			message,
		})
	}

	pub fn req_id(&self) -> Option<&str> {
		match self {
			ServerFrame::Response(r) => Some(&r.req_id),
			_ => None,
		}
	}
}

/// RFC 3339 (UTC, whole seconds) rendering of a unix-ms timestamp.
pub fn format_sent_at(unix_ms: i64) -> String {
	DateTime::<Utc>::from_timestamp_millis(unix_ms)
		.unwrap_or_default()
		.to_rfc3339_opts(SecondsFormat::Secs, true)
}
