#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod authority;
pub mod membership;

pub use membership::MembershipLedger;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown event kind: {0}")]
	UnknownEventKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! integer_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub i64);

		impl $name {
			pub const fn get(self) -> i64 {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let s = s.trim();
				if s.is_empty() {
					return Err(ParseIdError::Empty);
				}
				s.parse::<i64>()
					.map($name)
					.map_err(|_| ParseIdError::InvalidFormat(s.to_string()))
			}
		}
	};
}

integer_id!(
	/// Durable user identifier.
	UserId
);

integer_id!(
	/// Channel identifier.
	ChannelId
);

integer_id!(
	/// Monotonic event log identifier.
	EventId
);

/// Built-in service identity that grants operator status to first joiners.
pub const SYSTEM_USER_ID: UserId = UserId(1);

/// Nickname of the built-in service identity.
pub const SYSTEM_NICKNAME: &str = "ChanServ";

/// Opaque session token, stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
	/// Mint a fresh random token.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	/// Wrap a caller-supplied token (non-empty after trimming).
	pub fn new(token: impl Into<String>) -> Result<Self, ParseIdError> {
		let token = token.into();
		let trimmed = token.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for SessionToken {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		SessionToken::new(s.to_string())
	}
}

/// Channel name validation failures. Display texts are sent to clients verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelNameError {
	#[error("channel name cannot be empty")]
	Empty,
	#[error("channel name must be at least 1 character long")]
	TooShort,
	#[error("channel name cannot exceed 49 characters")]
	TooLong,
	#[error("channel name can only contain alphanumeric characters, dashes, and underscores")]
	InvalidCharacters,
}

/// Normalized channel name: lowercase, `#`-prefixed, `[a-z0-9_-]{1,49}` after the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
	pub const PREFIX: char = '#';

	/// Maximum length including the prefix.
	pub const MAX_LEN: usize = 50;

	/// Trim, lowercase and prefix without validating.
	pub fn normalize(raw: &str) -> String {
		let lowered = raw.trim().to_lowercase();
		if lowered.starts_with(Self::PREFIX) {
			lowered
		} else {
			format!("{}{lowered}", Self::PREFIX)
		}
	}

	/// Normalize and validate a user-supplied channel name.
	pub fn parse(raw: &str) -> Result<Self, ChannelNameError> {
		if raw.trim().is_empty() {
			return Err(ChannelNameError::Empty);
		}

		let normalized = Self::normalize(raw);
		if normalized.len() < 2 {
			return Err(ChannelNameError::TooShort);
		}
		if normalized.len() > Self::MAX_LEN {
			return Err(ChannelNameError::TooLong);
		}

		let body = &normalized[Self::PREFIX.len_utf8()..];
		if !body
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
		{
			return Err(ChannelNameError::InvalidCharacters);
		}

		Ok(Self(normalized))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ChannelNameError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::parse(s)
	}
}

impl TryFrom<String> for ChannelName {
	type Error = ChannelNameError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		ChannelName::parse(&value)
	}
}

impl From<ChannelName> for String {
	fn from(value: ChannelName) -> Self {
		value.0
	}
}

/// Kind of a persisted event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Message,
	Joined,
	Left,
	Kicked,
	NickChange,
	TopicChange,
	Announcement,
}

impl EventKind {
	/// Stable string identifier (stored in the log and sent on the wire).
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Message => "message",
			EventKind::Joined => "joined",
			EventKind::Left => "left",
			EventKind::Kicked => "kicked",
			EventKind::NickChange => "nick_change",
			EventKind::TopicChange => "topic_change",
			EventKind::Announcement => "announcement",
		}
	}

	/// Whether records of this kind are delivered as message envelopes rather than events.
	pub const fn is_chat_message(self) -> bool {
		matches!(self, EventKind::Message)
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s {
			"message" => Ok(EventKind::Message),
			"joined" => Ok(EventKind::Joined),
			"left" => Ok(EventKind::Left),
			"kicked" => Ok(EventKind::Kicked),
			"nick_change" => Ok(EventKind::NickChange),
			"topic_change" => Ok(EventKind::TopicChange),
			"announcement" => Ok(EventKind::Announcement),
			other => Err(ParseIdError::UnknownEventKind(other.to_string())),
		}
	}
}

/// One persisted entry of the append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
	pub id: EventId,
	/// `None` for server-wide records.
	pub channel_id: Option<ChannelId>,
	pub user_id: UserId,
	/// Display name at the time of the event.
	pub nickname: String,
	pub message: String,
	pub kind: EventKind,
	pub is_passive: bool,
	pub sent_at_unix_ms: i64,
}
