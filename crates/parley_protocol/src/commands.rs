#![forbid(unsafe_code)]

//! The closed command set and its request/response payloads.
//!
//! Request fields default when absent so that semantic validation (e.g. "User ID is required")
//! happens in the handlers; only structurally wrong values fail to decode.

use core::fmt;

use parley_domain::{ChannelId, EventId, UserId};
use serde::{Deserialize, Serialize};

use crate::envelope::ServerFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	Login,
	Logout,
	Quit,
	SessionInfo,
	Heartbeat,
	Join,
	Leave,
	Message,
	Me,
	Nick,
	Kick,
	Topic,
	Announce,
	ListChannels,
	MyChannels,
	ChannelUsers,
	GetHistory,
}

impl Command {
	pub const ALL: [Command; 17] = [
		Command::Login,
		Command::Logout,
		Command::Quit,
		Command::SessionInfo,
		Command::Heartbeat,
		Command::Join,
		Command::Leave,
		Command::Message,
		Command::Me,
		Command::Nick,
		Command::Kick,
		Command::Topic,
		Command::Announce,
		Command::ListChannels,
		Command::MyChannels,
		Command::ChannelUsers,
		Command::GetHistory,
	];

	/// Wire name carried in the `cmd` field.
	pub const fn as_str(self) -> &'static str {
		match self {
			Command::Login => "login",
			Command::Logout => "logout",
			Command::Quit => "quit",
			Command::SessionInfo => "session_info",
			Command::Heartbeat => "heartbeat",
			Command::Join => "join",
			Command::Leave => "leave",
			Command::Message => "message",
			Command::Me => "me",
			Command::Nick => "nick",
			Command::Kick => "kick",
			Command::Topic => "topic",
			Command::Announce => "announce",
			Command::ListChannels => "list_channels",
			Command::MyChannels => "my_channels",
			Command::ChannelUsers => "channel_users",
			Command::GetHistory => "get_history",
		}
	}

	/// Exact-match lookup; unknown names are `None`.
	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|c| c.as_str() == name)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
	pub nickname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dying_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuitRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dying_message: Option<String>,
}

/// Target by name (created if absent) or by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaveRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageRequest {
	pub channel_id: Option<ChannelId>,
	pub message: String,
	pub is_passive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeRequest {
	pub channel_id: Option<ChannelId>,
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NickRequest {
	pub new_nickname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KickRequest {
	pub user_id: Option<UserId>,
	pub channel_id: Option<ChannelId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicRequest {
	pub channel_id: Option<ChannelId>,
	pub topic: String,
}

/// Without a channel id the announcement is server-wide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelUsersRequest {
	pub channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRequest {
	pub channel_id: Option<ChannelId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub before: Option<EventId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub after: Option<EventId>,
}

/// Treat `0` (and negatives) as "not supplied".
pub fn nonzero_channel(id: Option<ChannelId>) -> Option<ChannelId> {
	id.filter(|c| c.get() > 0)
}

/// Treat `0` (and negatives) as "not supplied".
pub fn nonzero_user(id: Option<UserId>) -> Option<UserId> {
	id.filter(|u| u.get() > 0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
	pub user_id: UserId,
	pub nickname: String,
	pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutResponse {
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dying_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuitResponse {
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
	/// Unix seconds of the liveness stamp.
	pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
	pub id: ChannelId,
	pub name: String,
	pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfoResponse {
	pub session_id: String,
	pub user_id: Option<UserId>,
	pub nickname: Option<String>,
	pub channels: Vec<ChannelSummary>,
}

/// Shared by join and leave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRef {
	pub channel_id: ChannelId,
	pub channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NickResponse {
	pub user_id: UserId,
	pub old_nickname: String,
	pub new_nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickResponse {
	pub user_id: UserId,
	pub channel_id: ChannelId,
	pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResponse {
	pub channel_id: ChannelId,
	pub topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementScope {
	Channel,
	Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
	pub message: String,
	#[serde(rename = "type")]
	pub scope: AnnouncementScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
	/// Chronological order.
	pub messages: Vec<ServerFrame>,
	pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
	pub id: ChannelId,
	pub name: String,
	pub topic: String,
	pub user_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelListResponse {
	pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUser {
	pub id: UserId,
	pub nickname: String,
	pub is_serv: bool,
	pub is_op: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUsersResponse {
	pub users: Vec<ChannelUser>,
}
