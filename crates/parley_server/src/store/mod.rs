#![forbid(unsafe_code)]

//! Durable event log and the channel/user/operator catalogs.

use std::sync::Arc;

use parley_domain::{ChannelId, EventId, EventKind, EventRecord, MembershipLedger, UserId};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[cfg(test)]
mod store_tests;

/// Event to append; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
	pub channel_id: Option<ChannelId>,
	pub user_id: UserId,
	pub nickname: String,
	pub message: String,
	pub kind: EventKind,
	pub is_passive: bool,
	pub sent_at_unix_ms: i64,
}

impl NewEvent {
	pub fn new(
		channel_id: Option<ChannelId>,
		user_id: UserId,
		nickname: impl Into<String>,
		kind: EventKind,
		message: impl Into<String>,
		sent_at_unix_ms: i64,
	) -> Self {
		Self {
			channel_id,
			user_id,
			nickname: nickname.into(),
			message: message.into(),
			kind,
			is_passive: false,
			sent_at_unix_ms,
		}
	}

	pub fn passive(mut self, is_passive: bool) -> Self {
		self.is_passive = is_passive;
		self
	}

	pub(crate) fn into_record(self, id: EventId) -> EventRecord {
		EventRecord {
			id,
			channel_id: self.channel_id,
			user_id: self.user_id,
			nickname: self.nickname,
			message: self.message,
			kind: self.kind,
			is_passive: self.is_passive,
			sent_at_unix_ms: self.sent_at_unix_ms,
		}
	}
}

/// Pagination window over one channel's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
	pub limit: usize,
	pub before: Option<EventId>,
	pub after: Option<EventId>,
}

impl HistoryQuery {
	pub const DEFAULT_LIMIT: usize = 100;
	pub const MAX_LIMIT: usize = 500;

	/// Non-positive or absent limits fall back to the default; large ones are capped.
	pub fn new(limit: Option<i64>, before: Option<EventId>, after: Option<EventId>) -> Self {
		let limit = match limit {
			Some(n) if n > 0 => (n as u64).min(Self::MAX_LIMIT as u64) as usize,
			_ => Self::DEFAULT_LIMIT,
		};
		Self { limit, before, after }
	}

	pub fn latest(limit: usize) -> Self {
		Self {
			limit: limit.clamp(1, Self::MAX_LIMIT),
			before: None,
			after: None,
		}
	}

	/// Only `after` pages forward (oldest first); everything else takes the newest slice.
	pub fn pages_forward(&self) -> bool {
		self.after.is_some() && self.before.is_none()
	}

	fn admits(&self, id: EventId) -> bool {
		self.before.is_none_or(|b| id < b) && self.after.is_none_or(|a| id > a)
	}
}

/// Chronological page plus whether more records lie beyond its far edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
	pub records: Vec<EventRecord>,
	pub has_more: bool,
}

impl HistoryPage {
	/// Build a page from candidates fetched in query order (newest first, or oldest first when
	/// paging forward), holding at most `limit + 1` entries. The extra entry is the lookahead.
	pub(crate) fn from_lookahead(mut fetched: Vec<EventRecord>, query: &HistoryQuery) -> Self {
		let has_more = fetched.len() > query.limit;
		fetched.truncate(query.limit);
		if !query.pages_forward() {
			fetched.reverse();
		}
		Self {
			records: fetched,
			has_more,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
	pub id: ChannelId,
	pub name: String,
	pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
	pub id: UserId,
	pub nickname: String,
	pub is_service: bool,
}

#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
	/// Human-readable backend label, reported by the health endpoint.
	fn describe(&self) -> String;

	async fn append_event(&self, event: NewEvent) -> anyhow::Result<EventRecord>;

	async fn query_events(&self, channel: ChannelId, query: HistoryQuery) -> anyhow::Result<HistoryPage>;

	/// Joined/left tallies per user for one channel.
	async fn channel_presence(&self, channel: ChannelId) -> anyhow::Result<MembershipLedger>;

	async fn channel_by_name(&self, name: &str) -> anyhow::Result<Option<Channel>>;

	async fn channel_by_id(&self, id: ChannelId) -> anyhow::Result<Option<Channel>>;

	/// Insert a channel with an empty topic; an existing channel of that name is returned as-is.
	async fn create_channel(&self, name: &str) -> anyhow::Result<Channel>;

	/// All channels ordered by name.
	async fn list_channels(&self) -> anyhow::Result<Vec<Channel>>;

	async fn set_topic(&self, channel: ChannelId, topic: &str) -> anyhow::Result<()>;

	/// Remove the channel together with its log and operator grants.
	async fn delete_channel(&self, channel: ChannelId) -> anyhow::Result<()>;

	async fn grant_operator(&self, user: UserId, channel: ChannelId, granted_by: UserId) -> anyhow::Result<()>;

	async fn revoke_operator(&self, user: UserId, channel: ChannelId) -> anyhow::Result<()>;

	async fn is_operator(&self, user: UserId, channel: ChannelId) -> anyhow::Result<bool>;

	async fn operators(&self, channel: ChannelId) -> anyhow::Result<Vec<UserId>>;

	async fn create_or_fetch_user(&self, nickname: &str) -> anyhow::Result<User>;

	async fn user_by_id(&self, id: UserId) -> anyhow::Result<Option<User>>;

	async fn user_by_nickname(&self, nickname: &str) -> anyhow::Result<Option<User>>;

	async fn rename_user(&self, id: UserId, nickname: &str) -> anyhow::Result<()>;

	/// Flag (creating if needed) a nickname as a service account.
	async fn mark_service_account(&self, nickname: &str) -> anyhow::Result<User>;
}

pub type SharedStore = Arc<dyn ChatStore>;

/// Sentinel selecting the in-memory backend.
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Open the backend named by `database_url`.
pub async fn open_store(database_url: &str) -> anyhow::Result<SharedStore> {
	if database_url.trim() == MEMORY_DATABASE_URL {
		return Ok(Arc::new(InMemoryStore::new()));
	}
	Ok(Arc::new(SqliteStore::connect(database_url).await?))
}

/// Strip credentials (`user:pass@`) and query parameters for display.
pub fn redact_database_url(url: &str) -> String {
	let without_query = url.split('?').next().unwrap_or(url);
	match (without_query.find("://"), without_query.rfind('@')) {
		(Some(scheme_end), Some(at)) if at > scheme_end => {
			format!("{}{}", &without_query[..scheme_end + 3], &without_query[at + 1..])
		}
		_ => without_query.to_string(),
	}
}
