#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use parley_domain::{ChannelId, EventId, EventRecord, MembershipLedger, SYSTEM_NICKNAME, SYSTEM_USER_ID, UserId};
use tokio::sync::Mutex;

use super::{Channel, ChatStore, HistoryPage, HistoryQuery, NewEvent, User};

#[derive(Debug, Default)]
struct Tables {
	next_event_id: i64,
	next_channel_id: i64,
	next_user_id: i64,
	events: Vec<EventRecord>,
	channels: BTreeMap<ChannelId, Channel>,
	users: BTreeMap<UserId, User>,
	/// (user, channel) -> granted_by
	operators: HashMap<(UserId, ChannelId), UserId>,
}

impl Tables {
	fn seeded() -> Self {
		let mut users = BTreeMap::new();
		users.insert(
			SYSTEM_USER_ID,
			User {
				id: SYSTEM_USER_ID,
				nickname: SYSTEM_NICKNAME.to_string(),
				is_service: true,
			},
		);
		Self {
			next_event_id: 1,
			next_channel_id: 1,
			next_user_id: SYSTEM_USER_ID.get() + 1,
			users,
			..Self::default()
		}
	}

	fn user_by_nickname(&self, nickname: &str) -> Option<&User> {
		self.users.values().find(|u| u.nickname == nickname)
	}

	fn insert_user(&mut self, nickname: &str) -> User {
		let user = User {
			id: UserId(self.next_user_id),
			nickname: nickname.to_string(),
			is_service: false,
		};
		self.next_user_id += 1;
		self.users.insert(user.id, user.clone());
		user
	}
}

/// Process-local store; everything is lost on restart.
pub struct InMemoryStore {
	inner: Mutex<Tables>,
}

impl Default for InMemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Tables::seeded()),
		}
	}
}

#[async_trait::async_trait]
impl ChatStore for InMemoryStore {
	fn describe(&self) -> String {
		super::MEMORY_DATABASE_URL.to_string()
	}

	async fn append_event(&self, event: NewEvent) -> anyhow::Result<EventRecord> {
		let mut t = self.inner.lock().await;
		let id = EventId(t.next_event_id);
		t.next_event_id += 1;
		let record = event.into_record(id);
		t.events.push(record.clone());
		Ok(record)
	}

	async fn query_events(&self, channel: ChannelId, query: HistoryQuery) -> anyhow::Result<HistoryPage> {
		let t = self.inner.lock().await;
		let matching = t
			.events
			.iter()
			.filter(|r| r.channel_id == Some(channel) && query.admits(r.id));

		let take = query.limit + 1;
		let fetched: Vec<EventRecord> = if query.pages_forward() {
			matching.take(take).cloned().collect()
		} else {
			matching.rev().take(take).cloned().collect()
		};
		Ok(HistoryPage::from_lookahead(fetched, &query))
	}

	async fn channel_presence(&self, channel: ChannelId) -> anyhow::Result<MembershipLedger> {
		let t = self.inner.lock().await;
		Ok(MembershipLedger::from_events(channel, t.events.iter()))
	}

	async fn channel_by_name(&self, name: &str) -> anyhow::Result<Option<Channel>> {
		let t = self.inner.lock().await;
		Ok(t.channels.values().find(|c| c.name == name).cloned())
	}

	async fn channel_by_id(&self, id: ChannelId) -> anyhow::Result<Option<Channel>> {
		let t = self.inner.lock().await;
		Ok(t.channels.get(&id).cloned())
	}

	async fn create_channel(&self, name: &str) -> anyhow::Result<Channel> {
		let mut t = self.inner.lock().await;
		if let Some(existing) = t.channels.values().find(|c| c.name == name) {
			return Ok(existing.clone());
		}
		let channel = Channel {
			id: ChannelId(t.next_channel_id),
			name: name.to_string(),
			topic: String::new(),
		};
		t.next_channel_id += 1;
		t.channels.insert(channel.id, channel.clone());
		Ok(channel)
	}

	async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
		let t = self.inner.lock().await;
		let mut out: Vec<Channel> = t.channels.values().cloned().collect();
		out.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(out)
	}

	async fn set_topic(&self, channel: ChannelId, topic: &str) -> anyhow::Result<()> {
		let mut t = self.inner.lock().await;
		let entry = t
			.channels
			.get_mut(&channel)
			.ok_or_else(|| anyhow!("channel {channel} does not exist"))?;
		entry.topic = topic.to_string();
		Ok(())
	}

	async fn delete_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
		let mut t = self.inner.lock().await;
		t.operators.retain(|(_, c), _| *c != channel);
		t.events.retain(|r| r.channel_id != Some(channel));
		t.channels.remove(&channel);
		Ok(())
	}

	async fn grant_operator(&self, user: UserId, channel: ChannelId, granted_by: UserId) -> anyhow::Result<()> {
		let mut t = self.inner.lock().await;
		t.operators.insert((user, channel), granted_by);
		Ok(())
	}

	async fn revoke_operator(&self, user: UserId, channel: ChannelId) -> anyhow::Result<()> {
		let mut t = self.inner.lock().await;
		t.operators.remove(&(user, channel));
		Ok(())
	}

	async fn is_operator(&self, user: UserId, channel: ChannelId) -> anyhow::Result<bool> {
		let t = self.inner.lock().await;
		Ok(t.operators.contains_key(&(user, channel)))
	}

	async fn operators(&self, channel: ChannelId) -> anyhow::Result<Vec<UserId>> {
		let t = self.inner.lock().await;
		let mut out: Vec<UserId> = t
			.operators
			.keys()
			.filter(|(_, c)| *c == channel)
			.map(|(u, _)| *u)
			.collect();
		out.sort();
		Ok(out)
	}

	async fn create_or_fetch_user(&self, nickname: &str) -> anyhow::Result<User> {
		let mut t = self.inner.lock().await;
		if let Some(user) = t.user_by_nickname(nickname) {
			return Ok(user.clone());
		}
		Ok(t.insert_user(nickname))
	}

	async fn user_by_id(&self, id: UserId) -> anyhow::Result<Option<User>> {
		let t = self.inner.lock().await;
		Ok(t.users.get(&id).cloned())
	}

	async fn user_by_nickname(&self, nickname: &str) -> anyhow::Result<Option<User>> {
		let t = self.inner.lock().await;
		Ok(t.user_by_nickname(nickname).cloned())
	}

	async fn rename_user(&self, id: UserId, nickname: &str) -> anyhow::Result<()> {
		let mut t = self.inner.lock().await;
		if t.user_by_nickname(nickname).is_some_and(|u| u.id != id) {
			return Err(anyhow!("nickname {nickname} is taken"));
		}
		let user = t.users.get_mut(&id).ok_or_else(|| anyhow!("user {id} does not exist"))?;
		user.nickname = nickname.to_string();
		Ok(())
	}

	async fn mark_service_account(&self, nickname: &str) -> anyhow::Result<User> {
		let mut t = self.inner.lock().await;
		let id = match t.user_by_nickname(nickname) {
			Some(user) => user.id,
			None => t.insert_user(nickname).id,
		};
		let user = t.users.get_mut(&id).ok_or_else(|| anyhow!("user {id} vanished"))?;
		user.is_service = true;
		Ok(user.clone())
	}
}
