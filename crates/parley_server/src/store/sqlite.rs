#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use parley_domain::{ChannelId, EventId, EventKind, EventRecord, MembershipLedger, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{Channel, ChatStore, HistoryPage, HistoryQuery, NewEvent, User, redact_database_url};

type EventRow = (i64, Option<i64>, i64, String, String, String, bool, i64);
type ChannelRow = (i64, String, String);
type UserRow = (i64, String, bool);

const EVENT_COLUMNS: &str = "id, channel_id, user_id, nickname, message, event, is_passive, sent_at_unix_ms";

fn event_from_row(row: EventRow) -> anyhow::Result<EventRecord> {
	let (id, channel_id, user_id, nickname, message, event, is_passive, sent_at_unix_ms) = row;
	let kind = EventKind::from_str(&event).with_context(|| format!("decode event kind of record {id}"))?;
	Ok(EventRecord {
		id: EventId(id),
		channel_id: channel_id.map(ChannelId),
		user_id: UserId(user_id),
		nickname,
		message,
		kind,
		is_passive,
		sent_at_unix_ms,
	})
}

fn channel_from_row((id, name, topic): ChannelRow) -> Channel {
	Channel {
		id: ChannelId(id),
		name,
		topic,
	}
}

fn user_from_row((id, nickname, is_service): UserRow) -> User {
	User {
		id: UserId(id),
		nickname,
		is_service,
	}
}

/// SQLite-backed store (WAL, busy timeout, migrations applied on connect).
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
	label: String,
}

impl SqliteStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow!("unsupported database_url (use sqlite: or memory)"));
		}

		let options = SqliteConnectOptions::from_str(database_url)
			.context("parse sqlite url")?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.busy_timeout(Duration::from_secs(5));

		// Every connection to `:memory:` is a distinct database.
		let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

		let pool = SqlitePoolOptions::new()
			.max_connections(max_connections)
			.connect_with(options)
			.await
			.context("connect sqlite")?;

		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;

		Ok(Self {
			pool,
			label: redact_database_url(database_url),
		})
	}

	pub async fn connect_in_memory() -> anyhow::Result<Self> {
		Self::connect("sqlite::memory:").await
	}
}

#[async_trait::async_trait]
impl ChatStore for SqliteStore {
	fn describe(&self) -> String {
		self.label.clone()
	}

	async fn append_event(&self, event: NewEvent) -> anyhow::Result<EventRecord> {
		let result = sqlx::query(
			"INSERT INTO messages (channel_id, user_id, nickname, message, event, is_passive, sent_at_unix_ms) \
			VALUES (?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(event.channel_id.map(ChannelId::get))
		.bind(event.user_id.get())
		.bind(&event.nickname)
		.bind(&event.message)
		.bind(event.kind.as_str())
		.bind(event.is_passive)
		.bind(event.sent_at_unix_ms)
		.execute(&self.pool)
		.await
		.context("insert event (sqlite)")?;

		Ok(event.into_record(EventId(result.last_insert_rowid())))
	}

	async fn query_events(&self, channel: ChannelId, query: HistoryQuery) -> anyhow::Result<HistoryPage> {
		let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM messages WHERE channel_id = "));
		qb.push_bind(channel.get());
		if let Some(before) = query.before {
			qb.push(" AND id < ").push_bind(before.get());
		}
		if let Some(after) = query.after {
			qb.push(" AND id > ").push_bind(after.get());
		}
		qb.push(if query.pages_forward() {
			" ORDER BY id ASC LIMIT "
		} else {
			" ORDER BY id DESC LIMIT "
		});
		qb.push_bind((query.limit + 1) as i64);

		let rows: Vec<EventRow> = qb
			.build_query_as()
			.fetch_all(&self.pool)
			.await
			.context("select history (sqlite)")?;

		let fetched = rows.into_iter().map(event_from_row).collect::<anyhow::Result<Vec<_>>>()?;
		Ok(HistoryPage::from_lookahead(fetched, &query))
	}

	async fn channel_presence(&self, channel: ChannelId) -> anyhow::Result<MembershipLedger> {
		let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
			"SELECT user_id, \
				SUM(CASE WHEN event = 'joined' THEN 1 ELSE 0 END), \
				SUM(CASE WHEN event = 'left' THEN 1 ELSE 0 END) \
			FROM messages WHERE channel_id = ? AND event IN ('joined', 'left') GROUP BY user_id",
		)
		.bind(channel.get())
		.fetch_all(&self.pool)
		.await
		.context("select presence tallies (sqlite)")?;

		let mut ledger = MembershipLedger::new();
		for (user_id, joined, left) in rows {
			ledger.record_counts(UserId(user_id), joined.max(0) as u64, left.max(0) as u64);
		}
		Ok(ledger)
	}

	async fn channel_by_name(&self, name: &str) -> anyhow::Result<Option<Channel>> {
		let row: Option<ChannelRow> = sqlx::query_as("SELECT id, name, topic FROM channels WHERE name = ?")
			.bind(name)
			.fetch_optional(&self.pool)
			.await
			.context("select channel by name (sqlite)")?;
		Ok(row.map(channel_from_row))
	}

	async fn channel_by_id(&self, id: ChannelId) -> anyhow::Result<Option<Channel>> {
		let row: Option<ChannelRow> = sqlx::query_as("SELECT id, name, topic FROM channels WHERE id = ?")
			.bind(id.get())
			.fetch_optional(&self.pool)
			.await
			.context("select channel by id (sqlite)")?;
		Ok(row.map(channel_from_row))
	}

	async fn create_channel(&self, name: &str) -> anyhow::Result<Channel> {
		sqlx::query("INSERT INTO channels (name, topic) VALUES (?, '') ON CONFLICT(name) DO NOTHING")
			.bind(name)
			.execute(&self.pool)
			.await
			.context("insert channel (sqlite)")?;

		self.channel_by_name(name)
			.await?
			.ok_or_else(|| anyhow!("channel {name} missing after insert"))
	}

	async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
		let rows: Vec<ChannelRow> = sqlx::query_as("SELECT id, name, topic FROM channels ORDER BY name")
			.fetch_all(&self.pool)
			.await
			.context("list channels (sqlite)")?;
		Ok(rows.into_iter().map(channel_from_row).collect())
	}

	async fn set_topic(&self, channel: ChannelId, topic: &str) -> anyhow::Result<()> {
		let result = sqlx::query("UPDATE channels SET topic = ? WHERE id = ?")
			.bind(topic)
			.bind(channel.get())
			.execute(&self.pool)
			.await
			.context("update topic (sqlite)")?;
		if result.rows_affected() == 0 {
			return Err(anyhow!("channel {channel} does not exist"));
		}
		Ok(())
	}

	async fn delete_channel(&self, channel: ChannelId) -> anyhow::Result<()> {
		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;
		for stmt in [
			"DELETE FROM ops WHERE channel_id = ?",
			"DELETE FROM messages WHERE channel_id = ?",
			"DELETE FROM channels WHERE id = ?",
		] {
			sqlx::query(stmt)
				.bind(channel.get())
				.execute(&mut *tx)
				.await
				.with_context(|| format!("delete channel {channel} (sqlite)"))?;
		}
		tx.commit().await.context("commit sqlite tx")?;
		Ok(())
	}

	async fn grant_operator(&self, user: UserId, channel: ChannelId, granted_by: UserId) -> anyhow::Result<()> {
		sqlx::query(
			"INSERT INTO ops (user_id, channel_id, granted_by_user_id) VALUES (?, ?, ?) \
			ON CONFLICT(user_id, channel_id) DO UPDATE SET granted_by_user_id = excluded.granted_by_user_id",
		)
		.bind(user.get())
		.bind(channel.get())
		.bind(granted_by.get())
		.execute(&self.pool)
		.await
		.context("grant operator (sqlite)")?;
		Ok(())
	}

	async fn revoke_operator(&self, user: UserId, channel: ChannelId) -> anyhow::Result<()> {
		sqlx::query("DELETE FROM ops WHERE user_id = ? AND channel_id = ?")
			.bind(user.get())
			.bind(channel.get())
			.execute(&self.pool)
			.await
			.context("revoke operator (sqlite)")?;
		Ok(())
	}

	async fn is_operator(&self, user: UserId, channel: ChannelId) -> anyhow::Result<bool> {
		let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ops WHERE user_id = ? AND channel_id = ?")
			.bind(user.get())
			.bind(channel.get())
			.fetch_one(&self.pool)
			.await
			.context("check operator (sqlite)")?;
		Ok(count > 0)
	}

	async fn operators(&self, channel: ChannelId) -> anyhow::Result<Vec<UserId>> {
		let rows: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM ops WHERE channel_id = ? ORDER BY user_id")
			.bind(channel.get())
			.fetch_all(&self.pool)
			.await
			.context("list operators (sqlite)")?;
		Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
	}

	async fn create_or_fetch_user(&self, nickname: &str) -> anyhow::Result<User> {
		sqlx::query("INSERT INTO users (nickname) VALUES (?) ON CONFLICT(nickname) DO NOTHING")
			.bind(nickname)
			.execute(&self.pool)
			.await
			.context("insert user (sqlite)")?;

		self.user_by_nickname(nickname)
			.await?
			.ok_or_else(|| anyhow!("user {nickname} missing after insert"))
	}

	async fn user_by_id(&self, id: UserId) -> anyhow::Result<Option<User>> {
		let row: Option<UserRow> = sqlx::query_as("SELECT id, nickname, is_serv FROM users WHERE id = ?")
			.bind(id.get())
			.fetch_optional(&self.pool)
			.await
			.context("select user by id (sqlite)")?;
		Ok(row.map(user_from_row))
	}

	async fn user_by_nickname(&self, nickname: &str) -> anyhow::Result<Option<User>> {
		let row: Option<UserRow> = sqlx::query_as("SELECT id, nickname, is_serv FROM users WHERE nickname = ?")
			.bind(nickname)
			.fetch_optional(&self.pool)
			.await
			.context("select user by nickname (sqlite)")?;
		Ok(row.map(user_from_row))
	}

	async fn rename_user(&self, id: UserId, nickname: &str) -> anyhow::Result<()> {
		let result = sqlx::query("UPDATE users SET nickname = ? WHERE id = ?")
			.bind(nickname)
			.bind(id.get())
			.execute(&self.pool)
			.await
			.context("rename user (sqlite)")?;
		if result.rows_affected() == 0 {
			return Err(anyhow!("user {id} does not exist"));
		}
		Ok(())
	}

	async fn mark_service_account(&self, nickname: &str) -> anyhow::Result<User> {
		sqlx::query(
			"INSERT INTO users (nickname, is_serv) VALUES (?, 1) \
			ON CONFLICT(nickname) DO UPDATE SET is_serv = 1",
		)
		.bind(nickname)
		.execute(&self.pool)
		.await
		.context("mark service account (sqlite)")?;

		self.user_by_nickname(nickname)
			.await?
			.ok_or_else(|| anyhow!("user {nickname} missing after upsert"))
	}
}
