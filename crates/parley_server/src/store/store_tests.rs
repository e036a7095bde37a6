#![forbid(unsafe_code)]

use parley_domain::{ChannelId, EventKind, SYSTEM_NICKNAME, SYSTEM_USER_ID};

use super::{ChatStore, HistoryQuery, InMemoryStore, NewEvent, SqliteStore};

async fn backends() -> Vec<Box<dyn ChatStore>> {
	vec![
		Box::new(InMemoryStore::new()),
		Box::new(SqliteStore::connect_in_memory().await.expect("sqlite in memory")),
	]
}

fn ids(page: &super::HistoryPage) -> Vec<i64> {
	page.records.iter().map(|r| r.id.get()).collect()
}

#[tokio::test]
async fn users_are_durable_and_seeded_with_the_system_identity() {
	for store in backends().await {
		let label = store.describe();
		let system = store.user_by_id(SYSTEM_USER_ID).await.expect("system user").expect("seeded");
		assert_eq!(system.nickname, SYSTEM_NICKNAME, "{label}");
		assert!(system.is_service, "{label}");

		let alice = store.create_or_fetch_user("alice").await.expect("create");
		assert_ne!(alice.id, SYSTEM_USER_ID, "{label}");
		assert!(!alice.is_service, "{label}");
		assert_eq!(store.create_or_fetch_user("alice").await.expect("fetch").id, alice.id, "{label}");

		store.rename_user(alice.id, "alicia").await.expect("rename");
		assert!(store.user_by_nickname("alice").await.expect("lookup").is_none(), "{label}");
		assert_eq!(
			store.user_by_nickname("alicia").await.expect("lookup").map(|u| u.id),
			Some(alice.id),
			"{label}"
		);

		let bob = store.create_or_fetch_user("bob").await.expect("create");
		assert!(store.rename_user(bob.id, "alicia").await.is_err(), "{label}");

		let svc = store.mark_service_account("HelpServ").await.expect("mark");
		assert!(svc.is_service, "{label}");
		assert_eq!(store.mark_service_account("HelpServ").await.expect("mark again").id, svc.id, "{label}");
	}
}

#[tokio::test]
async fn channels_are_unique_by_name_and_listed_by_name() {
	for store in backends().await {
		let label = store.describe();
		let zed = store.create_channel("zed").await.expect("create");
		let abc = store.create_channel("abc").await.expect("create");
		assert_eq!(store.create_channel("zed").await.expect("again").id, zed.id, "{label}");
		assert_eq!(zed.topic, "", "{label}");

		let names: Vec<String> = store.list_channels().await.expect("list").into_iter().map(|c| c.name).collect();
		assert_eq!(names, vec!["abc".to_string(), "zed".to_string()], "{label}");

		store.set_topic(abc.id, "alphabet").await.expect("topic");
		assert_eq!(
			store.channel_by_id(abc.id).await.expect("lookup").map(|c| c.topic),
			Some("alphabet".to_string()),
			"{label}"
		);
		assert!(store.set_topic(ChannelId(999), "nope").await.is_err(), "{label}");
	}
}

#[tokio::test]
async fn history_pages_newest_first_and_forward_after_a_cursor() {
	for store in backends().await {
		let label = store.describe();
		let user = store.create_or_fetch_user("alice").await.expect("user");
		let room = store.create_channel("room").await.expect("room");
		let other = store.create_channel("other").await.expect("other");

		let mut appended = Vec::new();
		for i in 0..5 {
			let rec = store
				.append_event(NewEvent::new(Some(room.id), user.id, "alice", EventKind::Message, format!("m{i}"), i))
				.await
				.expect("append");
			appended.push(rec.id.get());
		}
		store
			.append_event(NewEvent::new(Some(other.id), user.id, "alice", EventKind::Message, "elsewhere", 9))
			.await
			.expect("append other");

		let latest = store.query_events(room.id, HistoryQuery::new(Some(2), None, None)).await.expect("latest");
		assert_eq!(ids(&latest), appended[3..].to_vec(), "{label}");
		assert!(latest.has_more, "{label}");

		let older = store
			.query_events(room.id, HistoryQuery::new(Some(10), Some(latest.records[0].id), None))
			.await
			.expect("before");
		assert_eq!(ids(&older), appended[..3].to_vec(), "{label}");
		assert!(!older.has_more, "{label}");

		let newer = store
			.query_events(room.id, HistoryQuery::new(Some(2), None, Some(older.records[0].id)))
			.await
			.expect("after");
		assert_eq!(ids(&newer), appended[1..3].to_vec(), "{label}");
		assert!(newer.has_more, "{label}");

		let passive = store
			.append_event(NewEvent::new(Some(room.id), user.id, "alice", EventKind::Message, "waves", 10).passive(true))
			.await
			.expect("append passive");
		let tail = store.query_events(room.id, HistoryQuery::latest(1)).await.expect("tail");
		assert_eq!(tail.records, vec![passive], "{label}");
	}
}

#[tokio::test]
async fn presence_counts_joins_against_leaves_only() {
	for store in backends().await {
		let label = store.describe();
		let alice = store.create_or_fetch_user("alice").await.expect("user");
		let bob = store.create_or_fetch_user("bob").await.expect("user");
		let room = store.create_channel("room").await.expect("room");

		for (user, kind) in [
			(alice.id, EventKind::Joined),
			(bob.id, EventKind::Joined),
			(bob.id, EventKind::Kicked),
			(alice.id, EventKind::Joined),
			(alice.id, EventKind::Left),
		] {
			store
				.append_event(NewEvent::new(Some(room.id), user, "x", kind, "", 0))
				.await
				.expect("append");
		}

		let ledger = store.channel_presence(room.id).await.expect("presence");
		assert!(ledger.is_present(alice.id), "{label}");
		// A kick is not a leave.
		assert!(ledger.is_present(bob.id), "{label}");
		assert_eq!(ledger.occupancy(), 2, "{label}");

		store
			.append_event(NewEvent::new(Some(room.id), bob.id, "bob", EventKind::Left, "", 0))
			.await
			.expect("append");
		store
			.append_event(NewEvent::new(Some(room.id), alice.id, "alice", EventKind::Left, "", 0))
			.await
			.expect("append");
		assert!(store.channel_presence(room.id).await.expect("presence").is_vacant(), "{label}");
	}
}

#[tokio::test]
async fn operator_grants_and_channel_deletion_cascade() {
	for store in backends().await {
		let label = store.describe();
		let alice = store.create_or_fetch_user("alice").await.expect("user");
		let bob = store.create_or_fetch_user("bob").await.expect("user");
		let room = store.create_channel("room").await.expect("room");

		store.grant_operator(bob.id, room.id, SYSTEM_USER_ID).await.expect("grant");
		store.grant_operator(alice.id, room.id, SYSTEM_USER_ID).await.expect("grant");
		store.grant_operator(alice.id, room.id, bob.id).await.expect("regrant");
		assert!(store.is_operator(alice.id, room.id).await.expect("check"), "{label}");
		assert_eq!(store.operators(room.id).await.expect("ops"), vec![alice.id, bob.id], "{label}");

		store.revoke_operator(bob.id, room.id).await.expect("revoke");
		assert!(!store.is_operator(bob.id, room.id).await.expect("check"), "{label}");

		store
			.append_event(NewEvent::new(Some(room.id), alice.id, "alice", EventKind::Joined, "", 0))
			.await
			.expect("append");
		store.delete_channel(room.id).await.expect("delete");

		assert!(store.channel_by_name("room").await.expect("lookup").is_none(), "{label}");
		assert!(store.operators(room.id).await.expect("ops").is_empty(), "{label}");
		assert!(
			store
				.query_events(room.id, HistoryQuery::latest(10))
				.await
				.expect("history")
				.records
				.is_empty(),
			"{label}"
		);

		let recreated = store.create_channel("room").await.expect("recreate");
		assert!(!store.is_operator(alice.id, recreated.id).await.expect("check"), "{label}");
	}
}

#[tokio::test]
async fn server_wide_events_are_not_channel_history() {
	for store in backends().await {
		let label = store.describe();
		let room = store.create_channel("room").await.expect("room");
		let rec = store
			.append_event(NewEvent::new(None, SYSTEM_USER_ID, SYSTEM_NICKNAME, EventKind::Announcement, "maintenance", 0))
			.await
			.expect("append");
		assert_eq!(rec.channel_id, None, "{label}");
		assert!(
			store
				.query_events(room.id, HistoryQuery::latest(10))
				.await
				.expect("history")
				.records
				.is_empty(),
			"{label}"
		);
	}
}
