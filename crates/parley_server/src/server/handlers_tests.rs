#![forbid(unsafe_code)]

use parley_domain::{ChannelId, EventId, EventKind, SYSTEM_USER_ID, UserId};
use parley_protocol::{EventFrame, MessageFrame, ServerFrame};
use serde_json::json;

use crate::server::test_support::{TestClient, context};
use crate::store::HistoryQuery;

fn events(frames: &[ServerFrame]) -> Vec<&EventFrame> {
	frames
		.iter()
		.filter_map(|f| match f {
			ServerFrame::Event(ev) => Some(ev),
			_ => None,
		})
		.collect()
}

fn messages(frames: &[ServerFrame]) -> Vec<&MessageFrame> {
	frames
		.iter()
		.filter_map(|f| match f {
			ServerFrame::Message(m) => Some(m),
			_ => None,
		})
		.collect()
}

async fn log_len(ctx: &crate::server::handlers::ServerContext, channel: ChannelId) -> usize {
	ctx.store
		.query_events(channel, HistoryQuery::latest(HistoryQuery::MAX_LIMIT))
		.await
		.expect("query log")
		.records
		.len()
}

#[tokio::test]
async fn login_validates_and_binds_identity() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut other = TestClient::connect(&ctx, 2).await;

	assert_eq!(alice.err(&ctx, "login", json!({"nickname": "  "})).await, "Nickname is required");
	let data = alice.ok(&ctx, "login", json!({"nickname": "alice"})).await;
	assert_eq!(data["nickname"], "alice");
	assert_eq!(data["session_id"], alice.session.token().as_str());
	assert_eq!(alice.err(&ctx, "login", json!({"nickname": "bob"})).await, "Already logged in");

	assert_eq!(
		other.err(&ctx, "login", json!({"nickname": "alice"})).await,
		"Nickname already in use"
	);
	// Claims are exact: neither case nor surrounding whitespace is folded.
	let padded = other.ok(&ctx, "login", json!({"nickname": " alice"})).await;
	assert_eq!(padded["nickname"], " alice");
	assert_ne!(padded["user_id"], data["user_id"]);
	let mut third = TestClient::connect(&ctx, 3).await;
	third.login(&ctx, "Alice").await;
}

#[tokio::test]
async fn durable_user_is_reused_after_logout() {
	let ctx = context();
	let mut client = TestClient::connect(&ctx, 1).await;
	let first = client.login(&ctx, "alice").await;
	let data = client.ok(&ctx, "logout", json!({})).await;
	assert_eq!(data, json!({"message": "Logged out successfully"}));
	assert_eq!(client.err(&ctx, "logout", json!({})).await, "Not logged in");
	assert_eq!(client.login(&ctx, "alice").await, first);
}

#[tokio::test]
async fn alice_and_bob_join_the_same_channel() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	let alice_id = alice.login(&ctx, "alice").await;
	let bob_id = bob.login(&ctx, "bob").await;

	let data = alice.ok(&ctx, "join", json!({"channel_name": "General"})).await;
	assert_eq!(data["channel_name"], "#general");
	let channel = ChannelId(data["channel_id"].as_i64().expect("channel_id"));
	assert!(ctx.store.is_operator(alice_id, channel).await.expect("is_operator"));
	alice.drain();

	assert_eq!(bob.join(&ctx, "#general").await, channel);
	assert!(!ctx.store.is_operator(bob_id, channel).await.expect("is_operator"));

	let seen_by_alice = alice.drain();
	let joined = events(&seen_by_alice);
	assert_eq!(joined.len(), 1);
	assert_eq!(joined[0].event, EventKind::Joined);
	assert_eq!(joined[0].user_id, bob_id);

	// Bob sees the live join first, then the replay (alice's join, then bob's).
	let seen_by_bob = bob.drain();
	let replay: Vec<_> = events(&seen_by_bob).iter().map(|e| e.user_id).collect();
	assert_eq!(replay, vec![bob_id, alice_id, bob_id]);

	assert_eq!(bob.err(&ctx, "join", json!({"channel_id": channel})).await, "Already in channel");

	let users = alice.ok(&ctx, "channel_users", json!({"channel_id": channel})).await;
	assert_eq!(
		users["users"],
		json!([
			{"id": alice_id, "nickname": "alice", "is_serv": false, "is_op": true},
			{"id": bob_id, "nickname": "bob", "is_serv": false, "is_op": false},
		])
	);

	let listed = bob.ok(&ctx, "list_channels", json!({})).await;
	assert_eq!(listed["channels"][0]["user_count"], 2);
}

#[tokio::test]
async fn join_validation_errors() {
	let ctx = context();
	let mut client = TestClient::connect(&ctx, 1).await;
	assert_eq!(
		client.err(&ctx, "join", json!({"channel_name": "x"})).await,
		"Must be logged in to join channels"
	);
	client.login(&ctx, "carol").await;
	assert_eq!(client.err(&ctx, "join", json!({})).await, "Channel name or ID required");
	assert_eq!(
		client.err(&ctx, "join", json!({"channel_name": "bad name!"})).await,
		"channel name can only contain alphanumeric characters, dashes, and underscores"
	);
	assert_eq!(
		client.err(&ctx, "join", json!({"channel_name": "a".repeat(60)})).await,
		"channel name cannot exceed 49 characters"
	);
	assert_eq!(client.err(&ctx, "join", json!({"channel_id": 42})).await, "Channel not found");
}

#[tokio::test]
async fn messages_fan_out_to_members_including_sender() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	let mut outsider = TestClient::connect(&ctx, 3).await;
	alice.login(&ctx, "alice").await;
	bob.login(&ctx, "bob").await;
	outsider.login(&ctx, "dave").await;
	let channel = alice.join(&ctx, "lobby").await;
	bob.join(&ctx, "lobby").await;
	alice.drain();
	bob.drain();

	let resp = alice.call(&ctx, "message", json!({"channel_id": channel, "message": "hello"})).await;
	assert!(resp.okay);
	assert_eq!(resp.data, None);
	alice.ok(&ctx, "me", json!({"channel_id": channel, "message": "waves"})).await;

	for frames in [alice.drain(), bob.drain()] {
		let msgs = messages(&frames);
		assert_eq!(msgs.len(), 2);
		assert_eq!(msgs[0].message, "hello");
		assert!(!msgs[0].is_passive);
		assert_eq!(msgs[1].message, "waves");
		assert!(msgs[1].is_passive);
	}
	assert!(outsider.drain().is_empty());

	assert_eq!(
		outsider.err(&ctx, "message", json!({"channel_id": channel, "message": "hi"})).await,
		"Not in channel"
	);
	assert_eq!(
		alice.err(&ctx, "message", json!({"channel_id": channel, "message": "   "})).await,
		"Message cannot be empty"
	);
	assert_eq!(
		alice.err(&ctx, "message", json!({"channel_id": 0, "message": "hi"})).await,
		"Channel not found"
	);
}

#[tokio::test]
async fn kick_removes_target_and_notifies_both_sides() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	alice.login(&ctx, "alice").await;
	let bob_id = bob.login(&ctx, "bob").await;
	let channel = alice.join(&ctx, "ops").await;
	bob.join(&ctx, "ops").await;
	alice.drain();
	bob.drain();

	let data = alice
		.ok(&ctx, "kick", json!({"user_id": bob_id, "channel_id": channel, "reason": "spam"}))
		.await;
	assert_eq!(data, json!({"user_id": bob_id, "channel_id": channel, "reason": "spam"}));

	for frames in [alice.drain(), bob.drain()] {
		let kicked = events(&frames);
		assert_eq!(kicked.len(), 1);
		assert_eq!(kicked[0].event, EventKind::Kicked);
		assert_eq!(kicked[0].nickname, "bob");
		assert_eq!(kicked[0].message.as_deref(), Some("spam"));
	}

	assert!(!bob.session.is_subscribed(channel).await);
	assert_eq!(
		bob.err(&ctx, "message", json!({"channel_id": channel, "message": "hey"})).await,
		"Not in channel"
	);
	let mut carol = TestClient::connect(&ctx, 3).await;
	let carol_id = carol.login(&ctx, "carol").await;
	assert_eq!(
		alice.err(&ctx, "kick", json!({"user_id": carol_id, "channel_id": channel})).await,
		"User is not in the channel"
	);

	// The log still counts bob as joined, but no session of bob holds the subscription.
	assert_eq!(
		alice.err(&ctx, "kick", json!({"user_id": bob_id, "channel_id": channel})).await,
		"User is not in the channel"
	);
	let kicks = ctx
		.store
		.query_events(channel, HistoryQuery::latest(HistoryQuery::MAX_LIMIT))
		.await
		.expect("query log")
		.records
		.into_iter()
		.filter(|r| r.kind == EventKind::Kicked)
		.count();
	assert_eq!(kicks, 1);
	assert!(events(&alice.drain()).is_empty());
}

#[tokio::test]
async fn kick_target_rules() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let alice_id = alice.login(&ctx, "alice").await;
	let channel = alice.join(&ctx, "rules").await;

	assert_eq!(alice.err(&ctx, "kick", json!({"channel_id": channel})).await, "User ID is required");
	assert_eq!(alice.err(&ctx, "kick", json!({"user_id": 5})).await, "Channel ID is required");
	assert_eq!(
		alice.err(&ctx, "kick", json!({"user_id": 999, "channel_id": channel})).await,
		"Target user not found"
	);
	assert_eq!(
		alice
			.err(&ctx, "kick", json!({"user_id": SYSTEM_USER_ID, "channel_id": channel}))
			.await,
		"Cannot kick service users"
	);
	assert_eq!(
		alice.err(&ctx, "kick", json!({"user_id": alice_id, "channel_id": channel})).await,
		"Cannot kick yourself"
	);
}

#[tokio::test]
async fn non_operators_are_rejected_without_side_effects() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	let alice_id = alice.login(&ctx, "alice").await;
	bob.login(&ctx, "bob").await;
	let channel = alice.join(&ctx, "mods").await;
	bob.join(&ctx, "mods").await;
	let before = log_len(&ctx, channel).await;

	assert_eq!(
		bob.err(&ctx, "kick", json!({"user_id": alice_id, "channel_id": channel})).await,
		"You must be an operator to kick users"
	);
	assert_eq!(
		bob.err(&ctx, "topic", json!({"channel_id": channel, "topic": "mine"})).await,
		"You must be an operator to change the channel topic"
	);
	assert_eq!(
		bob.err(&ctx, "announce", json!({"channel_id": channel, "message": "hear ye"})).await,
		"You must be an operator to make channel announcements"
	);
	assert_eq!(
		bob.err(&ctx, "announce", json!({"message": "everyone"})).await,
		"Only service users can make server-wide announcements"
	);

	assert_eq!(log_len(&ctx, channel).await, before);
	assert!(alice.session.is_subscribed(channel).await);
}

#[tokio::test]
async fn topic_changes_are_stored_and_broadcast() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	alice.login(&ctx, "alice").await;
	let channel = alice.join(&ctx, "news").await;
	alice.drain();

	let data = alice.ok(&ctx, "topic", json!({"channel_id": channel, "topic": "Release day"})).await;
	assert_eq!(data, json!({"channel_id": channel, "topic": "Release day"}));
	let stored = ctx.store.channel_by_id(channel).await.expect("lookup").expect("channel");
	assert_eq!(stored.topic, "Release day");

	alice.ok(&ctx, "topic", json!({"channel_id": channel, "topic": ""})).await;
	let frames = alice.drain();
	let topics: Vec<_> = events(&frames).iter().map(|e| e.topic.clone()).collect();
	assert_eq!(
		topics,
		vec![Some("Release day".to_string()), Some("Topic cleared".to_string())]
	);

	assert_eq!(
		alice.err(&ctx, "topic", json!({"channel_id": 77, "topic": "x"})).await,
		"Channel not found"
	);
}

#[tokio::test]
async fn service_accounts_announce_server_wide() {
	let ctx = context();
	let mut service = TestClient::connect(&ctx, 1).await;
	let mut listener = TestClient::connect(&ctx, 2).await;
	let mut anonymous = TestClient::connect(&ctx, 3).await;
	assert_eq!(service.login(&ctx, "ChanServ").await, SYSTEM_USER_ID);
	listener.login(&ctx, "erin").await;

	assert_eq!(
		service.err(&ctx, "announce", json!({"message": " "})).await,
		"Announcement message is required"
	);
	let data = service.ok(&ctx, "announce", json!({"message": "maintenance at noon"})).await;
	assert_eq!(data, json!({"message": "maintenance at noon", "type": "server"}));

	let frames = listener.drain();
	let announced = events(&frames);
	assert_eq!(announced.len(), 1);
	assert_eq!(announced[0].event, EventKind::Announcement);
	assert_eq!(announced[0].channel_id, ChannelId(0));
	assert_eq!(announced[0].message.as_deref(), Some("maintenance at noon"));
	assert!(anonymous.drain().is_empty());
}

#[tokio::test]
async fn history_pages_backwards_and_forwards() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	alice.login(&ctx, "alice").await;
	let channel = alice.join(&ctx, "archive").await;
	for i in 0..9 {
		alice
			.ok(&ctx, "message", json!({"channel_id": channel, "message": format!("m{i}")}))
			.await;
	}

	// Log: joined + m0..m8. Newest page first.
	let page = alice.ok(&ctx, "get_history", json!({"channel_id": channel, "limit": 4})).await;
	assert_eq!(page["has_more"], true);
	let texts: Vec<_> = page["messages"].as_array().expect("messages").iter().map(|m| m["message"].clone()).collect();
	assert_eq!(texts, vec![json!("m5"), json!("m6"), json!("m7"), json!("m8")]);

	let oldest = page["messages"][0]["id"].as_i64().expect("id");
	let older = alice
		.ok(&ctx, "get_history", json!({"channel_id": channel, "limit": 4, "before": oldest}))
		.await;
	let texts: Vec<_> = older["messages"].as_array().expect("messages").iter().map(|m| m["message"].clone()).collect();
	assert_eq!(texts, vec![json!("m1"), json!("m2"), json!("m3"), json!("m4")]);
	assert_eq!(older["has_more"], true);

	let first = older["messages"][0]["id"].as_i64().expect("id");
	let oldest_page = alice
		.ok(&ctx, "get_history", json!({"channel_id": channel, "limit": 4, "before": first}))
		.await;
	assert_eq!(oldest_page["messages"].as_array().expect("messages").len(), 2);
	assert_eq!(oldest_page["messages"][0]["event"], "joined");
	assert_eq!(oldest_page["has_more"], false);

	// And back again from the oldest record.
	let forward = alice
		.ok(&ctx, "get_history", json!({"channel_id": channel, "limit": 4, "after": oldest_page["messages"][0]["id"]}))
		.await;
	let texts: Vec<_> = forward["messages"].as_array().expect("messages").iter().map(|m| m["message"].clone()).collect();
	assert_eq!(texts, vec![json!("m0"), json!("m1"), json!("m2"), json!("m3")]);
	assert_eq!(forward["has_more"], true);

	let between = alice
		.ok(&ctx, "get_history", json!({"channel_id": channel, "after": first, "before": oldest}))
		.await;
	assert_eq!(between["messages"].as_array().expect("messages").len(), 3);
	assert_eq!(between["has_more"], false);
}

#[tokio::test]
async fn history_requires_membership() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	assert_eq!(
		bob.err(&ctx, "get_history", json!({"channel_id": 1})).await,
		"Must be logged in to get message history"
	);
	alice.login(&ctx, "alice").await;
	bob.login(&ctx, "bob").await;
	let channel = alice.join(&ctx, "private").await;
	assert_eq!(
		bob.err(&ctx, "get_history", json!({"channel_id": channel})).await,
		"You must be in the channel to view its history"
	);
}

#[tokio::test]
async fn leave_records_one_event_and_deletes_vacant_channels() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	let alice_id = alice.login(&ctx, "alice").await;
	bob.login(&ctx, "bob").await;
	let channel = alice.join(&ctx, "temp").await;
	bob.join(&ctx, "temp").await;
	bob.drain();

	let data = alice.ok(&ctx, "leave", json!({"channel_name": "TEMP"})).await;
	assert_eq!(data, json!({"channel_id": channel, "channel_name": "#temp"}));
	assert!(!ctx.store.is_operator(alice_id, channel).await.expect("is_operator"));

	let frames = bob.drain();
	let left = events(&frames);
	assert_eq!(left.len(), 1);
	assert_eq!(left[0].event, EventKind::Left);
	assert_eq!(left[0].message.as_deref(), Some("left"));

	assert_eq!(alice.err(&ctx, "leave", json!({"channel_id": channel})).await, "Not in channel");
	assert_eq!(alice.err(&ctx, "leave", json!({})).await, "Channel name or ID required");

	bob.ok(&ctx, "leave", json!({"channel_id": channel, "reason": "bye"})).await;
	assert!(ctx.store.channel_by_id(channel).await.expect("lookup").is_none());
}

#[tokio::test]
async fn first_joiner_of_a_recreated_channel_is_operator_again() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	alice.login(&ctx, "alice").await;
	let bob_id = bob.login(&ctx, "bob").await;

	let channel = alice.join(&ctx, "cycle").await;
	alice.ok(&ctx, "leave", json!({"channel_id": channel})).await;

	let again = bob.join(&ctx, "cycle").await;
	assert!(ctx.store.is_operator(bob_id, again).await.expect("is_operator"));
}

#[tokio::test]
async fn nick_change_rebinds_and_broadcasts() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	let alice_id = alice.login(&ctx, "alice").await;
	bob.login(&ctx, "bob").await;
	alice.join(&ctx, "chat").await;
	bob.join(&ctx, "chat").await;
	bob.drain();

	assert_eq!(
		alice.err(&ctx, "nick", json!({"new_nickname": "alice"})).await,
		"New nickname must be different from current nickname"
	);
	assert_eq!(alice.err(&ctx, "nick", json!({"new_nickname": "bob"})).await, "Nickname already in use");
	assert_eq!(alice.err(&ctx, "nick", json!({"new_nickname": ""})).await, "New nickname is required");
	assert_eq!(alice.err(&ctx, "nick", json!({"new_nickname": "  "})).await, "New nickname is required");

	let data = alice.ok(&ctx, "nick", json!({"new_nickname": "alicia"})).await;
	assert_eq!(
		data,
		json!({"user_id": alice_id, "old_nickname": "alice", "new_nickname": "alicia"})
	);
	assert_eq!(alice.session.identity().await.expect("identity").nickname, "alicia");

	let frames = bob.drain();
	let changed = events(&frames);
	assert_eq!(changed.len(), 1);
	assert_eq!(changed[0].event, EventKind::NickChange);
	assert_eq!(changed[0].nickname, "alicia");

	// The durable record of another user still blocks the name.
	bob.ok(&ctx, "logout", json!({})).await;
	assert_eq!(
		alice.err(&ctx, "nick", json!({"new_nickname": "bob"})).await,
		"Nickname already in use"
	);
}

#[tokio::test]
async fn session_info_and_my_channels_reflect_subscriptions() {
	let ctx = context();
	let mut client = TestClient::connect(&ctx, 1).await;
	let anon = client.ok(&ctx, "session_info", json!({})).await;
	assert_eq!(anon["user_id"], serde_json::Value::Null);
	assert_eq!(anon["channels"], json!([]));
	assert_eq!(
		client.err(&ctx, "my_channels", json!({})).await,
		"Must be logged in to list your channels"
	);

	let user = client.login(&ctx, "frank").await;
	let a = client.join(&ctx, "a").await;
	let b = client.join(&ctx, "b").await;

	let info = client.ok(&ctx, "session_info", json!({})).await;
	assert_eq!(info["user_id"], json!(user));
	assert_eq!(info["nickname"], "frank");
	assert_eq!(
		info["channels"],
		json!([{"id": a, "name": "#a", "topic": ""}, {"id": b, "name": "#b", "topic": ""}])
	);

	let mine = client.ok(&ctx, "my_channels", json!({})).await;
	assert_eq!(mine["channels"].as_array().expect("channels").len(), 2);
	assert_eq!(mine["channels"][0]["user_count"], 1);

	let beat = client.ok(&ctx, "heartbeat", json!({})).await;
	assert!(beat["timestamp"].as_i64().expect("timestamp") > 1_600_000_000);
}

#[tokio::test]
async fn dispatcher_framing_errors() {
	let ctx = context();
	let mut client = TestClient::connect(&ctx, 1).await;

	let unknown = client.dispatch_raw(&ctx, r#"{"cmd":"shutdown","req_id":"x1"}"#).await;
	assert_eq!(unknown.response.req_id, "x1");
	assert_eq!(unknown.response.error.as_deref(), Some("Unknown command"));
	assert!(!unknown.terminate);

	let missing = client.dispatch_raw(&ctx, r#"{"req_id":"x2"}"#).await;
	assert_eq!(missing.response.error.as_deref(), Some("Unknown command"));
	assert!(!missing.terminate);

	let garbage = client.dispatch_raw(&ctx, "not json").await;
	assert_eq!(garbage.response.req_id, "");
	assert_eq!(garbage.response.error.as_deref(), Some("Invalid JSON"));
	assert!(garbage.terminate);

	let bad_payload = client
		.dispatch_raw(&ctx, r#"{"cmd":"join","req_id":"x3","channel_id":"general"}"#)
		.await;
	assert_eq!(bad_payload.response.req_id, "x3");
	assert_eq!(bad_payload.response.error.as_deref(), Some("Invalid request format"));
	assert!(bad_payload.terminate);

	let quit = client.dispatch_raw(&ctx, r#"{"cmd":"quit","req_id":"x4"}"#).await;
	assert!(quit.response.okay);
	assert_eq!(quit.response.data, Some(json!({"message": "Goodbye!"})));
	assert!(quit.terminate);
}

#[tokio::test]
async fn quit_leaves_every_channel_once() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	let mut bob = TestClient::connect(&ctx, 2).await;
	let alice_id = alice.login(&ctx, "alice").await;
	bob.login(&ctx, "bob").await;
	let one = alice.join(&ctx, "one").await;
	let two = alice.join(&ctx, "two").await;
	bob.join(&ctx, "one").await;
	bob.join(&ctx, "two").await;
	bob.drain();

	let outcome = alice.dispatch_raw(&ctx, r#"{"cmd":"quit","req_id":"q","dying_message":"later"}"#).await;
	assert!(outcome.terminate);

	let frames = bob.drain();
	let left = events(&frames);
	assert_eq!(left.len(), 2);
	assert!(left.iter().all(|e| e.event == EventKind::Left && e.user_id == alice_id));
	assert!(left.iter().all(|e| e.message.as_deref() == Some("later")));
	assert_eq!(
		left.iter().map(|e| e.channel_id).collect::<Vec<_>>(),
		vec![one, two]
	);

	for channel in [one, two] {
		let ledger = ctx.store.channel_presence(channel).await.expect("presence");
		assert!(!ledger.is_present(alice_id));
	}
}

#[tokio::test]
async fn history_records_carry_ids() {
	let ctx = context();
	let mut alice = TestClient::connect(&ctx, 1).await;
	alice.login(&ctx, "alice").await;
	let channel = alice.join(&ctx, "ids").await;
	let page = alice.ok(&ctx, "get_history", json!({"channel_id": channel})).await;
	let record = ctx
		.store
		.query_events(channel, HistoryQuery::latest(1))
		.await
		.expect("query")
		.records
		.remove(0);
	assert_eq!(page["messages"][0]["id"], json!(record.id));
	assert_eq!(record.id, EventId(page["messages"][0]["id"].as_i64().expect("id")));
	assert_eq!(record.user_id, UserId(page["messages"][0]["user_id"].as_i64().expect("user_id")));
}
