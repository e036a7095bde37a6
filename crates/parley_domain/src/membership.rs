#![forbid(unsafe_code)]

//! Channel presence derived from the event log.
//!
//! A user is present iff their `joined` count exceeds their `left` count. Counting (rather than a
//! flag) makes replays and duplicated records harmless to the occupancy arithmetic.

use std::collections::BTreeMap;

use crate::{ChannelId, EventKind, EventRecord, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
	joined: u64,
	left: u64,
}

impl Tally {
	fn is_present(self) -> bool {
		self.joined > self.left
	}
}

/// Per-user join/leave tallies for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipLedger {
	tallies: BTreeMap<UserId, Tally>,
}

impl MembershipLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fold the records belonging to `channel` into a ledger.
	pub fn from_events<'a>(channel: ChannelId, events: impl IntoIterator<Item = &'a EventRecord>) -> Self {
		let mut ledger = Self::new();
		for ev in events {
			if ev.channel_id == Some(channel) {
				ledger.record(ev.user_id, ev.kind);
			}
		}
		ledger
	}

	/// Apply one record. Kinds other than `joined`/`left` do not affect presence.
	pub fn record(&mut self, user: UserId, kind: EventKind) {
		match kind {
			EventKind::Joined => self.tallies.entry(user).or_default().joined += 1,
			EventKind::Left => self.tallies.entry(user).or_default().left += 1,
			_ => {}
		}
	}

	/// Merge pre-aggregated counts (as produced by a `GROUP BY` query).
	pub fn record_counts(&mut self, user: UserId, joined: u64, left: u64) {
		let tally = self.tallies.entry(user).or_default();
		tally.joined = tally.joined.saturating_add(joined);
		tally.left = tally.left.saturating_add(left);
	}

	pub fn is_present(&self, user: UserId) -> bool {
		self.tallies.get(&user).copied().is_some_and(Tally::is_present)
	}

	/// Number of users currently present.
	pub fn occupancy(&self) -> usize {
		self.tallies.values().filter(|t| t.is_present()).count()
	}

	pub fn is_vacant(&self) -> bool {
		self.occupancy() == 0
	}

	/// Present users in ascending id order.
	pub fn present_users(&self) -> Vec<UserId> {
		self.tallies
			.iter()
			.filter(|(_, t)| t.is_present())
			.map(|(user, _)| *user)
			.collect()
	}
}
