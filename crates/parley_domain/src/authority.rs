#![forbid(unsafe_code)]

//! Who may act in a channel.

use thiserror::Error;

use crate::UserId;

/// Actions restricted to channel operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeratedAction {
	Kick,
	Topic,
	ChannelAnnouncement,
}

/// Authority check failures. Display texts are sent to clients verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityError {
	#[error("You must be an operator to kick users")]
	KickRequiresOperator,
	#[error("You must be an operator to change the channel topic")]
	TopicRequiresOperator,
	#[error("You must be an operator to make channel announcements")]
	AnnouncementRequiresOperator,
	#[error("Only service users can make server-wide announcements")]
	ServerAnnouncementRequiresService,
	#[error("Cannot kick service users")]
	CannotKickService,
	#[error("Cannot kick yourself")]
	CannotKickSelf,
}

pub fn require_operator(action: ModeratedAction, is_operator: bool) -> Result<(), AuthorityError> {
	if is_operator {
		return Ok(());
	}
	Err(match action {
		ModeratedAction::Kick => AuthorityError::KickRequiresOperator,
		ModeratedAction::Topic => AuthorityError::TopicRequiresOperator,
		ModeratedAction::ChannelAnnouncement => AuthorityError::AnnouncementRequiresOperator,
	})
}

pub fn require_service_account(is_service: bool) -> Result<(), AuthorityError> {
	if is_service {
		Ok(())
	} else {
		Err(AuthorityError::ServerAnnouncementRequiresService)
	}
}

/// Service accounts are checked before self-targeting.
pub fn check_kick_target(actor: UserId, target: UserId, target_is_service: bool) -> Result<(), AuthorityError> {
	if target_is_service {
		return Err(AuthorityError::CannotKickService);
	}
	if actor == target {
		return Err(AuthorityError::CannotKickSelf);
	}
	Ok(())
}

/// The first user into a vacant channel is made operator.
pub fn grants_operator_on_join(occupancy_before: usize) -> bool {
	occupancy_before == 0
}
