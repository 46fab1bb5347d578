//! Visibility Policy: who may see a poll.
//!
//! Pure decision over the poll's visibility flag, its owner and the caller. Store-level
//! listing applies the same rule as a query condition (see [`visible_to`]).

use crate::error::PollError;
use crate::identity::Identity;
use crate::orm::polls;
use sea_orm::{ColumnTrait, Condition};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
    RequireAuth,
}

pub fn decide(is_public: bool, owner_id: i32, caller: &Identity) -> Access {
    if is_public {
        return Access::Allow;
    }
    match caller.user_id() {
        None => Access::RequireAuth,
        Some(id) if id == owner_id => Access::Allow,
        Some(_) => Access::Deny,
    }
}

pub fn decide_for(poll: &polls::Model, caller: &Identity) -> Access {
    decide(poll.is_public, poll.owner_id, caller)
}

/// Converts a decision into the failure the caller should see.
pub fn enforce(poll: &polls::Model, caller: &Identity) -> Result<(), PollError> {
    match decide_for(poll, caller) {
        Access::Allow => Ok(()),
        Access::RequireAuth => Err(PollError::AuthRequired {
            poll_id: Some(poll.id),
        }),
        Access::Deny => Err(PollError::AccessDenied(poll.id)),
    }
}

/// Query condition selecting exactly the polls [`decide`] allows for `caller`.
pub fn visible_to(caller: &Identity) -> Condition {
    let public = polls::Column::IsPublic.eq(true);
    match caller.user_id() {
        Some(id) => Condition::any()
            .add(public)
            .add(polls::Column::OwnerId.eq(id)),
        None => Condition::all().add(public),
    }
}
