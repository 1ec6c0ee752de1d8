use super::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub blocked_users: BTreeSet<UserId>,
    pub starred_users: BTreeSet<UserId>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            is_online: false,
            last_seen: None,
            blocked_users: BTreeSet::new(),
            starred_users: BTreeSet::new(),
        }
    }

    pub fn has_blocked(&self, other: &UserId) -> bool {
        self.blocked_users.contains(other)
    }

    pub fn presence(&self) -> Presence {
        Presence {
            user_id: self.id,
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }
}

/// Last-known presence of a user
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
