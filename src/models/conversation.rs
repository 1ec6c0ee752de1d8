use super::{ConversationId, UserId};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A private (exactly two members) or group conversation.
///
/// `members` is kept sorted and de-duplicated so membership checks can
/// binary search and two records for the same set compare equal.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub members: Vec<UserId>,
    #[serde(skip)]
    pub canonical_key: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.binary_search(user).is_ok()
    }

    /// The other participant of a private conversation
    pub fn peer_of(&self, user: &UserId) -> Option<UserId> {
        if self.is_group || !self.is_member(user) {
            return None;
        }
        self.members.iter().copied().find(|m| m != user)
    }
}

/// Input to the storage upsert. Only constructible through the validating
/// constructors below, so the canonical key always matches the member set.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDraft {
    canonical_key: String,
    is_group: bool,
    name: Option<String>,
    members: Vec<UserId>,
}

impl ConversationDraft {
    pub fn private(a: UserId, b: UserId) -> AppResult<Self> {
        if a == b {
            return Err(AppError::InvalidMembership(
                "a private conversation needs two distinct users".into(),
            ));
        }
        let members = if a < b { vec![a, b] } else { vec![b, a] };
        Ok(Self {
            canonical_key: private_key(&a, &b),
            is_group: false,
            name: None,
            members,
        })
    }

    pub fn group(
        members: impl IntoIterator<Item = UserId>,
        name: Option<String>,
    ) -> AppResult<Self> {
        let mut members: Vec<UserId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        if members.len() < 2 {
            return Err(AppError::InvalidMembership(format!(
                "a group needs at least 2 distinct members, got {}",
                members.len()
            )));
        }
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(Self {
            canonical_key: group_key(&members),
            is_group: true,
            name,
            members,
        })
    }

    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    pub fn is_group(&self) -> bool {
        self.is_group
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn members(&self) -> &[UserId] {
        &self.members
    }

    /// Materialize a new record from this draft
    pub fn into_conversation(self, id: ConversationId, created_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id,
            is_group: self.is_group,
            name: self.name,
            members: self.members,
            canonical_key: self.canonical_key,
            created_at,
        }
    }
}

/// Order-independent key of a user pair
pub fn private_key(a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    format!("dm:{lo}:{hi}")
}

/// Key of a group member set. `members` must be sorted and de-duplicated.
pub fn group_key(members: &[UserId]) -> String {
    let joined = members
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let digest = Sha256::digest(joined.as_bytes());
    format!("group:{}", hex::encode(digest))
}
