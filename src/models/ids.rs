//! Typed identifiers. Every id is a UUID; parsing failures surface as
//! `AppError::InvalidId` rather than an empty result.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(raw: &str) -> AppResult<Self> {
                Uuid::parse_str(raw.trim())
                    .map(Self)
                    .map_err(|_| AppError::InvalidId(format!("{} id {:?}", $what, raw)))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identity issued by the auth collaborator
    UserId,
    "user"
);
uuid_id!(ConversationId, "conversation");
uuid_id!(MessageId, "message");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_malformed() {
        let err = ConversationId::parse("room-1").unwrap_err();
        assert!(matches!(err, AppError::InvalidId(ref m) if m.contains("conversation")));
    }

    #[test]
    fn test_parse_trims_and_displays() {
        let id = UserId::random();
        let parsed = UserId::parse(&format!(" {id} ")).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.to_string(), id.0.to_string());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = MessageId::random();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }
}
