pub mod conversation;
pub mod ids;
pub mod message;
pub mod user;

pub use conversation::{Conversation, ConversationDraft};
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{Addressing, Attachment, Message, MessageDraft, MessagePayload};
pub use user::{Presence, User};
