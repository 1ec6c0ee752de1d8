use crate::{
    config::Config,
    error::AppResult,
    models::User,
    services::{
        AttachmentService, ConversationService, MessageService, PresenceRegistry,
        RelationshipService,
    },
    store::Stores,
    websocket::{ConnectionRegistry, Dispatcher},
};
use actix_middleware::JwtValidator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub registry: ConnectionRegistry,
    pub presence: Arc<PresenceRegistry>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub attachments: AttachmentService,
    pub relationships: RelationshipService,
    pub dispatcher: Arc<Dispatcher>,
    /// Verifies live channel handshake tokens
    pub jwt: Arc<JwtValidator>,
}

impl AppState {
    /// Wire every service over one set of stores
    pub fn new(config: Config, stores: Stores) -> Self {
        let io_timeout = config.io_timeout;
        let registry = ConnectionRegistry::new();
        let presence = Arc::new(PresenceRegistry::new(
            stores.users.clone(),
            registry.clone(),
            io_timeout,
        ));
        let conversations = ConversationService::new(stores.conversations.clone(), io_timeout);
        let messages = MessageService::new(
            stores.messages.clone(),
            stores.conversations.clone(),
            io_timeout,
        );
        let attachments = AttachmentService::new(&config.upload, io_timeout);
        let relationships = RelationshipService::new(stores.users.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            presence.clone(),
            stores.users.clone(),
            conversations.clone(),
            messages.clone(),
            attachments.clone(),
            relationships.clone(),
        ));
        let jwt = Arc::new(JwtValidator::from_secret(config.jwt_secret.as_bytes()));

        Self {
            config: Arc::new(config),
            stores,
            registry,
            presence,
            conversations,
            messages,
            attachments,
            relationships,
            dispatcher,
            jwt,
        }
    }

    /// Create the user record for an authenticated caller on first sight
    pub async fn ensure_user(&self, id: crate::models::UserId, username: &str) -> AppResult<User> {
        self.stores.users.upsert_identity(id, username).await
    }
}
