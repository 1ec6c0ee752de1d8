use crate::error::{AppError, AppResult};
use crate::models::UserId;
use crate::store::UserStore;
use std::sync::Arc;

/// Block and star lists of a user
#[derive(Clone)]
pub struct RelationshipService {
    users: Arc<dyn UserStore>,
}

impl RelationshipService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    fn reject_self(owner: UserId, target: UserId) -> AppResult<()> {
        if owner == target {
            return Err(AppError::BadRequest("cannot target yourself".into()));
        }
        Ok(())
    }

    pub async fn block(&self, owner: UserId, target: UserId) -> AppResult<()> {
        Self::reject_self(owner, target)?;
        self.users.block(owner, target).await?;
        tracing::info!(owner = %owner, target = %target, "user blocked");
        Ok(())
    }

    pub async fn unblock(&self, owner: UserId, target: UserId) -> AppResult<()> {
        Self::reject_self(owner, target)?;
        self.users.unblock(owner, target).await?;
        tracing::info!(owner = %owner, target = %target, "user unblocked");
        Ok(())
    }

    pub async fn star(&self, owner: UserId, target: UserId) -> AppResult<()> {
        Self::reject_self(owner, target)?;
        self.users.star(owner, target).await
    }

    pub async fn unstar(&self, owner: UserId, target: UserId) -> AppResult<()> {
        Self::reject_self(owner, target)?;
        self.users.unstar(owner, target).await
    }

    /// Whether `receiver` has blocked `sender`
    pub async fn is_blocked(&self, receiver: UserId, sender: UserId) -> AppResult<bool> {
        self.users.is_blocked_by(receiver, sender).await
    }
}
