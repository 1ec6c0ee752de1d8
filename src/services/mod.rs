pub mod attachment_service;
pub mod conversation_service;
pub mod message_service;
pub mod presence;
pub mod relationship_service;

pub use attachment_service::{AttachmentPolicy, AttachmentService, StoredAttachment};
pub use conversation_service::ConversationService;
pub use message_service::{HistorySelector, MessageService, RecentConversation};
pub use presence::PresenceRegistry;
pub use relationship_service::RelationshipService;

use crate::error::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run one I/O step with an upper bound. Expiry surfaces as `AppError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(step = what, limit_ms = limit.as_millis() as u64, "I/O step timed out");
            Err(AppError::Timeout(what.to_string()))
        }
    }
}

/// Run a side-effecting step on its own task with an upper bound.
///
/// Unlike [`bounded`] the step is never cancelled midway: on expiry the
/// still-running task is handed back as `Err` so the caller can settle
/// whatever it ends up doing.
pub async fn bounded_task<T, F>(
    limit: Duration,
    what: &str,
    fut: F,
) -> Result<AppResult<T>, JoinHandle<AppResult<T>>>
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    let mut task = tokio::spawn(fut);
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => {
            tracing::error!(step = what, error = %e, "I/O task failed");
            Ok(Err(AppError::Internal))
        }
        Err(_) => {
            tracing::warn!(step = what, limit_ms = limit.as_millis() as u64, "I/O step timed out, still running");
            Err(task)
        }
    }
}
