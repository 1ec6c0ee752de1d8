//! Identity guards for HTTP handlers
//! Handlers take a [`User`] argument instead of reading request extensions

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::models::UserId;
use actix_middleware::AuthenticatedUser;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};

/// Represents an authenticated user extracted from JWT claims
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
}

impl User {
    /// Name used when the identity is first materialized
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| format!("user-{}", &self.id.to_string()[..8]))
    }
}

impl FromRequest for User {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let extensions = req.extensions();
        let identity = extensions.get::<AuthenticatedUser>().cloned();

        Box::pin(async move {
            let identity = identity.ok_or(AppError::Unauthorized)?;
            Ok(User {
                id: UserId::from(identity.id),
                username: identity.username,
            })
        })
    }
}
