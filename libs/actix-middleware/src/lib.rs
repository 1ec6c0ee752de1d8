//! # Actix Middleware Library
//!
//! Middleware shared by the chat core's HTTP surface
//!
//! ## Modules
//! - `jwt_auth`: bearer-token verification and the `AuthenticatedUser` extractor
//! - `logging`: request id assignment and request/response logging

pub mod jwt_auth;
pub mod logging;

pub use jwt_auth::{AuthenticatedUser, Claims, JwtAuthMiddleware, JwtValidator};
pub use logging::{RequestId, RequestTracing};
