//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Response headers (`nosniff`, `no-store`)
//!
//! Identity is extracted per handler with [`RequireCaller`] and
//! [`RequireOperator`] rather than by a layer.

pub mod auth;
pub mod request_id;

pub use auth::{RequireCaller, RequireOperator};
pub use request_id::{RequestId, request_id_middleware};
