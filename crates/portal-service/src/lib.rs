//! Portal Service Library
//!
//! Backend-for-frontend for an OpenID Connect client. The portal keeps
//! authentication tickets server-side and hands the browser an opaque
//! session cookie, so tokens never reach the browser.
//!
//! - In-memory ticket store keyed by random session keys
//! - Readiness gate that holds traffic until the identity provider answers
//! - Access-token renewal through the refresh-token grant
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/readiness.rs -> handlers/*.rs -> services/*.rs -> session/*.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Identity provider readiness gate
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup
//! - `services` - Discovery, token renewal and the downstream API client
//! - `session` - Tickets, session keys, cookies and the ticket store

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod services;
pub mod session;
