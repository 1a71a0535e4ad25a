//! Middleware for the portal.
//!
//! # Components
//!
//! - `readiness` - Blocks traffic until the identity provider has answered

pub mod readiness;

pub use readiness::{wait_for_identity_provider, ReadinessConfig, ReadinessGate};
