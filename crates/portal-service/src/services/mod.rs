//! Service layer for the portal.
//!
//! This module contains services that talk to the identity provider and the
//! downstream API.
//!
//! # Components
//!
//! - `discovery` - Cached OpenID Connect discovery document
//! - `token_renewal` - Access-token renewal for stored sessions
//! - `api_client` - HTTP client for the downstream protected API

pub mod api_client;
pub mod discovery;
pub mod token_renewal;

pub use api_client::{ApiClient, ApiData};
pub use discovery::{DiscoveryClient, DiscoveryDocument};
pub use token_renewal::{FreshAccessToken, TokenRenewalService};
