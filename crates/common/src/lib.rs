//! Common utilities and types shared across Portal components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for reading token validity windows out of JWTs
pub mod jwt;

/// Module for access-token lifetime bookkeeping and the refresh-token grant
pub mod token_lifecycle;
