//! # Portal Test Utilities
//!
//! Shared test utilities for the portal service.
//!
//! This crate provides:
//! - Server test harness (`TestPortalServer` for E2E tests)
//! - Mock identity provider and downstream API (`MockIdentityProvider`)
//! - Token fixtures (`jwt_expiring_in`, `signed_in_ticket`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portal_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let idp = MockIdentityProvider::start().await;
//!     idp.mount_discovery().await;
//!     let server = TestPortalServer::spawn(&idp).await?;
//!
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod mock_idp;
pub mod server_harness;
pub mod token_fixtures;

// Re-export commonly used items
pub use mock_idp::*;
pub use server_harness::*;
pub use token_fixtures::*;
