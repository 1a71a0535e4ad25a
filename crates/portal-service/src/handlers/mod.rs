//! HTTP request handlers for the portal.

pub mod data;
pub mod health;
pub mod metrics;
pub mod session;

pub use data::get_data;
pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use session::{get_session, logout};
