//! Observability for the portal.
//!
//! - `metrics` - Prometheus counters for the gate, session store and renewal

pub mod metrics;
