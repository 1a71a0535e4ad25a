//! Metrics definitions for the portal.
//!
//! All metrics follow Prometheus naming conventions:
//! - `portal_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: bounded by code (success, error, timeout, ...)
//! - `operation`: store, store_exhausted, retrieve, renew, remove

use metrics::counter;

// ============================================================================
// Readiness Gate Metrics
// ============================================================================

/// Record a readiness probe against the identity provider.
///
/// Metric: `portal_readiness_probes_total`
/// Labels: `outcome` (success, error, status, timeout)
pub fn record_readiness_probe(outcome: &'static str) {
    counter!("portal_readiness_probes_total", "outcome" => outcome).increment(1);
}

/// Record a request turned away while the identity provider is not ready.
///
/// Metric: `portal_readiness_rejections_total`
pub fn record_readiness_rejection() {
    counter!("portal_readiness_rejections_total").increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a ticket store operation.
///
/// Metric: `portal_session_operations_total`
/// Labels: `operation`
pub fn record_session_operation(operation: &'static str) {
    counter!("portal_session_operations_total", "operation" => operation).increment(1);
}

// ============================================================================
// Token Renewal Metrics
// ============================================================================

/// Record a token renewal attempt.
///
/// Metric: `portal_token_renewals_total`
/// Labels: `outcome` (success, missing_refresh_token, rejected, error)
pub fn record_token_renewal(outcome: &'static str) {
    counter!("portal_token_renewals_total", "outcome" => outcome).increment(1);
}
