//! Identity-provider readiness gate.
//!
//! Holds back all gated traffic until the identity provider's discovery
//! endpoint has answered once. After that the gate is permanently open and
//! costs one atomic load per request.
//!
//! While the provider has not answered:
//!
//! - At most one probe is in flight at any time. Requests arriving during a
//!   probe are turned away immediately.
//! - After every probe, success or failure, no new probe starts until the
//!   retry interval has passed. Requests in that window are turned away
//!   without touching the provider.
//! - Turned-away requests get a 503 with `Retry-After: 5`.

use crate::errors::PortalError;
use crate::observability::metrics;
use crate::services::discovery::discovery_url;
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use reqwest::Client;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Default pause between probes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Longest accepted pause between probes.
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// `x-reason` header value on turned-away requests.
pub const UNAVAILABLE_REASON: &str = "Waiting for IdentityServer";

/// `Retry-After` header value on turned-away requests, in seconds.
pub const RETRY_AFTER_SECS: &str = "5";

/// `Cache-Control` header value on turned-away requests.
pub const UNAVAILABLE_CACHE_CONTROL: &str = "no-store,no-cache,max-age=0";

/// Downtime after which probe failures are logged at `warn`.
const WARN_AFTER: Duration = Duration::from_secs(30);

/// Downtime after which probe failures are logged at `error`.
const ERROR_AFTER: Duration = Duration::from_secs(120);

/// Gate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Identity provider authority URL.
    pub authority: String,

    /// Pause after each probe before another may start.
    pub retry_interval: Duration,

    /// Bound on a single probe, independent of the request's own timeout.
    pub probe_timeout: Duration,
}

impl ReadinessConfig {
    /// Settings for `authority` with the default interval and timeout.
    #[must_use]
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Earliest instant the next probe may start.
#[derive(Debug, Default)]
struct ProbeWindow {
    not_before: Option<Instant>,
}

impl ProbeWindow {
    fn is_closed(&self, now: Instant) -> bool {
        self.not_before.is_some_and(|not_before| now < not_before)
    }
}

/// Why a probe did not succeed.
#[derive(Debug)]
enum ProbeFailure {
    Timeout,
    Transport(String),
    Status(u16),
}

impl ProbeFailure {
    fn outcome(&self) -> &'static str {
        match self {
            ProbeFailure::Timeout => "timeout",
            ProbeFailure::Transport(_) => "error",
            ProbeFailure::Status(_) => "status",
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "probe timed out"),
            ProbeFailure::Transport(e) => write!(f, "{e}"),
            ProbeFailure::Status(status) => write!(f, "status {status}"),
        }
    }
}

/// Startup barrier in front of everything that needs the identity provider.
pub struct ReadinessGate {
    ready: AtomicBool,
    /// Held for the whole probe; `try_lock` failing means a probe is in flight.
    window: Mutex<ProbeWindow>,
    discovery_url: String,
    http_client: Client,
    retry_interval: Duration,
    probe_timeout: Duration,
    started: Instant,
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("ready", &self.is_ready())
            .field("discovery_url", &self.discovery_url)
            .field("retry_interval", &self.retry_interval)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl ReadinessGate {
    /// Create a gate in the not-ready state.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &ReadinessConfig) -> Result<Self, PortalError> {
        let http_client = Client::builder()
            .timeout(config.probe_timeout)
            .connect_timeout(config.probe_timeout)
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            ready: AtomicBool::new(false),
            window: Mutex::new(ProbeWindow::default()),
            discovery_url: discovery_url(&config.authority),
            http_client,
            retry_interval: config.retry_interval.min(MAX_RETRY_INTERVAL),
            probe_timeout: config.probe_timeout,
            started: Instant::now(),
        })
    }

    /// True once the identity provider has answered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// URL probed by the gate.
    #[must_use]
    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// Decide whether a request may pass, probing the provider if allowed.
    ///
    /// Never waits on another caller's probe.
    #[instrument(skip_all, name = "portal.readiness.check", fields(path = %path))]
    pub async fn check(&self, path: &str) -> bool {
        if self.is_ready() {
            return true;
        }

        let Ok(mut window) = self.window.try_lock() else {
            debug!(target: "portal.readiness", "Probe in flight, failing fast");
            return false;
        };

        if window.is_closed(Instant::now()) {
            debug!(target: "portal.readiness", "Inside retry interval, failing fast");
            return false;
        }

        // Another caller may have finished a probe while we were acquiring
        if self.is_ready() {
            return true;
        }

        // Stamped before the probe too: a caller cancelled mid-probe drops the
        // guard, and the window must already be closed when it does
        window.not_before = Some(self.window_end(Instant::now()));
        let result = self.probe().await;
        window.not_before = Some(self.window_end(Instant::now()));

        match result {
            Ok(()) => {
                self.ready.store(true, Ordering::Release);
                metrics::record_readiness_probe("success");
                info!(
                    target: "portal.readiness",
                    discovery_url = %self.discovery_url,
                    elapsed_secs = self.started.elapsed().as_secs(),
                    "Identity provider is available, opening gate"
                );
                true
            }
            Err(failure) => {
                metrics::record_readiness_probe(failure.outcome());
                self.log_failure(path, &failure);
                false
            }
        }
    }

    fn window_end(&self, now: Instant) -> Instant {
        // retry_interval is capped at MAX_RETRY_INTERVAL, so this cannot overflow
        now.checked_add(self.retry_interval).unwrap_or(now)
    }

    async fn probe(&self) -> Result<(), ProbeFailure> {
        let request = self.http_client.get(&self.discovery_url).send();

        match tokio::time::timeout(self.probe_timeout, request).await {
            Err(_) => Err(ProbeFailure::Timeout),
            Ok(Err(e)) if e.is_timeout() => Err(ProbeFailure::Timeout),
            Ok(Err(e)) => Err(ProbeFailure::Transport(e.to_string())),
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(ProbeFailure::Status(response.status().as_u16())),
        }
    }

    /// Severity follows how long the provider has been unreachable.
    fn log_failure(&self, path: &str, failure: &ProbeFailure) {
        let elapsed = self.started.elapsed();
        let elapsed_secs = elapsed.as_secs();

        if elapsed < WARN_AFTER {
            info!(
                target: "portal.readiness",
                discovery_url = %self.discovery_url,
                path = %path,
                cause = %failure,
                elapsed_secs,
                "Identity provider not available yet"
            );
        } else if elapsed < ERROR_AFTER {
            warn!(
                target: "portal.readiness",
                discovery_url = %self.discovery_url,
                path = %path,
                cause = %failure,
                elapsed_secs,
                "Identity provider still not available"
            );
        } else {
            error!(
                target: "portal.readiness",
                discovery_url = %self.discovery_url,
                path = %path,
                cause = %failure,
                elapsed_secs,
                "Identity provider unavailable for over {} seconds",
                elapsed_secs
            );
        }
    }
}

/// The response for a request turned away by the gate.
#[must_use]
pub fn unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [
            (
                HeaderName::from_static("x-reason"),
                HeaderValue::from_static(UNAVAILABLE_REASON),
            ),
            (header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS)),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static(UNAVAILABLE_CACHE_CONTROL),
            ),
        ],
    )
        .into_response()
}

/// Middleware that blocks requests until the identity provider is available.
///
/// # Usage
///
/// ```rust,ignore
/// let gated = Router::new()
///     .route("/v1/session", get(handlers::get_session))
///     .layer(middleware::from_fn_with_state(gate, wait_for_identity_provider));
/// ```
pub async fn wait_for_identity_provider(
    State(gate): State<Arc<ReadinessGate>>,
    req: Request,
    next: Next,
) -> Response {
    if gate.is_ready() || gate.check(req.uri().path()).await {
        return next.run(req).await;
    }

    metrics::record_readiness_rejection();
    unavailable_response()
}
