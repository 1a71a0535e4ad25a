//! In-memory ticket store.
//!
//! Backed by a bounded `moka` cache: capacity-limited, with each entry living
//! only as long as its ticket's session expiry (clamped to a maximum). Reads
//! and writes for unrelated keys never contend on a shared lock.

use super::{
    RandomKeyGenerator, SessionKey, SessionKeyGenerator, SessionStoreError, Ticket, TicketStore,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Default maximum number of live sessions.
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Default lifetime for tickets that carry no session expiry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on any ticket's lifetime in the store.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Key generation attempts before `store` gives up.
pub const MAX_KEY_ATTEMPTS: u32 = 8;

/// Capacity and lifetime limits for [`InMemoryTicketStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketStoreConfig {
    /// Maximum number of live sessions.
    pub max_entries: u64,

    /// Lifetime for tickets without `expires_at`.
    pub default_ttl: Duration,

    /// Cap applied to every ticket's lifetime.
    pub max_ttl: Duration,
}

impl Default for TicketStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: DEFAULT_TTL,
            max_ttl: DEFAULT_MAX_TTL,
        }
    }
}

/// Per-entry expiry derived from the ticket itself.
struct TicketExpiry {
    default_ttl: Duration,
    max_ttl: Duration,
}

impl TicketExpiry {
    fn ttl_for(&self, ticket: &Ticket) -> Duration {
        let ttl = match ticket.expires_at {
            // Already-expired tickets get a zero TTL
            Some(expires_at) => (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            None => self.default_ttl,
        };
        ttl.min(self.max_ttl)
    }
}

impl Expiry<SessionKey, Ticket> for TicketExpiry {
    fn expire_after_create(
        &self,
        _key: &SessionKey,
        value: &Ticket,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.ttl_for(value))
    }

    fn expire_after_update(
        &self,
        _key: &SessionKey,
        value: &Ticket,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttl_for(value))
    }
}

/// Bounded, expiring ticket store held in process memory.
///
/// Sessions do not survive a restart.
pub struct InMemoryTicketStore {
    cache: Cache<SessionKey, Ticket>,
    key_generator: Arc<dyn SessionKeyGenerator>,
    /// Serialises key generation in `store`; other operations never take it.
    store_lock: Mutex<()>,
}

impl std::fmt::Debug for InMemoryTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTicketStore")
            .field("entry_count", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl InMemoryTicketStore {
    /// Create a store that generates keys from the system CSPRNG.
    #[must_use]
    pub fn new(config: TicketStoreConfig) -> Self {
        Self::with_key_generator(config, Arc::new(RandomKeyGenerator::new()))
    }

    /// Create a store with a custom key source.
    #[must_use]
    pub fn with_key_generator(
        config: TicketStoreConfig,
        key_generator: Arc<dyn SessionKeyGenerator>,
    ) -> Self {
        let cache = Cache::builder()
            .name("portal-tickets")
            .max_capacity(config.max_entries)
            .expire_after(TicketExpiry {
                default_ttl: config.default_ttl,
                max_ttl: config.max_ttl,
            })
            .build();

        Self {
            cache,
            key_generator,
            store_lock: Mutex::new(()),
        }
    }

    /// Approximate number of live entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations now.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    #[instrument(skip_all, name = "portal.session.store")]
    async fn store(&self, ticket: Ticket) -> Result<SessionKey, SessionStoreError> {
        let _guard = self.store_lock.lock().await;

        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let key = self.key_generator.generate()?;

            let entry = self
                .cache
                .entry(key.clone())
                .or_insert_with(async { ticket.clone() })
                .await;

            if entry.is_fresh() {
                debug!(
                    target: "portal.session",
                    key_prefix = %key.log_prefix(),
                    subject = %ticket.subject,
                    attempt,
                    "Ticket stored"
                );
                metrics::record_session_operation("store");
                return Ok(key);
            }

            debug!(
                target: "portal.session",
                key_prefix = %key.log_prefix(),
                attempt,
                "Session key collided with a live session, regenerating"
            );
        }

        warn!(
            target: "portal.session",
            attempts = MAX_KEY_ATTEMPTS,
            "Could not allocate a unique session key"
        );
        metrics::record_session_operation("store_exhausted");
        Err(SessionStoreError::KeySpaceExhausted {
            attempts: MAX_KEY_ATTEMPTS,
        })
    }

    async fn retrieve(&self, key: &SessionKey) -> Option<Ticket> {
        metrics::record_session_operation("retrieve");

        let ticket = self.cache.get(key).await?;

        if ticket.is_expired(Utc::now()) {
            debug!(
                target: "portal.session",
                key_prefix = %key.log_prefix(),
                "Ticket expired, dropping"
            );
            self.cache.invalidate(key).await;
            return None;
        }

        Some(ticket)
    }

    async fn renew(&self, key: &SessionKey, ticket: Ticket) {
        debug!(
            target: "portal.session",
            key_prefix = %key.log_prefix(),
            subject = %ticket.subject,
            "Ticket renewed"
        );
        metrics::record_session_operation("renew");
        self.cache.insert(key.clone(), ticket).await;
    }

    async fn remove(&self, key: &SessionKey) {
        debug!(
            target: "portal.session",
            key_prefix = %key.log_prefix(),
            "Ticket removed"
        );
        metrics::record_session_operation("remove");
        self.cache.invalidate(key).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::tests::{assert_same_ticket, sample_ticket, sample_tokens};
    use super::*;
    use common::secret::ExposeSecret;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;

    /// Hands out a fixed sequence of keys, then repeats the last one.
    struct ScriptedKeys {
        keys: StdMutex<VecDeque<&'static str>>,
        last: &'static str,
    }

    impl ScriptedKeys {
        fn new(keys: &[&'static str]) -> Self {
            Self {
                keys: StdMutex::new(keys.iter().copied().collect()),
                last: keys.last().copied().unwrap_or("fixed"),
            }
        }
    }

    impl SessionKeyGenerator for ScriptedKeys {
        fn generate(&self) -> Result<SessionKey, SessionStoreError> {
            let next = self.keys.lock().unwrap().pop_front().unwrap_or(self.last);
            Ok(SessionKey::new(next))
        }
    }

    struct FailingKeys;

    impl SessionKeyGenerator for FailingKeys {
        fn generate(&self) -> Result<SessionKey, SessionStoreError> {
            Err(SessionStoreError::KeyGeneration)
        }
    }

    fn store() -> InMemoryTicketStore {
        InMemoryTicketStore::new(TicketStoreConfig::default())
    }

    #[tokio::test]
    async fn test_store_then_retrieve_returns_same_ticket() {
        let store = store();
        let ticket = sample_ticket("alice");

        let key = store.store(ticket.clone()).await.unwrap();
        let retrieved = store.retrieve(&key).await.unwrap();

        assert_same_ticket(&retrieved, &ticket);
    }

    #[tokio::test]
    async fn test_retrieve_unknown_key_is_none() {
        let store = store();
        assert!(store.retrieve(&SessionKey::new("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = store();
        let key = store.store(sample_ticket("alice")).await.unwrap();

        store.remove(&key).await;
        store.remove(&key).await;

        assert!(store.retrieve(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_renew_replaces_ticket() {
        let store = store();
        let key = store.store(sample_ticket("alice")).await.unwrap();

        let mut replacement = sample_ticket("alice");
        replacement.tokens = sample_tokens("second-access");
        store.renew(&key, replacement.clone()).await;

        let retrieved = store.retrieve(&key).await.unwrap();
        assert_same_ticket(&retrieved, &replacement);
        assert_eq!(
            retrieved.tokens.access_token.expose_secret(),
            "second-access"
        );
    }

    #[tokio::test]
    async fn test_renew_creates_missing_entry() {
        let store = store();
        let key = SessionKey::new("created-by-renew");
        let ticket = sample_ticket("bob");

        store.renew(&key, ticket.clone()).await;

        assert_same_ticket(&store.retrieve(&key).await.unwrap(), &ticket);
    }

    #[tokio::test]
    async fn test_store_regenerates_colliding_key() {
        let generator = Arc::new(ScriptedKeys::new(&["taken", "taken", "free"]));
        let store = InMemoryTicketStore::with_key_generator(TicketStoreConfig::default(), generator);

        let first = store.store(sample_ticket("alice")).await.unwrap();
        let second = store.store(sample_ticket("bob")).await.unwrap();

        assert_eq!(first.as_str(), "taken");
        assert_eq!(second.as_str(), "free");
        // The colliding attempt must not overwrite the live session
        assert_eq!(store.retrieve(&first).await.unwrap().subject, "alice");
        assert_eq!(store.retrieve(&second).await.unwrap().subject, "bob");
    }

    #[tokio::test]
    async fn test_store_gives_up_after_max_attempts() {
        let generator = Arc::new(ScriptedKeys::new(&["fixed"]));
        let store = InMemoryTicketStore::with_key_generator(TicketStoreConfig::default(), generator);

        store.store(sample_ticket("alice")).await.unwrap();
        let result = store.store(sample_ticket("bob")).await;

        assert_eq!(
            result,
            Err(SessionStoreError::KeySpaceExhausted {
                attempts: MAX_KEY_ATTEMPTS
            })
        );
        assert_eq!(
            store.retrieve(&SessionKey::new("fixed")).await.unwrap().subject,
            "alice"
        );
    }

    #[tokio::test]
    async fn test_store_propagates_generator_failure() {
        let store =
            InMemoryTicketStore::with_key_generator(TicketStoreConfig::default(), Arc::new(FailingKeys));

        let result = store.store(sample_ticket("alice")).await;
        assert_eq!(result, Err(SessionStoreError::KeyGeneration));
    }

    #[tokio::test]
    async fn test_concurrent_stores_return_distinct_keys() {
        let store = Arc::new(store());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.store(sample_ticket(&format!("user-{i}"))).await })
            })
            .collect();

        let mut keys = HashSet::new();
        for handle in handles {
            keys.insert(handle.await.unwrap().unwrap());
        }

        assert_eq!(keys.len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_renewals_keep_their_own_ticket() {
        let store = Arc::new(store());

        let mut keys = Vec::new();
        for i in 0..64 {
            keys.push(store.store(sample_ticket(&format!("user-{i}"))).await.unwrap());
        }

        let handles: Vec<_> = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    // Several renewals per key, interleaved with every other key
                    let mut latest = sample_ticket(&format!("user-{i}"));
                    for round in 0..5 {
                        latest.tokens = sample_tokens(&format!("user-{i}-round-{round}"));
                        store.renew(&key, latest.clone()).await;
                        tokio::task::yield_now().await;
                    }

                    let retrieved = store.retrieve(&key).await.unwrap();
                    assert_same_ticket(&retrieved, &latest);
                    assert_eq!(
                        retrieved.tokens.access_token.expose_secret(),
                        format!("user-{i}-round-4")
                    );
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_expired_ticket_is_not_returned() {
        let store = store();
        let ticket = sample_ticket("alice").with_expiry(Utc::now() - chrono::Duration::seconds(1));

        let key = store.store(ticket).await.unwrap();

        assert!(store.retrieve(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_ticket_expires_with_session() {
        let store = store();
        let ticket =
            sample_ticket("alice").with_expiry(Utc::now() + chrono::Duration::milliseconds(300));

        let key = store.store(ticket).await.unwrap();
        assert!(store.retrieve(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.retrieve(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_default_ttl_applies_without_session_expiry() {
        let store = InMemoryTicketStore::new(TicketStoreConfig {
            default_ttl: Duration::from_millis(200),
            ..TicketStoreConfig::default()
        });

        let key = store.store(sample_ticket("alice")).await.unwrap();
        assert!(store.retrieve(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.retrieve(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let store = InMemoryTicketStore::new(TicketStoreConfig {
            max_entries: 10,
            ..TicketStoreConfig::default()
        });

        for i in 0..100 {
            store.store(sample_ticket(&format!("user-{i}"))).await.unwrap();
        }
        store.run_pending_tasks().await;

        assert!(store.entry_count() <= 10, "got {}", store.entry_count());
    }

    #[test]
    fn test_ttl_clamped_to_max() {
        let expiry = TicketExpiry {
            default_ttl: DEFAULT_TTL,
            max_ttl: Duration::from_secs(60),
        };
        let ticket = sample_ticket("alice").with_expiry(Utc::now() + chrono::Duration::days(2));

        assert_eq!(expiry.ttl_for(&ticket), Duration::from_secs(60));
    }

    #[test]
    fn test_ttl_for_ticket_without_expiry() {
        let expiry = TicketExpiry {
            default_ttl: Duration::from_secs(30),
            max_ttl: DEFAULT_MAX_TTL,
        };

        assert_eq!(
            expiry.ttl_for(&sample_ticket("alice")),
            Duration::from_secs(30)
        );
    }
}
