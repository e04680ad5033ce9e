//! Quorum lock client
//!
//! A lease is won when a majority of independent stores accept the same
//! token within one round, and the round finishes early enough that some
//! validity remains after subtracting the clock drift margin. Every binding
//! carries the lease ttl, so a holder that crashes stops blocking others once
//! the ttl elapses.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use gpulock_core::{GpulockConfig, GpulockError, GpulockResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::traits::LockStore;

/// Fixed part of the drift margin
const DRIFT_BASE: Duration = Duration::from_millis(2);

/// Quorum client settings
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Bound on one store round-trip
    pub store_timeout: Duration,
    /// Bound on opening a store connection
    pub connect_timeout: Duration,
    /// Fraction of the ttl reserved for clock drift
    pub clock_drift_factor: f64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            clock_drift_factor: 0.01,
        }
    }
}

impl From<&GpulockConfig> for QuorumConfig {
    fn from(config: &GpulockConfig) -> Self {
        Self {
            store_timeout: config.store_timeout(),
            connect_timeout: config.connect_timeout(),
            clock_drift_factor: config.clock_drift_factor,
        }
    }
}

impl QuorumConfig {
    /// Reject settings that would make the drift margin meaningless
    pub fn validate(&self) -> GpulockResult<()> {
        if !(0.0..1.0).contains(&self.clock_drift_factor) {
            return Err(GpulockError::Config(format!(
                "clock drift factor must be in [0, 1), got {}",
                self.clock_drift_factor
            )));
        }
        Ok(())
    }

    fn drift_margin(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.clock_drift_factor) + DRIFT_BASE
    }
}

/// An exclusive, time-bounded hold on one key
#[derive(Debug, Clone)]
pub struct Lease {
    resource_key: String,
    token: String,
    ttl: Duration,
    deadline: Instant,
    granted_at: DateTime<Utc>,
}

impl Lease {
    /// The locked key
    pub fn key(&self) -> &str {
        &self.resource_key
    }

    /// Token identifying this holder in every store
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Instant after which the lease grants nothing
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wall-clock time the lease was won
    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() < self.deadline
    }

    /// Validity left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Result of a best-effort release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Stores that removed our binding
    pub deleted: usize,
    /// Stores that errored or timed out
    pub unreachable: usize,
}

/// Client for the majority-vote lock protocol over N stores
pub struct QuorumLockClient {
    stores: Vec<Arc<dyn LockStore>>,
    config: QuorumConfig,
}

impl QuorumLockClient {
    /// Create a client over a fixed set of stores
    pub fn new(stores: Vec<Arc<dyn LockStore>>, config: QuorumConfig) -> GpulockResult<Self> {
        if stores.is_empty() {
            return Err(GpulockError::StoreConfiguration {
                configured: 0,
                required: 1,
            });
        }
        config.validate()?;

        debug!(
            stores = stores.len(),
            quorum = stores.len() / 2 + 1,
            store_timeout_ms = config.store_timeout.as_millis() as u64,
            "Quorum lock client created"
        );

        Ok(Self { stores, config })
    }

    /// Number of configured stores
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    /// Stores that must agree for a lease
    pub fn quorum(&self) -> usize {
        self.stores.len() / 2 + 1
    }

    /// Connect every store, each bounded by the connect timeout
    ///
    /// Returns how many stores are connected. A store that fails here is
    /// not dropped; it simply votes no until it connects.
    pub async fn connect(&self) -> usize {
        let results = join_all(self.stores.iter().map(|store| async move {
            match timeout(self.config.connect_timeout, store.connect()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(store = %store.name(), error = %e, "Failed to connect to store");
                    false
                }
                Err(_) => {
                    warn!(store = %store.name(), "Timed out connecting to store");
                    false
                }
            }
        }))
        .await;

        results.into_iter().filter(|connected| *connected).count()
    }

    /// Run one acquisition round for `key`
    ///
    /// Stores are connected first; the round clock starts afterwards. On
    /// failure every store is asked to drop the binding again before the
    /// error is returned. No retry happens here.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> GpulockResult<Lease> {
        if self.config.store_timeout >= ttl {
            return Err(GpulockError::Config(format!(
                "store timeout {:?} must be smaller than ttl {:?}",
                self.config.store_timeout, ttl
            )));
        }

        let connected = self.connect().await;
        let token = Uuid::new_v4().to_string();
        let quorum = self.quorum();
        debug!(key = %key, connected, quorum, "Starting acquisition round");
        let started = Instant::now();

        let votes = join_all(
            self.stores
                .iter()
                .map(|store| self.vote(store.as_ref(), key, &token, ttl)),
        )
        .await;
        let accepted = votes.into_iter().filter(|v| *v).count();

        let elapsed = started.elapsed();
        let drift = self.config.drift_margin(ttl);
        let validity = ttl
            .checked_sub(elapsed + drift)
            .filter(|v| !v.is_zero());

        if let Some(validity) = validity.filter(|_| accepted >= quorum) {
            info!(
                key = %key,
                accepted,
                quorum,
                elapsed_ms = elapsed.as_millis() as u64,
                validity_ms = validity.as_millis() as u64,
                "Lease acquired"
            );
            return Ok(Lease {
                resource_key: key.to_string(),
                token,
                ttl,
                deadline: started + (ttl - drift),
                granted_at: Utc::now(),
            });
        }

        debug!(
            key = %key,
            accepted,
            quorum,
            elapsed_ms = elapsed.as_millis() as u64,
            "Acquisition round failed, cleaning up"
        );
        self.unlock_all(key, &token).await;

        Err(GpulockError::AcquisitionTimeout {
            key: key.to_string(),
            accepted,
            quorum,
        })
    }

    /// Drop the lease's bindings wherever they still carry its token
    ///
    /// Never fails. Unreachable stores are logged and left to the ttl.
    pub async fn release(&self, lease: &Lease) -> ReleaseOutcome {
        let outcome = self.unlock_all(lease.key(), lease.token()).await;

        if outcome.unreachable > 0 {
            let err = GpulockError::ReleaseIncomplete {
                key: lease.key().to_string(),
                unreachable: outcome.unreachable,
            };
            warn!(error = %err, "Lease release incomplete");
        } else {
            debug!(key = %lease.key(), deleted = outcome.deleted, "Lease released");
        }

        outcome
    }

    async fn vote(&self, store: &dyn LockStore, key: &str, token: &str, ttl: Duration) -> bool {
        match timeout(self.config.store_timeout, store.set_if_absent(key, token, ttl)).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                debug!(store = %store.name(), error = %e, "Store failed during acquire");
                false
            }
            Err(_) => {
                debug!(store = %store.name(), "Store timed out during acquire");
                false
            }
        }
    }

    async fn unlock_all(&self, key: &str, token: &str) -> ReleaseOutcome {
        let results = join_all(self.stores.iter().map(|store| async move {
            match timeout(self.config.store_timeout, store.delete_if_equals(key, token)).await {
                Ok(Ok(deleted)) => Some(deleted),
                Ok(Err(e)) => {
                    warn!(store = %store.name(), key = %key, error = %e, "Failed to delete binding");
                    None
                }
                Err(_) => {
                    warn!(store = %store.name(), key = %key, "Timed out deleting binding");
                    None
                }
            }
        }))
        .await;

        results
            .into_iter()
            .fold(ReleaseOutcome::default(), |mut acc, result| {
                match result {
                    Some(true) => acc.deleted += 1,
                    Some(false) => {}
                    None => acc.unreachable += 1,
                }
                acc
            })
    }
}
