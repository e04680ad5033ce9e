//! Lease orchestration
//!
//! One call walks START → PROBING → SELF_CHECK → ITERATING and ends in
//! ACQUIRED or EXHAUSTED. Candidates are tried in order with no delay
//! between them; contention is spread by the candidate shuffle.

use gpulock_core::{
    find_self_occupied, resource_key, GpulockConfig, GpulockError, GpulockResult,
};
use gpulock_store::{open_stores, Lease, QuorumConfig, QuorumLockClient, ReleaseOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::probe::{CommandProbe, ResourceProbe};
use crate::selector::CandidateSelector;

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Start,
    Probing,
    SelfCheck,
    Iterating,
    Acquired,
    Exhausted,
}

impl std::fmt::Display for SelectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionState::Start => write!(f, "start"),
            SelectionState::Probing => write!(f, "probing"),
            SelectionState::SelfCheck => write!(f, "self-check"),
            SelectionState::Iterating => write!(f, "iterating"),
            SelectionState::Acquired => write!(f, "acquired"),
            SelectionState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Releases the lease behind a selection
pub struct ReleaseHandle {
    client: Arc<QuorumLockClient>,
    lease: Lease,
}

impl ReleaseHandle {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Delete the lease's bindings; safe to call more than once
    pub async fn release(&self) -> ReleaseOutcome {
        self.client.release(&self.lease).await
    }
}

impl std::fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

/// A GPU handed to the caller
#[derive(Debug)]
pub struct Selection {
    /// Device index
    pub resource_id: u32,
    /// Handle for the lease, absent when the process already ran on the GPU
    pub release: Option<ReleaseHandle>,
}

impl Selection {
    /// Whether the GPU was already in use by this process
    pub fn is_reentrant(&self) -> bool {
        self.release.is_none()
    }
}

/// Drives candidate iteration against the quorum lock client
pub struct LeaseOrchestrator {
    probe: Arc<dyn ResourceProbe>,
    client: Arc<QuorumLockClient>,
    selector: CandidateSelector,
    host: String,
    ttl: Duration,
    deadline: Option<Duration>,
    pid: u32,
}

impl LeaseOrchestrator {
    /// Create an orchestrator acting for the current process
    pub fn new(
        probe: Arc<dyn ResourceProbe>,
        client: Arc<QuorumLockClient>,
        selector: CandidateSelector,
        host: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            probe,
            client,
            selector,
            host: host.into(),
            ttl,
            deadline: None,
            pid: std::process::id(),
        }
    }

    /// Build an orchestrator from configuration
    pub fn from_config(config: &GpulockConfig, probe: Arc<dyn ResourceProbe>) -> GpulockResult<Self> {
        config.validate()?;

        let stores = open_stores(&config.stores)?;
        let client = QuorumLockClient::new(stores, QuorumConfig::from(config))?;

        let mut orchestrator = Self::new(
            probe,
            Arc::new(client),
            CandidateSelector::new(config.shuffle),
            config.host_identity(),
            config.ttl(),
        );
        orchestrator.deadline = config.acquire_deadline();
        Ok(orchestrator)
    }

    /// Bound the whole selection
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Act for another process, e.g. a child launched with the selection
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Select a GPU and lock it for this host
    pub async fn select_resource(&self) -> GpulockResult<Selection> {
        let started = Instant::now();
        self.enter(SelectionState::Start);

        self.enter(SelectionState::Probing);
        let records = self.probe.records().await?;

        self.enter(SelectionState::SelfCheck);
        if let Some(resource_id) = find_self_occupied(&records, self.pid) {
            self.enter(SelectionState::Acquired);
            info!(gpu = resource_id, pid = self.pid, "Process already runs on GPU");
            return Ok(Selection {
                resource_id,
                release: None,
            });
        }

        self.enter(SelectionState::Iterating);
        let candidates = self.selector.candidates(&records);
        debug!(candidates = ?candidates, shuffled = self.selector.shuffles(), "Idle GPUs");

        for (tried, resource_id) in candidates.iter().copied().enumerate() {
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    return Err(GpulockError::DeadlineExceeded(tried));
                }
            }

            let key = resource_key(&self.host, resource_id);
            match self.client.acquire(&key, self.ttl).await {
                Ok(lease) => {
                    self.enter(SelectionState::Acquired);
                    info!(gpu = resource_id, key = %key, "GPU locked");
                    return Ok(Selection {
                        resource_id,
                        release: Some(ReleaseHandle {
                            client: self.client.clone(),
                            lease,
                        }),
                    });
                }
                Err(e) if e.is_retryable() => {
                    debug!(gpu = resource_id, error = %e, "Candidate not acquired");
                }
                Err(e) => return Err(e),
            }
        }

        self.enter(SelectionState::Exhausted);
        let reason = if candidates.is_empty() {
            format!("No GPU available: no idle GPU on {}", self.host)
        } else {
            format!(
                "No GPU available: {} idle GPU(s) on {} are locked",
                candidates.len(),
                self.host
            )
        };
        Err(GpulockError::ResourceUnavailable(reason))
    }

    fn enter(&self, state: SelectionState) {
        debug!(state = %state, host = %self.host, "Selection state");
    }
}

/// Select and lock a GPU using `nvidia-smi` and the configured stores
pub async fn select_resource(config: &GpulockConfig) -> GpulockResult<Selection> {
    let probe = Arc::new(CommandProbe::new(config.probe.clone()));
    LeaseOrchestrator::from_config(config, probe)?
        .select_resource()
        .await
}
