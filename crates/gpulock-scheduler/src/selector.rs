//! Candidate ordering

use gpulock_core::{idle_resource_ids, ResourceRecord};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

/// Produces a fresh random source for each selection
pub type RngFactory = Arc<dyn Fn() -> StdRng + Send + Sync>;

/// Orders the idle GPUs of a snapshot for acquisition
///
/// With shuffling on, concurrent callers on different hosts spread out
/// over the idle GPUs instead of all racing for the first one.
#[derive(Clone)]
pub struct CandidateSelector {
    shuffle: bool,
    rng_factory: RngFactory,
}

impl CandidateSelector {
    /// Selector drawing from the OS entropy source
    pub fn new(shuffle: bool) -> Self {
        Self::with_rng(shuffle, Arc::new(StdRng::from_os_rng))
    }

    /// Selector drawing from a caller-provided source
    pub fn with_rng(shuffle: bool, rng_factory: RngFactory) -> Self {
        Self {
            shuffle,
            rng_factory,
        }
    }

    /// Selector whose every call shuffles the same way
    pub fn seeded(shuffle: bool, seed: u64) -> Self {
        Self::with_rng(shuffle, Arc::new(move || StdRng::seed_from_u64(seed)))
    }

    pub fn shuffles(&self) -> bool {
        self.shuffle
    }

    /// Idle GPU indices in the order they should be tried
    ///
    /// An empty result means nothing is idle; it is not an error here.
    pub fn candidates(&self, records: &[ResourceRecord]) -> Vec<u32> {
        let mut ids = idle_resource_ids(records);
        if self.shuffle {
            let mut rng = (self.rng_factory)();
            ids.shuffle(&mut rng);
        }
        ids
    }
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for CandidateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSelector")
            .field("shuffle", &self.shuffle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn idle(n: u32) -> Vec<ResourceRecord> {
        (0..n).map(ResourceRecord::idle).collect()
    }

    #[test]
    fn test_probe_order_without_shuffle() {
        let records = vec![
            ResourceRecord::idle(2),
            ResourceRecord::busy(0, 25729),
            ResourceRecord::idle(1),
        ];
        let selector = CandidateSelector::new(false);
        assert_eq!(selector.candidates(&records), vec![2, 1]);
    }

    #[test]
    fn test_nothing_idle() {
        let records = vec![ResourceRecord::busy(0, 1), ResourceRecord::busy(1, 2)];
        assert!(CandidateSelector::default().candidates(&records).is_empty());
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let selector = CandidateSelector::new(true);
        let mut ids = selector.candidates(&idle(8));
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let selector = CandidateSelector::seeded(true, 42);
        let records = idle(6);
        assert_eq!(selector.candidates(&records), selector.candidates(&records));
    }

    #[test]
    fn test_first_candidate_varies_across_seeds() {
        let records = idle(5);
        let firsts: HashSet<u32> = (0..32)
            .map(|seed| CandidateSelector::seeded(true, seed).candidates(&records)[0])
            .collect();
        assert!(firsts.len() > 1);
    }

    #[test]
    fn test_first_candidate_varies_across_calls() {
        let selector = CandidateSelector::new(true);
        let records = idle(5);
        let firsts: HashSet<u32> = (0..64)
            .map(|_| selector.candidates(&records)[0])
            .collect();
        assert!(firsts.len() > 1);
    }
}
