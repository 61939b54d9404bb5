//! Endpoint scoring: an ordered registry of probe targets ranked by how often
//! each one has won a race.
//!
//! Readers get a frozen copy of the ordering, so a snapshot taken while a
//! race is recording its winner is never half-sorted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

#[derive(Debug, Default)]
struct Registry {
    /// Race order, highest score first. Same key set as `scores`.
    order: Vec<String>,
    scores: HashMap<String, u64>,
    /// Endpoint holding the highest score seen so far.
    leader: Option<String>,
    /// Highest score seen so far. Not lowered when the leader is removed.
    leader_score: u64,
}

/// Concurrency-safe, score-ordered set of endpoints.
#[derive(Debug, Default)]
pub struct EndpointScorer {
    inner: RwLock<Registry>,
}

impl EndpointScorer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Registry {
                order: Vec::with_capacity(capacity),
                scores: HashMap::with_capacity(capacity),
                leader: None,
                leader_score: 0,
            }),
        }
    }

    /// Build a scorer from an initial endpoint list, preserving its order.
    pub fn from_endpoints<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = endpoints.into_iter();
        let scorer = Self::with_capacity(endpoints.size_hint().0);
        for endpoint in endpoints {
            scorer.register(endpoint);
        }
        scorer
    }

    // Scoring is an optimization: a writer that panicked mid-update must not
    // take discovery down with it, so poisoned locks are recovered.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `endpoint` with score 0. Registering a known endpoint is a no-op.
    pub fn register(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let mut reg = self.write();
        if reg.scores.contains_key(&endpoint) {
            return;
        }
        reg.scores.insert(endpoint.clone(), 0);
        reg.order.push(endpoint);
    }

    /// Drop `endpoint` and its score. Unknown endpoints are ignored.
    ///
    /// Removing the current leader keeps its score as the re-sort threshold:
    /// the remaining endpoints are only re-ranked once one of them beats it.
    pub fn remove(&self, endpoint: &str) {
        let mut reg = self.write();
        if reg.scores.remove(endpoint).is_none() {
            return;
        }
        reg.order.retain(|e| e != endpoint);
        if reg.leader.as_deref() == Some(endpoint) {
            reg.leader = None;
        }
    }

    /// Credit `endpoint` with one success. Unknown endpoints are ignored.
    pub fn record_success(&self, endpoint: &str) {
        let mut reg = self.write();
        let Some(score) = reg.scores.get_mut(endpoint) else {
            return;
        };
        *score += 1;
        let score = *score;

        if reg.leader.as_deref() == Some(endpoint) {
            reg.leader_score = reg.leader_score.max(score);
            return;
        }

        if score > reg.leader_score {
            reg.leader = Some(endpoint.to_string());
            reg.leader_score = score;

            let Registry { order, scores, .. } = &mut *reg;
            // `sort_by` is stable: ties keep their previous relative order.
            order.sort_by(|a, b| scores[b].cmp(&scores[a]));
            debug!(leader = %endpoint, score, "endpoints re-ranked");
        }
    }

    /// Endpoints in current race order, highest score first.
    pub fn snapshot(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Same ordering as [`snapshot`](Self::snapshot), paired with scores.
    pub fn snapshot_with_scores(&self) -> Vec<(String, u64)> {
        let reg = self.read();
        reg.order
            .iter()
            .map(|e| (e.clone(), reg.scores.get(e).copied().unwrap_or_default()))
            .collect()
    }

    pub fn score(&self, endpoint: &str) -> Option<u64> {
        self.read().scores.get(endpoint).copied()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> EndpointScorer {
        let s = EndpointScorer::with_capacity(10);
        s.register("a");
        s.register("b");
        s.register("c");
        s
    }

    #[test]
    fn test_ranking_follows_leader_threshold() {
        let s = abc();
        s.record_success("a");
        s.record_success("b");
        s.record_success("b");
        s.record_success("c");
        s.record_success("c");
        s.record_success("c");
        assert_eq!(s.snapshot(), ["c", "b", "a"]);

        // a: 2, below the leader
        s.record_success("a");
        assert_eq!(s.snapshot(), ["c", "b", "a"]);

        // a: 3, tied with c; c stays ahead
        s.record_success("a");
        assert_eq!(s.snapshot(), ["c", "b", "a"]);

        // a: 4, beats c
        s.record_success("a");
        assert_eq!(s.snapshot(), ["a", "c", "b"]);
        assert_eq!(
            s.snapshot_with_scores(),
            [
                ("a".to_string(), 4),
                ("c".to_string(), 3),
                ("b".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let s = abc();
        s.record_success("b");
        let before = s.snapshot_with_scores();

        s.register("b");
        s.register("a");

        assert_eq!(s.snapshot_with_scores(), before);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_record_success_unknown_is_noop() {
        let s = abc();
        s.record_success("c");
        let before = s.snapshot_with_scores();

        s.record_success("zzz");

        assert_eq!(s.snapshot_with_scores(), before);
        assert_eq!(s.score("zzz"), None);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let s = EndpointScorer::from_endpoints(["a", "b", "c", "d"]);
        s.record_success("c");
        assert_eq!(s.snapshot(), ["c", "a", "b", "d"]);

        s.record_success("d");
        s.record_success("d");
        assert_eq!(s.snapshot(), ["d", "c", "a", "b"]);
    }

    #[test]
    fn test_leader_keeps_scoring_without_reorder() {
        let s = abc();
        s.record_success("b");
        s.record_success("b");
        s.record_success("b");
        assert_eq!(s.snapshot(), ["b", "a", "c"]);
        assert_eq!(s.score("b"), Some(3));

        // a needs to beat the leader's latest score, not its first one.
        s.record_success("a");
        s.record_success("a");
        s.record_success("a");
        assert_eq!(s.snapshot(), ["b", "a", "c"]);
    }

    #[test]
    fn test_remove() {
        let s = abc();
        s.remove("b");
        s.remove("missing");
        assert_eq!(s.snapshot(), ["a", "c"]);
        assert_eq!(s.score("b"), None);

        s.remove("a");
        s.remove("c");
        assert!(s.is_empty());
    }

    #[test]
    fn test_removed_leader_leaves_stale_threshold() {
        let s = abc();
        s.record_success("c");
        s.record_success("c");
        assert_eq!(s.snapshot(), ["c", "a", "b"]);

        s.remove("c");

        // b reaches 1 and 2, still not above the removed leader's 2.
        s.record_success("b");
        s.record_success("b");
        assert_eq!(s.snapshot(), ["a", "b"]);

        s.record_success("b");
        assert_eq!(s.snapshot(), ["b", "a"]);
    }

    #[test]
    fn test_reregistered_leader_starts_over() {
        let s = abc();
        s.record_success("a");
        s.remove("a");
        s.register("a");

        assert_eq!(s.score("a"), Some(0));
        assert_eq!(s.snapshot(), ["b", "c", "a"]);
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let s = abc();
        let snap = s.snapshot();
        s.record_success("c");

        assert_eq!(snap, ["a", "b", "c"]);
        assert_eq!(s.snapshot(), ["c", "a", "b"]);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::sync::Arc;

        let s = Arc::new(EndpointScorer::from_endpoints(["a", "b", "c", "d"]));
        let handles: Vec<_> = ["a", "b", "c", "d", "b", "c", "c"]
            .into_iter()
            .map(|e| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_success(e);
                        let snap = s.snapshot_with_scores();
                        assert_eq!(snap.len(), 4);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(s.score("a"), Some(100));
        assert_eq!(s.score("b"), Some(200));
        assert_eq!(s.score("c"), Some(300));
        assert_eq!(s.snapshot()[0], "c");
    }
}
