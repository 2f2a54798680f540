//! Identity matcher.
//!
//! Maintains the per-store feature database mapping person identity to an
//! appearance embedding, and resolves each new embedding to an existing or
//! freshly minted identity.
//!
//! The matcher is not thread-safe by contract: camera workers sharing one
//! store's database must serialize calls to [`IdentityMatcher::resolve`].
//! All timeouts are data-time-based (event timestamps), never wall clock.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Tunables for the identity matcher.
#[derive(Clone, Copy, Debug)]
pub struct MatcherConfig {
    /// Minimum cosine similarity to re-use an existing identity.
    pub similarity_threshold: f32,
    /// Capacity limit for the feature database.
    pub max_persons: usize,
    /// Identities unseen for longer than this are evicted.
    pub person_timeout_s: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_persons: 1000,
            person_timeout_s: 3600,
        }
    }
}

#[derive(Clone, Debug)]
struct IdentityRecord {
    /// Absent for identities minted from degenerate detections.
    embedding: Option<Vec<f32>>,
    last_seen: DateTime<Utc>,
}

/// Embedding feature database with linear-scan matching.
///
/// Matching is O(active identities) per call, which is sufficient at the
/// configured capacity. The scan is isolated in [`Self::best_match`] so an
/// approximate nearest-neighbor index can replace it without touching the
/// public contract.
pub struct IdentityMatcher {
    config: MatcherConfig,
    database: HashMap<String, IdentityRecord>,
    next_person_seq: u64,
}

impl IdentityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            database: HashMap::new(),
            next_person_seq: 1,
        }
    }

    /// Resolve an optional embedding observed at `timestamp` to a person id.
    ///
    /// An absent embedding (degenerate crop) always mints a new identity;
    /// such detections are never merged. This call never fails.
    pub fn resolve(&mut self, embedding: Option<&[f32]>, timestamp: DateTime<Utc>) -> String {
        self.evict_stale(timestamp);

        let Some(embedding) = embedding else {
            let person_id = self.mint_id();
            self.database.insert(
                person_id.clone(),
                IdentityRecord {
                    embedding: None,
                    last_seen: timestamp,
                },
            );
            self.evict_over_capacity();
            return person_id;
        };

        if let Some(person_id) = self.best_match(embedding) {
            if let Some(record) = self.database.get_mut(&person_id) {
                if let Some(stored) = record.embedding.as_mut() {
                    // Exponential moving average toward the new observation.
                    // The result is deliberately not re-normalized; cosine
                    // similarity is scale-invariant, so matching is unaffected.
                    for (s, e) in stored.iter_mut().zip(embedding) {
                        *s = 0.7 * *s + 0.3 * *e;
                    }
                }
                record.last_seen = timestamp;
            }
            return person_id;
        }

        let person_id = self.mint_id();
        self.database.insert(
            person_id.clone(),
            IdentityRecord {
                embedding: Some(embedding.to_vec()),
                last_seen: timestamp,
            },
        );
        self.evict_over_capacity();
        person_id
    }

    /// Number of identities currently held.
    pub fn len(&self) -> usize {
        self.database.len()
    }

    pub fn is_empty(&self) -> bool {
        self.database.is_empty()
    }

    pub fn contains(&self, person_id: &str) -> bool {
        self.database.contains_key(person_id)
    }

    fn mint_id(&mut self) -> String {
        let id = format!("P_{}", self.next_person_seq);
        self.next_person_seq += 1;
        id
    }

    /// Linear scan for the best cosine match at or above the threshold.
    fn best_match(&self, embedding: &[f32]) -> Option<String> {
        let mut best_id: Option<&str> = None;
        let mut best_similarity = 0.0f32;

        for (person_id, record) in &self.database {
            let Some(stored) = record.embedding.as_deref() else {
                continue;
            };
            let similarity = cosine_similarity(embedding, stored);
            if similarity > best_similarity {
                best_similarity = similarity;
                best_id = Some(person_id);
            }
        }

        if best_similarity >= self.config.similarity_threshold {
            best_id.map(str::to_string)
        } else {
            None
        }
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let timeout = Duration::seconds(self.config.person_timeout_s as i64);
        self.database
            .retain(|_, record| now - record.last_seen <= timeout);
    }

    /// Evict least-recently-seen identities down to the capacity limit.
    fn evict_over_capacity(&mut self) {
        while self.database.len() > self.config.max_persons {
            let Some(oldest) = self
                .database
                .iter()
                .min_by_key(|(_, record)| record.last_seen)
                .map(|(id, _)| id.clone())
            else {
                return;
            };
            self.database.remove(&oldest);
        }
    }
}

/// Cosine similarity between two vectors. Zero when either has zero norm
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn identical_embedding_matches_same_identity() {
        let mut matcher = IdentityMatcher::new(MatcherConfig::default());
        let emb = vec![1.0, 0.0, 0.0];
        let first = matcher.resolve(Some(&emb), ts(0));
        let second = matcher.resolve(Some(&emb), ts(1));
        assert_eq!(first, second);
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn dissimilar_embedding_mints_new_identity() {
        let mut matcher = IdentityMatcher::new(MatcherConfig::default());
        let a = matcher.resolve(Some(&[1.0, 0.0, 0.0]), ts(0));
        let b = matcher.resolve(Some(&[0.0, 1.0, 0.0]), ts(1));
        assert_ne!(a, b);
        assert_eq!(matcher.len(), 2);
    }

    #[test]
    fn absent_embedding_always_mints() {
        let mut matcher = IdentityMatcher::new(MatcherConfig::default());
        let a = matcher.resolve(None, ts(0));
        let b = matcher.resolve(None, ts(1));
        assert_ne!(a, b);
        // Embedding-less identities never participate in matching.
        let c = matcher.resolve(Some(&[1.0, 0.0]), ts(2));
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn capacity_eviction_removes_least_recently_seen() {
        let config = MatcherConfig {
            max_persons: 3,
            ..MatcherConfig::default()
        };
        let mut matcher = IdentityMatcher::new(config);
        // Four orthogonal embeddings with increasing timestamps.
        let first = matcher.resolve(Some(&[1.0, 0.0, 0.0, 0.0]), ts(0));
        matcher.resolve(Some(&[0.0, 1.0, 0.0, 0.0]), ts(1));
        matcher.resolve(Some(&[0.0, 0.0, 1.0, 0.0]), ts(2));
        matcher.resolve(Some(&[0.0, 0.0, 0.0, 1.0]), ts(3));
        assert_eq!(matcher.len(), 3);
        assert!(!matcher.contains(&first), "oldest identity evicted");
    }

    #[test]
    fn stale_identities_evicted_before_matching() {
        let mut matcher = IdentityMatcher::new(MatcherConfig::default());
        let emb = vec![1.0, 0.0];
        let first = matcher.resolve(Some(&emb), ts(0));
        // Re-observed beyond the 3600s person timeout: the old record is
        // swept, so the same appearance mints a fresh identity.
        let second = matcher.resolve(Some(&emb), ts(3601));
        assert_ne!(first, second);
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn ema_update_drifts_without_renormalization() {
        let mut matcher = IdentityMatcher::new(MatcherConfig::default());
        let id = matcher.resolve(Some(&[1.0, 0.0]), ts(0));
        // A near-identical observation updates the stored vector in place.
        let again = matcher.resolve(Some(&[0.9, 0.1]), ts(1));
        assert_eq!(id, again);
        // Still matches after the blended vector falls below unit norm.
        let third = matcher.resolve(Some(&[1.0, 0.0]), ts(2));
        assert_eq!(id, third);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
