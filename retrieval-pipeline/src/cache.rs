use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use query_understanding::StructuredQuery;

use crate::{config::RetrievalTuning, RetrievalCandidate};

struct CacheEntry {
    inserted_at: Instant,
    candidates: Vec<RetrievalCandidate>,
}

/// Bounded TTL cache over full candidate sets. Eviction removes the oldest
/// inserted key once the cap is reached; a single mutex guards the map.
pub struct RetrievalCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
}

impl RetrievalCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Canonical cache key over everything that shapes the candidate set.
    pub fn key_for(&self, query: &StructuredQuery, tuning: &RetrievalTuning) -> String {
        let types = query
            .filters
            .artifact_types
            .as_ref()
            .map(|types| {
                types
                    .iter()
                    .map(|t| t.as_str().to_owned())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "*".to_owned());
        let from = query
            .filters
            .occurred_from
            .map(|d| d.timestamp().to_string())
            .unwrap_or_default();
        let to = query
            .filters
            .occurred_to
            .map(|d| d.timestamp().to_string())
            .unwrap_or_default();
        let tuning_key = serde_json::to_string(tuning).unwrap_or_default();

        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            query.original_query, query.patient_id, query.intent, types, from, to, tuning_key
        )
    }

    pub fn get(&self, key: &str) -> Option<Vec<RetrievalCandidate>> {
        let mut inner = self.inner.lock().ok()?;
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() > self.ttl);

        if expired {
            inner.entries.remove(key);
            inner.insertion_order.retain(|k| k != key);
            return None;
        }

        inner.entries.get(key).map(|entry| entry.candidates.clone())
    }

    pub fn insert(&self, key: String, candidates: Vec<RetrievalCandidate>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if inner.entries.contains_key(&key) {
            inner.insertion_order.retain(|k| k != &key);
        } else {
            while inner.entries.len() >= self.max_entries {
                let Some(oldest) = inner.insertion_order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }

        inner.insertion_order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                candidates,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<RetrievalCandidate> {
        Vec::new()
    }

    #[test]
    fn get_returns_inserted_value_within_ttl() {
        let cache = RetrievalCache::new(Duration::from_secs(300), 100);
        cache.insert("key".into(), candidates());
        assert!(cache.get("key").is_some());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = RetrievalCache::new(Duration::from_millis(0), 100);
        cache.insert("key".into(), candidates());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("key").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_inserted_key_is_evicted_at_capacity() {
        let cache = RetrievalCache::new(Duration::from_secs(300), 2);
        cache.insert("first".into(), candidates());
        cache.insert("second".into(), candidates());
        cache.insert("third".into(), candidates());

        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("third").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinserting_a_key_refreshes_its_position() {
        let cache = RetrievalCache::new(Duration::from_secs(300), 2);
        cache.insert("first".into(), candidates());
        cache.insert("second".into(), candidates());
        cache.insert("first".into(), candidates());
        cache.insert("third".into(), candidates());

        // "second" was oldest once "first" was refreshed.
        assert!(cache.get("first").is_some());
        assert!(cache.get("second").is_none());
        assert!(cache.get("third").is_some());
    }

    #[test]
    fn key_includes_patient_and_filters() {
        use chrono::Utc;

        let cache = RetrievalCache::new(Duration::from_secs(300), 10);
        let tuning = RetrievalTuning::default();

        let a = query_understanding::parse("medications?", "patient-1", Utc::now()).unwrap();
        let b = query_understanding::parse("medications?", "patient-2", Utc::now()).unwrap();

        assert_ne!(cache.key_for(&a, &tuning), cache.key_for(&b, &tuning));
    }
}
