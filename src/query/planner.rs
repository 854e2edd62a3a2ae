//! Response-cache planner: LRU + TTL keyed by tool name, cache epoch,
//! and the canonical form of the request payload.
//!
//! Any store mutation bumps the cache epoch, so stale entries can never
//! be served after an index run; they simply stop being addressable and
//! age out of the LRU.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::observability::canonical_json;

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Cache outcome and timing for one request, surfaced to callers that
/// opt into the planner trace.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerTrace {
    pub cache_mode: String,
    pub lookup_ms: f64,
    pub compute_ms: f64,
    pub total_ms: f64,
    pub cache_epoch: i64,
}

/// Aggregate planner statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// LRU + TTL response cache shared by the query engines.
pub struct QueryPlanner {
    max_entries: usize,
    ttl: Duration,
    cache: Mutex<IndexMap<String, CacheEntry>>,
    hits: Mutex<u64>,
    misses: Mutex<u64>,
}

impl QueryPlanner {
    pub fn new(max_entries: usize, ttl_seconds: f64) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs_f64(ttl_seconds.max(0.1)),
            cache: Mutex::new(IndexMap::new()),
            hits: Mutex::new(0),
            misses: Mutex::new(0),
        }
    }

    /// Cache key: `tool:epoch:<canonical payload>`.
    pub fn cache_key(tool_name: &str, payload: &serde_json::Value, cache_epoch: i64) -> String {
        format!("{tool_name}:{cache_epoch}:{}", canonical_json(payload))
    }

    /// Look up a response, computing and caching it on a miss.
    pub fn get_or_compute<F>(
        &self,
        tool_name: &str,
        payload: &serde_json::Value,
        cache_epoch: i64,
        compute: F,
    ) -> Result<(serde_json::Value, PlannerTrace)>
    where
        F: FnOnce() -> Result<serde_json::Value>,
    {
        let key = Self::cache_key(tool_name, payload, cache_epoch);
        let lookup_started = Instant::now();

        self.evict_expired();
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if entry.expires_at > Instant::now() {
                    let value = entry.value.clone();
                    // Refresh LRU position.
                    let entry = cache.shift_remove(&key).unwrap();
                    cache.insert(key, entry);
                    *self.hits.lock() += 1;
                    let lookup_ms = lookup_started.elapsed().as_secs_f64() * 1000.0;
                    return Ok((
                        value,
                        PlannerTrace {
                            cache_mode: "cache_hit".to_string(),
                            lookup_ms: round3(lookup_ms),
                            compute_ms: 0.0,
                            total_ms: round3(lookup_ms),
                            cache_epoch,
                        },
                    ));
                }
            }
        }

        let compute_started = Instant::now();
        let value = compute()?;
        let compute_ms = compute_started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut cache = self.cache.lock();
            cache.insert(
                key,
                CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
            while cache.len() > self.max_entries {
                cache.shift_remove_index(0);
            }
        }
        *self.misses.lock() += 1;

        let total_ms = lookup_started.elapsed().as_secs_f64() * 1000.0;
        Ok((
            value,
            PlannerTrace {
                cache_mode: "cache_miss".to_string(),
                lookup_ms: round3((total_ms - compute_ms).max(0.0)),
                compute_ms: round3(compute_ms),
                total_ms: round3(total_ms),
                cache_epoch,
            },
        ))
    }

    fn evict_expired(&self) {
        let mut cache = self.cache.lock();
        let now = Instant::now();
        cache.retain(|_, entry| entry.expires_at > now);
    }

    pub fn stats(&self) -> PlannerStats {
        PlannerStats {
            entries: self.cache.lock().len(),
            max_entries: self.max_entries,
            hits: *self.hits.lock(),
            misses: *self.misses.lock(),
        }
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(512, 15.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_lookup_hits_cache() {
        let planner = QueryPlanner::new(8, 30.0);
        let payload = json!({"query": "login"});

        let (first, trace) = planner
            .get_or_compute("search", &payload, 1, || Ok(json!({"n": 1})))
            .unwrap();
        assert_eq!(trace.cache_mode, "cache_miss");

        let (second, trace) = planner
            .get_or_compute("search", &payload, 1, || Ok(json!({"n": 2})))
            .unwrap();
        assert_eq!(trace.cache_mode, "cache_hit");
        assert_eq!(first, second);
        assert_eq!(planner.stats().hits, 1);
    }

    #[test]
    fn epoch_bump_invalidates() {
        let planner = QueryPlanner::new(8, 30.0);
        let payload = json!({"query": "login"});

        planner
            .get_or_compute("search", &payload, 1, || Ok(json!({"n": 1})))
            .unwrap();
        let (value, trace) = planner
            .get_or_compute("search", &payload, 2, || Ok(json!({"n": 2})))
            .unwrap();
        assert_eq!(trace.cache_mode, "cache_miss");
        assert_eq!(value, json!({"n": 2}));
    }

    #[test]
    fn payload_key_order_is_normalized() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(
            QueryPlanner::cache_key("t", &a, 1),
            QueryPlanner::cache_key("t", &b, 1)
        );
    }

    #[test]
    fn capacity_is_bounded() {
        let planner = QueryPlanner::new(2, 30.0);
        for i in 0..5 {
            planner
                .get_or_compute("t", &json!({ "i": i }), 1, || Ok(json!(i)))
                .unwrap();
        }
        assert!(planner.stats().entries <= 2);
    }

    #[test]
    fn ttl_expires_entries() {
        let planner = QueryPlanner::new(8, 0.1);
        let payload = json!({"q": 1});
        planner
            .get_or_compute("t", &payload, 1, || Ok(json!(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(150));
        let (_, trace) = planner
            .get_or_compute("t", &payload, 1, || Ok(json!(2)))
            .unwrap();
        assert_eq!(trace.cache_mode, "cache_miss");
    }

    #[test]
    fn compute_errors_propagate_and_are_not_cached() {
        let planner = QueryPlanner::new(8, 30.0);
        let payload = json!({"q": 1});
        let err = planner.get_or_compute("t", &payload, 1, || {
            Err(crate::error::Error::Query("boom".into()))
        });
        assert!(err.is_err());
        let (_, trace) = planner
            .get_or_compute("t", &payload, 1, || Ok(json!(1)))
            .unwrap();
        assert_eq!(trace.cache_mode, "cache_miss");
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
