// src/cache.rs
//! In-memory TTL cache shielding the upstream APIs from rate limits.
//!
//! Entries live for a configurable window and are overwritten on refresh;
//! there is no other eviction. When a refetch fails, the last good value is
//! served with a staleness marker instead of surfacing the upstream error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use serde_json::Value;

pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

struct CacheEntry {
    payload: Value,
    fetched_at: Instant,
}

/// A cached payload plus whether it was served past its TTL as a fallback.
#[derive(Clone, Debug)]
pub struct Cached {
    pub payload: Value,
    pub stale: bool,
}

#[derive(Default)]
pub struct Cache {
    // Locked only around map access, never across a fetch await.
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Cache {
    pub fn new() -> Cache {
        Cache::default()
    }

    /// Return the entry for `key` if it is younger than `ttl`; otherwise run
    /// `fetch` and store the result. If the fetch fails and an older entry
    /// exists, it is returned with `stale: true`; with no prior entry the
    /// error propagates.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Cached, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>>,
    {
        if let Some(fresh) = self.lookup(key, Some(ttl)) {
            return Ok(Cached {
                payload: fresh,
                stale: false,
            });
        }

        match fetch().await {
            Ok(payload) => {
                self.store(key, payload.clone());
                Ok(Cached {
                    payload,
                    stale: false,
                })
            }
            Err(e) => match self.lookup(key, None) {
                Some(old) => {
                    warn!("Refetch for {} failed ({}), serving stale entry", key, e);
                    Ok(Cached {
                        payload: old,
                        stale: true,
                    })
                }
                None => Err(e),
            },
        }
    }

    fn lookup(&self, key: &str, max_age: Option<Duration>) -> Option<Value> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if let Some(ttl) = max_age {
            if entry.fetched_at.elapsed() >= ttl {
                return None;
            }
        }
        Some(entry.payload.clone())
    }

    fn store(&self, key: &str, payload: Value) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn fresh_hit_fetches_once() {
        let cache = Cache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let got = cache
                .get_or_fetch("prices:btc", MINUTE, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(42000.0))
                })
                .await
                .unwrap();
            assert_eq!(got.payload, json!(42000.0));
            assert!(!got.stale);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expiry_triggers_one_refetch() {
        let cache = Cache::new();
        let calls = AtomicUsize::new(0);

        // Zero TTL: every lookup is past its window.
        for expected in [json!(1), json!(2)] {
            let got = cache
                .get_or_fetch("news:all", Duration::ZERO, || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(n + 1))
                })
                .await
                .unwrap();
            assert_eq!(got.payload, expected);
            assert!(!got.stale);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refetch_serves_stale_value() {
        let cache = Cache::new();
        cache
            .get_or_fetch("market:btc:1D", MINUTE, || async { Ok(json!([1, 2, 3])) })
            .await
            .unwrap();

        let got = cache
            .get_or_fetch("market:btc:1D", Duration::ZERO, || async {
                Err::<Value, FetchError>("upstream down".into())
            })
            .await
            .unwrap();
        assert_eq!(got.payload, json!([1, 2, 3]));
        assert!(got.stale);
    }

    #[tokio::test]
    async fn failed_miss_propagates_error() {
        let cache = Cache::new();
        let res = cache
            .get_or_fetch("prices:eth", MINUTE, || async {
                Err::<Value, FetchError>("upstream down".into())
            })
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let cache = Cache::new();
        cache
            .get_or_fetch("a", MINUTE, || async { Ok(json!("a")) })
            .await
            .unwrap();
        let got = cache
            .get_or_fetch("b", MINUTE, || async { Ok(json!("b")) })
            .await
            .unwrap();
        assert_eq!(got.payload, json!("b"));
    }
}
