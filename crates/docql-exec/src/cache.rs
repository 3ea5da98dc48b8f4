//! Compiled-query cache keyed by structural signature.
//!
//! Each signature owns a once-cell: concurrent callers with the same
//! signature wait for the first compilation instead of running their own.
//! Failures are cached too, so a rejected shape is rejected without
//! recompiling. When the cache is full it is flushed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use docql_core::error::QueryError;
use docql_core::hash::Hash256;
use docql_planner::CompiledPlan;

type Slot = Arc<OnceLock<Result<Arc<CompiledPlan>, QueryError>>>;

#[derive(Debug)]
pub struct QueryCache {
    capacity: usize,
    slots: Mutex<HashMap<Hash256, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The plan for `signature`, compiling it with `compile` at most once.
    pub fn get_or_compile<F>(&self, signature: Hash256, compile: F) -> Result<Arc<CompiledPlan>, QueryError>
    where
        F: FnOnce() -> Result<CompiledPlan, QueryError>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !slots.contains_key(&signature) && slots.len() >= self.capacity {
                #[cfg(feature = "tracing")]
                tracing::debug!(entries = slots.len(), "query cache full, flushing");
                slots.clear();
            }
            slots.entry(signature).or_default().clone()
        };

        let mut compiled_here = false;
        let result = slot.get_or_init(|| {
            compiled_here = true;
            compile().map(Arc::new)
        });
        if compiled_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(signature = %signature.short_hex(), hit = !compiled_here, "query cache");

        result.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.lock().map(|s| s.len()).unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut s) = self.slots.lock() {
            s.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::hash::hash_str;
    use docql_core::plan::{Finish, ResultShape};
    use docql_planner::{PointReadPlan, ValueSlot};
    use std::sync::atomic::AtomicUsize;

    fn plan() -> CompiledPlan {
        CompiledPlan::PointRead(PointReadPlan {
            entity: "Customer".into(),
            container: "Store".into(),
            id: ValueSlot::Parameter("__id_0".into()),
            partition_key: None,
            discriminators: vec![],
            result_shape: ResultShape::Value,
            finish: Finish::Sequence,
        })
    }

    #[test]
    fn compiles_once_per_signature() {
        let cache = QueryCache::new(8);
        let calls = AtomicUsize::new(0);
        let compile = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(plan())
        };
        let a = cache.get_or_compile(hash_str("a"), compile).unwrap();
        let b = cache.get_or_compile(hash_str("a"), compile).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { entries: 1, hits: 1, misses: 1 });
    }

    #[test]
    fn failures_are_replayed() {
        let cache = QueryCache::new(8);
        let err = QueryError::NestedPagingUnsupported {
            expression: "Customer.Take(1).Take(2)".into(),
        };
        let first = cache.get_or_compile(hash_str("x"), || Err(err.clone()));
        let second = cache.get_or_compile(hash_str("x"), || Ok(plan()));
        assert_eq!(first.unwrap_err(), err);
        assert_eq!(second.unwrap_err(), err);
    }

    #[test]
    fn concurrent_callers_share_one_compilation() {
        let cache = Arc::new(QueryCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_compile(hash_str("shared"), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(plan())
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_cache_is_flushed() {
        let cache = QueryCache::new(2);
        for key in ["a", "b", "c"] {
            cache.get_or_compile(hash_str(key), || Ok(plan())).unwrap();
        }
        assert_eq!(cache.stats().entries, 1);
    }
}
