//! Bounded history logs
//!
//! FIFO ring buffer with a runtime capacity. Pushing past capacity evicts the
//! oldest entries; push and eviction happen under one lock so concurrent
//! appenders never observe the log above capacity.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use jump_types::{success_rate, Outcome};

/// Default capacity for attempt and sequence logs
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct BoundedLog<T> {
    entries: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, evicting from the front while over capacity.
    ///
    /// Returns the number of evicted entries.
    pub fn push(&self, entry: T) -> usize {
        let mut entries = self.lock();
        entries.push_back(entry);
        let mut evicted = 0;
        while entries.len() > self.capacity {
            entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The last `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Entry by position, 0 being the oldest retained
    pub fn get(&self, index: usize) -> Option<T> {
        self.lock().get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// Entries matching `predicate`, oldest first
    pub fn filter<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.lock().iter().filter(|e| predicate(e)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Outcome> BoundedLog<T> {
    /// Successful / total over the current contents; 0.0 when empty
    pub fn success_rate(&self) -> f64 {
        success_rate(self.lock().iter())
    }
}

impl<T: Clone> Default for BoundedLog<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jump_types::AttemptRecord;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn attempt(code: &str, success: bool) -> AttemptRecord {
        AttemptRecord {
            code: code.to_string(),
            timestamp: Utc::now(),
            success,
            duration_ms: 0,
            error_kind: None,
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let log = BoundedLog::new(10);
        for i in 0..15 {
            log.push(attempt(&format!("@c{}", i), true));
        }

        assert_eq!(log.len(), 10);
        let codes: Vec<String> = log.snapshot().into_iter().map(|a| a.code).collect();
        let expected: Vec<String> = (5..15).map(|i| format!("@c{}", i)).collect();
        assert_eq!(codes, expected);
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let log = BoundedLog::new(5);
        for code in ["@a", "@b", "@c"] {
            log.push(attempt(code, true));
        }
        let codes: Vec<String> = log.recent(2).into_iter().map(|a| a.code).collect();
        assert_eq!(codes, vec!["@b", "@c"]);
        assert_eq!(log.recent(50).len(), 3);
    }

    #[test]
    fn test_success_rate() {
        let log = BoundedLog::new(4);
        assert_eq!(log.success_rate(), 0.0);

        log.push(attempt("@a", true));
        log.push(attempt("@b", false));
        log.push(attempt("@c", true));
        log.push(attempt("@d", true));
        assert_eq!(log.success_rate(), 0.75);

        // evicts the only failure
        log.push(attempt("@e", true));
        log.push(attempt("@f", true));
        assert_eq!(log.success_rate(), 1.0);
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let log = Arc::new(BoundedLog::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.push(attempt(&format!("@t{}_{}", t, i), true));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 50);
    }
}
