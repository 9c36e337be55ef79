use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Read,
    Write,
}

/// A wait edge would close a cycle in the wait-for graph; the waiting
/// transaction must be resolved by serial re-execution instead.
#[derive(Debug, thiserror::Error)]
#[error("key lock cycle involving context {0}")]
pub struct KeyLockCycle(pub u64);

#[derive(Default)]
struct LockState {
    readers: HashSet<u64>,
    writers: HashSet<u64>,
}

#[derive(Default)]
struct LedgerInner {
    locks: HashMap<(String, String), LockState>,
    /// waiter context → contexts it waits on; used for cycle detection
    waiting: HashMap<u64, HashSet<u64>>,
}

/// Per-block ledger of `(table, key, mode)` records, one owner context
/// per transaction.
///
/// Two usage modes:
/// - [`KeyLockLedger::record`] notes an access without excluding anyone.
///   DAG workers run on private layers, so parallel holders are legal;
///   the scheduler compares recorded sets afterwards to catch accesses
///   that escaped the declared conflict fields.
/// - [`KeyLockLedger::try_acquire`]/[`KeyLockLedger::acquire`] is the
///   exclusive protocol used across frames: a conflicting acquisition
///   either surfaces the holders immediately or parks the caller until
///   the holder releases, and a wait edge that would close a cycle
///   fails with [`KeyLockCycle`].
#[derive(Default)]
pub struct KeyLockLedger {
    inner: Mutex<LedgerInner>,
    released: Notify,
}

impl KeyLockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Notes an access; never blocks, never fails.
    pub fn record(&self, context_id: u64, table: &str, key: &str, mode: LockMode) {
        let mut inner = self.lock();
        let state = inner
            .locks
            .entry((table.to_string(), key.to_string()))
            .or_default();
        match mode {
            LockMode::Read => {
                state.readers.insert(context_id);
            }
            LockMode::Write => {
                state.writers.insert(context_id);
            }
        }
    }

    /// Attempts an exclusive acquisition; on conflict returns the holder
    /// contexts without waiting.
    pub fn try_acquire(
        &self,
        context_id: u64,
        table: &str,
        key: &str,
        mode: LockMode,
    ) -> Result<(), Vec<u64>> {
        let mut inner = self.lock();
        let state = inner
            .locks
            .entry((table.to_string(), key.to_string()))
            .or_default();

        let mut holders: Vec<u64> = state
            .writers
            .iter()
            .copied()
            .filter(|&w| w != context_id)
            .collect();
        if mode == LockMode::Write {
            holders.extend(state.readers.iter().copied().filter(|&r| r != context_id));
        }
        holders.sort_unstable();
        holders.dedup();
        if !holders.is_empty() {
            return Err(holders);
        }

        match mode {
            LockMode::Read => {
                state.readers.insert(context_id);
            }
            LockMode::Write => {
                state.writers.insert(context_id);
            }
        }
        Ok(())
    }

    /// Acquires exclusively, parking the caller until the holders
    /// release. Fails with [`KeyLockCycle`] when the wait edge would
    /// close a cycle.
    pub async fn acquire(
        &self,
        context_id: u64,
        table: &str,
        key: &str,
        mode: LockMode,
    ) -> Result<(), KeyLockCycle> {
        loop {
            // arm the wakeup before checking state so a release between
            // the check and the await is not lost
            let released = self.released.notified();

            let holders = match self.try_acquire(context_id, table, key, mode) {
                Ok(()) => return Ok(()),
                Err(holders) => holders,
            };

            {
                let mut inner = self.lock();
                let edges = inner.waiting.entry(context_id).or_default();
                edges.extend(holders.iter().copied());
                if Self::has_cycle(&inner.waiting, context_id) {
                    inner.waiting.remove(&context_id);
                    return Err(KeyLockCycle(context_id));
                }
            }
            trace!(context_id, table, key, ?holders, "waiting on key lock");
            released.await;
            self.lock().waiting.remove(&context_id);
        }
    }

    fn has_cycle(waiting: &HashMap<u64, HashSet<u64>>, start: u64) -> bool {
        // DFS from start along wait edges; revisiting start is a cycle
        let mut stack: Vec<u64> = waiting
            .get(&start)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == start {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = waiting.get(&node) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Drops every record held by `context_id` and wakes waiters.
    pub fn release_all(&self, context_id: u64) {
        {
            let mut inner = self.lock();
            inner.locks.retain(|_, state| {
                state.readers.remove(&context_id);
                state.writers.remove(&context_id);
                !state.readers.is_empty() || !state.writers.is_empty()
            });
            inner.waiting.remove(&context_id);
        }
        self.released.notify_waiters();
    }

    /// The `(table, key, mode)` records held by `context_id`, sorted;
    /// a written key reports `Write` even when it was also read.
    pub fn held_locks(&self, context_id: u64) -> Vec<(String, String, LockMode)> {
        let inner = self.lock();
        let mut held: Vec<(String, String, LockMode)> = inner
            .locks
            .iter()
            .filter_map(|((table, key), state)| {
                if state.writers.contains(&context_id) {
                    Some((table.clone(), key.clone(), LockMode::Write))
                } else if state.readers.contains(&context_id) {
                    Some((table.clone(), key.clone(), LockMode::Read))
                } else {
                    None
                }
            })
            .collect();
        held.sort();
        held
    }

    /// True when the two contexts' recorded sets conflict: one wrote a
    /// key the other touched.
    pub fn conflicts(&self, a: u64, b: u64) -> bool {
        let inner = self.lock();
        inner.locks.values().any(|state| {
            let a_writes = state.writers.contains(&a);
            let b_writes = state.writers.contains(&b);
            let a_touches = a_writes || state.readers.contains(&a);
            let b_touches = b_writes || state.readers.contains(&b);
            (a_writes && b_touches) || (b_writes && a_touches)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn readers_share_writers_exclude() {
        let ledger = KeyLockLedger::new();
        assert!(ledger.try_acquire(1, "t", "k", LockMode::Read).is_ok());
        assert!(ledger.try_acquire(2, "t", "k", LockMode::Read).is_ok());
        assert_eq!(
            ledger.try_acquire(3, "t", "k", LockMode::Write),
            Err(vec![1, 2])
        );
        ledger.release_all(1);
        ledger.release_all(2);
        assert!(ledger.try_acquire(3, "t", "k", LockMode::Write).is_ok());
        assert_eq!(ledger.try_acquire(4, "t", "k", LockMode::Read), Err(vec![3]));
    }

    #[test]
    fn reacquire_by_owner_is_free() {
        let ledger = KeyLockLedger::new();
        assert!(ledger.try_acquire(1, "t", "k", LockMode::Write).is_ok());
        assert!(ledger.try_acquire(1, "t", "k", LockMode::Write).is_ok());
        assert!(ledger.try_acquire(1, "t", "k", LockMode::Read).is_ok());
    }

    #[test]
    fn recorded_sets_conflict_only_through_writes() {
        let ledger = KeyLockLedger::new();
        ledger.record(1, "t", "a", LockMode::Read);
        ledger.record(2, "t", "a", LockMode::Read);
        assert!(!ledger.conflicts(1, 2));

        ledger.record(1, "t", "b", LockMode::Write);
        assert!(!ledger.conflicts(1, 2));

        ledger.record(2, "t", "b", LockMode::Read);
        assert!(ledger.conflicts(1, 2));
    }

    #[test]
    fn record_allows_parallel_writers() {
        let ledger = KeyLockLedger::new();
        ledger.record(1, "t", "k", LockMode::Write);
        ledger.record(2, "t", "k", LockMode::Write);
        assert!(ledger.conflicts(1, 2));
        assert_eq!(
            ledger.held_locks(2),
            vec![("t".into(), "k".into(), LockMode::Write)]
        );
    }

    #[tokio::test]
    async fn waiters_wake_on_release() {
        let ledger = Arc::new(KeyLockLedger::new());
        assert!(ledger.try_acquire(1, "t", "k", LockMode::Write).is_ok());

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.acquire(2, "t", "k", LockMode::Write).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger.release_all(1);

        let acquired = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finishes")
            .expect("task joins");
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn wait_cycle_is_detected() {
        let ledger = Arc::new(KeyLockLedger::new());
        assert!(ledger.try_acquire(1, "t", "a", LockMode::Write).is_ok());
        assert!(ledger.try_acquire(2, "t", "b", LockMode::Write).is_ok());

        // 1 waits on b (held by 2); then 2 waiting on a closes the cycle
        let first = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.acquire(1, "t", "b", LockMode::Write).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = ledger.acquire(2, "t", "a", LockMode::Write).await;
        assert!(matches!(second, Err(KeyLockCycle(2))));

        // resolve: release 2 entirely, the first waiter proceeds
        ledger.release_all(2);
        let outcome = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .expect("first finishes")
            .expect("task joins");
        assert!(outcome.is_ok());
    }
}
