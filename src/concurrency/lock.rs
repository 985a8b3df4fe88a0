//! Page-level strict two-phase locking.
//!
//! Every page has either a set of shared holders or one exclusive holder.
//! A transaction that cannot be granted its lock records wait-for edges to the
//! transactions blocking it and sleeps on the page's condition variable until
//! a release on that page wakes it to re-check. Before sleeping, the wait-for
//! graph is searched for a cycle through the requester; if one exists the
//! requester is refused with [`LockError::Deadlock`] and never sleeps.
//!
//! The lock table, the per-transaction held-lock index and the wait-for graph
//! sit behind a single mutex, so every grant, release and edge update is
//! atomic with respect to the others.

use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read access; any number of transactions may share it.
    Shared,
    /// Write access; excludes every other holder.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("deadlock: {tx} waiting on {page} would close a wait-for cycle")]
    Deadlock { tx: TransactionId, page: PageId },
}

/// Lock state of a single page.
#[derive(Debug, Default)]
struct PageLock {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
    /// Threads currently asleep on `cv`.
    waiting: usize,
    cv: Arc<Condvar>,
}

impl PageLock {
    fn holds(&self, tx: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.exclusive == Some(tx) || self.shared.contains(&tx),
            LockMode::Exclusive => self.exclusive == Some(tx),
        }
    }

    /// Transactions that keep `tx` from being granted `mode` right now. A
    /// shared holder upgrading to exclusive is blocked only by the others.
    fn blockers(&self, tx: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let holders = self
            .exclusive
            .map(|holder| (holder, LockMode::Exclusive))
            .into_iter()
            .chain(self.shared.iter().map(|&holder| (holder, LockMode::Shared)));

        let mut blocking: Vec<_> = holders
            .filter(|&(holder, held)| holder != tx && !mode.is_compatible_with(&held))
            .map(|(holder, _)| holder)
            .collect();
        blocking.sort();
        blocking
    }

    fn grant(&mut self, tx: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                self.shared.insert(tx);
            }
            LockMode::Exclusive => {
                self.shared.remove(&tx);
                self.exclusive = Some(tx);
            }
        }
    }

    fn release(&mut self, tx: TransactionId) -> bool {
        let was_shared = self.shared.remove(&tx);
        let was_exclusive = self.exclusive == Some(tx);
        if was_exclusive {
            self.exclusive = None;
        }
        was_shared || was_exclusive
    }

    fn is_idle(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none() && self.waiting == 0
    }
}

/// Wait-for graph: blocked transaction -> transactions it waits on.
/// Kept acyclic by refusing any edge set that would close a cycle.
#[derive(Debug, Default)]
struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    /// Replace the outgoing edges of `waiter`. A transaction waits on at most
    /// one page at a time, so its edges are exactly the current blockers.
    fn set_waiting(&mut self, waiter: TransactionId, holders: &[TransactionId]) {
        self.edges.insert(waiter, holders.iter().copied().collect());
    }

    fn remove_waiter(&mut self, waiter: TransactionId) {
        self.edges.remove(&waiter);
    }

    /// Forget `tx` entirely, both as a waiter and as someone being waited on.
    fn remove_transaction(&mut self, tx: TransactionId) {
        self.edges.remove(&tx);
        self.edges.retain(|_, holders| {
            holders.remove(&tx);
            !holders.is_empty()
        });
    }

    /// Breadth-first search from the transactions `tx` waits on. Since the
    /// graph was acyclic before `tx`'s edges were set, any cycle now present
    /// passes through `tx`, so reaching `tx` again is exactly the deadlock test.
    fn has_cycle_through(&self, tx: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<TransactionId> =
            self.edges.get(&tx).into_iter().flatten().copied().collect();

        while let Some(current) = queue.pop_front() {
            if current == tx {
                return true;
            }
            if visited.insert(current) {
                if let Some(next) = self.edges.get(&current) {
                    queue.extend(next.iter().copied());
                }
            }
        }

        false
    }

    fn waiting_on(&self, tx: TransactionId) -> Vec<TransactionId> {
        let mut holders: Vec<_> = self
            .edges
            .get(&tx)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pages: HashMap<PageId, PageLock>,
    /// Pages each transaction holds a lock on, for `release_all`.
    held: HashMap<TransactionId, HashSet<PageId>>,
    wait_for: WaitForGraph,
}

/// Lock manager enforcing strict 2PL at page granularity.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `page_id` for `tx`, blocking until it is granted.
    ///
    /// Returns immediately if `tx` already holds a sufficient lock. A sole
    /// shared holder asking for `Exclusive` is upgraded in place. Fails with
    /// [`LockError::Deadlock`] instead of blocking when waiting would close a
    /// wait-for cycle; in that case no lock state has changed.
    pub fn acquire(
        &self,
        tx: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let mut table = self.table.lock();

        loop {
            let cv = {
                let LockTable {
                    pages,
                    held,
                    wait_for,
                } = &mut *table;
                let lock = pages.entry(page_id).or_default();

                if lock.holds(tx, mode) {
                    wait_for.remove_waiter(tx);
                    return Ok(());
                }

                let blockers = lock.blockers(tx, mode);
                if blockers.is_empty() {
                    lock.grant(tx, mode);
                    held.entry(tx).or_default().insert(page_id);
                    wait_for.remove_waiter(tx);
                    debug!("{} granted {:?} lock on {}", tx, mode, page_id);
                    return Ok(());
                }

                wait_for.set_waiting(tx, &blockers);
                if wait_for.has_cycle_through(tx) {
                    wait_for.remove_waiter(tx);
                    warn!(
                        "{} refused {:?} lock on {}: deadlock with {:?}",
                        tx, mode, page_id, blockers
                    );
                    return Err(LockError::Deadlock { tx, page: page_id });
                }

                debug!(
                    "{} waiting for {:?} lock on {} held by {:?}",
                    tx, mode, page_id, blockers
                );
                lock.waiting += 1;
                Arc::clone(&lock.cv)
            };

            cv.wait(&mut table);

            // `waiting > 0` kept the entry alive while we slept.
            if let Some(lock) = table.pages.get_mut(&page_id) {
                lock.waiting -= 1;
            }
        }
    }

    /// Release `tx`'s lock on `page_id`. Releasing a lock that is not held is
    /// a no-op so that abort cleanup may release idempotently.
    pub fn release(&self, tx: TransactionId, page_id: PageId) {
        let mut table = self.table.lock();
        let LockTable { pages, held, .. } = &mut *table;

        let released = match pages.get_mut(&page_id) {
            Some(lock) => {
                let released = lock.release(tx);
                lock.cv.notify_all();
                if lock.is_idle() {
                    pages.remove(&page_id);
                }
                released
            }
            None => false,
        };

        if let Some(locked) = held.get_mut(&tx) {
            locked.remove(&page_id);
            if locked.is_empty() {
                held.remove(&tx);
            }
        }

        if !released {
            debug!("{} released {} without holding a lock on it", tx, page_id);
        }
    }

    /// Release every lock held by `tx` and drop it from the wait-for graph.
    pub fn release_all(&self, tx: TransactionId) {
        let mut table = self.table.lock();
        let LockTable {
            pages,
            held,
            wait_for,
        } = &mut *table;

        wait_for.remove_transaction(tx);

        let Some(locked) = held.remove(&tx) else {
            return;
        };

        debug!("{} releasing {} locks", tx, locked.len());
        for page_id in locked {
            if let Some(lock) = pages.get_mut(&page_id) {
                lock.release(tx);
                lock.cv.notify_all();
                if lock.is_idle() {
                    pages.remove(&page_id);
                }
            }
        }
    }

    /// Whether `tx` holds a shared or exclusive lock on `page_id`.
    pub fn holds(&self, tx: TransactionId, page_id: PageId) -> bool {
        self.holds_mode(tx, page_id, LockMode::Shared)
    }

    /// Whether `tx` holds a lock on `page_id` at least as strong as `mode`.
    pub fn holds_mode(&self, tx: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let table = self.table.lock();
        table
            .pages
            .get(&page_id)
            .is_some_and(|lock| lock.holds(tx, mode))
    }

    /// Pages `tx` currently holds a lock on, in page order.
    pub fn locked_pages(&self, tx: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<_> = table
            .held
            .get(&tx)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    /// Transactions `tx` is blocked on, empty if it is not waiting.
    pub fn waiting_on(&self, tx: TransactionId) -> Vec<TransactionId> {
        self.table.lock().wait_for.waiting_on(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn page(n: u32) -> PageId {
        PageId::new(TableId(1), n)
    }

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    /// Spin until `waiter` shows up in the wait-for graph.
    fn wait_until_blocked(manager: &LockManager, waiter: TransactionId) {
        for _ in 0..500 {
            if !manager.waiting_on(waiter).is_empty() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("{} never blocked", waiter);
    }

    #[test]
    fn test_lock_compatibility() {
        assert!(LockMode::Shared.is_compatible_with(&LockMode::Shared));
        assert!(!LockMode::Shared.is_compatible_with(&LockMode::Exclusive));
        assert!(!LockMode::Exclusive.is_compatible_with(&LockMode::Shared));
        assert!(!LockMode::Exclusive.is_compatible_with(&LockMode::Exclusive));
    }

    #[test]
    fn test_blockers_follow_compatibility() {
        let mut lock = PageLock::default();
        lock.grant(tx(1), LockMode::Shared);
        lock.grant(tx(2), LockMode::Shared);

        assert!(lock.blockers(tx(3), LockMode::Shared).is_empty());
        assert_eq!(lock.blockers(tx(3), LockMode::Exclusive), vec![tx(1), tx(2)]);
        assert_eq!(lock.blockers(tx(1), LockMode::Exclusive), vec![tx(2)]);

        lock.release(tx(2));
        assert!(lock.blockers(tx(1), LockMode::Exclusive).is_empty());

        lock.grant(tx(1), LockMode::Exclusive);
        assert!(lock.blockers(tx(1), LockMode::Shared).is_empty());
        assert_eq!(lock.blockers(tx(4), LockMode::Shared), vec![tx(1)]);
    }

    #[test]
    fn test_multiple_shared_locks() {
        let manager = LockManager::new();

        for n in 1..=3 {
            manager.acquire(tx(n), page(1), LockMode::Shared).unwrap();
        }
        for n in 1..=3 {
            assert!(manager.holds(tx(n), page(1)));
            assert!(!manager.holds_mode(tx(n), page(1), LockMode::Exclusive));
        }
    }

    #[test]
    fn test_reacquire_is_idempotent() {
        let manager = LockManager::new();

        manager.acquire(tx(1), page(1), LockMode::Exclusive).unwrap();
        manager.acquire(tx(1), page(1), LockMode::Exclusive).unwrap();
        // Exclusive implies shared.
        manager.acquire(tx(1), page(1), LockMode::Shared).unwrap();

        assert!(manager.holds_mode(tx(1), page(1), LockMode::Exclusive));
        assert_eq!(manager.locked_pages(tx(1)), vec![page(1)]);

        let table = manager.table.lock();
        assert!(table.pages[&page(1)].shared.is_empty());
    }

    #[test]
    fn test_sole_shared_holder_upgrades() {
        let manager = LockManager::new();

        manager.acquire(tx(1), page(1), LockMode::Shared).unwrap();
        manager.acquire(tx(1), page(1), LockMode::Exclusive).unwrap();

        assert!(manager.holds_mode(tx(1), page(1), LockMode::Exclusive));
        let table = manager.table.lock();
        let lock = &table.pages[&page(1)];
        assert!(lock.shared.is_empty(), "shared and exclusive must not coexist");
        assert_eq!(lock.exclusive, Some(tx(1)));
    }

    #[test]
    fn test_upgrade_waits_for_other_readers() {
        let manager = Arc::new(LockManager::new());
        manager.acquire(tx(1), page(1), LockMode::Shared).unwrap();
        manager.acquire(tx(2), page(1), LockMode::Shared).unwrap();

        let m = Arc::clone(&manager);
        let upgrader = thread::spawn(move || m.acquire(tx(1), page(1), LockMode::Exclusive));

        wait_until_blocked(&manager, tx(1));
        assert_eq!(manager.waiting_on(tx(1)), vec![tx(2)]);
        // Still a reader while waiting: no unlocked window.
        assert!(manager.holds(tx(1), page(1)));

        manager.release_all(tx(2));
        upgrader.join().unwrap().unwrap();

        assert!(manager.holds_mode(tx(1), page(1), LockMode::Exclusive));
        assert!(manager.waiting_on(tx(1)).is_empty());
    }

    #[test]
    fn test_exclusive_blocks_shared_until_release_all() {
        let manager = Arc::new(LockManager::new());
        manager.acquire(tx(1), page(1), LockMode::Exclusive).unwrap();

        let m = Arc::clone(&manager);
        let reader = thread::spawn(move || m.acquire(tx(2), page(1), LockMode::Shared));

        wait_until_blocked(&manager, tx(2));
        assert!(!manager.holds(tx(2), page(1)));
        assert_eq!(manager.waiting_on(tx(2)), vec![tx(1)]);

        manager.release_all(tx(1));
        reader.join().unwrap().unwrap();

        assert!(manager.holds(tx(2), page(1)));
        assert!(!manager.holds(tx(1), page(1)));
    }

    #[test]
    fn test_single_release_wakes_waiter() {
        let manager = Arc::new(LockManager::new());
        manager.acquire(tx(1), page(1), LockMode::Exclusive).unwrap();
        manager.acquire(tx(1), page(2), LockMode::Exclusive).unwrap();

        let m = Arc::clone(&manager);
        let writer = thread::spawn(move || m.acquire(tx(2), page(1), LockMode::Exclusive));

        wait_until_blocked(&manager, tx(2));
        manager.release(tx(1), page(1));
        writer.join().unwrap().unwrap();

        assert!(manager.holds_mode(tx(2), page(1), LockMode::Exclusive));
        assert_eq!(manager.locked_pages(tx(1)), vec![page(2)]);
    }

    #[test]
    fn test_deadlock_exactly_one_victim() {
        let manager = Arc::new(LockManager::new());
        manager.acquire(tx(1), page(1), LockMode::Exclusive).unwrap();
        manager.acquire(tx(2), page(2), LockMode::Exclusive).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let spawn = |me: TransactionId, want: PageId| {
            let m = Arc::clone(&manager);
            let b = Arc::clone(&barrier);
            thread::spawn(move || {
                b.wait();
                let result = m.acquire(me, want, LockMode::Exclusive);
                // Either way the transaction ends and frees its locks.
                m.release_all(me);
                result
            })
        };

        let t1 = spawn(tx(1), page(2));
        let t2 = spawn(tx(2), page(1));
        let results = [t1.join().unwrap(), t2.join().unwrap()];

        let deadlocks = results
            .iter()
            .filter(|r| matches!(r, Err(LockError::Deadlock { .. })))
            .count();
        assert_eq!(deadlocks, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn test_deadlock_on_double_upgrade() {
        let manager = Arc::new(LockManager::new());
        manager.acquire(tx(1), page(1), LockMode::Shared).unwrap();
        manager.acquire(tx(2), page(1), LockMode::Shared).unwrap();

        let m = Arc::clone(&manager);
        let first = thread::spawn(move || m.acquire(tx(1), page(1), LockMode::Exclusive));
        wait_until_blocked(&manager, tx(1));

        // tx2 would wait on tx1 which waits on tx2.
        let result = manager.acquire(tx(2), page(1), LockMode::Exclusive);
        assert_eq!(
            result,
            Err(LockError::Deadlock {
                tx: tx(2),
                page: page(1)
            })
        );

        // The refused request left tx2's shared lock and no wait edge behind.
        assert!(manager.holds(tx(2), page(1)));
        assert!(manager.waiting_on(tx(2)).is_empty());

        manager.release_all(tx(2));
        first.join().unwrap().unwrap();
        assert!(manager.holds_mode(tx(1), page(1), LockMode::Exclusive));
    }

    #[test]
    fn test_three_way_cycle() {
        let manager = Arc::new(LockManager::new());
        for n in 1..=3 {
            manager.acquire(tx(n), page(n as u32), LockMode::Exclusive).unwrap();
        }

        // tx1 -> tx2 -> tx3, then tx3 -> tx1 closes the cycle.
        let m = Arc::clone(&manager);
        let a = thread::spawn(move || m.acquire(tx(1), page(2), LockMode::Exclusive));
        wait_until_blocked(&manager, tx(1));
        let m = Arc::clone(&manager);
        let b = thread::spawn(move || m.acquire(tx(2), page(3), LockMode::Exclusive));
        wait_until_blocked(&manager, tx(2));

        assert!(matches!(
            manager.acquire(tx(3), page(1), LockMode::Exclusive),
            Err(LockError::Deadlock { .. })
        ));

        manager.release_all(tx(3));
        b.join().unwrap().unwrap();
        manager.release_all(tx(2));
        a.join().unwrap().unwrap();
        assert!(manager.holds_mode(tx(1), page(2), LockMode::Exclusive));
    }

    #[test]
    fn test_shared_diamond_is_not_a_deadlock() {
        let manager = Arc::new(LockManager::new());
        // tx2 and tx3 both read page 1; tx4 holds page 2 and tx2, tx3 queue for it.
        manager.acquire(tx(2), page(1), LockMode::Shared).unwrap();
        manager.acquire(tx(3), page(1), LockMode::Shared).unwrap();
        manager.acquire(tx(4), page(2), LockMode::Exclusive).unwrap();

        let mut waiters = Vec::new();
        for n in [2, 3] {
            let m = Arc::clone(&manager);
            waiters.push(thread::spawn(move || {
                m.acquire(tx(n), page(2), LockMode::Shared)
            }));
            wait_until_blocked(&manager, tx(n));
        }

        // tx1 waits on both readers, which both reach tx4: no cycle.
        let m = Arc::clone(&manager);
        let writer = thread::spawn(move || m.acquire(tx(1), page(1), LockMode::Exclusive));
        wait_until_blocked(&manager, tx(1));

        manager.release_all(tx(4));
        for w in waiters {
            w.join().unwrap().unwrap();
        }
        manager.release_all(tx(2));
        manager.release_all(tx(3));
        writer.join().unwrap().unwrap();
    }

    #[test]
    fn test_release_unheld_is_noop() {
        let manager = LockManager::new();
        manager.acquire(tx(1), page(1), LockMode::Shared).unwrap();

        manager.release(tx(2), page(1));
        manager.release(tx(2), page(9));
        manager.release_all(tx(7));

        assert!(manager.holds(tx(1), page(1)));
    }

    #[test]
    fn test_entries_removed_when_idle() {
        let manager = LockManager::new();
        manager.acquire(tx(1), page(1), LockMode::Shared).unwrap();
        manager.acquire(tx(1), page(2), LockMode::Exclusive).unwrap();
        manager.release_all(tx(1));

        let table = manager.table.lock();
        assert!(table.pages.is_empty());
        assert!(table.held.is_empty());
        assert!(table.wait_for.edges.is_empty());
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let manager = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let readers_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=8u64)
            .map(|n| {
                let m = Arc::clone(&manager);
                let inside = Arc::clone(&inside);
                let readers_inside = Arc::clone(&readers_inside);
                thread::spawn(move || {
                    for round in 0..50u64 {
                        let me = tx(n * 1000 + round);
                        let mode = if (n + round) % 3 == 0 {
                            LockMode::Exclusive
                        } else {
                            LockMode::Shared
                        };
                        m.acquire(me, page(1), mode).unwrap();
                        match mode {
                            LockMode::Exclusive => {
                                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                                assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
                                inside.fetch_sub(1, Ordering::SeqCst);
                            }
                            LockMode::Shared => {
                                readers_inside.fetch_add(1, Ordering::SeqCst);
                                assert_eq!(inside.load(Ordering::SeqCst), 0);
                                readers_inside.fetch_sub(1, Ordering::SeqCst);
                            }
                        }
                        m.release_all(me);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
