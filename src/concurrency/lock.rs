//! Page-level lock management for strict two-phase locking.
//!
//! Every page is either free, shared by a set of readers, or held exclusively by
//! one writer. A request that cannot be granted parks the calling thread on the
//! page's condition variable after recording wait-for edges to the current
//! holders; a request whose edges would close a cycle fails with
//! [`StorageError::Deadlock`] instead of waiting.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use dashmap::DashMap;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// Access a caller asks for when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn lock_mode(&self) -> LockMode {
        match self {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Holders of one page. Never has readers and a writer at the same time.
#[derive(Debug, Default)]
struct LockState {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockState {
    /// Exclusive satisfies any request, shared satisfies a shared request.
    fn holds(&self, tid: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.exclusive == Some(tid) || self.shared.contains(&tid),
            LockMode::Exclusive => self.exclusive == Some(tid),
        }
    }

    /// Other transactions standing between `tid` and `mode`, sorted. Empty means grantable.
    fn blockers(&self, tid: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut holders: Vec<TransactionId> = self
            .exclusive
            .iter()
            .map(|&holder| (holder, LockMode::Exclusive))
            .chain(self.shared.iter().map(|&holder| (holder, LockMode::Shared)))
            .filter(|(holder, held)| *holder != tid && !mode.is_compatible_with(held))
            .map(|(holder, _)| holder)
            .collect();
        holders.sort();
        holders
    }

    fn grant(&mut self, tid: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                self.shared.insert(tid);
            }
            LockMode::Exclusive => {
                // Upgrade: the requester was the only reader.
                self.shared.remove(&tid);
                self.exclusive = Some(tid);
            }
        }
    }

    fn release(&mut self, tid: TransactionId) -> bool {
        let was_shared = self.shared.remove(&tid);
        let was_exclusive = self.exclusive == Some(tid);
        if was_exclusive {
            self.exclusive = None;
        }
        was_shared || was_exclusive
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

#[derive(Debug, Default)]
struct PageLock {
    state: Mutex<LockState>,
    waiters: Condvar,
}

/// Which transactions each blocked transaction is waiting on. Kept acyclic.
#[derive(Debug, Default)]
struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    /// Replaces the edges out of `waiter` with edges to `holders`. Returns
    /// false, leaving `waiter` with no outgoing edges, if any holder can
    /// already reach `waiter`.
    fn wait_on(&mut self, waiter: TransactionId, holders: &[TransactionId]) -> bool {
        self.edges.remove(&waiter);
        if holders.iter().any(|&holder| self.reaches(holder, waiter)) {
            return false;
        }
        self.edges.insert(waiter, holders.iter().copied().collect());
        true
    }

    /// Iterative depth-first search from `from` looking for `target`.
    fn reaches(&self, from: TransactionId, target: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(&current) {
                stack.extend(next.iter().copied().filter(|tid| !visited.contains(tid)));
            }
        }

        false
    }

    fn clear_waiter(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
    }

    /// Forgets a finished transaction, including edges other waiters hold to it.
    fn remove_transaction(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
        self.edges.retain(|_, holders| {
            holders.remove(&tid);
            !holders.is_empty()
        });
    }
}

/// Lock table for every page served by one buffer pool.
#[derive(Debug, Default)]
pub struct LockManager {
    pages: DashMap<PageId, Arc<PageLock>>,
    held: DashMap<TransactionId, HashMap<PageId, LockMode>>,
    waits_for: Mutex<WaitForGraph>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `tid` holds `page_id` under `perm`, or fails with
    /// `Deadlock` if waiting would close a wait-for cycle. Holders are never
    /// preempted; the requester is always the victim.
    pub fn acquire(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permission,
    ) -> StorageResult<()> {
        let mode = perm.lock_mode();
        let lock = self.page_lock(page_id);
        let mut state = lock.state.lock();

        if state.holds(tid, mode) {
            return Ok(());
        }

        loop {
            let blockers = state.blockers(tid, mode);
            if blockers.is_empty() {
                state.grant(tid, mode);
                drop(state);
                // Waiters refresh their edges against the new holder set.
                lock.waiters.notify_all();
                self.waits_for.lock().clear_waiter(tid);
                self.held.entry(tid).or_default().insert(page_id, mode);
                trace!("{} granted {:?} on {}", tid, mode, page_id);
                return Ok(());
            }

            drop(state);
            if !self.waits_for.lock().wait_on(tid, &blockers) {
                warn!(
                    "deadlock: {} waiting for {:?} on {} held by {:?}",
                    tid, mode, page_id, blockers
                );
                return Err(StorageError::Deadlock { tid, page_id });
            }

            state = lock.state.lock();
            if state.blockers(tid, mode) != blockers {
                // Holders changed while the graph was updated.
                continue;
            }
            debug!("{} waits for {} held by {:?}", tid, page_id, blockers);
            lock.waiters.wait(&mut state);
        }
    }

    /// Drops whatever lock `tid` holds on `page_id` and wakes its waiters.
    pub fn release(&self, tid: TransactionId, page_id: PageId) {
        self.release_page_lock(tid, page_id);

        if let Some(mut pages) = self.held.get_mut(&tid) {
            pages.remove(&page_id);
        }
        self.held.remove_if(&tid, |_, pages| pages.is_empty());
    }

    /// Releases every lock `tid` holds. Called once, when `tid` completes.
    pub fn release_all(&self, tid: TransactionId) {
        let pages = self
            .held
            .remove(&tid)
            .map(|(_, pages)| pages)
            .unwrap_or_default();

        for page_id in pages.keys() {
            self.release_page_lock(tid, *page_id);
        }
        self.waits_for.lock().remove_transaction(tid);

        debug!("{} released {} locks", tid, pages.len());
    }

    /// Whether `tid` holds any lock on `page_id`.
    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.pages
            .get(&page_id)
            .map(|lock| lock.state.lock().holds(tid, LockMode::Shared))
            .unwrap_or(false)
    }

    /// The strongest mode `tid` holds on `page_id`, if any.
    pub fn lock_mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        self.held
            .get(&tid)
            .and_then(|pages| pages.get(&page_id).copied())
    }

    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.held
            .get(&tid)
            .map(|pages| pages.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Pages `tid` holds exclusively: every page it may have dirtied.
    pub fn exclusive_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.held
            .get(&tid)
            .map(|pages| {
                pages
                    .iter()
                    .filter(|(_, mode)| **mode == LockMode::Exclusive)
                    .map(|(page_id, _)| *page_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn page_lock(&self, page_id: PageId) -> Arc<PageLock> {
        Arc::clone(&self.pages.entry(page_id).or_default())
    }

    fn release_page_lock(&self, tid: TransactionId, page_id: PageId) {
        let Some(lock) = self.pages.get(&page_id).map(|entry| Arc::clone(entry.value())) else {
            return;
        };

        let released = lock.state.lock().release(tid);
        if released {
            lock.waiters.notify_all();
            trace!("{} released {}", tid, page_id);
        }
        drop(lock);

        // Only an entry nobody is waiting on may go; a waiter holds a clone.
        self.pages.remove_if(&page_id, |_, lock| {
            Arc::strong_count(lock) == 1 && lock.state.lock().is_free()
        });
    }
}
