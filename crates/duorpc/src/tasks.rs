//! # Task Pool
//!
//! Fixed-size bookkeeping for outbound `Invoke`s. Each call borrows one slot,
//! sends a task id naming that slot, and waits on a oneshot for the matching
//! `Result`.
//!
//! ## Invariants
//!
//! - **Free Stack**: Holds every free index exactly once. Reserve pops and
//!   release pushes, both O(1). Releasing a free or unknown id is refused, so the
//!   stack never holds duplicates.
//! - **Generations**: A task id is `index + capacity * generation`, and a slot's
//!   generation moves on every release. An id from an earlier reservation of the
//!   same slot never matches again, so a late `Result` for a cancelled call
//!   cannot reach the call that reused its slot. Ids stay within `0..=i32::MAX`.
//! - **Single Resolution**: A slot's sender is taken out on the first matching
//!   result. Later results for the same id find nothing to resolve.
//! - **One Release**: The `PendingCall` owns the slot and releases it exactly
//!   once, on completion or on drop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use duopack::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::Error;
use crate::error::Result;
use crate::handles::PeerId;
use crate::handles::TaskId;
use crate::lock;

/// Largest task id that fits the wire.
const MAX_TASK_ID: u64 = i32::MAX as u64;

enum Slot {
    Free,
    Pending { peer: PeerId, tx: oneshot::Sender<Value> },
    /// Value delivered or call abandoned; waiting for the owner to release.
    Settled,
}

struct Entry {
    generation: u32,
    slot: Slot,
}

pub struct TaskPool {
    entries: Vec<Entry>,
    free: Vec<u32>,
    /// Generations a slot cycles through before its ids repeat.
    generations: u32,
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_TASK_ID as usize);
        let generations = ((MAX_TASK_ID + 1) / capacity as u64).min(u64::from(u32::MAX)) as u32;
        Self {
            entries: (0..capacity).map(|_| Entry { generation: 0, slot: Slot::Free }).collect(),
            // Reversed so the lowest index is handed out first.
            free: (0..capacity as u32).rev().collect(),
            generations,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Slots ready to be reserved.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Slots reserved and not yet released, settled or not.
    pub fn pending(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Reserves a slot for a call sent to `peer`.
    pub fn reserve(&mut self, peer: PeerId) -> Option<(TaskId, oneshot::Receiver<Value>)> {
        let index = self.free.pop()?;
        let (tx, rx) = oneshot::channel();
        let capacity = self.entries.len() as u64;
        let entry = &mut self.entries[index as usize];
        debug_assert!(matches!(entry.slot, Slot::Free));
        entry.slot = Slot::Pending { peer, tx };
        let task = u64::from(index) + capacity * u64::from(entry.generation);
        Some((TaskId(task as u32), rx))
    }

    /// The slot index `task` names, if its generation is current.
    fn locate(&self, task: TaskId) -> Option<usize> {
        let capacity = self.entries.len() as u64;
        let id = u64::from(task.0);
        let index = (id % capacity) as usize;
        let generation = u32::try_from(id / capacity).ok()?;
        (self.entries[index].generation == generation).then_some(index)
    }

    /// Delivers `value` if `task` is pending on `from`.
    pub fn resolve(&mut self, task: TaskId, from: PeerId, value: Value) -> bool {
        let Some(index) = self.locate(task) else { return false };
        let entry = &mut self.entries[index];
        match &entry.slot {
            Slot::Pending { peer, .. } if *peer == from => {}
            _ => return false,
        }
        if let Slot::Pending { tx, .. } = std::mem::replace(&mut entry.slot, Slot::Settled) {
            // The receiver may already be gone; the slot is settled either way.
            let _ = tx.send(value);
        }
        true
    }

    /// Returns a reserved slot to the free stack and retires `task`.
    pub fn release(&mut self, task: TaskId) -> bool {
        let Some(index) = self.locate(task) else { return false };
        let entry = &mut self.entries[index];
        if matches!(entry.slot, Slot::Free) {
            return false;
        }
        entry.slot = Slot::Free;
        entry.generation = (entry.generation + 1) % self.generations;
        self.free.push(index as u32);
        true
    }

    pub fn is_pending(&self, task: TaskId) -> bool {
        self.locate(task).is_some_and(|index| matches!(self.entries[index].slot, Slot::Pending { .. }))
    }

    /// Abandons every call waiting on `peer`.
    pub fn settle_peer(&mut self, peer: PeerId) -> usize {
        self.settle_where(|p| p == peer)
    }

    /// Abandons every waiting call.
    pub fn settle_all(&mut self) -> usize {
        self.settle_where(|_| true)
    }

    fn settle_where(&mut self, mut select: impl FnMut(PeerId) -> bool) -> usize {
        let mut settled = 0;
        for entry in &mut self.entries {
            if matches!(&entry.slot, Slot::Pending { peer, .. } if select(*peer)) {
                // Dropping the sender wakes the waiter with `Abandoned`.
                entry.slot = Slot::Settled;
                settled += 1;
            }
        }
        settled
    }
}

/// An outstanding `Invoke`.
///
/// Await it, or poll `try_result()` from a synchronous loop. Dropping it cancels
/// the call: the slot goes back to the pool and a late result is discarded.
pub struct PendingCall {
    task: TaskId,
    rx: oneshot::Receiver<Value>,
    pool: Arc<Mutex<TaskPool>>,
    released: bool,
}

impl PendingCall {
    pub(crate) fn reserve(pool: &Arc<Mutex<TaskPool>>, peer: PeerId) -> Result<Self> {
        let mut guard = lock(pool);
        let capacity = guard.capacity();
        let (task, rx) = guard.reserve(peer).ok_or(Error::CapacityExhausted { capacity })?;
        Ok(Self { task, rx, pool: Arc::clone(pool), released: false })
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Non-blocking check for the outcome. `None` while still waiting.
    pub fn try_result(&mut self) -> Option<Result<Value>> {
        if self.released {
            return Some(Err(Error::Abandoned));
        }
        let outcome = match self.rx.try_recv() {
            Ok(value) => Ok(value),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(Error::Abandoned),
        };
        self.release();
        Some(outcome)
    }

    /// Waits at most `duration`. On expiry the call is dropped and its slot freed.
    pub async fn timeout(self, duration: Duration) -> Result<Value> {
        let task = self.task;
        match tokio::time::timeout(duration, self).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(%task, ?duration, "call timed out");
                Err(Error::Timeout)
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            lock(&self.pool).release(self.task);
        }
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.released {
            return Poll::Ready(Err(Error::Abandoned));
        }
        let outcome = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(value)) => Ok(value),
            Poll::Ready(Err(_)) => Err(Error::Abandoned),
        };
        this.release();
        Poll::Ready(outcome)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("task", &self.task)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: PeerId = PeerId(1);
    const BOB: PeerId = PeerId(2);

    #[test]
    fn test_lowest_index_first() {
        let mut pool = TaskPool::new(4);
        let (a, _ra) = pool.reserve(ALICE).expect("free slot");
        let (b, _rb) = pool.reserve(ALICE).expect("free slot");
        assert_eq!((a, b), (TaskId(0), TaskId(1)));
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.pending(), 2);
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let pool = Arc::new(Mutex::new(TaskPool::new(2)));
        let first = PendingCall::reserve(&pool, ALICE).expect("slot");
        let _second = PendingCall::reserve(&pool, ALICE).expect("slot");
        assert_eq!(
            PendingCall::reserve(&pool, ALICE).err(),
            Some(Error::CapacityExhausted { capacity: 2 })
        );

        drop(first);
        assert!(PendingCall::reserve(&pool, ALICE).is_ok());
    }

    #[test]
    fn test_resolve_checks_peer() {
        let mut pool = TaskPool::new(2);
        let (task, mut rx) = pool.reserve(ALICE).expect("slot");

        assert!(!pool.resolve(task, BOB, Value::Int(1)));
        assert!(pool.is_pending(task));

        assert!(pool.resolve(task, ALICE, Value::Int(2)));
        assert!(!pool.resolve(task, ALICE, Value::Int(3)));
        assert_eq!(rx.try_recv().ok(), Some(Value::Int(2)));

        assert!(!pool.resolve(TaskId(99), ALICE, Value::Nil));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut pool = TaskPool::new(2);
        let (task, _rx) = pool.reserve(ALICE).expect("slot");
        assert!(pool.release(task));
        assert!(!pool.release(task));
        assert!(!pool.release(TaskId(1)));
        assert!(!pool.release(TaskId(7)));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_settle_peer_only_touches_that_peer() {
        let pool = Arc::new(Mutex::new(TaskPool::new(4)));
        let mut alice = PendingCall::reserve(&pool, ALICE).expect("slot");
        let mut bob = PendingCall::reserve(&pool, BOB).expect("slot");

        assert_eq!(lock(&pool).settle_peer(ALICE), 1);
        assert_eq!(alice.try_result(), Some(Err(Error::Abandoned)));
        assert_eq!(bob.try_result(), None);
        assert_eq!(lock(&pool).pending(), 1);
    }

    #[test]
    fn test_completion_releases_once() {
        let pool = Arc::new(Mutex::new(TaskPool::new(1)));
        let mut call = PendingCall::reserve(&pool, ALICE).expect("slot");
        assert!(lock(&pool).resolve(call.task(), ALICE, Value::Int(5)));

        assert_eq!(call.try_result(), Some(Ok(Value::Int(5))));
        assert_eq!(lock(&pool).available(), 1);

        // Someone else takes the slot; dropping the old call must not free it.
        let other = PendingCall::reserve(&pool, BOB).expect("slot");
        drop(call);
        assert_eq!(lock(&pool).available(), 0);
        assert!(lock(&pool).is_pending(other.task()));
    }

    #[test]
    fn test_late_result_after_drop_is_discarded() {
        let pool = Arc::new(Mutex::new(TaskPool::new(1)));
        let call = PendingCall::reserve(&pool, ALICE).expect("slot");
        let task = call.task();
        drop(call);
        assert!(!lock(&pool).resolve(task, ALICE, Value::Int(1)));
    }

    #[test]
    fn test_reused_slot_gets_a_fresh_id() {
        let pool = Arc::new(Mutex::new(TaskPool::new(1)));
        let stale = PendingCall::reserve(&pool, ALICE).expect("slot");
        let stale_task = stale.task();
        drop(stale);

        let mut fresh = PendingCall::reserve(&pool, ALICE).expect("slot");
        assert_ne!(fresh.task(), stale_task);
        assert_eq!(fresh.task(), TaskId(1));

        // The answer to the cancelled call arrives after the slot was reused.
        assert!(!lock(&pool).resolve(stale_task, ALICE, Value::from("late")));
        assert!(!lock(&pool).release(stale_task));
        assert_eq!(fresh.try_result(), None);

        assert!(lock(&pool).resolve(fresh.task(), ALICE, Value::Int(2)));
        assert_eq!(fresh.try_result(), Some(Ok(Value::Int(2))));
    }

    #[test]
    fn test_ids_stay_on_the_wire() {
        let mut pool = TaskPool::new(2048);
        let (task, _rx) = pool.reserve(ALICE).expect("slot");
        assert!(pool.release(task));
        let (next, _rx) = pool.reserve(ALICE).expect("slot");
        assert_eq!(next, TaskId(2048));
        assert!(u64::from(next.0) <= MAX_TASK_ID);
        assert_eq!(pool.generations, 1 << 20);
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let pool = Arc::new(Mutex::new(TaskPool::new(1)));
        let call = PendingCall::reserve(&pool, ALICE).expect("slot");
        assert_eq!(call.timeout(Duration::from_millis(10)).await, Err(Error::Timeout));
        assert_eq!(lock(&pool).available(), 1);
    }
}
