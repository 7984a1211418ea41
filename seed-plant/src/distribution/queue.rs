//! Shared work queue for one drain pass.
//!
//! Every file lives in exactly one slot of an arena, and the slot's state says
//! where it is: pending (waiting in FIFO order), in transit (claimed by one
//! worker), or settled. A file can therefore never be pending and in transit at
//! the same time, and can never be claimed by two workers.
//!
//! Claiming hands out a [`Claim`] guard. The guard must be settled or requeued;
//! dropping it unsettled (a panicking or cancelled worker) puts the file back
//! at the tail of the pending list.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::types::PlotFile;

/// Final state of a claimed file for this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Transferred; the source copy is gone.
    Delivered,
    /// Transfer hit a transient fault. Left on disk for the next scan.
    Deferred,
    /// The source disappeared before it could be transferred.
    Vanished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    InTransit,
    Done(Completion),
}

#[derive(Debug)]
struct Slot {
    file: PlotFile,
    state: SlotState,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Slot>,
    pending: VecDeque<usize>,
    in_transit: usize,
    by_path: HashMap<PathBuf, usize>,
}

impl Inner {
    fn claim_head(&mut self) -> Option<(usize, PlotFile)> {
        let id = self.pending.pop_front()?;
        let slot = &mut self.slots[id];
        debug_assert_eq!(slot.state, SlotState::Pending);
        slot.state = SlotState::InTransit;
        self.in_transit += 1;
        Some((id, slot.file.clone()))
    }

    fn release(&mut self, id: usize, next: SlotState) {
        let slot = &mut self.slots[id];
        debug_assert_eq!(slot.state, SlotState::InTransit);
        slot.state = next;
        self.in_transit -= 1;
        if next == SlotState::Pending {
            self.pending.push_back(id);
        }
    }
}

/// Point-in-time counts, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_transit: usize,
    pub delivered: usize,
    pub deferred: usize,
    pub vanished: usize,
}

/// FIFO of plot files shared by all destination workers.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a file to the tail.
    ///
    /// Returns `false` if the path is already known to this queue, in any state.
    pub fn enqueue(&self, file: PlotFile) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.by_path.contains_key(file.path()) {
                return false;
            }
            let id = inner.slots.len();
            inner.by_path.insert(file.path().to_path_buf(), id);
            inner.slots.push(Slot {
                file,
                state: SlotState::Pending,
            });
            inner.pending.push_back(id);
        }
        self.changed.notify_one();
        true
    }

    /// Claim the head of the queue without waiting.
    pub fn try_claim(&self) -> Option<Claim<'_>> {
        let (id, file) = self.inner.lock().claim_head()?;
        Some(Claim::new(self, id, file))
    }

    /// Claim the next file, waiting while other workers still hold files that
    /// may come back.
    ///
    /// Returns `None` once nothing is pending and nothing is in transit, or
    /// when `cancel` fires.
    pub async fn next_claim(&self, cancel: &CancellationToken) -> Option<Claim<'_>> {
        loop {
            // Register before inspecting so a release between the check and
            // the await is not missed.
            let notified = self.changed.notified();

            if cancel.is_cancelled() {
                return None;
            }
            {
                let mut inner = self.inner.lock();
                if let Some((id, file)) = inner.claim_head() {
                    drop(inner);
                    return Some(Claim::new(self, id, file));
                }
                if inner.in_transit == 0 {
                    return None;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    /// True when nothing is pending and nothing is in transit.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && inner.in_transit == 0
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn in_transit_len(&self) -> usize {
        self.inner.lock().in_transit
    }

    /// Files still waiting, in queue order.
    pub fn pending_files(&self) -> Vec<PlotFile> {
        let inner = self.inner.lock();
        inner
            .pending
            .iter()
            .map(|&id| inner.slots[id].file.clone())
            .collect()
    }

    pub fn counts(&self) -> QueueCounts {
        let inner = self.inner.lock();
        let mut counts = QueueCounts {
            pending: inner.pending.len(),
            in_transit: inner.in_transit,
            ..QueueCounts::default()
        };
        for slot in &inner.slots {
            match slot.state {
                SlotState::Done(Completion::Delivered) => counts.delivered += 1,
                SlotState::Done(Completion::Deferred) => counts.deferred += 1,
                SlotState::Done(Completion::Vanished) => counts.vanished += 1,
                SlotState::Pending | SlotState::InTransit => {}
            }
        }
        counts
    }

    fn release(&self, id: usize, next: SlotState) {
        self.inner.lock().release(id, next);
        // Waiters decide for themselves whether there is work or the pass is over.
        self.changed.notify_waiters();
    }
}

/// Exclusive hold on one in-transit file.
#[derive(Debug)]
#[must_use = "an unsettled claim returns its file to the queue when dropped"]
pub struct Claim<'q> {
    queue: &'q WorkQueue,
    id: usize,
    file: PlotFile,
    released: bool,
}

impl<'q> Claim<'q> {
    fn new(queue: &'q WorkQueue, id: usize, file: PlotFile) -> Self {
        Self {
            queue,
            id,
            file,
            released: false,
        }
    }

    pub fn file(&self) -> &PlotFile {
        &self.file
    }

    /// Give the file back untouched; it goes to the tail for other workers.
    pub fn requeue(mut self) {
        self.release(SlotState::Pending);
    }

    /// Record the final state of the file for this pass.
    pub fn settle(mut self, completion: Completion) {
        self.release(SlotState::Done(completion));
    }

    fn release(&mut self, next: SlotState) {
        if !self.released {
            self.released = true;
            self.queue.release(self.id, next);
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.release(SlotState::Pending);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn plot(name: &str) -> PlotFile {
        PlotFile::new(format!("/staging/{name}.plot"))
    }

    #[test]
    fn test_fifo_order_and_drained() {
        let queue = WorkQueue::new();
        assert!(queue.is_drained());
        assert!(queue.enqueue(plot("a")));
        assert!(queue.enqueue(plot("b")));
        assert!(!queue.is_drained());

        let first = queue.try_claim().unwrap();
        assert_eq!(first.file().path(), plot("a").path());
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.in_transit_len(), 1);
        first.settle(Completion::Delivered);

        let second = queue.try_claim().unwrap();
        second.settle(Completion::Delivered);
        assert!(queue.try_claim().is_none());
        assert!(queue.is_drained());
        assert_eq!(queue.counts().delivered, 2);
    }

    #[test]
    fn test_duplicate_enqueue_rejected() {
        let queue = WorkQueue::new();
        assert!(queue.enqueue(plot("a")));
        assert!(!queue.enqueue(plot("a")));
        let claim = queue.try_claim().unwrap();
        assert!(!queue.enqueue(plot("a")));
        claim.settle(Completion::Delivered);
        assert!(!queue.enqueue(plot("a")));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_pending_and_in_transit_are_disjoint() {
        let queue = WorkQueue::new();
        queue.enqueue(plot("a"));
        let claim = queue.try_claim().unwrap();
        assert!(queue.pending_files().is_empty());
        assert!(!queue.is_drained());

        claim.requeue();
        assert_eq!(queue.in_transit_len(), 0);
        assert_eq!(queue.pending_files().len(), 1);
    }

    #[test]
    fn test_requeue_goes_to_tail() {
        let queue = WorkQueue::new();
        queue.enqueue(plot("a"));
        queue.enqueue(plot("b"));
        queue.try_claim().unwrap().requeue();

        let names: Vec<_> = queue
            .pending_files()
            .iter()
            .map(|f| f.path().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("/staging/b.plot"),
                PathBuf::from("/staging/a.plot")
            ]
        );
    }

    #[test]
    fn test_dropped_claim_returns_to_pending() {
        let queue = WorkQueue::new();
        queue.enqueue(plot("a"));
        {
            let _claim = queue.try_claim().unwrap();
            assert_eq!(queue.in_transit_len(), 1);
        }
        assert_eq!(queue.in_transit_len(), 0);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_counts_by_completion() {
        let queue = WorkQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.enqueue(plot(name));
        }
        queue.try_claim().unwrap().settle(Completion::Delivered);
        queue.try_claim().unwrap().settle(Completion::Deferred);
        queue.try_claim().unwrap().settle(Completion::Vanished);

        assert_eq!(
            queue.counts(),
            QueueCounts {
                pending: 1,
                in_transit: 0,
                delivered: 1,
                deferred: 1,
                vanished: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_next_claim_returns_none_when_drained() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        assert!(queue.next_claim(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_next_claim_waits_for_requeued_file() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();
        queue.enqueue(plot("a"));

        let holder = Arc::clone(&queue);
        let held = tokio::spawn(async move {
            let claim = holder.try_claim().unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            claim.requeue();
        });

        // Give the holder time to claim first.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let claim = tokio::time::timeout(Duration::from_secs(5), queue.next_claim(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claim.file().path(), std::path::Path::new("/staging/a.plot"));
        claim.settle(Completion::Delivered);
        held.await.unwrap();
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_next_claim_ends_when_last_holder_settles() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();
        queue.enqueue(plot("a"));
        let claim = queue.try_claim().unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.next_claim(&cancel).await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        claim.settle(Completion::Delivered);

        let ended = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(ended);
    }

    #[tokio::test]
    async fn test_next_claim_honours_cancellation() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.enqueue(plot("a"));
        queue.enqueue(plot("b"));
        let _held = queue.try_claim().unwrap();

        cancel.cancel();
        assert!(queue.next_claim(&cancel).await.is_none());
        assert_eq!(queue.pending_len(), 1);
    }
}
