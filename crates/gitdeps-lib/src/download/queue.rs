use super::types::IncomingPack;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the queue to refill
    Idle,
    /// Processing a pack
    Busy,
    /// Processing a pack after at least one failed attempt
    Retrying,
    /// Gave up after exceeding the retry limit
    PermanentlyFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub idle: usize,
    pub active: usize,
    pub failed: usize,
    pub workers: usize,
}

impl QueueStatus {
    pub fn all_failed(&self) -> bool {
        self.workers > 0 && self.failed == self.workers
    }
}

struct QueueInner {
    packs: VecDeque<IncomingPack>,
    workers: Vec<WorkerState>,
}

/// FIFO of packs shared by the workers. Worker states live under the same
/// lock as the queue, so taking a pack and becoming busy is one step.
pub struct PackQueue {
    inner: Mutex<QueueInner>,
}

impl PackQueue {
    pub fn new(packs: impl IntoIterator<Item = IncomingPack>, workers: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                packs: packs.into_iter().collect(),
                workers: vec![WorkerState::Idle; workers],
            }),
        }
    }

    /// Takes the next pack, or marks the worker idle when there is none.
    pub fn dequeue(&self, worker: usize) -> Option<IncomingPack> {
        let mut inner = self.inner.lock();
        let pack = inner.packs.pop_front();
        let state = &mut inner.workers[worker];
        *state = match (&pack, *state) {
            (None, _) => WorkerState::Idle,
            (Some(_), WorkerState::Retrying) => WorkerState::Retrying,
            (Some(_), _) => WorkerState::Busy,
        };
        pack
    }

    pub fn complete(&self, worker: usize) {
        self.inner.lock().workers[worker] = WorkerState::Busy;
    }

    /// Puts a failed pack back at the end of the queue for any worker to
    /// pick up.
    pub fn requeue(&self, worker: usize, pack: IncomingPack, state: WorkerState) {
        let mut inner = self.inner.lock();
        inner.packs.push_back(pack);
        inner.workers[worker] = state;
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        let mut status = QueueStatus {
            pending: inner.packs.len(),
            workers: inner.workers.len(),
            ..QueueStatus::default()
        };
        for state in &inner.workers {
            match state {
                WorkerState::Idle => status.idle += 1,
                WorkerState::Busy | WorkerState::Retrying => status.active += 1,
                WorkerState::PermanentlyFailed => status.failed += 1,
            }
        }
        status
    }
}
