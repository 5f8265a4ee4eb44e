//! Bounded task queue shared by the producer and the workers.
//!
//! The producer blocks while `capacity` tasks are pending. Workers claim
//! tasks one at a time; a claimed task is owned by exactly one worker until
//! it either completes or is re-enqueued at the tail. Re-enqueues bypass the
//! capacity check, so at most `capacity + workers` tasks are ever buffered.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::UploadTask;

pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    changed: Notify,
    capacity: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<UploadTask>,
    claimed: usize,
    closed: bool,
    halted: bool,
}

impl TaskQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic; recover the state if one did.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a task, waiting while the queue is full.
    ///
    /// Returns `false` if the queue was halted; the task is dropped.
    pub(crate) async fn push(&self, task: UploadTask) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut s = self.lock();
                if s.halted {
                    return false;
                }
                if s.pending.len() < self.capacity {
                    s.pending.push_back(task);
                    drop(s);
                    self.changed.notify_waiters();
                    return true;
                }
            }

            notified.await;
        }
    }

    /// Claims the next task.
    ///
    /// Returns `None` once the queue is halted, or once the producer has
    /// closed it and no claimed task can come back.
    pub(crate) async fn claim(&self) -> Option<UploadTask> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut s = self.lock();
                if s.halted {
                    return None;
                }
                if let Some(task) = s.pending.pop_front() {
                    s.claimed += 1;
                    drop(s);
                    self.changed.notify_waiters();
                    return Some(task);
                }
                if s.closed && s.claimed == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Returns a claimed task to the tail of the queue.
    pub(crate) fn requeue(&self, task: UploadTask) {
        {
            let mut s = self.lock();
            s.claimed = s.claimed.saturating_sub(1);
            if !s.halted {
                s.pending.push_back(task);
            }
        }
        self.changed.notify_waiters();
    }

    /// Releases a claimed task that reached a terminal state.
    pub(crate) fn complete(&self) {
        {
            let mut s = self.lock();
            s.claimed = s.claimed.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Marks the end of production.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    /// Stops all further claims and pushes, dropping pending tasks.
    ///
    /// Returns `true` for the call that actually halted the queue.
    pub(crate) fn halt(&self) -> bool {
        let first = {
            let mut s = self.lock();
            let first = !s.halted;
            s.halted = true;
            s.pending.clear();
            first
        };
        self.changed.notify_waiters();
        first
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.lock().halted
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}
