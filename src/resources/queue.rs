//! Priority job queue
//!
//! A map from priority class to FIFO sub-queue. Dequeue always serves the
//! highest-priority non-empty class; within a class, earliest submission
//! wins. Deferred jobs are re-inserted at the front of their class so a
//! deferral never loses a job its turn.

use crate::resources::types::JobPriority;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct JobQueue {
    queues: Mutex<BTreeMap<JobPriority, VecDeque<Uuid>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue at the back of the job's priority class.
    pub fn push(&self, job_id: Uuid, priority: JobPriority) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(priority).or_default().push_back(job_id);
        drop(queues);
        self.notify.notify_one();
    }

    /// Re-insert a deferred job at the front of its priority class.
    pub fn push_front(&self, job_id: Uuid, priority: JobPriority) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(priority).or_default().push_front(job_id);
        drop(queues);
        self.notify.notify_one();
    }

    /// Non-blocking dequeue from the highest-priority non-empty class.
    pub fn try_pop(&self) -> Option<Uuid> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        for queue in queues.values_mut() {
            if let Some(job_id) = queue.pop_front() {
                return Some(job_id);
            }
        }
        None
    }

    /// Blocking dequeue. Resolves to `None` once the queue is closed and
    /// drained, or when `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Uuid> {
        loop {
            if let Some(job_id) = self.try_pop() {
                return Some(job_id);
            }
            if self.closed.load(Ordering::Acquire) || cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.values().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting blocking waiters; queued jobs can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_highest_priority_first() {
        let queue = JobQueue::new();
        let low = Uuid::new_v4();
        let critical = Uuid::new_v4();
        let normal = Uuid::new_v4();

        queue.push(low, JobPriority::Low);
        queue.push(normal, JobPriority::Normal);
        queue.push(critical, JobPriority::Critical);

        assert_eq!(queue.try_pop(), Some(critical));
        assert_eq!(queue.try_pop(), Some(normal));
        assert_eq!(queue.try_pop(), Some(low));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn fifo_within_a_priority_class() {
        let queue = JobQueue::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        queue.push(first, JobPriority::Normal);
        queue.push(second, JobPriority::Normal);

        assert_eq!(queue.try_pop(), Some(first));
        assert_eq!(queue.try_pop(), Some(second));
    }

    #[test]
    fn deferred_jobs_keep_their_turn() {
        let queue = JobQueue::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        queue.push(first, JobPriority::Normal);
        queue.push(second, JobPriority::Normal);

        let popped = queue.try_pop().unwrap();
        queue.push_front(popped, JobPriority::Normal);
        assert_eq!(queue.try_pop(), Some(first));
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let job_id = Uuid::new_v4();
        queue.push(job_id, JobPriority::High);

        assert_eq!(waiter.await.unwrap(), Some(job_id));
    }

    #[tokio::test]
    async fn blocking_pop_observes_cancellation() {
        let queue = JobQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(queue.pop(&cancel).await, None);
    }
}
