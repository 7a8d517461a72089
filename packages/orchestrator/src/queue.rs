//! Durable job queue with bounded retries and exponential backoff.
//!
//! The broker behind the queue is an external collaborator; this
//! in-process implementation keeps the same semantics: bounded capacity
//! (the scheduler blocks when saturated, which is the backpressure
//! policy), at-least-once delivery, and per-job attempt tracking with
//! exponential backoff on retry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// One unit of dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub task_id: String,
    pub agent_id: String,
    pub company_id: String,
    pub attempt: u32,
}

/// Queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

pub struct JobQueue {
    config: QueueConfig,
    tx: mpsc::Sender<Job>,
    rx: Mutex<mpsc::Receiver<Job>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.capacity);
        Arc::new(Self {
            config,
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Enqueue a job. Blocks when the queue is saturated.
    pub async fn enqueue(&self, job: Job) {
        if self.tx.send(job).await.is_err() {
            tracing::error!("job queue closed; dropping job");
        }
    }

    /// Pull the next job. `None` when the queue has shut down.
    pub async fn dequeue(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }

    /// Requeue a failed job with exponential backoff. Returns `false`
    /// when attempts are exhausted and the job must fail terminally.
    pub fn retry(&self, mut job: Job) -> bool {
        job.attempt += 1;
        if job.attempt >= self.config.max_attempts {
            tracing::warn!(task_id = %job.task_id, attempt = job.attempt, "job retries exhausted");
            return false;
        }
        let delay = self.config.backoff_base * 2u32.pow(job.attempt - 1);
        let tx = self.tx.clone();
        tracing::info!(task_id = %job.task_id, attempt = job.attempt, ?delay, "job requeued with backoff");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).await.is_err() {
                tracing::error!("job queue closed; dropping retried job");
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(task_id: &str) -> Job {
        Job {
            task_id: task_id.into(),
            agent_id: "a1".into(),
            company_id: "c1".into(),
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn fifo_delivery() {
        let queue = JobQueue::new(QueueConfig::default());
        queue.enqueue(job("t1")).await;
        queue.enqueue(job("t2")).await;
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t1");
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t2");
    }

    #[tokio::test]
    async fn retry_backs_off_then_redelivers() {
        let queue = JobQueue::new(QueueConfig {
            backoff_base: Duration::from_millis(10),
            ..QueueConfig::default()
        });
        assert!(queue.retry(job("t1")));

        let started = tokio::time::Instant::now();
        let redelivered = queue.dequeue().await.unwrap();
        assert_eq!(redelivered.task_id, "t1");
        assert_eq!(redelivered.attempt, 1);
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let queue = JobQueue::new(QueueConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            ..QueueConfig::default()
        });
        let mut current = job("t1");
        assert!(queue.retry(current.clone())); // attempt 1
        current.attempt = 1;
        assert!(queue.retry(current.clone())); // attempt 2
        current.attempt = 2;
        assert!(!queue.retry(current)); // attempt 3: exhausted
    }
}
