//! Progress publishing and cooperative cancellation
//!
//! One cancellation token per job, checked at every suspension point. The
//! progress publisher is an any-concurrency sink: publish failures are logged
//! and swallowed, never surfaced to the job. Executing-phase emissions are
//! throttled to one per 250 ms per job with last-writer-wins semantics; phase
//! boundaries always publish.

use anyhow::Result;
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Minimum interval between unforced publishes
const THROTTLE_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle phase of a comparison job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Initializing,
    Parsing,
    Executing,
    Comparing,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    /// Terminal phases end the job; no further events follow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled
        )
    }
}

/// One progress record, JSON-serializable for any downstream consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub phase: JobPhase,
    /// Percent complete in [0, 100]
    pub percent_complete: f64,
    pub message: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Any-concurrency sink for progress events
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: &ProgressEvent) -> Result<()>;
}

/// A sink that drops every event
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn publish(&self, _event: &ProgressEvent) -> Result<()> {
        Ok(())
    }
}

struct PublisherState {
    last_publish: Option<Instant>,
    last_percent: f64,
}

/// Per-job progress publisher enforcing throttling and percent monotonicity
///
/// Percent never decreases except on the Failed/Cancelled transition, where
/// the last observed percent is re-emitted.
pub struct JobProgress<'a> {
    job_id: String,
    sink: &'a dyn ProgressSink,
    state: Mutex<PublisherState>,
}

impl<'a> JobProgress<'a> {
    pub fn new(job_id: &str, sink: &'a dyn ProgressSink) -> JobProgress<'a> {
        JobProgress {
            job_id: job_id.to_string(),
            sink,
            state: Mutex::new(PublisherState {
                last_publish: None,
                last_percent: 0.0,
            }),
        }
    }

    /// Last percent handed to the sink (or accepted by throttling)
    pub fn last_percent(&self) -> f64 {
        self.state.lock().expect("progress state poisoned").last_percent
    }

    /// Publish an event; `force` bypasses throttling (phase boundaries)
    pub fn publish(
        &self,
        phase: JobPhase,
        percent: f64,
        message: &str,
        completed: Option<usize>,
        total: Option<usize>,
        force: bool,
    ) {
        self.publish_inner(phase, percent, message, completed, total, None, force)
    }

    /// Publish the terminal Failed event at the last observed percent
    pub fn fail(&self, message: &str, error: &str) {
        let percent = self.last_percent();
        self.publish_inner(
            JobPhase::Failed,
            percent,
            message,
            None,
            None,
            Some(error.to_string()),
            true,
        )
    }

    /// Publish the terminal Cancelled event at the last observed percent
    pub fn cancelled(&self) {
        let percent = self.last_percent();
        self.publish_inner(
            JobPhase::Cancelled,
            percent,
            "Cancelled",
            None,
            None,
            None,
            true,
        )
    }

    fn publish_inner(
        &self,
        phase: JobPhase,
        percent: f64,
        message: &str,
        completed: Option<usize>,
        total: Option<usize>,
        error_message: Option<String>,
        force: bool,
    ) {
        let percent = {
            let mut state = self.state.lock().expect("progress state poisoned");

            // Monotonic percent except at terminal failure/cancel
            let percent = if phase == JobPhase::Failed || phase == JobPhase::Cancelled {
                percent
            } else {
                percent.max(state.last_percent)
            }
            .clamp(0.0, 100.0);
            state.last_percent = percent.max(state.last_percent);

            if !force {
                if let Some(last) = state.last_publish {
                    if last.elapsed() < THROTTLE_INTERVAL {
                        // Last-writer-wins: the event is dropped, the percent
                        // survives in last_percent for the next emission
                        return;
                    }
                }
            }
            state.last_publish = Some(Instant::now());
            percent
        };

        let event = ProgressEvent {
            job_id: self.job_id.clone(),
            phase,
            percent_complete: percent,
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            completed_items: completed,
            total_items: total,
            error_message,
        };

        if let Err(e) = self.sink.publish(&event) {
            warn!("Progress publish failed for job {}: {}", self.job_id, e);
        }
    }
}

/// Cooperative cancellation token, cloneable across tasks and threads
///
/// All I/O and compute steps check the token at suspension points; async
/// waiters can race [`CancellationToken::wait_cancelled`] against work.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    /// Trip the token; idempotent
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn wait_cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingSink {
        fn publish(&self, event: &ProgressEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl ProgressSink for FailingSink {
        fn publish(&self, _event: &ProgressEvent) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[test]
    fn test_throttling_drops_rapid_events() {
        let sink = RecordingSink::default();
        let progress = JobProgress::new("job1", &sink);

        for i in 0..50 {
            progress.publish(
                JobPhase::Executing,
                i as f64,
                "executing",
                Some(i),
                Some(50),
                false,
            );
        }

        // Only the first event beats the throttle window
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        // But the accepted percent kept advancing
        drop(events);
        assert!((progress.last_percent() - 49.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_forced_events_always_publish() {
        let sink = RecordingSink::default();
        let progress = JobProgress::new("job1", &sink);

        progress.publish(JobPhase::Parsing, 0.0, "start", None, None, true);
        progress.publish(JobPhase::Parsing, 5.0, "done", None, None, true);
        progress.publish(JobPhase::Executing, 5.0, "start", None, None, true);

        assert_eq!(sink.events.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_percent_is_monotonic() {
        let sink = RecordingSink::default();
        let progress = JobProgress::new("job1", &sink);

        progress.publish(JobPhase::Executing, 40.0, "a", None, None, true);
        progress.publish(JobPhase::Executing, 30.0, "b", None, None, true);
        progress.publish(JobPhase::Comparing, 80.0, "c", None, None, true);

        let events = sink.events.lock().unwrap();
        assert_eq!(events[1].percent_complete, 40.0);
        assert_eq!(events[2].percent_complete, 80.0);
    }

    #[test]
    fn test_cancel_event_keeps_last_percent() {
        let sink = RecordingSink::default();
        let progress = JobProgress::new("job1", &sink);

        progress.publish(JobPhase::Executing, 42.0, "a", None, None, true);
        progress.cancelled();

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.phase, JobPhase::Cancelled);
        assert_eq!(last.percent_complete, 42.0);
    }

    #[test]
    fn test_fail_event_carries_error() {
        let sink = RecordingSink::default();
        let progress = JobProgress::new("job1", &sink);

        progress.publish(JobPhase::Parsing, 3.0, "a", None, None, true);
        progress.fail("Parse batch failed", "missing directory");

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.phase, JobPhase::Failed);
        assert_eq!(last.error_message.as_deref(), Some("missing directory"));
        assert_eq!(last.percent_complete, 3.0);
    }

    #[test]
    fn test_publish_failures_are_swallowed() {
        let progress = JobProgress::new("job1", &FailingSink);
        // Must not panic or propagate
        progress.publish(JobPhase::Executing, 10.0, "a", None, None, true);
        progress.fail("x", "y");
    }

    #[test]
    fn test_cancellation_token_flag() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        // Idempotent
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_cancelled_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.wait_cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(JobPhase::Cancelled.is_terminal());
        assert!(!JobPhase::Executing.is_terminal());
    }
}
