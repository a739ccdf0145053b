//! Frame dispatch
//!
//! Decides, per captured frame, whether it gets recognized. At most
//! `max_in_flight` recognitions run at once; a frame arriving while every slot
//! is busy is dropped rather than queued, so recognition always works on the
//! freshest frame available when a slot frees up.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::aggregator::{ApplyOutcome, ResultAggregator};
use crate::capture::frame::CapturedFrame;
use crate::vision::RecognitionEngine;

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum recognitions in flight (K)
    pub max_in_flight: usize,
    /// Give up on an engine call after this long and free its slot
    pub job_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            job_timeout: None,
        }
    }
}

/// One outstanding recognition attempt
#[derive(Debug, Clone, Copy)]
pub struct RecognitionJob {
    pub sequence: u64,
    pub submitted_at: Instant,
}

/// How a recognition job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Result became the published text
    Applied,
    /// Result arrived after a newer one and was discarded
    Stale,
    /// Engine reported an error
    Failed,
    /// Engine exceeded the job timeout
    TimedOut,
}

/// Handle to an accepted job. Resolves after the job's slot is released.
#[derive(Debug)]
pub struct JobHandle {
    pub sequence: u64,
    #[cfg_attr(not(test), allow(dead_code))]
    task: JoinHandle<JobOutcome>,
}

#[cfg(test)]
impl JobHandle {
    /// Wait for the job to finish; `None` if the task panicked or was cancelled
    pub async fn outcome(self) -> Option<JobOutcome> {
        self.task.await.ok()
    }
}

/// Result of offering a frame to the dispatcher
#[derive(Debug)]
pub enum Submission {
    /// A slot was free; recognition is running
    Accepted(JobHandle),
    /// Every slot was busy
    Dropped { sequence: u64 },
    /// The engine could not take this frame; no slot was used
    Abandoned { sequence: u64 },
    /// The dispatcher no longer accepts frames
    Closed { sequence: u64 },
}

impl Submission {
    #[cfg(test)]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Submission::Accepted(handle) => handle.sequence,
            Submission::Dropped { sequence }
            | Submission::Abandoned { sequence }
            | Submission::Closed { sequence } => *sequence,
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dropped: u64,
    pub abandoned: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl DispatchCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn job_finished(&self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Applied | JobOutcome::Stale => Self::bump(&self.completed),
            JobOutcome::Failed => Self::bump(&self.failed),
            JobOutcome::TimedOut => Self::bump(&self.timed_out),
        }
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Schedules recognition work for captured frames
pub struct FrameDispatcher {
    engine: Arc<dyn RecognitionEngine>,
    aggregator: Arc<ResultAggregator>,
    slots: Arc<Semaphore>,
    job_timeout: Option<Duration>,
    runtime: Handle,
    accepting: AtomicBool,
    counters: Arc<DispatchCounters>,
}

impl FrameDispatcher {
    /// Create a dispatcher that spawns recognition jobs on `runtime`
    pub fn new(
        config: DispatcherConfig,
        engine: Arc<dyn RecognitionEngine>,
        aggregator: Arc<ResultAggregator>,
        runtime: Handle,
    ) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        Self {
            engine,
            aggregator,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            job_timeout: config.job_timeout,
            runtime,
            accepting: AtomicBool::new(true),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Offer a captured frame. Never waits on recognition.
    pub fn submit(&self, frame: CapturedFrame) -> Submission {
        let sequence = frame.sequence;

        if !self.accepting.load(Ordering::SeqCst) {
            return Submission::Closed { sequence };
        }

        if !self.engine.is_ready() {
            trace!("Engine {} not ready, abandoning frame {}", self.engine.name(), sequence);
            DispatchCounters::bump(&self.counters.abandoned);
            return Submission::Abandoned { sequence };
        }

        if let Err(e) = self.engine.validate(&frame) {
            debug!("Abandoning frame {}: {}", sequence, e);
            DispatchCounters::bump(&self.counters.abandoned);
            return Submission::Abandoned { sequence };
        }

        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                trace!("All recognition slots busy, dropping frame {}", sequence);
                DispatchCounters::bump(&self.counters.dropped);
                return Submission::Dropped { sequence };
            }
            Err(TryAcquireError::Closed) => return Submission::Closed { sequence },
        };

        let job = RecognitionJob {
            sequence,
            submitted_at: Instant::now(),
        };
        DispatchCounters::bump(&self.counters.submitted);
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);

        let engine = self.engine.clone();
        let aggregator = self.aggregator.clone();
        let counters = self.counters.clone();
        let job_timeout = self.job_timeout;

        let frame = Arc::new(frame);
        let task = self.runtime.spawn(async move {
            let outcome = run_job(job, frame, engine.as_ref(), &aggregator, job_timeout).await;
            drop(permit);
            counters.job_finished(outcome);
            outcome
        });

        Submission::Accepted(JobHandle { sequence, task })
    }

    /// Stop accepting frames. In-flight jobs still run to completion.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            self.slots.close();
            debug!("Dispatcher closed with {} jobs in flight", self.in_flight());
        }
    }

    /// Jobs currently running
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no job is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

/// Run one recognition and hand its result to the aggregator
async fn run_job(
    job: RecognitionJob,
    frame: Arc<CapturedFrame>,
    engine: &dyn RecognitionEngine,
    aggregator: &ResultAggregator,
    job_timeout: Option<Duration>,
) -> JobOutcome {
    let captured_at = frame.timestamp;
    let recognition = engine.recognize(frame);
    let result = match job_timeout {
        Some(limit) => match tokio::time::timeout(limit, recognition).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Recognition of frame {} exceeded {:?}, releasing slot",
                    job.sequence, limit
                );
                return JobOutcome::TimedOut;
            }
        },
        None => recognition.await,
    };

    match result {
        Ok(regions) => {
            debug!(
                "Frame {} recognized in {:?} ({:?} after capture): {} regions",
                job.sequence,
                job.submitted_at.elapsed(),
                captured_at.elapsed(),
                regions.len()
            );
            match aggregator.on_result(job.sequence, &regions) {
                ApplyOutcome::Applied => JobOutcome::Applied,
                ApplyOutcome::Stale => JobOutcome::Stale,
            }
        }
        Err(e) => {
            warn!("Recognition of frame {} failed: {}", job.sequence, e);
            JobOutcome::Failed
        }
    }
}
