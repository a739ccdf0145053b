//! Application Coordinator
//!
//! Wires the frame source, dispatcher, aggregator and text sink together and
//! exposes the start/stop control surface.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureConfig, CaptureError, FrameCapture, FrameSource};
use crate::pipeline::{
    AggregatorSnapshot, DispatchStats, DispatcherConfig, FrameDispatcher, ResultAggregator, Submission,
};
use crate::sink::{SinkThread, TextSink};
use crate::vision::RecognitionEngine;

/// Pipeline settings the coordinator needs at start
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture: CaptureConfig,
    pub dispatcher: DispatcherConfig,
    /// Separator between recognized regions
    pub line_separator: String,
    /// How long `stop()` waits for in-flight jobs
    pub drain_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            dispatcher: DispatcherConfig::default(),
            line_separator: "\n".to_string(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Summary of a finished run
#[derive(Debug)]
pub struct PipelineReport {
    pub frames_captured: u64,
    /// Error that ended capture early, if the source failed mid-run
    pub capture_error: Option<CaptureError>,
    pub stats: DispatchStats,
    pub final_text: AggregatorSnapshot,
    /// Updates rendered by the sink (None if the sink thread was left running)
    pub rendered: Option<u64>,
}

struct RunningPipeline {
    capture: FrameCapture,
    dispatcher: Arc<FrameDispatcher>,
    aggregator: Arc<ResultAggregator>,
    sink_thread: SinkThread,
}

/// Main application coordinator
pub struct LiveOcrApp {
    settings: PipelineSettings,
    running: Option<RunningPipeline>,
}

impl LiveOcrApp {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            running: None,
        }
    }

    /// Start capturing and recognizing.
    ///
    /// Fails if the frame source cannot be opened: without it no frame would
    /// ever arrive.
    pub fn start<S>(
        &mut self,
        source: S,
        engine: Arc<dyn RecognitionEngine>,
        sink: Box<dyn TextSink>,
        runtime: Handle,
    ) -> Result<()>
    where
        S: FrameSource + 'static,
    {
        if self.running.is_some() {
            bail!("Pipeline is already running");
        }

        let (aggregator, updates) = ResultAggregator::with_channel(self.settings.line_separator.clone());
        let aggregator = Arc::new(aggregator);
        let sink_thread = SinkThread::spawn(sink, updates)?;

        let dispatcher = Arc::new(FrameDispatcher::new(
            self.settings.dispatcher.clone(),
            engine.clone(),
            aggregator.clone(),
            runtime,
        ));

        let mut capture = FrameCapture::new(self.settings.capture.clone());
        let frame_dispatcher = dispatcher.clone();
        let started = capture.start(source, move |frame| {
            let submission = frame_dispatcher.submit(frame);
            if let Submission::Closed { .. } = submission {
                debug!("Frame {} captured after shutdown began", submission.sequence());
            }
        });

        if let Err(e) = started {
            dispatcher.close();
            // Release the last sender so the sink thread can exit
            drop(dispatcher);
            drop(aggregator);
            sink_thread.join();
            return Err(e).context("Failed to start frame capture");
        }

        info!(
            "Pipeline started: engine={}, max_in_flight={}",
            engine.name(),
            self.settings.dispatcher.max_in_flight.max(1)
        );

        self.running = Some(RunningPipeline {
            capture,
            dispatcher,
            aggregator,
            sink_thread,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Whether frames are still being captured
    pub fn is_capturing(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| r.capture.is_running())
            .unwrap_or(false)
    }

    /// Current text and sequence
    pub fn snapshot(&self) -> Option<AggregatorSnapshot> {
        self.running.as_ref().map(|r| r.aggregator.current())
    }

    pub fn stats(&self) -> Option<DispatchStats> {
        self.running.as_ref().map(|r| r.dispatcher.stats())
    }

    /// Stop capture, let in-flight jobs finish, and drain the sink
    pub async fn stop(&mut self) -> Option<PipelineReport> {
        let RunningPipeline {
            mut capture,
            dispatcher,
            aggregator,
            sink_thread,
        } = self.running.take()?;

        let (frames_captured, capture_error) = tokio::task::spawn_blocking(move || {
            capture.stop();
            (capture.frames_captured(), capture.take_failure())
        })
        .await
        .unwrap_or_else(|e| {
            error!("Capture shutdown panicked: {}", e);
            (0, None)
        });
        dispatcher.close();

        let drained = tokio::time::timeout(self.settings.drain_timeout, dispatcher.wait_idle())
            .await
            .is_ok();

        let stats = dispatcher.stats();
        let final_text = aggregator.current();
        drop(dispatcher);
        drop(aggregator);

        let rendered = if drained {
            tokio::task::spawn_blocking(move || sink_thread.join()).await.ok()
        } else {
            warn!("{} recognition jobs still running at shutdown", stats.in_flight);
            sink_thread.detach();
            None
        };

        info!(
            "Pipeline stopped: {} frames, {} recognized, {} dropped",
            frames_captured, stats.completed, stats.dropped
        );

        Some(PipelineReport {
            frames_captured,
            capture_error,
            stats,
            final_text,
            rendered,
        })
    }
}

impl Drop for LiveOcrApp {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let RunningPipeline {
                mut capture,
                dispatcher,
                sink_thread,
                ..
            } = running;
            capture.stop();
            dispatcher.close();
            // In-flight jobs may still hold the aggregator; don't block on them
            sink_thread.detach();
        }
    }
}
