//! Frame Capture Layer
//!
//! Pulls images from a frame source on a dedicated capture thread, stamps each
//! one with a capture sequence number and hands it to a frame callback.
//! The capture thread never waits on recognition work.

pub mod frame;
pub mod image_dir;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use frame::{CapturedFrame, FrameSequencer};
pub use image_dir::ImageDirSource;

/// Consecutive read failures tolerated before the capture loop gives up
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Errors raised by a frame source
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture device (or directory standing in for one) does not exist
    #[error("no capture device available at {0}")]
    NoDevice(PathBuf),
    /// The device exists but can never produce a frame
    #[error("frame source {0} has no frames")]
    NoFrames(String),
    /// A frame could not be decoded
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    /// The capture thread is already running
    #[error("capture is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Raw RGBA pixels as produced by a frame source, before sequencing
#[derive(Debug, Clone)]
pub struct RawImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Producer side of the pipeline: one image per call
pub trait FrameSource: Send {
    /// Human-readable description for logs
    fn name(&self) -> String;

    /// Prepare the source. Failure here means no frame will ever arrive.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Produce the next image, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<RawImage>, CaptureError>;
}

/// Frame capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum frames per second to capture (0 = as fast as the source allows)
    pub max_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { max_fps: 30 }
    }
}

impl CaptureConfig {
    fn frame_interval(&self) -> Option<Duration> {
        (self.max_fps > 0).then(|| Duration::from_secs(1) / self.max_fps)
    }
}

/// Capture loop manager
pub struct FrameCapture {
    config: CaptureConfig,
    sequencer: Arc<FrameSequencer>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
    /// Error that made the capture thread give up
    failure: Arc<Mutex<Option<CaptureError>>>,
}

impl FrameCapture {
    /// Create a new capture manager
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            sequencer: Arc::new(FrameSequencer::new()),
            cancel: CancellationToken::new(),
            thread: None,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the source and start the capture thread.
    ///
    /// Opening happens on the caller's thread so that an unavailable source is
    /// reported as a startup failure.
    pub fn start<S, F>(&mut self, mut source: S, mut on_frame: F) -> Result<(), CaptureError>
    where
        S: FrameSource + 'static,
        F: FnMut(CapturedFrame) + Send + 'static,
    {
        if self.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }

        source.open()?;
        info!("Capturing from {}", source.name());

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let sequencer = self.sequencer.clone();
        let interval = self.config.frame_interval();
        let failure = self.failure.clone();
        *failure.lock() = None;

        let handle = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let mut read_errors = 0;
                while !cancel.is_cancelled() {
                    let tick = Instant::now();

                    match source.next_frame() {
                        Ok(Some(raw)) => {
                            read_errors = 0;
                            on_frame(sequencer.stamp(raw.data, raw.width, raw.height));
                        }
                        Ok(None) => {
                            info!("Frame source {} exhausted", source.name());
                            break;
                        }
                        Err(e) => {
                            read_errors += 1;
                            if read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                                error!("Giving up on frame source after {} errors: {}", read_errors, e);
                                *failure.lock() = Some(e);
                                break;
                            }
                            warn!("Skipping unreadable frame: {}", e);
                        }
                    }

                    if let Some(interval) = interval {
                        let elapsed = tick.elapsed();
                        if elapsed < interval {
                            std::thread::sleep(interval - elapsed);
                        }
                    }
                }
                debug!("Capture thread exiting after {} frames", sequencer.issued());
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Stop capturing and wait for the capture thread to exit
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }

    /// Whether the capture thread is still producing frames
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Number of frames captured (sequence numbers issued) so far
    pub fn frames_captured(&self) -> u64 {
        self.sequencer.issued()
    }

    /// Take the error that ended capture, if the source failed
    pub fn take_failure(&self) -> Option<CaptureError> {
        self.failure.lock().take()
    }
}

impl Drop for FrameCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
