//! Scripted recognition engine for pipeline tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::capture::frame::CapturedFrame;
use crate::vision::{RecognitionEngine, RecognitionError, TextRegion};

/// Lines to return, or an engine failure message
pub type Script = Result<Vec<String>, String>;

/// Engine whose answers are released per sequence by the test.
///
/// A frame with a registered gate waits until the test sends its script;
/// a frame without one completes immediately with no text.
pub struct ScriptedEngine {
    gates: Mutex<HashMap<u64, oneshot::Receiver<Script>>>,
    recognized: Mutex<Vec<u64>>,
    ready: AtomicBool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            recognized: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
        }
    }

    /// Hold recognition of `sequence` until the returned sender fires
    pub fn gate(&self, sequence: u64) -> oneshot::Sender<Script> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(sequence, rx);
        tx
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Sequences the engine was asked to recognize, in call order
    pub fn recognized(&self) -> Vec<u64> {
        self.recognized.lock().clone()
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn recognize(&self, frame: Arc<CapturedFrame>) -> Result<Vec<TextRegion>, RecognitionError> {
        self.recognized.lock().push(frame.sequence);
        let gate = self.gates.lock().remove(&frame.sequence);

        let script = match gate {
            Some(rx) => rx
                .await
                .map_err(|_| RecognitionError::EngineFailed("gate dropped".to_string()))?,
            None => Ok(Vec::new()),
        };

        match script {
            Ok(lines) => Ok(lines.into_iter().map(TextRegion::single).collect()),
            Err(msg) => Err(RecognitionError::EngineFailed(msg)),
        }
    }
}

/// A well-formed 1x1 frame with the given sequence
pub fn frame(sequence: u64) -> CapturedFrame {
    CapturedFrame::new(sequence, vec![0; 4], 1, 1)
}
