//! External OCR command backend
//!
//! Pipes each frame, PNG-encoded, into an OCR program's stdin and reads the
//! recognized text from its stdout. Every non-empty output line becomes one
//! text region. Works with `tesseract stdin stdout --oem 1` out of the box:
//! `--oem 1` selects tesseract's LSTM recognizer, its most accurate mode.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use super::ocr_preprocess::{encode_png, prepare_image, PreprocessSettings};
use super::{RecognitionEngine, RecognitionError, TextRegion};
use crate::capture::frame::CapturedFrame;

/// Configuration for the command backend
#[derive(Debug, Clone)]
pub struct CommandEngineConfig {
    /// Program to run
    pub program: String,
    /// Arguments passed on every invocation
    pub args: Vec<String>,
    /// Preprocessing applied before encoding
    pub preprocess: PreprocessSettings,
}

impl Default for CommandEngineConfig {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            args: ["stdin", "stdout", "--oem", "1"].map(String::from).to_vec(),
            preprocess: PreprocessSettings::default(),
        }
    }
}

/// Recognition engine backed by an external program
pub struct CommandEngine {
    config: CommandEngineConfig,
    name: String,
    available: AtomicBool,
}

impl CommandEngine {
    pub fn new(config: CommandEngineConfig) -> Self {
        let name = format!("command:{}", config.program);
        Self {
            config,
            name,
            available: AtomicBool::new(true),
        }
    }

    /// Run the program on PNG bytes and collect stdout
    async fn run(&self, sequence: u64, png: Vec<u8>) -> Result<String, RecognitionError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    if self.available.swap(false, Ordering::SeqCst) {
                        error!("OCR program '{}' not found, disabling engine", self.config.program);
                    }
                    RecognitionError::Unavailable(format!("'{}' not found", self.config.program))
                } else {
                    RecognitionError::Io(e)
                }
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognitionError::EngineFailed("stdin not captured".to_string()))?;

        // Feed stdin concurrently so a chatty program cannot deadlock on a full pipe
        let writer = tokio::spawn(async move {
            stdin.write_all(&png).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;

        if let Ok(Err(e)) = writer.await {
            // The program may legitimately stop reading early; its exit status decides
            debug!("Frame {}: stdin write ended early: {}", sequence, e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RecognitionError::EngineFailed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Split program output into one region per non-empty line
fn parse_output(stdout: &str) -> Vec<TextRegion> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TextRegion::single)
        .collect()
}

#[async_trait]
impl RecognitionEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn recognize(&self, frame: Arc<CapturedFrame>) -> Result<Vec<TextRegion>, RecognitionError> {
        let sequence = frame.sequence;
        let settings = self.config.preprocess.clone();

        // Resizing and encoding a full frame is CPU-bound; keep it off the runtime
        // threads so a job timeout can still fire while it runs
        let png = tokio::task::spawn_blocking(move || {
            let image = prepare_image(&frame, &settings)?;
            encode_png(&image)
        })
        .await
        .map_err(|e| RecognitionError::EngineFailed(format!("preprocessing task failed: {}", e)))??;
        debug!("Frame {}: sending {} bytes to {}", sequence, png.len(), self.name);

        let stdout = self.run(sequence, png).await?;
        Ok(parse_output(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_skips_blank_lines() {
        let regions = parse_output("Hello\n\n  World  \n\x0c");
        let texts: Vec<_> = regions.iter().filter_map(TextRegion::top_candidate).collect();
        assert_eq!(texts, vec!["Hello", "World"]);
    }

    #[test]
    fn test_default_config_targets_tesseract() {
        let config = CommandEngineConfig::default();
        assert_eq!(config.program, "tesseract");
        assert_eq!(config.args, vec!["stdin", "stdout", "--oem", "1"]);
    }

    #[cfg(unix)]
    fn shell_engine(script: &str) -> CommandEngine {
        CommandEngine::new(CommandEngineConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            preprocess: PreprocessSettings::default(),
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recognize_reads_program_output() {
        let engine = shell_engine("cat > /dev/null; printf 'Hello\\n\\nWorld\\n'");
        let frame = Arc::new(CapturedFrame::new(1, vec![255; 16 * 16 * 4], 16, 16));

        let regions = engine.recognize(frame).await.unwrap();
        assert_eq!(regions, vec![TextRegion::single("Hello"), TextRegion::single("World")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_engine_failure() {
        let engine = shell_engine("cat > /dev/null; echo boom >&2; exit 3");
        let frame = Arc::new(CapturedFrame::new(1, vec![0; 4 * 4 * 4], 4, 4));

        match engine.recognize(frame).await {
            Err(RecognitionError::EngineFailed(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected engine failure, got {:?}", other),
        }
        assert!(engine.is_ready());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_fires_during_preprocessing() {
        let engine = shell_engine("cat > /dev/null; sleep 5");
        // 4K frame: downscaling and PNG encoding take far longer than the limit
        let frame = Arc::new(CapturedFrame::new(1, vec![128; 3840 * 2160 * 4], 3840, 2160));

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(5),
            engine.recognize(frame),
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_program_marks_engine_unavailable() {
        let engine = CommandEngine::new(CommandEngineConfig {
            program: "definitely-not-an-ocr-binary-4f2a".to_string(),
            ..Default::default()
        });
        let frame = Arc::new(CapturedFrame::new(1, vec![0; 4], 1, 1));

        let result = engine.recognize(frame).await;
        assert!(matches!(result, Err(RecognitionError::Unavailable(_))));
        assert!(!engine.is_ready());
    }
}
