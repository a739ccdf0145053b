//! Application Configuration
//!
//! User settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureConfig;
use crate::pipeline::DispatcherConfig;
use crate::vision::{CommandEngineConfig, PreprocessSettings};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture settings
    pub capture: CaptureSettings,
    /// Recognition settings
    pub recognition: RecognitionSettings,
    /// Output settings
    pub output: OutputConfig,
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Directory of images replayed as frames
    pub source_dir: Option<PathBuf>,
    /// Maximum capture FPS
    pub max_fps: u32,
    /// Start over when the last image has been captured
    pub loop_frames: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source_dir: None,
            max_fps: 30,
            loop_frames: true,
        }
    }
}

impl CaptureSettings {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            max_fps: self.max_fps,
        }
    }
}

/// Recognition-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Maximum recognitions in flight
    pub max_in_flight: usize,
    /// Per-job timeout in milliseconds (unset = wait forever)
    pub job_timeout_ms: Option<u64>,
    /// OCR program
    pub command: String,
    /// Arguments for the OCR program
    pub args: Vec<String>,
    /// Convert frames to grayscale before recognition
    pub grayscale: bool,
    /// Maximum image dimension sent to the engine
    pub max_image_size: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        let engine = CommandEngineConfig::default();
        let preprocess = PreprocessSettings::default();
        Self {
            max_in_flight: 1,
            job_timeout_ms: None,
            command: engine.program,
            args: engine.args,
            grayscale: preprocess.grayscale,
            max_image_size: preprocess.max_image_size,
        }
    }
}

impl RecognitionSettings {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_in_flight: self.max_in_flight,
            job_timeout: self.job_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn engine_config(&self) -> CommandEngineConfig {
        CommandEngineConfig {
            program: self.command.clone(),
            args: self.args.clone(),
            preprocess: PreprocessSettings {
                grayscale: self.grayscale,
                max_image_size: self.max_image_size,
            },
        }
    }
}

/// Where published text goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Print each new text block
    #[default]
    Stdout,
    /// Keep a file holding the latest text
    File,
    /// One JSON record per update (to `path`, or stdout)
    JsonLines,
}

/// Output-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Sink type
    pub sink: OutputKind,
    /// Target file for file and json_lines sinks
    pub path: Option<PathBuf>,
    /// Separator between recognized regions
    pub line_separator: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sink: OutputKind::Stdout,
            path: None,
            line_separator: "\n".to_string(),
        }
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "liveocr", "LiveOcr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check capture defaults
        assert!(config.capture.source_dir.is_none());
        assert_eq!(config.capture.max_fps, 30);
        assert!(config.capture.loop_frames);

        // Check recognition defaults
        assert_eq!(config.recognition.max_in_flight, 1);
        assert!(config.recognition.job_timeout_ms.is_none());
        assert_eq!(config.recognition.command, "tesseract");
        assert_eq!(config.recognition.args, vec!["stdin", "stdout", "--oem", "1"]);
        assert!(config.recognition.grayscale);

        // Check output defaults
        assert_eq!(config.output.sink, OutputKind::Stdout);
        assert_eq!(config.output.line_separator, "\n");
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.capture.source_dir = Some(PathBuf::from("/tmp/frames"));
        config.recognition.max_in_flight = 3;
        config.recognition.job_timeout_ms = Some(2500);
        config.output.sink = OutputKind::JsonLines;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.capture.source_dir, Some(PathBuf::from("/tmp/frames")));
        assert_eq!(parsed.recognition.max_in_flight, 3);
        assert_eq!(parsed.recognition.job_timeout_ms, Some(2500));
        assert_eq!(parsed.output.sink, OutputKind::JsonLines);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [recognition]
            max_in_flight = 2

            [output]
            sink = "file"
            path = "latest.txt"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.recognition.max_in_flight, 2);
        assert_eq!(parsed.recognition.command, "tesseract");
        assert_eq!(parsed.capture.max_fps, 30);
        assert_eq!(parsed.output.sink, OutputKind::File);
        assert_eq!(parsed.output.path, Some(PathBuf::from("latest.txt")));
    }

    #[test]
    fn test_recognition_settings_conversion() {
        let settings = RecognitionSettings {
            job_timeout_ms: Some(150),
            max_in_flight: 2,
            ..Default::default()
        };

        let dispatcher = settings.dispatcher_config();
        assert_eq!(dispatcher.max_in_flight, 2);
        assert_eq!(dispatcher.job_timeout, Some(Duration::from_millis(150)));

        let engine = settings.engine_config();
        assert_eq!(engine.program, "tesseract");
        assert_eq!(engine.preprocess.max_image_size, 1920);
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.capture.max_fps = 12;

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.capture.max_fps, 12);
        assert_eq!(loaded.recognition.args, config.recognition.args);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
