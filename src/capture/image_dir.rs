//! Directory-backed frame source
//!
//! Replays the images in a directory as if they were camera frames. Useful for
//! running the pipeline without a capture device attached.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{CaptureError, FrameSource, RawImage};

/// Frame source that decodes images from a directory, sorted by file name
pub struct ImageDirSource {
    dir: PathBuf,
    loop_frames: bool,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageDirSource {
    /// Create a source over `dir`. Nothing is read until `open()`.
    pub fn new(dir: impl Into<PathBuf>, loop_frames: bool) -> Self {
        Self {
            dir: dir.into(),
            loop_frames,
            files: Vec::new(),
            cursor: 0,
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file() && image::ImageFormat::from_path(path).is_ok()
}

impl FrameSource for ImageDirSource {
    fn name(&self) -> String {
        format!("image directory {}", self.dir.display())
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if !self.dir.is_dir() {
            return Err(CaptureError::NoDevice(self.dir.clone()));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::NoFrames(self.name()));
        }

        debug!("Found {} images in {}", files.len(), self.dir.display());
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawImage>, CaptureError> {
        if self.cursor >= self.files.len() {
            if !self.loop_frames || self.files.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;

        let rgba = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(Some(RawImage {
            data: rgba.into_raw(),
            width,
            height,
        }))
    }
}
