//! Frame data structures for captured video content

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A captured frame from the frame source
#[derive(Debug)]
pub struct CapturedFrame {
    /// Capture-order sequence number, strictly increasing
    pub sequence: u64,
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(sequence: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            sequence,
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Whether the pixel buffer matches the declared RGBA dimensions
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 4
    }
}

/// Hands out capture sequence numbers.
///
/// Numbers start at 1 and are never reused, even for frames that end up
/// dropped by the dispatcher.
#[derive(Debug)]
pub struct FrameSequencer {
    next: AtomicU64,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Stamp raw pixels with the next sequence number
    pub fn stamp(&self, data: Vec<u8>, width: u32, height: u32) -> CapturedFrame {
        let sequence = self.next.fetch_add(1, Ordering::SeqCst);
        CapturedFrame::new(sequence, data, width, height)
    }

    /// Number of frames stamped so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new()
    }
}
