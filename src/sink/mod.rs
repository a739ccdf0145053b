//! Text Output Layer
//!
//! The sink owns its own thread; the aggregator only ever talks to it through
//! a channel. When several updates queue up while the sink is busy, only the
//! newest is rendered.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::{debug, error, warn};

use crate::config::{OutputConfig, OutputKind};
use crate::pipeline::PublishedText;

/// Display/consumer of the published text
pub trait TextSink: Send {
    /// Render a new current text
    fn publish(&mut self, update: &PublishedText) -> Result<()>;
}

/// Prints each published text block to a writer (stdout by default)
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TextSink for WriterSink<W> {
    fn publish(&mut self, update: &PublishedText) -> Result<()> {
        writeln!(self.writer, "--- frame {} ---", update.sequence)?;
        writeln!(self.writer, "{}", update.text)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps a file holding exactly the latest text
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TextSink for FileSink {
    fn publish(&mut self, update: &PublishedText) -> Result<()> {
        // Write then rename so readers never see a half-written file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &update.text)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Appends one JSON record per published text
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TextSink for JsonLinesSink<W> {
    fn publish(&mut self, update: &PublishedText) -> Result<()> {
        serde_json::to_writer(&mut self.writer, update)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Build the sink selected in the output configuration
pub fn build_sink(config: &OutputConfig) -> Result<Box<dyn TextSink>> {
    let sink: Box<dyn TextSink> = match config.sink {
        OutputKind::Stdout => Box::new(WriterSink::stdout()),
        OutputKind::File => {
            let path = config
                .path
                .clone()
                .context("Output path is required for the file sink")?;
            Box::new(FileSink::new(path))
        }
        OutputKind::JsonLines => match &config.path {
            Some(path) => {
                let file: File = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Box::new(JsonLinesSink::new(file))
            }
            None => Box::new(JsonLinesSink::new(io::stdout())),
        },
    };
    Ok(sink)
}

/// Thread that owns a sink and renders updates from the aggregator
pub struct SinkThread {
    handle: Option<JoinHandle<u64>>,
}

impl SinkThread {
    /// Spawn the sink thread. It exits once every sender is dropped.
    pub fn spawn(mut sink: Box<dyn TextSink>, updates: Receiver<PublishedText>) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("text-sink".to_string())
            .spawn(move || {
                let mut rendered = 0;
                while let Ok(first) = updates.recv() {
                    // Skip straight to the newest queued update
                    let latest = updates.try_iter().last().unwrap_or(first);
                    match sink.publish(&latest) {
                        Ok(()) => rendered += 1,
                        Err(e) => warn!("Failed to publish text for frame {}: {:#}", latest.sequence, e),
                    }
                }
                debug!("Text sink thread exiting after {} updates", rendered);
                rendered
            })
            .context("Failed to spawn text sink thread")?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to drain its channel; returns updates rendered
    pub fn join(mut self) -> u64 {
        self.join_inner()
    }

    /// Let the thread finish on its own without waiting for it
    pub fn detach(mut self) {
        self.handle.take();
    }

    fn join_inner(&mut self) -> u64 {
        match self.handle.take().map(|h| h.join()) {
            Some(Ok(rendered)) => rendered,
            Some(Err(_)) => {
                error!("Text sink thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for SinkThread {
    fn drop(&mut self) {
        self.join_inner();
    }
}
