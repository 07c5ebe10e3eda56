//! In-memory log capture.
//!
//! Install with [`LogCapture::set_default`] for the current thread. Tasks
//! spawned by the dispatch worker inherit the subscriber, so their events land
//! in the same buffer.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{level_filters::LevelFilter, subscriber::DefaultGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Shared buffer receiving formatted log lines.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Creates an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a DEBUG-level plain-text subscriber writing into this buffer
    /// as the thread default until the guard is dropped.
    pub fn set_default(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(LevelFilter::DEBUG)
            .with_ansi(false)
            .with_target(true)
            .finish();

        tracing::subscriber::set_default(subscriber)
    }

    /// Everything captured so far.
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Returns true if any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    /// Captured lines containing `needle`.
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents().lines().filter(|line| line.contains(needle)).map(str::to_string).collect()
    }
}

/// Writer handed out per event.
#[derive(Debug)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter { buffer: self.buffer.clone() }
    }
}
