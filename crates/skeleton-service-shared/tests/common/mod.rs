//! Shared helpers for the lifecycle integration tests.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::Subscriber;

/// In-memory log sink.
///
/// Attach [`CapturedLogs::subscriber`] to the future under test with
/// [`tracing::instrument::WithSubscriber`] and inspect the lines afterwards.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Plain-text subscriber writing into this sink.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Index of the first line containing `message`.
    pub fn position(&self, message: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.contains(message))
    }

    #[allow(dead_code)]
    pub fn contains(&self, message: &str) -> bool {
        self.position(message).is_some()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
