use parking_lot::Mutex;
use std::io::Write;

/// Receives the single-line progress display.
pub trait StatusSink: Send + Sync {
    fn update(&self, line: &str);
    fn finish(&self);
}

/// Rewrites one line on stderr in place.
#[derive(Debug, Default)]
pub struct ConsoleStatus {
    last_len: Mutex<usize>,
}

impl ConsoleStatus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusSink for ConsoleStatus {
    fn update(&self, line: &str) {
        let mut last_len = self.last_len.lock();
        let padding = last_len.saturating_sub(line.len());
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}{}", line, " ".repeat(padding));
        let _ = stderr.flush();
        *last_len = line.len();
    }

    fn finish(&self) {
        let mut last_len = self.last_len.lock();
        if *last_len > 0 {
            let _ = writeln!(std::io::stderr());
            *last_len = 0;
        }
    }
}

/// Discards status updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStatus;

impl StatusSink for NoStatus {
    fn update(&self, _line: &str) {}
    fn finish(&self) {}
}
