use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

/// Counters shared by every download worker and the supervisor for the
/// duration of one run.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    files_total: usize,
    files_read: AtomicUsize,
    bytes_total: AtomicI64,
    bytes_read: AtomicI64,
    bytes_cached: AtomicI64,
    stop: AtomicBool,
    last_error: Mutex<Option<String>>,
    fatal_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files_total: usize,
    pub files_read: usize,
    pub bytes_total: i64,
    pub bytes_read: i64,
    pub bytes_cached: i64,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.files_read >= self.files_total
    }
}

impl DownloadProgress {
    pub fn new(files_total: usize, bytes_total: u64) -> Self {
        Self {
            files_total,
            bytes_total: AtomicI64::new(i64::try_from(bytes_total).unwrap_or(i64::MAX)),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_total: self.files_total,
            files_read: self.files_read.load(Ordering::SeqCst),
            bytes_total: self.bytes_total.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            bytes_cached: self.bytes_cached.load(Ordering::SeqCst),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.files_read.load(Ordering::SeqCst) >= self.files_total
    }

    pub fn add_bytes_read(&self, bytes: i64) {
        self.bytes_read.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Records a pack served from the cache: its bytes move from the
    /// transfer total to the cached total.
    pub fn add_bytes_cached(&self, bytes: i64) {
        self.bytes_total.fetch_sub(bytes, Ordering::SeqCst);
        self.bytes_cached.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Corrects the transfer total when a pack's actual size differed from
    /// the declared one.
    pub fn adjust_bytes_total(&self, delta: i64) {
        self.bytes_total.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn add_files_read(&self, count: usize) {
        self.files_read.fetch_add(count, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Records an error that aborts the run. The first one wins.
    pub fn set_fatal_error(&self, message: impl Into<String>) {
        let mut fatal_error = self.fatal_error.lock();
        if fatal_error.is_none() {
            *fatal_error = Some(message.into());
        }
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal_error.lock().clone()
    }
}

/// Number of samples in the transfer rate window.
pub const RATE_WINDOW_SAMPLES: usize = 60;

/// Renders the status line from successive progress snapshots, keeping a
/// rolling window of byte counts to estimate the transfer rate.
#[derive(Debug)]
pub struct StatusFormatter {
    samples: [i64; RATE_WINDOW_SAMPLES],
    next_sample: usize,
    sample_interval_ms: i64,
}

impl StatusFormatter {
    pub fn new(sample_interval_ms: u64) -> Self {
        Self {
            samples: [0; RATE_WINDOW_SAMPLES],
            next_sample: 0,
            sample_interval_ms: i64::try_from(sample_interval_ms.max(1)).unwrap_or(i64::MAX),
        }
    }

    /// Bytes per second over the window, rounded up.
    fn record(&mut self, bytes_read: i64) -> i64 {
        let window_ms = RATE_WINDOW_SAMPLES as i64 * self.sample_interval_ms;
        let delta = (bytes_read - self.samples[self.next_sample]).max(0);
        let rate = (delta * 1000 + window_ms - 1) / window_ms;
        self.samples[self.next_sample] = bytes_read;
        self.next_sample = (self.next_sample + 1) % RATE_WINDOW_SAMPLES;
        rate
    }

    pub fn format(&mut self, snapshot: &ProgressSnapshot) -> String {
        let rate = self.record(snapshot.bytes_read);
        let processed = snapshot.bytes_read + snapshot.bytes_cached;
        let expected = snapshot.bytes_total + snapshot.bytes_cached;
        let percent = if expected > 0 {
            (processed * 100 / expected).clamp(0, 100)
        } else {
            100
        };

        let mut line = format!(
            "Updating dependencies: {:>3}% ({}/{}), {}/{} MiB | {} MiB/s",
            percent,
            snapshot.files_read,
            snapshot.files_total,
            format_megabytes(snapshot.bytes_read, 1),
            format_megabytes(snapshot.bytes_total, 1),
            format_megabytes(rate, 2),
        );
        if snapshot.bytes_cached > 0 {
            line.push_str(&format!(
                ", {} MiB cached",
                format_megabytes(snapshot.bytes_cached, 1)
            ));
        }
        line.push_str(if snapshot.is_complete() {
            ", done."
        } else {
            "..."
        });
        line
    }
}

/// Formats a byte count as mebibytes, rounding up to `decimals` places.
pub fn format_megabytes(bytes: i64, decimals: u32) -> String {
    const MIB: i64 = 1024 * 1024;
    let multiplier = 10i64.pow(decimals);
    let scaled = (bytes.max(0).saturating_mul(multiplier) + MIB - 1) / MIB;
    if decimals == 0 {
        scaled.to_string()
    } else {
        format!(
            "{}.{:0width$}",
            scaled / multiplier,
            scaled % multiplier,
            width = decimals as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: i64 = 1024 * 1024;

    #[test]
    fn test_format_megabytes_rounds_up() {
        assert_eq!(format_megabytes(0, 1), "0.0");
        assert_eq!(format_megabytes(1, 1), "0.1");
        assert_eq!(format_megabytes(MIB, 1), "1.0");
        assert_eq!(format_megabytes(MIB + 1, 2), "1.01");
        assert_eq!(format_megabytes(5 * MIB / 2, 0), "3");
    }

    #[test]
    fn test_cached_bytes_move_out_of_transfer_total() {
        let progress = DownloadProgress::new(2, 300);
        progress.add_bytes_cached(100);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.bytes_total, 200);
        assert_eq!(snapshot.bytes_cached, 100);
    }

    #[test]
    fn test_fatal_error_keeps_first_message() {
        let progress = DownloadProgress::new(1, 0);
        progress.set_fatal_error("first");
        progress.set_fatal_error("second");
        assert_eq!(progress.fatal_error().as_deref(), Some("first"));
    }

    #[test]
    fn test_status_line_in_progress() {
        let mut formatter = StatusFormatter::new(100);
        let snapshot = ProgressSnapshot {
            files_total: 4,
            files_read: 1,
            bytes_total: 4 * MIB,
            bytes_read: MIB,
            bytes_cached: 0,
        };
        assert_eq!(
            formatter.format(&snapshot),
            "Updating dependencies:  25% (1/4), 1.0/4.0 MiB | 0.17 MiB/s..."
        );
    }

    #[test]
    fn test_status_line_done_with_cache() {
        let mut formatter = StatusFormatter::new(100);
        let snapshot = ProgressSnapshot {
            files_total: 2,
            files_read: 2,
            bytes_total: 0,
            bytes_read: 0,
            bytes_cached: MIB,
        };
        assert_eq!(
            formatter.format(&snapshot),
            "Updating dependencies: 100% (2/2), 0.0/0.0 MiB | 0.00 MiB/s, 1.0 MiB cached, done."
        );
    }

    #[test]
    fn test_rate_uses_window() {
        let mut formatter = StatusFormatter::new(100);
        for _ in 0..RATE_WINDOW_SAMPLES {
            formatter.record(0);
        }
        // 6 MiB over a 6 second window.
        assert_eq!(formatter.record(6 * MIB), MIB);
    }
}
