use std::sync::{PoisonError, RwLock};

use tokio::sync::watch;

/// Bytes transferred out of the current file's total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Set once the closing `End` has been sent or received.
    pub complete: bool,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            complete: false,
        }
    }

    /// Percentage in `[0, 100]`.
    ///
    /// A zero-byte file reads 0 until it completes, then 100.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.complete { 100.0 } else { 0.0 };
        }
        let pct = self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.transferred_bytes)
    }
}

/// Callback invoked on every progress update.
pub type ProgressCallback = Box<dyn Fn(&TransferProgress) + Send + Sync>;

/// Publishes progress of the file currently in flight.
///
/// Observers either [`subscribe`](Self::subscribe) to a watch channel or
/// register callbacks with [`on_progress`](Self::on_progress). Within one
/// file the transferred count never goes backwards.
pub struct ProgressReporter {
    tx: watch::Sender<TransferProgress>,
    callbacks: RwLock<Vec<ProgressCallback>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TransferProgress::default());
        Self {
            tx,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> TransferProgress {
        *self.tx.borrow()
    }

    /// Starts a new file of `total_bytes` at 0%.
    pub fn start(&self, total_bytes: u64) {
        self.publish(TransferProgress::new(total_bytes));
    }

    /// Moves the transferred count to `transferred`, clamped to the total.
    pub fn advance_to(&self, transferred: u64) {
        let mut progress = self.current();
        let clamped = transferred.min(progress.total_bytes);
        if clamped <= progress.transferred_bytes {
            return;
        }
        progress.transferred_bytes = clamped;
        self.publish(progress);
    }

    /// Marks the current file complete at 100%.
    pub fn finish(&self) {
        let mut progress = self.current();
        progress.transferred_bytes = progress.total_bytes;
        progress.complete = true;
        self.publish(progress);
    }

    /// Back to the idle state between files.
    pub fn reset(&self) {
        self.publish(TransferProgress::default());
    }

    fn publish(&self, progress: TransferProgress) {
        self.tx.send_replace(progress);
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        for cb in callbacks.iter() {
            cb(&progress);
        }
    }
}

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Human-readable size: `0 Bytes`, `1.5 KB`, `2 MB`, ... up to `TB`.
///
/// Two decimals at most, trailing zeros dropped.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let mut number = format!("{value:.2}");
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{number} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn percent_is_clamped_and_exact_at_end() {
        let mut p = TransferProgress::new(200);
        assert_eq!(p.percent(), 0.0);
        p.transferred_bytes = 50;
        assert_eq!(p.percent(), 25.0);
        p.transferred_bytes = 200;
        assert_eq!(p.percent(), 100.0);
        p.transferred_bytes = 999;
        assert_eq!(p.percent(), 100.0);
    }

    #[test]
    fn zero_byte_file_percent() {
        let mut p = TransferProgress::new(0);
        assert_eq!(p.percent(), 0.0);
        p.complete = true;
        assert_eq!(p.percent(), 100.0);
    }

    #[test]
    fn reporter_is_monotonic_within_a_file() {
        let reporter = ProgressReporter::new();
        let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
        let s = Arc::clone(&seen);
        reporter.on_progress(Box::new(move |p| {
            s.lock().unwrap().push(p.transferred_bytes);
        }));

        reporter.start(100);
        reporter.advance_to(40);
        reporter.advance_to(30);
        reporter.advance_to(40);
        reporter.advance_to(500);
        reporter.finish();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![0, 40, 100, 100]);
        assert!(reporter.current().complete);
        assert_eq!(reporter.current().percent(), 100.0);
    }

    #[test]
    fn reporter_publishes_to_watchers() {
        let reporter = ProgressReporter::new();
        let rx = reporter.subscribe();
        reporter.start(10);
        reporter.advance_to(5);
        assert_eq!(rx.borrow().transferred_bytes, 5);
        reporter.reset();
        assert_eq!(*rx.borrow(), TransferProgress::default());
    }

    #[test]
    fn format_bytes_matches_browser_listing() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(1), "1 Bytes");
        assert_eq!(format_bytes(1023), "1023 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_bytes(1_234_567_890), "1.15 GB");
        assert_eq!(format_bytes(5 * 1024u64.pow(5)), "5120 TB");
    }
}
