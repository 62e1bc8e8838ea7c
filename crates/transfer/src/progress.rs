use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum interval between progress notifications.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Byte-level progress of a single transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Remote key being transferred.
    pub key: String,
    /// Bytes transferred so far. Never decreases.
    pub transferred: u64,
    /// Total bytes, when known.
    pub total: u64,
    /// Recent average speed.
    pub bytes_per_second: f64,
}

impl TransferProgress {
    /// Fraction complete in `0.0..=1.0`. Empty transfers count as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.transferred as f64 / self.total as f64).min(1.0)
    }
}

/// Callback invoked with transfer progress.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Turns byte advances into throttled, monotonic progress callbacks.
pub struct ProgressTracker {
    key: String,
    total: u64,
    callback: Option<ProgressCallback>,
    inner: Mutex<TrackerInner>,
    speed: SpeedCalculator,
}

struct TrackerInner {
    transferred: u64,
    last_notified: Option<Instant>,
    interval: Duration,
}

impl ProgressTracker {
    /// Creates a tracker for a transfer of `total` bytes under `key`.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(
        key: impl Into<String>,
        total: u64,
        callback: Option<ProgressCallback>,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            key: key.into(),
            total,
            callback,
            inner: Mutex::new(TrackerInner {
                transferred: 0,
                last_notified: None,
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            }),
            speed: SpeedCalculator::new(None, None),
        }
    }

    /// Records `bytes` more transferred and notifies if the interval elapsed.
    pub fn advance(&self, bytes: u64) {
        self.speed.add_sample(bytes);
        let progress = {
            let mut s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            s.transferred = s.transferred.saturating_add(bytes);
            let now = Instant::now();
            let due = s
                .last_notified
                .is_none_or(|last| now.duration_since(last) >= s.interval);
            if !due {
                return;
            }
            s.last_notified = Some(now);
            self.snapshot(s.transferred)
        };
        self.emit(progress);
    }

    /// Sends the final report regardless of throttling.
    pub fn finish(&self) {
        let transferred = {
            let mut s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            s.last_notified = Some(Instant::now());
            s.transferred
        };
        self.emit(self.snapshot(transferred));
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transferred
    }

    fn snapshot(&self, transferred: u64) -> TransferProgress {
        TransferProgress {
            key: self.key.clone(),
            transferred,
            total: self.total,
            bytes_per_second: self.speed.bytes_per_second(),
        }
    }

    fn emit(&self, progress: TransferProgress) {
        if let Some(cb) = &self.callback {
            cb(progress);
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        s.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        let cb: ProgressCallback = Arc::new(move |p: TransferProgress| r.lock().unwrap().push(p));
        (cb, received)
    }

    #[test]
    fn tracker_reports_first_advance_and_finish() {
        let (cb, received) = recording();
        let tracker = ProgressTracker::new("a/b.bin", 100, Some(cb), Some(Duration::from_secs(60)));

        tracker.advance(10);
        tracker.advance(20); // throttled
        tracker.finish();

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].transferred, 10);
        assert_eq!(got[1].transferred, 30);
        assert_eq!(got[1].key, "a/b.bin");
        assert_eq!(tracker.transferred(), 30);
    }

    #[test]
    fn tracker_progress_monotonic() {
        let (cb, received) = recording();
        let tracker = ProgressTracker::new("k", 1000, Some(cb), Some(Duration::ZERO));
        for _ in 0..10 {
            tracker.advance(100);
        }
        tracker.finish();

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 11);
        assert!(got.windows(2).all(|w| w[0].transferred <= w[1].transferred));
        assert_eq!(got.last().unwrap().fraction(), 1.0);
    }

    #[test]
    fn tracker_without_callback_is_silent() {
        let tracker = ProgressTracker::new("k", 5, None, None);
        tracker.advance(5);
        tracker.finish();
        assert_eq!(tracker.transferred(), 5);
    }

    #[test]
    fn fraction_of_empty_transfer() {
        let p = TransferProgress {
            key: "k".into(),
            transferred: 0,
            total: 0,
            bytes_per_second: 0.0,
        };
        assert_eq!(p.fraction(), 1.0);
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        // Need at least 2 samples.
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_eta() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_sample(500);

        assert!(calc.bytes_per_second() > 0.0);
        let eta = calc.eta(10_000);
        assert!(eta.is_some());
        assert!(eta.unwrap().as_secs_f64() > 0.0);
    }

    #[test]
    fn speed_calculator_reset() {
        let calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        calc.add_sample(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        let s = calc.inner.lock().unwrap();
        assert!(s.samples.len() <= 5);
    }
}
