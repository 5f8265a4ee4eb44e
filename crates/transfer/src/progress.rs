use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Upload throughput over a sliding window of completed segments.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    started: Instant,
    samples: Vec<Sample>,
    max_samples: usize,
    window: Duration,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 64)
    }
}

impl ThroughputMeter {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                started: Instant::now(),
                samples: Vec::new(),
                max_samples: max_samples.max(1),
                window,
            }),
        }
    }

    /// Records `bytes` finished now.
    pub fn record(&self, bytes: u64) {
        let Ok(mut m) = self.inner.lock() else {
            return;
        };
        let now = Instant::now();
        m.samples.push(Sample { bytes, at: now });

        let cutoff = now.checked_sub(m.window).unwrap_or(m.started);
        m.samples.retain(|s| s.at >= cutoff);

        if m.samples.len() > m.max_samples {
            let excess = m.samples.len() - m.max_samples;
            m.samples.drain(..excess);
        }
    }

    /// Average bytes per second across the window, measured from the start
    /// of the window (or of the meter) to the latest sample.
    pub fn bytes_per_second(&self) -> f64 {
        let Ok(m) = self.inner.lock() else {
            return 0.0;
        };
        let Some(last) = m.samples.last() else {
            return 0.0;
        };
        let from = last.at.checked_sub(m.window).unwrap_or(m.started).max(m.started);
        let elapsed = last.at.duration_since(from);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = m.samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn no_samples_no_rate() {
        let meter = ThroughputMeter::default();
        assert_eq!(meter.bytes_per_second(), 0.0);
        assert!(meter.eta(1000).is_none());
    }

    #[test]
    fn rate_after_samples() {
        let meter = ThroughputMeter::new(Duration::from_secs(10), 16);
        std::thread::sleep(Duration::from_millis(20));
        meter.record(1000);
        std::thread::sleep(Duration::from_millis(20));
        meter.record(1000);

        assert!(meter.bytes_per_second() > 0.0);
        let eta = meter.eta(10_000).unwrap();
        assert!(eta.as_secs_f64() > 0.0);
    }

    #[test]
    fn keeps_at_most_max_samples() {
        let meter = ThroughputMeter::new(Duration::from_secs(60), 4);
        for i in 0..20 {
            meter.record(i);
        }
        assert!(meter.inner.lock().unwrap().samples.len() <= 4);
    }

    #[test]
    fn concurrent_records() {
        let meter = Arc::new(ThroughputMeter::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&meter);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        m.record(1);
                        let _ = m.bytes_per_second();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(meter.inner.lock().unwrap().samples.len() <= 64);
    }
}
