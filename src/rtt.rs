use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;


/// Moving window over the most recent round trip samples (in milliseconds). All protocol
///  timeouts are derived from the mean of this window.
pub struct RttEstimator {
    samples: Mutex<VecDeque<u64>>,
    capacity: usize,
    multiplier: u32,
}

impl RttEstimator {
    pub fn new(capacity: usize, initial: Duration, multiplier: u32) -> RttEstimator {
        let initial_ms = initial.as_millis() as u64;
        RttEstimator {
            samples: Mutex::new(std::iter::repeat(initial_ms).take(capacity).collect()),
            capacity,
            multiplier,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<u64>> {
        // a panic while holding this lock cannot leave the samples inconsistent
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_rtt(&self) -> Duration {
        let samples = self.lock();
        if samples.is_empty() {
            return Duration::from_millis(1);
        }
        let sum: u64 = samples.iter().sum();
        let len = samples.len() as u64;
        Duration::from_millis(sum.div_ceil(len))
    }

    pub fn record(&self, sample: Duration) {
        let sample_ms = (sample.as_millis() as u64).max(1);
        trace!("recording RTT sample of {}ms", sample_ms);

        let mut samples = self.lock();
        samples.push_front(sample_ms);
        samples.truncate(self.capacity);
    }

    /// the per-attempt timeout for every control message handshake
    pub fn timeout(&self) -> Duration {
        self.current_rtt() * self.multiplier
    }
}
