use std::sync::Mutex;

/// Counters accumulated over one dataset's lifetime.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

struct Metrics {
    hdus_decoded: usize,
    samples_flagged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hdus_decoded: usize,
    pub samples_flagged: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics {
                hdus_decoded: 0,
                samples_flagged: 0,
            }),
        }
    }

    pub fn record_hdu(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.hdus_decoded += 1;
        }
    }

    pub fn record_flagged(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.samples_flagged += count;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            MetricsSnapshot {
                hdus_decoded: metrics.hdus_decoded,
                samples_flagged: metrics.samples_flagged,
            }
        } else {
            MetricsSnapshot {
                hdus_decoded: 0,
                samples_flagged: 0,
            }
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
