//! Concurrency levels per class of work.
//!
//! Levels are advisory caps on in-flight async units of work (batches joined
//! with `futures`), not OS threads.

use std::time::Duration;

/// Files/second above which the adaptive level is tripled.
pub const HIGH_THROUGHPUT: f64 = 100.0;
/// Files/second below which the adaptive level is halved.
pub const LOW_THROUGHPUT: f64 = 10.0;

/// Semantic class of an operation, used to pick a concurrency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcurrencyKind {
    Hash,
    Exif,
    Duplicate,
    Network,
    FileIo,
    Default,
}

impl ConcurrencyKind {
    fn multiplier(self) -> usize {
        match self {
            // I/O bound: keep many requests in flight
            Self::Hash => 4,
            Self::Exif => 6,
            Self::Network => 16,
            Self::FileIo => 8,
            // Comparison work holds buffers in memory
            Self::Duplicate => 3,
            Self::Default => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyController {
    cpu_cores: usize,
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyController {
    /// Detect the core count of the current machine.
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_cores(cores)
    }

    pub fn with_cores(cpu_cores: usize) -> Self {
        Self {
            cpu_cores: cpu_cores.max(1),
        }
    }

    pub fn cpu_cores(&self) -> usize {
        self.cpu_cores
    }

    pub fn for_operation(&self, kind: ConcurrencyKind) -> usize {
        self.cpu_cores * kind.multiplier()
    }

    /// Scale `base_level` from recent throughput samples (files/second).
    ///
    /// Above [`HIGH_THROUGHPUT`] the level triples, below [`LOW_THROUGHPUT`]
    /// it halves, in between it is left alone. No samples means no change.
    pub fn adaptive(&self, recent_throughput: &[f64], base_level: usize) -> usize {
        let base_level = base_level.max(1);
        if recent_throughput.is_empty() {
            return base_level;
        }
        let average = recent_throughput.iter().sum::<f64>() / recent_throughput.len() as f64;
        if average > HIGH_THROUGHPUT {
            base_level * 3
        } else if average < LOW_THROUGHPUT {
            (base_level / 2).max(1)
        } else {
            base_level
        }
    }
}

/// Throughput of one batch, in files per second.
pub fn files_per_second(files: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        // Too fast to measure; treat as high throughput
        return f64::MAX;
    }
    files as f64 / secs
}
