//! Configuration shared by both arbiter flavors.
//!
//! Capacity `C` and source count `N` size fixed arrays, so they are const generics on the queue and
//! arbiter types. `ArbiterConfig` restates them so a configuration can be checked against the shape
//! it is applied to, and carries the runtime options: high-water threshold, producer burst and word
//! width.
use bytemuck::Pod;

use crate::comms::Record;
use crate::MuxError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArbiterConfig {
    pub source_count: usize,
    pub capacity: usize,
    /// Bits of each payload that may be set.
    pub word_width: usize,
    /// Words a producer may still deliver after first observing high-water.
    pub max_burst: usize,
    /// Explicit threshold. `None` means `capacity - max_burst`.
    pub high_water_threshold: Option<usize>,
}

impl ArbiterConfig {
    /// Max burst 1 and a derived threshold.
    pub fn new(source_count: usize, capacity: usize, word_width: usize) -> Self {
        Self {
            source_count,
            capacity,
            word_width,
            max_burst: 1,
            high_water_threshold: None,
        }
    }

    /// Configuration matching an arbiter of `N` sources, `C`-deep queues and full-width `T` words.
    pub fn for_shape<T: Pod, const N: usize, const C: usize>() -> Self {
        Self::new(N, C, Record::<T>::MAX_WIDTH)
    }

    /// Words a producer may push after `high_water` asserts.
    pub fn with_max_burst(mut self, max_burst: usize) -> Self {
        self.max_burst = max_burst;
        self
    }

    /// Overrides the derived `capacity - max_burst` threshold.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.high_water_threshold = Some(threshold);
        self
    }

    /// Narrows the accepted word width below the payload type's.
    pub fn with_word_width(mut self, word_width: usize) -> Self {
        self.word_width = word_width;
        self
    }

    /// The effective high-water threshold.
    ///
    /// Whether explicit or derived, the threshold must leave at least `max_burst` free slots, so a
    /// producer that reacts late to high-water still never finds the queue full.
    pub fn threshold(&self) -> Result<usize, MuxError> {
        if self.capacity == 0 {
            return Err(MuxError::ZeroCapacity);
        }
        if self.max_burst == 0 || self.max_burst > self.capacity {
            return Err(MuxError::BurstExceedsCapacity {
                max_burst: self.max_burst,
                capacity: self.capacity,
            });
        }
        let threshold = self
            .high_water_threshold
            .unwrap_or(self.capacity - self.max_burst);
        if threshold >= self.capacity {
            return Err(MuxError::ThresholdTooHigh {
                threshold,
                capacity: self.capacity,
            });
        }
        if self.capacity - threshold < self.max_burst {
            return Err(MuxError::Underprovisioned {
                threshold,
                capacity: self.capacity,
                max_burst: self.max_burst,
            });
        }
        Ok(threshold)
    }

    /// Checks every option against an arbiter of `N` sources over `C`-deep queues of `T` words,
    /// returning the effective threshold.
    pub fn validate<T: Pod, const N: usize, const C: usize>(&self) -> Result<usize, MuxError> {
        if self.source_count == 0 {
            return Err(MuxError::ZeroSources);
        }
        if self.source_count != N {
            return Err(MuxError::ShapeMismatch {
                what: "source_count",
                configured: self.source_count,
                built: N,
            });
        }
        if self.capacity != C {
            return Err(MuxError::ShapeMismatch {
                what: "capacity",
                configured: self.capacity,
                built: C,
            });
        }
        let max = Record::<T>::MAX_WIDTH;
        if self.word_width == 0 || self.word_width > max {
            return Err(MuxError::WordWidth {
                width: self.word_width,
                max,
            });
        }
        self.threshold()
    }
}
