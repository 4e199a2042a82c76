use std::ops::Range;

use coincast_core::SplitFractions;
use serde::Serialize;

/// Minimum points for a usable split: two for training, one each for
/// validation and test.
pub const MIN_SERIES_LEN: usize = 4;

/// Chronological train/validation/test boundaries over one aligned series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitIndices {
    train_end: usize,
    validation_end: usize,
    len: usize,
}

impl SplitIndices {
    /// Rounds each fraction to whole points, keeping at least two training
    /// points and one validation and test point. `None` when `len` is too short.
    pub fn compute(len: usize, fractions: SplitFractions) -> Option<Self> {
        if len < MIN_SERIES_LEN {
            return None;
        }
        let train = round_len(len, fractions.train).clamp(2, len - 2);
        let validation = round_len(len, fractions.validation).clamp(1, len - train - 1);

        Some(Self {
            train_end: train,
            validation_end: train + validation,
            len,
        })
    }

    pub fn train(&self) -> Range<usize> {
        0..self.train_end
    }

    pub fn validation(&self) -> Range<usize> {
        self.train_end..self.validation_end
    }

    pub fn test(&self) -> Range<usize> {
        self.validation_end..self.len
    }

    pub fn train_len(&self) -> usize {
        self.train_end
    }

    pub fn validation_len(&self) -> usize {
        self.validation_end - self.train_end
    }

    pub fn test_len(&self) -> usize {
        self.len - self.validation_end
    }

    /// Steps forecast after the training split: validation plus test.
    pub fn horizon(&self) -> usize {
        self.len - self.train_end
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn round_len(len: usize, fraction: f64) -> usize {
    (len as f64 * fraction).round().max(0.0) as usize
}
