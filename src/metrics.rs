//! Statistical features extracted from per-step measurement windows.
//!
//! Every quantity here is computed from values the workers already share
//! after the per-step reductions, so each worker derives the identical
//! feature vector without extra communication.

use std::collections::VecDeque;

/// Steps of history the feature extraction looks back over.
pub const WINDOW_LEN: usize = 50;

/// Width of the dataset feature vector.
pub const FEATURE_WIDTH: usize = 8;

/// Feature vector of one decision point.
pub type FeatureVec = [f32; FEATURE_WIDTH];

/// MACD fast/slow exponential-average periods.
const MACD_FAST: f64 = 12.0;
const MACD_SLOW: f64 = 26.0;

/// Fixed-capacity window of the most recent measurements.
#[derive(Clone, Debug, Default)]
pub struct SlidingWindow {
    values: VecDeque<f64>,
}

impl SlidingWindow {
    #[must_use]
    pub fn new() -> Self {
        SlidingWindow { values: VecDeque::with_capacity(WINDOW_LEN) }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == WINDOW_LEN {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Gini coefficient of the window, 0 for uniform or empty windows.
    #[must_use]
    pub fn gini(&self) -> f64 {
        let n = self.values.len();
        let mean = self.mean();
        if n < 2 || mean.abs() < f64::EPSILON {
            return 0.0;
        }
        let mut abs_diff = 0.0;
        for (i, &a) in self.values.iter().enumerate() {
            for &b in self.values.iter().skip(i + 1) {
                abs_diff += (a - b).abs();
            }
        }
        // the double sum counts each unordered pair once
        (2.0 * abs_diff) / (2.0 * (n * n) as f64 * mean)
    }

    /// Population skewness, 0 when the spread vanishes.
    #[must_use]
    pub fn skewness(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let m2 = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        if m2 <= f64::EPSILON {
            return 0.0;
        }
        let m3 = self.values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n as f64;
        m3 / m2.powf(1.5)
    }

    /// Least-squares slope of the window against the step counter.
    #[must_use]
    pub fn slope(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
        for (i, &y) in self.values.iter().enumerate() {
            let x = i as f64;
            sx += x;
            sy += y;
            sxy += x * y;
            sxx += x * x;
        }
        let nf = n as f64;
        let denom = nf * sxx - sx * sx;
        if denom.abs() < f64::EPSILON {
            return 0.0;
        }
        (nf * sxy - sx * sy) / denom
    }

    /// Moving-average convergence/divergence of the window.
    #[must_use]
    pub fn macd(&self) -> f64 {
        let alpha_fast = 2.0 / (MACD_FAST + 1.0);
        let alpha_slow = 2.0 / (MACD_SLOW + 1.0);
        let mut iter = self.values.iter();
        let first = match iter.next() {
            Some(&v) => v,
            None => return 0.0,
        };
        let mut ema_fast = first;
        let mut ema_slow = first;
        for &v in iter {
            ema_fast += alpha_fast * (v - ema_fast);
            ema_slow += alpha_slow * (v - ema_slow);
        }
        ema_fast - ema_slow
    }
}

/// Assemble the feature vector from the time and complexity windows.
#[must_use]
pub fn extract_features(times: &SlidingWindow, complexities: &SlidingWindow) -> FeatureVec {
    [
        times.gini() as f32,
        times.skewness() as f32,
        complexities.gini() as f32,
        complexities.skewness() as f32,
        times.slope() as f32,
        complexities.slope() as f32,
        times.macd() as f32,
        complexities.macd() as f32,
    ]
}
