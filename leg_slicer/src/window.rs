//! Locating the steadiest stretch of a period to seed a leg from.
//!
//! The steadiness of a window is the summed absolute change of bearing rate
//! between consecutive samples, a discrete second difference. The window
//! with the smallest sum is the most nearly constant-rate stretch.

use ordered_float::OrderedFloat;

use crate::fitter::MIN_SLICE_SPAN;
use crate::normalize::{wrap_pi, NormalizedSeries};
use crate::Period;

/// Default `(period length below, window)` steps.
pub const DEFAULT_WINDOW_STEPS: [(usize, usize); 2] = [(20, 5), (40, 7)];
/// Window used once a period is past every step.
pub const DEFAULT_WIDE_WINDOW: usize = 12;

#[derive(Clone, Debug, PartialEq)]
pub struct SmoothWindowFinder {
    steps: Vec<(usize, usize)>,
    wide_window: usize,
}

impl Default for SmoothWindowFinder {
    fn default() -> Self {
        Self {
            steps: DEFAULT_WINDOW_STEPS.to_vec(),
            wide_window: DEFAULT_WIDE_WINDOW,
        }
    }
}

impl SmoothWindowFinder {
    /// Steps should be sorted by length with non-decreasing windows; see
    /// [`crate::Params::validate`]. Windows narrower than
    /// `MIN_SLICE_SPAN + 1` samples are widened to it.
    pub fn new(steps: Vec<(usize, usize)>, wide_window: usize) -> Self {
        let narrowest = MIN_SLICE_SPAN + 1;
        let steps = steps
            .into_iter()
            .map(|(below, window)| (below, window.max(narrowest)))
            .collect();
        Self {
            steps,
            wide_window: wide_window.max(narrowest),
        }
    }

    /// Window length for a period of `period_len` samples. Non-decreasing in
    /// `period_len`.
    pub fn window_len(&self, period_len: usize) -> usize {
        self.steps
            .iter()
            .find(|&&(below, _)| period_len < below)
            .map(|&(_, window)| window)
            .unwrap_or(self.wide_window)
    }

    /// Change of bearing rate between each consecutive pair of rates in
    /// `period`, `period.len() - 2` values.
    ///
    /// Bearing steps are taken the short way round, so crossing the wrap
    /// point reads as a small step rather than a full turn.
    pub fn curvature(&self, series: &NormalizedSeries, period: Period) -> Vec<f64> {
        let times = series.times();
        let bearings = series.bearings();
        let rates: Vec<f64> = (period.start..period.end)
            .map(|i| wrap_pi(bearings[i + 1] - bearings[i]) / (times[i + 1] - times[i]))
            .collect();
        rates.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
    }

    /// The window inside `period` whose accumulated curvature is smallest,
    /// or `None` when the period is shorter than two windows.
    pub fn find_smooth_interior(&self, series: &NormalizedSeries, period: Period) -> Option<Period> {
        assert!(period.end < series.len(), "period outside series");
        let len = period.len();
        let window = self.window_len(len);
        if len < 2 * window {
            return None;
        }

        let curvature = self.curvature(series, period);
        // A window of `window` samples spans `window - 2` curvature terms.
        let terms = window - 2;
        let offset = (0..=len - window)
            .min_by_key(|&o| OrderedFloat(curvature[o..o + terms].iter().sum::<f64>()))?;

        Some(Period::new(
            period.start + offset,
            period.start + offset + window - 1,
        ))
    }
}
