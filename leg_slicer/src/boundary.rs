//! Deciding whether a fitted curve still holds at the edge of its range.
//!
//! The tester walks the last few samples from the interior out to the
//! boundary. Residuals that change side, or shrink, mean the curve is still
//! tracking the data. A residual that stays on one side and keeps growing all
//! the way to the boundary means the leg has ended.

use crate::curve::CurveFunction;
use crate::fitter::FitResult;
use crate::normalize::{angular_difference, NormalizedSeries};
use crate::Period;

/// Default number of samples walked at each end.
pub const DEFAULT_BOUNDARY_WINDOW: usize = 3;
/// Default residual magnitude (normalized radians) always treated as on the curve.
pub const DEFAULT_NOISE_FLOOR: f64 = 1e-4;
/// Default width of the band in multiples of the fit's RMS residual.
pub const DEFAULT_NOISE_SCALE: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum End {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Above,
    Below,
    On,
}

pub struct BoundaryTester<'a, F: ?Sized> {
    series: &'a NormalizedSeries,
    function: &'a F,
    window: usize,
    noise_floor: f64,
    noise_scale: f64,
}

impl<'a, F: CurveFunction + ?Sized> BoundaryTester<'a, F> {
    pub fn new(series: &'a NormalizedSeries, function: &'a F) -> Self {
        Self {
            series,
            function,
            window: DEFAULT_BOUNDARY_WINDOW,
            noise_floor: DEFAULT_NOISE_FLOOR,
            noise_scale: DEFAULT_NOISE_SCALE,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    pub fn with_noise_floor(mut self, noise_floor: f64) -> Self {
        self.noise_floor = noise_floor;
        self
    }

    pub fn with_noise_scale(mut self, noise_scale: f64) -> Self {
        self.noise_scale = noise_scale;
        self
    }

    /// Residual magnitude treated as on the curve for `fit`.
    pub fn band(&self, fit: &FitResult) -> f64 {
        let scaled = self.noise_scale * fit.residual_rms;
        if scaled.is_finite() {
            self.noise_floor.max(scaled)
        } else {
            self.noise_floor
        }
    }

    /// Predicted minus observed bearing at `index`, short way round.
    fn residual(&self, fit: &FitResult, index: usize) -> f64 {
        let predicted = fit.predict(self.function, self.series.times()[index]);
        angular_difference(predicted, self.series.bearings()[index])
    }

    fn side(residual: f64, band: f64) -> Side {
        if residual.abs() <= band {
            Side::On
        } else if residual > 0.0 {
            Side::Above
        } else {
            Side::Below
        }
    }

    /// Whether `fit` still describes the data at `end` of `period`.
    ///
    /// Accepts as soon as consecutive residuals switch side or one shrinks
    /// relative to the last; otherwise accepts only if the walk finishes on
    /// the curve.
    pub fn is_boundary_acceptable(&self, fit: &FitResult, period: Period, end: End) -> bool {
        assert!(period.end < self.series.len(), "period outside series");
        let window = self.window.min(period.len());
        let walk: Vec<usize> = match end {
            End::Left => (period.start..period.start + window).rev().collect(),
            End::Right => (period.end + 1 - window..=period.end).collect(),
        };

        let band = self.band(fit);
        let mut last: Option<(Side, f64)> = None;
        for index in walk {
            let residual = self.residual(fit, index);
            let side = Self::side(residual, band);
            let magnitude = residual.abs();

            if let Some((last_side, last_magnitude)) = last {
                if last_side != Side::On {
                    if side != Side::On && side != last_side {
                        return true;
                    }
                    if magnitude < last_magnitude {
                        return true;
                    }
                }
            }
            last = Some((side, magnitude));
        }

        matches!(last, Some((Side::On, _)))
    }

    /// Both ends must pass for a slice to be accepted.
    pub fn both_ends_acceptable(&self, fit: &FitResult, period: Period) -> bool {
        self.is_boundary_acceptable(fit, period, End::Left)
            && self.is_boundary_acceptable(fit, period, End::Right)
    }
}
