//! Mapping raw samples into the domain the solver works in.
//!
//! Time is rescaled min–max into `[0, 1]`; bearings go from degrees to
//! radians wrapped into `(-π, π]`. Both maps are applied per value and can be
//! inverted, so fitted curves can be reported back in raw units.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::Series;

/// Wrap an angle in radians into `(-π, π]`.
pub fn wrap_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Wrap an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed difference `a - b` between two angles in radians, taking the
/// short way round.
pub fn angular_difference(a: f64, b: f64) -> f64 {
    wrap_pi(a - b)
}

/// Affine min–max map for the time axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeNormaliser {
    origin: f64,
    span: f64,
}

impl TimeNormaliser {
    pub fn fit(times: &[i64]) -> Self {
        let origin = times.first().copied().unwrap_or(0) as f64;
        let last = times.last().copied().unwrap_or(0) as f64;
        let span = last - origin;
        Self {
            origin,
            span: if span > 0.0 { span } else { 1.0 },
        }
    }

    pub fn normalize(&self, raw: f64) -> f64 {
        (raw - self.origin) / self.span
    }

    pub fn denormalize(&self, normalized: f64) -> f64 {
        self.origin + normalized * self.span
    }
}

/// Degrees ↔ wrapped radians for the bearing axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BearingNormaliser;

impl BearingNormaliser {
    pub fn normalize(&self, degrees: f64) -> f64 {
        wrap_pi(degrees.to_radians())
    }

    /// Back to a compass bearing in `[0, 360)`.
    pub fn denormalize(&self, radians: f64) -> f64 {
        wrap_degrees(radians.to_degrees())
    }
}

/// Parallel arrays of normalized time and bearing, index-aligned with the
/// source [`Series`]. Built once per run and read-only afterwards.
#[derive(Clone, Debug)]
pub struct NormalizedSeries {
    times: Vec<f64>,
    bearings: Vec<f64>,
    time_norm: TimeNormaliser,
    bearing_norm: BearingNormaliser,
}

impl NormalizedSeries {
    pub fn from_series(series: &Series) -> Self {
        let time_norm = TimeNormaliser::fit(series.times());
        let bearing_norm = BearingNormaliser;
        let times = series
            .times()
            .iter()
            .map(|&t| time_norm.normalize(t as f64))
            .collect();
        let bearings = series
            .bearings()
            .iter()
            .map(|&b| bearing_norm.normalize(b))
            .collect();
        Self {
            times,
            bearings,
            time_norm,
            bearing_norm,
        }
    }

    /// Build directly from already-normalized arrays.
    pub fn from_normalized(times: Vec<f64>, bearings: Vec<f64>) -> Self {
        assert_eq!(
            times.len(),
            bearings.len(),
            "normalized arrays must be index-aligned"
        );
        Self {
            times,
            bearings,
            time_norm: TimeNormaliser {
                origin: 0.0,
                span: 1.0,
            },
            bearing_norm: BearingNormaliser,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn bearings(&self) -> &[f64] {
        &self.bearings
    }

    pub fn time_normaliser(&self) -> &TimeNormaliser {
        &self.time_norm
    }

    pub fn bearing_normaliser(&self) -> &BearingNormaliser {
        &self.bearing_norm
    }
}
