//! Deterministic bearing tracks with known leg boundaries.
//!
//! Each leg follows the arctangent family exactly, in the same normalized
//! time the segmenter fits in, so a noiseless track is explained perfectly
//! by one curve per leg. Consecutive legs share their junction sample.
//!
//! ```rust
//! use leg_slicer::synthetic::{LegSpec, Track};
//!
//! let track = Track {
//!     legs: vec![LegSpec::new(40, 0.6, 0.2), LegSpec::new(40, -0.9, 0.3)],
//!     ..Track::default()
//! };
//! let series = track.generate()?;
//! assert_eq!(series.len(), 80);
//! assert_eq!(track.junctions(), vec![40]);
//! # Ok::<(), leg_slicer::SliceError>(())
//! ```

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::curve::{ArcTanFunction, CurveFunction};
use crate::normalize::wrap_degrees;
use crate::{Series, SliceError};

/// One leg: `samples` observations with rate parameters `p` and `q`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LegSpec {
    pub samples: usize,
    pub p: f64,
    pub q: f64,
}

impl LegSpec {
    pub fn new(samples: usize, p: f64, q: f64) -> Self {
        Self { samples, p, q }
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    pub start_ms: i64,
    pub step_ms: i64,
    /// Compass bearing at the first sample.
    pub initial_bearing_deg: f64,
    pub legs: Vec<LegSpec>,
    /// Standard deviation of bearing noise; zero for a clean track.
    pub noise_deg: f64,
    pub seed: u64,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            start_ms: 1_300_708_800_000,
            step_ms: 10_000,
            initial_bearing_deg: 40.0,
            legs: Vec::new(),
            noise_deg: 0.0,
            seed: 42,
        }
    }
}

impl Track {
    pub fn len(&self) -> usize {
        self.legs.iter().map(|leg| leg.samples).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the first sample of every leg after the first.
    pub fn junctions(&self) -> Vec<usize> {
        self.legs
            .iter()
            .scan(0, |next, leg| {
                *next += leg.samples;
                Some(*next)
            })
            .take(self.legs.len().saturating_sub(1))
            .collect()
    }

    /// Noiseless bearings in radians, wrapped into (-π, π].
    pub fn clean_bearings(&self) -> Vec<f64> {
        let n = self.len();
        let last = n.saturating_sub(1).max(1) as f64;
        let x = |i: usize| i as f64 / last;
        let curve = ArcTanFunction;

        let mut bearings = Vec::with_capacity(n);
        let mut b0 = self.initial_bearing_deg.to_radians();
        let mut origin = 0usize;
        for (k, leg) in self.legs.iter().enumerate() {
            // The first leg starts at its own first sample; later legs pick up
            // from the previous leg's last one.
            let first = if k == 0 { 0 } else { origin + 1 };
            for i in first..first + leg.samples {
                bearings.push(curve.value_at(x(i) - x(origin), &[b0, leg.p, leg.q]));
            }
            if let Some(&end) = bearings.last() {
                b0 = end;
                origin = bearings.len() - 1;
            }
        }
        bearings
    }

    pub fn generate(&self) -> Result<Series, SliceError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let times = (0..self.len() as i64)
            .map(|i| self.start_ms + i * self.step_ms)
            .collect();
        let bearings = self
            .clean_bearings()
            .into_iter()
            .map(|b| {
                let noise = if self.noise_deg > 0.0 {
                    gaussian(&mut rng) * self.noise_deg
                } else {
                    0.0
                };
                wrap_degrees(b.to_degrees() + noise)
            })
            .collect();
        Series::new(times, bearings)
    }
}

/// Standard normal sample by Box–Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(0.0001..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
