//! Parametric curve families a leg can be fitted against.
//!
//! A family is a pure function of a normalized time `x` and a parameter
//! vector. The fitter only ever sees the trait, so adding a family means
//! implementing [`CurveFunction`] and supplying an initial parameter vector
//! of matching length.

/// A parametric curve `f(x, params) -> y`.
pub trait CurveFunction: Send + Sync {
    /// Evaluate the curve at `x`. Output is an angle in radians.
    fn value_at(&self, x: f64, params: &[f64]) -> f64;

    /// Number of free parameters the family expects.
    fn param_count(&self) -> usize;

    /// Short identifier used in logs and reports.
    fn name(&self) -> &'static str;
}

/// Bearing of a target in constant relative motion:
/// `atan2(sin(B0) + P·x, cos(B0) + Q·x)`.
///
/// `(sin B0, cos B0)` is the unit relative position at `x = 0` and `(P, Q)`
/// the relative velocity scaled by that range. The two-argument arctangent
/// keeps the curve continuous through ±90°.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArcTanFunction;

impl CurveFunction for ArcTanFunction {
    fn value_at(&self, x: f64, params: &[f64]) -> f64 {
        let b0 = params[0];
        let p = params[1];
        let q = params[2];
        let (sin_b0, cos_b0) = b0.sin_cos();
        (sin_b0 + p * x).atan2(cos_b0 + q * x)
    }

    fn param_count(&self) -> usize {
        3
    }

    fn name(&self) -> &'static str {
        "arctan"
    }
}

/// Constant bearing rate: `B0 + R·x`. Useful for short, nearly straight legs
/// and as a cheap baseline.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearRateFunction;

impl CurveFunction for LinearRateFunction {
    fn value_at(&self, x: f64, params: &[f64]) -> f64 {
        params[0] + params[1] * x
    }

    fn param_count(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "linear-rate"
    }
}
