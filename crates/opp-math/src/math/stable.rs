//! Guarded arithmetic for ratios and percentage changes.
//!
//! Every ratio in the detection pipeline goes through these helpers. A
//! denominator that is zero, near zero, or non-finite yields `None` instead of
//! NaN or infinity, so callers are forced to handle the undefined case.

/// Magnitudes at or below this are treated as zero in denominators.
pub const NEAR_ZERO: f64 = 1e-9;

/// True when `x` is finite and within [`NEAR_ZERO`] of zero.
pub fn is_near_zero(x: f64) -> bool {
    x.is_finite() && x.abs() <= NEAR_ZERO
}

/// `numerator / denominator`, or `None` when the result would be undefined.
pub fn guarded_div(numerator: f64, denominator: f64) -> Option<f64> {
    if !numerator.is_finite() || !denominator.is_finite() {
        return None;
    }
    if denominator.abs() <= NEAR_ZERO {
        return None;
    }
    let out = numerator / denominator;
    out.is_finite().then_some(out)
}

/// Fractional change from `previous` to `current` (0.25 means +25%).
///
/// The denominator is `|previous|` so that a move from -10 to -5 reads as an
/// improvement. Returns `None` when `previous` is near zero.
pub fn pct_change(previous: f64, current: f64) -> Option<f64> {
    guarded_div(current - previous, previous.abs())
}

/// Standard score of `value` against `mean` and `stddev`.
pub fn z_score(value: f64, mean: f64, stddev: f64) -> Option<f64> {
    guarded_div(value - mean, stddev)
}

/// Clamp into `[lo, hi]`, mapping NaN to `lo`.
pub fn clamp_finite(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() {
        return lo;
    }
    x.clamp(lo, hi)
}

/// Clamp into the unit interval.
pub fn clamp_unit(x: f64) -> f64 {
    clamp_finite(x, 0.0, 1.0)
}

/// `min(x / saturation, 1)` for non-negative `x`; zero when `saturation` is not positive.
pub fn saturate(x: f64, saturation: f64) -> f64 {
    match guarded_div(x.abs(), saturation) {
        Some(r) if saturation > 0.0 => r.min(1.0),
        _ => 0.0,
    }
}

/// Sign of `x` with an explicit zero band: -1, 0 or 1.
pub fn sign_with_tolerance(x: f64, tolerance: f64) -> i8 {
    if !x.is_finite() || x.abs() <= tolerance {
        0
    } else if x > 0.0 {
        1
    } else {
        -1
    }
}
