//! Summary statistics over small samples.

use serde::{Deserialize, Serialize};

/// Mean and spread of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (n-1 denominator; 0 for a single value).
    pub stddev: f64,
}

/// Arithmetic mean, `None` for an empty or non-finite sample.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance with Bessel's correction. A single value has zero variance.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let ss = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    Some(ss / (values.len() - 1) as f64)
}

/// Sample standard deviation.
pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Mean and standard deviation in one pass over the input.
pub fn summarize(values: &[f64]) -> Option<SampleSummary> {
    let mean = mean(values)?;
    let stddev = sample_stddev(values)?;
    Some(SampleSummary {
        n: values.len(),
        mean,
        stddev,
    })
}

/// Linear-interpolated percentile of an ascending slice, `p` in `[0, 1]`.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Mid-rank percentile of `value` within `population`, in `[0, 1]`.
///
/// Ties share the average of the ranks they span. `value` is expected to be a
/// member of `population`; a population of one ranks 0.5.
pub fn percentile_rank(value: f64, population: &[f64]) -> Option<f64> {
    if population.is_empty() || !value.is_finite() {
        return None;
    }
    let n = population.len();
    if n == 1 {
        return Some(0.5);
    }
    let below = population.iter().filter(|v| **v < value).count() as f64;
    let equal = population.iter().filter(|v| **v == value).count() as f64;
    let rank = below + (equal - 1.0).max(0.0) / 2.0;
    Some((rank / (n - 1) as f64).clamp(0.0, 1.0))
}

/// [`percentile_rank`] against an ascending, finite `sorted` slice.
///
/// Two binary searches per lookup, so ranking a whole cohort is
/// O(n log n) once the cohort is sorted.
pub fn percentile_rank_sorted(value: f64, sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() || !value.is_finite() {
        return None;
    }
    let n = sorted.len();
    if n == 1 {
        return Some(0.5);
    }
    let below = sorted.partition_point(|v| *v < value);
    let through = sorted.partition_point(|v| *v <= value);
    let equal = (through - below) as f64;
    let rank = below as f64 + (equal - 1.0).max(0.0) / 2.0;
    Some((rank / (n - 1) as f64).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn mean_and_stddev() {
        let v = [1000.0, 900.0, 750.0];
        let s = summarize(&v).unwrap();
        assert_eq!(s.n, 3);
        assert!(approx_eq(s.mean, 883.333_333, 1e-3));
        assert!(approx_eq(s.stddev, 125.830_573, 1e-3));
    }

    #[test]
    fn empty_and_nan_are_undefined() {
        assert!(mean(&[]).is_none());
        assert!(mean(&[1.0, f64::NAN]).is_none());
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn single_value_has_zero_spread() {
        let s = summarize(&[42.0]).unwrap();
        assert_eq!(s.stddev, 0.0);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&v, 0.5), Some(3.0));
        assert_eq!(percentile_sorted(&v, 0.0), Some(1.0));
        assert_eq!(percentile_sorted(&v, 1.0), Some(5.0));
        assert!(approx_eq(percentile_sorted(&v, 0.125).unwrap(), 1.5, 1e-12));
    }

    #[test]
    fn percentile_rank_extremes_and_ties() {
        let pop = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile_rank(10.0, &pop), Some(0.0));
        assert_eq!(percentile_rank(50.0, &pop), Some(1.0));
        assert_eq!(percentile_rank(30.0, &pop), Some(0.5));

        let tied = [5.0, 5.0, 5.0];
        assert_eq!(percentile_rank(5.0, &tied), Some(0.5));
        assert_eq!(percentile_rank(7.0, &[7.0]), Some(0.5));
    }

    #[test]
    fn sorted_rank_matches_linear_scan() {
        let pop = [30.0, 10.0, 20.0, 20.0, 50.0, 20.0];
        let mut sorted = pop.to_vec();
        sorted.sort_by(f64::total_cmp);
        for v in pop {
            assert_eq!(percentile_rank_sorted(v, &sorted), percentile_rank(v, &pop));
        }
        assert_eq!(percentile_rank_sorted(1.0, &[]), None);
        assert_eq!(percentile_rank_sorted(f64::NAN, &sorted), None);
    }
}
