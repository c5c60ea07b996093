//! Baseline statistics computed at finalize time.

use statrs::statistics::Statistics;

use crate::types::BaselineStats;

/// Compute the finalized statistics over collected samples.
///
/// `std` is the sample standard deviation (n-1) for n > 1, else 0. The
/// percentiles are sorted-index picks at floor(0.05·n) and floor(0.95·n),
/// matching the persisted baseline format consumers expect.
pub fn finalize(samples: &[f64]) -> Option<BaselineStats> {
    if samples.is_empty() {
        return None;
    }

    let mean = samples.iter().mean();
    let std = if samples.len() > 1 {
        samples.iter().std_dev()
    } else {
        0.0
    };

    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let p05_idx = ((sorted.len() as f64) * 0.05) as usize;
    let p95_idx = ((sorted.len() as f64) * 0.95) as usize;
    let p05 = sorted.get(p05_idx).copied().unwrap_or(sorted[0]);
    let p95 = sorted
        .get(p95_idx)
        .copied()
        .unwrap_or(sorted[sorted.len() - 1]);

    Some(BaselineStats {
        mean: Some(mean),
        std: Some(std),
        p05: Some(p05),
        p95: Some(p95),
        sample_count: samples.len() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_samples_yield_nothing() {
        assert!(finalize(&[]).is_none());
    }

    #[test]
    fn single_sample_has_zero_std() {
        let stats = finalize(&[30.0]).unwrap();
        assert_eq!(stats.mean, Some(30.0));
        assert_eq!(stats.std, Some(0.0));
        assert_eq!(stats.p05, Some(30.0));
        assert_eq!(stats.p95, Some(30.0));
        assert_eq!(stats.sample_count, 1);
    }

    #[test]
    fn mean_matches_arithmetic_mean_within_tolerance() {
        let samples: Vec<f64> = (0..200).map(|i| 30.0 + (i % 7) as f64 * 0.1).collect();
        let expected: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let stats = finalize(&samples).unwrap();
        assert!((stats.mean.unwrap() - expected).abs() < 1e-6);
        assert_eq!(stats.sample_count, 200);
    }

    #[test]
    fn percentiles_are_sorted_index_picks() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        let stats = finalize(&samples).unwrap();
        // floor(100 * 0.05) = index 5 -> value 6; floor(100 * 0.95) = index 95 -> value 96.
        assert_eq!(stats.p05, Some(6.0));
        assert_eq!(stats.p95, Some(96.0));
    }

    #[test]
    fn sample_std_uses_n_minus_one() {
        let stats = finalize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        // Sum of squared deviations = 32, sample variance = 32/7.
        assert!((stats.std.unwrap() - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    }
}
