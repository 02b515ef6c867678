//! Percentiles and histograms of Monte-Carlo samples
//!
//! Percentiles use linear interpolation between order statistics
//! (Hyndman & Fan definition 7): for `n` sorted values and probability `p`
//! the position is `h = (n - 1) p` and the result is
//! `x[floor(h)] + (h - floor(h)) * (x[floor(h) + 1] - x[floor(h)])`.

use std::collections::BTreeMap;

/// Percentile of an ascending slice; `None` for an empty slice
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    Some(sorted[lower] + (h - lower as f64) * (sorted[upper] - sorted[lower]))
}

/// One histogram bar: a candidate dropout value and how often it succeeded
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistogramBin {
    pub value: f64,
    pub count: usize,
}

/// Count values per grid position (`round((value - origin) / step)`)
pub fn histogram(values: &[f64], origin: f64, step: f64) -> Vec<HistogramBin> {
    let mut bins: BTreeMap<i64, usize> = BTreeMap::new();
    for &value in values {
        let index = ((value - origin) / step).round() as i64;
        *bins.entry(index).or_insert(0) += 1;
    }
    bins.into_iter()
        .map(|(index, count)| HistogramBin {
            value: origin + index as f64 * step,
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_percentile_single() {
        assert_eq!(percentile(&[0.3], 0.05), Some(0.3));
        assert_eq!(percentile(&[0.3], 0.95), Some(0.3));
    }

    #[test]
    fn test_percentile_reference_values() {
        // numpy.percentile(x, [5, 95]) with the default linear method
        let sorted: Vec<f64> = (1..=10).map(|i| i as f64 / 100.0).collect();
        let p05 = percentile(&sorted, 0.05).unwrap();
        let p95 = percentile(&sorted, 0.95).unwrap();
        assert!((p05 - 0.0145).abs() < 1e-12, "{}", p05);
        assert!((p95 - 0.0955).abs() < 1e-12, "{}", p95);
    }

    #[test]
    fn test_percentile_exact_order_statistic() {
        // 21 values: h = 20 * 0.05 = 1 exactly
        let sorted: Vec<f64> = (0..21).map(|i| i as f64 * 0.05).collect();
        assert!((percentile(&sorted, 0.05).unwrap() - 0.05).abs() < 1e-12);
        assert!((percentile(&sorted, 0.95).unwrap() - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_bounds() {
        let sorted = [0.1, 0.2, 0.4];
        assert_eq!(percentile(&sorted, 0.0), Some(0.1));
        assert_eq!(percentile(&sorted, 1.0), Some(0.4));
    }

    #[test]
    fn test_histogram_groups_grid_values() {
        let values = [0.1, 0.3, 0.1, 0.30000000000000004, 0.5];
        let bins = histogram(&values, 0.0, 0.1);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[1].count, 2);
        assert!((bins[1].value - 0.3).abs() < 1e-12);
        assert_eq!(bins[2].count, 1);
    }
}
