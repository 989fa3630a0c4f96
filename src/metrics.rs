//! C4 — risk metrics calculator (spec §4.4). Statistic definitions,
//! cleaning rules, histogram/exceedance-curve construction, and both
//! confidence-interval methods are ported from
//! `original_source/backend/app/simulation/metrics.py::RiskMetricsCalculator`.
//! No crate in the retrieval pack provides special functions or moment
//! estimators for this domain (none of the 5 example repos pull in a stats
//! crate), so the percentile/moment/inverse-normal routines below are
//! hand-rolled against the Python reference rather than borrowed.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_CONFIDENCE_LEVELS: [f64; 3] = [0.95, 0.99, 0.999];

pub const DEFAULT_PERCENTILE_LEVELS: [f64; 10] =
    [0.01, 0.05, 0.1, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99, 0.999];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramData {
    pub bin_edges: Vec<f64>,
    pub counts: Vec<u64>,
    pub density: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceedanceCurve {
    pub loss_levels: Vec<f64>,
    pub exceedance_probabilities: Vec<f64>,
    pub return_periods: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub expected_loss: f64,
    pub standard_deviation: f64,
    pub variance: f64,
    pub minimum_loss: f64,
    pub median_loss: f64,
    pub maximum_loss: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub coefficient_of_variation: f64,
    pub probability_of_loss: f64,
    pub mode_loss: Option<f64>,
    /// Keyed by confidence level formatted `"{c:.3}"`, as the Python
    /// reference keys its percentile dict.
    pub var: BTreeMap<String, f64>,
    pub tvar: BTreeMap<String, f64>,
    pub percentiles: BTreeMap<String, f64>,
    pub histogram: Option<HistogramData>,
    pub exceedance_curve: Option<ExceedanceCurve>,
}

pub struct RiskMetricsCalculator {
    pub confidence_levels: Vec<f64>,
}

impl Default for RiskMetricsCalculator {
    fn default() -> Self {
        RiskMetricsCalculator { confidence_levels: DEFAULT_CONFIDENCE_LEVELS.to_vec() }
    }
}

impl RiskMetricsCalculator {
    pub fn new(confidence_levels: Vec<f64>) -> Self {
        RiskMetricsCalculator { confidence_levels }
    }

    /// Drop non-finite and negative values (spec §4.4 cleaning rule).
    fn clean(losses: &[f64]) -> Result<Vec<f64>, CoreError> {
        let cleaned: Vec<f64> = losses.iter().copied().filter(|l| l.is_finite() && *l >= 0.0).collect();
        if cleaned.is_empty() {
            return Err(CoreError::simulation("no valid loss values after cleaning"));
        }
        Ok(cleaned)
    }

    pub fn calculate_metrics(
        &self,
        losses: &[f64],
        percentile_levels: &[f64],
        include_distribution_data: bool,
    ) -> Result<RiskMetrics, CoreError> {
        let cleaned = Self::clean(losses)?;
        let n = cleaned.len();

        let mean = cleaned.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            cleaned.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        let std_dev = variance.sqrt();

        let mut sorted = cleaned.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let min = sorted[0];
        let max = sorted[n - 1];
        let median = percentile(&sorted, 50.0);

        let (skewness, kurtosis) = moments(&cleaned, mean, std_dev);
        let cv = if mean > 0.0 { std_dev / mean } else { f64::INFINITY };
        let probability_of_loss = cleaned.iter().filter(|l| **l > 0.0).count() as f64 / n as f64;

        let mut var = BTreeMap::new();
        let mut tvar = BTreeMap::new();
        for &c in &self.confidence_levels {
            let v = percentile(&sorted, c * 100.0);
            let tail: Vec<f64> = cleaned.iter().copied().filter(|l| *l >= v).collect();
            let t = if tail.is_empty() { v } else { tail.iter().sum::<f64>() / tail.len() as f64 };
            let key = format!("{c:.3}");
            var.insert(key.clone(), v);
            tvar.insert(key, t);
        }

        let mut percentiles = BTreeMap::new();
        for &p in percentile_levels {
            percentiles.insert(format!("{p:.3}"), percentile(&sorted, p * 100.0));
        }

        let (histogram, mode_loss) = if include_distribution_data {
            let hist = histogram_auto(&sorted);
            let mode = mode_from_histogram(&hist);
            (Some(hist), mode)
        } else {
            (None, None)
        };

        let exceedance_curve = if include_distribution_data {
            Some(exceedance_curve(&sorted))
        } else {
            None
        };

        Ok(RiskMetrics {
            expected_loss: mean,
            standard_deviation: std_dev,
            variance,
            minimum_loss: min,
            median_loss: median,
            maximum_loss: max,
            skewness,
            kurtosis,
            coefficient_of_variation: cv,
            probability_of_loss,
            mode_loss,
            var,
            tvar,
            percentiles,
            histogram,
            exceedance_curve,
        })
    }

    /// Bootstrap confidence intervals (spec §4.4). Resamples `losses` with
    /// replacement `n_bootstrap` times and reports the `[alpha/2, 1-alpha/2]`
    /// quantiles of the resulting mean/VaR distributions.
    pub fn bootstrap_confidence_intervals(
        &self,
        losses: &[f64],
        alpha: f64,
        n_bootstrap: usize,
        rng: &mut impl Rng,
    ) -> Result<ConfidenceIntervals, CoreError> {
        let cleaned = Self::clean(losses)?;
        let n = cleaned.len();
        let mut means = Vec::with_capacity(n_bootstrap);
        let mut var95s = Vec::with_capacity(n_bootstrap);
        let mut var99s = Vec::with_capacity(n_bootstrap);
        for _ in 0..n_bootstrap {
            let sample: Vec<f64> = (0..n).map(|_| cleaned[rng.random_range(0..n)]).collect();
            let m = sample.iter().sum::<f64>() / n as f64;
            let mut sorted_sample = sample;
            sorted_sample.sort_by(|a, b| a.partial_cmp(b).unwrap());
            means.push(m);
            var95s.push(percentile(&sorted_sample, 95.0));
            var99s.push(percentile(&sorted_sample, 99.0));
        }
        means.sort_by(|a, b| a.partial_cmp(b).unwrap());
        var95s.sort_by(|a, b| a.partial_cmp(b).unwrap());
        var99s.sort_by(|a, b| a.partial_cmp(b).unwrap());

        Ok(ConfidenceIntervals {
            method: ConfidenceIntervalMethod::Bootstrap,
            mean: (percentile(&means, 100.0 * alpha / 2.0), percentile(&means, 100.0 * (1.0 - alpha / 2.0))),
            var_95: (percentile(&var95s, 100.0 * alpha / 2.0), percentile(&var95s, 100.0 * (1.0 - alpha / 2.0))),
            var_99: (percentile(&var99s, 100.0 * alpha / 2.0), percentile(&var99s, 100.0 * (1.0 - alpha / 2.0))),
        })
    }

    /// Analytical (normal-approximation) confidence intervals, carried from
    /// `metrics.py::_analytical_confidence_intervals` per SPEC_FULL §10.5.
    pub fn analytical_confidence_intervals(&self, losses: &[f64], alpha: f64) -> Result<ConfidenceIntervals, CoreError> {
        let cleaned = Self::clean(losses)?;
        let n = cleaned.len() as f64;
        let mean = cleaned.iter().sum::<f64>() / n;
        let variance = cleaned.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
        let std_err = (variance / n).sqrt();
        let z = inverse_normal_cdf(1.0 - alpha / 2.0);

        let mut sorted = cleaned.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let var95 = percentile(&sorted, 95.0);
        let var99 = percentile(&sorted, 99.0);

        Ok(ConfidenceIntervals {
            method: ConfidenceIntervalMethod::Analytical,
            mean: (mean - z * std_err, mean + z * std_err),
            var_95: (var95 - z * std_err, var95 + z * std_err),
            var_99: (var99 - z * std_err, var99 + z * std_err),
        })
    }

    /// Percentage-change comparison against a baseline (spec §4.5 "scenario
    /// comparison"; SPEC_FULL §10.5).
    pub fn compare_scenarios(baseline: &RiskMetrics, scenario: &RiskMetrics) -> ScenarioDelta {
        ScenarioDelta {
            expected_loss_change_pct: percentage_change(baseline.expected_loss, scenario.expected_loss),
            var_95_change_pct: percentage_change(
                *baseline.var.get("0.950").unwrap_or(&0.0),
                *scenario.var.get("0.950").unwrap_or(&0.0),
            ),
            var_99_change_pct: percentage_change(
                *baseline.var.get("0.990").unwrap_or(&0.0),
                *scenario.var.get("0.990").unwrap_or(&0.0),
            ),
            tvar_95_change_pct: percentage_change(
                *baseline.tvar.get("0.950").unwrap_or(&0.0),
                *scenario.tvar.get("0.950").unwrap_or(&0.0),
            ),
            tvar_99_change_pct: percentage_change(
                *baseline.tvar.get("0.990").unwrap_or(&0.0),
                *scenario.tvar.get("0.990").unwrap_or(&0.0),
            ),
            std_dev_change_pct: percentage_change(baseline.standard_deviation, scenario.standard_deviation),
            max_loss_change_pct: percentage_change(baseline.maximum_loss, scenario.maximum_loss),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceIntervalMethod {
    Bootstrap,
    Analytical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceIntervals {
    pub method: ConfidenceIntervalMethod,
    pub mean: (f64, f64),
    pub var_95: (f64, f64),
    pub var_99: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDelta {
    pub expected_loss_change_pct: f64,
    pub var_95_change_pct: f64,
    pub var_99_change_pct: f64,
    pub tvar_95_change_pct: f64,
    pub tvar_99_change_pct: f64,
    pub std_dev_change_pct: f64,
    pub max_loss_change_pct: f64,
}

fn percentage_change(baseline: f64, scenario: f64) -> f64 {
    if baseline == 0.0 {
        if scenario == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        (scenario - baseline) / baseline * 100.0
    }
}

/// Linear-interpolation percentile over an already-sorted slice, `p` in
/// `[0, 100]` — numpy's default ('linear') interpolation, matching the
/// Python reference's `np.percentile` calls.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let idx = (n - 1) as f64 * (p / 100.0).clamp(0.0, 1.0);
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = idx - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

/// Fisher-Pearson skewness and excess kurtosis, population (biased)
/// moment estimators — matching `scipy.stats.skew`/`kurtosis` defaults
/// (`bias=True`, `fisher=True`) as used by the Python reference.
fn moments(values: &[f64], mean: f64, std_dev: f64) -> (f64, f64) {
    let n = values.len() as f64;
    if std_dev == 0.0 || values.len() < 2 {
        return (0.0, 0.0);
    }
    let pop_std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
    let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    let skewness = m3 / pop_std.powi(3);
    let kurtosis = m4 / pop_std.powi(4) - 3.0;
    (skewness, kurtosis)
}

/// Freedman-Diaconis auto-binned histogram over a sorted slice.
fn histogram_auto(sorted: &[f64]) -> HistogramData {
    let n = sorted.len();
    let min = sorted[0];
    let max = sorted[n - 1];
    if (max - min).abs() < f64::EPSILON || n < 2 {
        return HistogramData { bin_edges: vec![min, min + 1.0], counts: vec![n as u64], density: vec![0.0] };
    }

    let q1 = percentile(sorted, 25.0);
    let q3 = percentile(sorted, 75.0);
    let iqr = (q3 - q1).max(0.0);
    let bin_width = if iqr > 0.0 {
        2.0 * iqr / (n as f64).cbrt()
    } else {
        (max - min) / (n as f64).sqrt().max(1.0)
    };
    let bin_count = if bin_width > 0.0 {
        (((max - min) / bin_width).ceil() as usize).clamp(1, 1000)
    } else {
        1
    };

    let mut edges = Vec::with_capacity(bin_count + 1);
    for i in 0..=bin_count {
        edges.push(min + (max - min) * (i as f64 / bin_count as f64));
    }
    let mut counts = vec![0u64; bin_count];
    for &v in sorted {
        let mut bin = (((v - min) / (max - min)) * bin_count as f64).floor() as usize;
        if bin >= bin_count {
            bin = bin_count - 1;
        }
        counts[bin] += 1;
    }
    let total = n as f64;
    let density: Vec<f64> = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| c as f64 / total / (edges[i + 1] - edges[i]).max(f64::EPSILON))
        .collect();

    HistogramData { bin_edges: edges, counts, density }
}

fn mode_from_histogram(hist: &HistogramData) -> Option<f64> {
    let (argmax, _) = hist.counts.iter().enumerate().max_by_key(|(_, c)| **c)?;
    Some((hist.bin_edges[argmax] + hist.bin_edges[argmax + 1]) / 2.0)
}

/// Exceedance curve (spec §4.4): sort descending, subsample to at most 100
/// evenly spaced order statistics, exceedance probability at rank k is
/// `(k+1)/n`.
fn exceedance_curve(ascending_sorted: &[f64]) -> ExceedanceCurve {
    let n = ascending_sorted.len();
    let descending: Vec<f64> = ascending_sorted.iter().rev().copied().collect();
    const NUM_POINTS: usize = 100;

    let indices: Vec<usize> = if n > NUM_POINTS {
        (0..NUM_POINTS).map(|i| i * (n - 1) / (NUM_POINTS - 1)).collect()
    } else {
        (0..n).collect()
    };

    let loss_levels: Vec<f64> = indices.iter().map(|&k| descending[k]).collect();
    let exceedance_probabilities: Vec<f64> = indices.iter().map(|&k| (k + 1) as f64 / n as f64).collect();
    let return_periods: Vec<f64> = exceedance_probabilities.iter().map(|&p| 1.0 / p).collect();

    ExceedanceCurve { loss_levels, exceedance_probabilities, return_periods }
}

/// Acklam's rational approximation of the inverse standard normal CDF.
/// Hand-rolled for the same reason as `gamma_fn` in `distributions.rs`: no
/// special-functions crate appears anywhere in the retrieval pack.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e+01,
        2.209_460_984_245_205e+02,
        -2.759_285_104_469_687e+02,
        1.383_577_518_672_690e+02,
        -3.066_479_806_614_716e+01,
        2.506_628_277_459_239e+00,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e+01,
        1.615_858_368_580_409e+02,
        -1.556_989_798_598_866e+02,
        6.680_131_188_771_972e+01,
        -1.328_068_155_288_572e+01,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-03,
        -3.223_964_580_411_365e-01,
        -2.400_758_277_161_838e+00,
        -2.549_732_539_343_734e+00,
        4.374_664_141_464_968e+00,
        2.938_163_982_698_783e+00,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-03,
        3.224_671_290_700_398e-01,
        2.445_134_137_142_996e+00,
        3.754_408_661_907_416e+00,
    ];
    const P_LOW: f64 = 0.024_25;
    let p_high = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= p_high {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}


/// Property 5 (spec §8): VaR/TVaR monotonicity across confidence levels.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn var_and_tvar_are_ordered_across_confidence_levels(
            losses in proptest::collection::vec(0.0f64..1_000_000.0, 50..300),
            c1 in 0.5f64..0.9,
            delta in 0.0f64..0.099,
        ) {
            let c2 = c1 + delta;
            let calc = RiskMetricsCalculator::new(vec![c1, c2]);
            let m = calc.calculate_metrics(&losses, &[], false).unwrap();

            let var1 = m.var[&format!("{c1:.3}")];
            let var2 = m.var[&format!("{c2:.3}")];
            let tvar1 = m.tvar[&format!("{c1:.3}")];
            let tvar2 = m.tvar[&format!("{c2:.3}")];

            prop_assert!(var1 <= var2 + 1e-9);
            prop_assert!(var2 <= tvar2 + 1e-9);
            prop_assert!(tvar1 >= var1 - 1e-9);
            prop_assert!(tvar2 >= var2 - 1e-9);
        }
    }
}
