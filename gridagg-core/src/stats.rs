//! Weighted reduction kernels
//!
//! All kernels take `(value, weight)` samples with strictly positive weights and no missing
//! values; filtering happens in the executor.
//!
//! Weighted quantiles use the weighted midpoint (Hazen) estimator: samples are sorted by
//! value and sample `k` sits at cumulative position `(S_k + w_k / 2) / W`, where `S_k` is the
//! total weight of the samples before it and `W` the total weight. Quantiles between two
//! positions are interpolated linearly; quantiles outside the first or last position take
//! the extreme value. With equal weights this is NumPy's `method="hazen"` percentile, and
//! the median is the usual middle value (or mean of the two middle values).

use num::Float;

/// Sum with Neumaier compensation
///
/// Bounds the accumulated rounding error independently of the number of terms.
pub fn compensated_sum<F: Float, I: IntoIterator<Item = F>>(values: I) -> F {
    let mut sum = F::zero();
    let mut compensation = F::zero();
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation = compensation + ((sum - t) + v);
        } else {
            compensation = compensation + ((v - t) + sum);
        }
        sum = t;
    }
    sum + compensation
}

/// Sum choosing compensated accumulation when there are more than `threshold` terms
fn sum_with<I: ExactSizeIterator<Item = f64>>(values: I, threshold: usize) -> f64 {
    if values.len() > threshold {
        compensated_sum(values)
    } else {
        values.sum()
    }
}

/// Σ v·w
pub fn weighted_sum(samples: &[(f64, f64)], threshold: usize) -> f64 {
    sum_with(samples.iter().map(|(v, w)| v * w), threshold)
}

/// Σ v·w / Σ w
pub fn weighted_mean(samples: &[(f64, f64)], threshold: usize) -> f64 {
    let total = sum_with(samples.iter().map(|(_, w)| *w), threshold);
    weighted_sum(samples, threshold) / total
}

/// Weighted population standard deviation
///
/// `sqrt(Σ w·(v - m)² / Σ w)` with `m` the weighted mean.
pub fn weighted_std(samples: &[(f64, f64)], threshold: usize) -> f64 {
    let mean = weighted_mean(samples, threshold);
    let total = sum_with(samples.iter().map(|(_, w)| *w), threshold);
    let ss = sum_with(
        samples.iter().map(|(v, w)| w * (v - mean) * (v - mean)),
        threshold,
    );
    (ss / total).sqrt()
}

pub fn min_value(samples: &[(f64, f64)]) -> f64 {
    samples.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min)
}

pub fn max_value(samples: &[(f64, f64)]) -> f64 {
    samples.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max)
}

/// Weighted quantile at `q` in [0, 1]
///
/// Sorts `samples` in place. Returns NaN for an empty slice.
pub fn weighted_quantile(samples: &mut [(f64, f64)], q: f64) -> f64 {
    let n = samples.len();
    if n == 0 {
        return f64::NAN;
    }
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = samples.iter().map(|(_, w)| w).sum();
    let mut before = 0.0;
    let mut position = Vec::with_capacity(n);
    for (_, w) in samples.iter() {
        position.push((before + w / 2.0) / total);
        before += w;
    }
    let q = q.clamp(0.0, 1.0);
    // first sample whose position exceeds q
    let upper = position.partition_point(|p| *p <= q);
    if upper == 0 {
        return samples[0].0;
    }
    if upper == n {
        return samples[n - 1].0;
    }
    let lower = upper - 1;
    let span = position[upper] - position[lower];
    let fraction = if span > 0.0 {
        (q - position[lower]) / span
    } else {
        0.0
    };
    samples[lower].0 + fraction * (samples[upper].0 - samples[lower].0)
}
