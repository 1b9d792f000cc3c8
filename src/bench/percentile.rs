//! Nearest-rank percentiles over latency samples.

/// Number of percentile points reported per trial (P1..=P100).
pub const PERCENTILES: usize = 100;

/// Compute P1 through P100 by nearest rank.
///
/// For percentile `p` the index is `floor(n * p / 100)`, minus one unless
/// already zero, clamped to `n - 1`. No interpolation. An empty sample
/// set yields all zeros.
pub fn nearest_rank(mut samples: Vec<f64>) -> [f64; PERCENTILES] {
    let mut out = [0.0; PERCENTILES];
    if samples.is_empty() {
        return out;
    }

    samples.sort_by(f64::total_cmp);
    let n = samples.len();
    for (i, slot) in out.iter_mut().enumerate() {
        let p = i + 1;
        let mut index = n * p / 100;
        if index > 0 {
            index -= 1;
        }
        *slot = samples[index.min(n - 1)];
    }
    out
}
