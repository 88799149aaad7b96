//! Bucket-average spectrum downsampling

/// Reduce `bins` to `target` buckets by averaging contiguous spans.
///
/// `target == 0` or an empty source yields an empty result; `target >=
/// bins.len()` returns the source unchanged (no upsampling).
pub fn resample(bins: &[f32], target: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(target.min(bins.len()));
    resample_into(bins, target, &mut out);
    out
}

/// Same as [`resample`], writing into a caller-owned buffer.
///
/// `out` is cleared first. If its capacity is at least `bins.len()` this
/// never reallocates, which is what the audio callback relies on.
pub fn resample_into(bins: &[f32], target: usize, out: &mut Vec<f32>) {
    out.clear();
    let source = bins.len();
    if target == 0 || source == 0 {
        return;
    }
    if target >= source {
        out.extend_from_slice(bins);
        return;
    }

    let ratio = source as f64 / target as f64;
    for i in 0..target {
        let start = (i as f64 * ratio).floor() as usize;
        let end = (((i + 1) as f64 * ratio).floor() as usize).min(source);

        let value = if end > start {
            let span = &bins[start..end];
            span.iter().sum::<f32>() / span.len() as f32
        } else {
            bins[start.min(source - 1)]
        };
        out.push(value);
    }
}
