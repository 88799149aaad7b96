//! RMS / peak metering with exponential smoothing

/// Smoothed meter state, reset at every session start
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelMeter {
    smoothed_rms: f32,
    smoothed_peak: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure a frame and fold it into the smoothed state.
    ///
    /// Returns the smoothed `(rms, peak)` when smoothing is enabled and the
    /// raw values otherwise.
    pub fn process<I>(&mut self, samples: I, smoothing_enabled: bool, factor: f32) -> (f32, f32)
    where
        I: IntoIterator<Item = f32>,
    {
        let (rms, peak) = raw_levels(samples);
        self.apply(rms, peak, smoothing_enabled, factor)
    }

    /// Fold already measured levels into the smoothed state
    pub fn apply(&mut self, rms: f32, peak: f32, smoothing_enabled: bool, factor: f32) -> (f32, f32) {
        if smoothing_enabled {
            self.smoothed_rms = smooth(self.smoothed_rms, rms, factor);
            self.smoothed_peak = smooth(self.smoothed_peak, peak, factor);
        } else {
            // Track raw so re-enabling starts from the latest level.
            self.smoothed_rms = rms;
            self.smoothed_peak = peak;
        }
        (self.smoothed_rms, self.smoothed_peak)
    }

    pub fn smoothed(&self) -> (f32, f32) {
        (self.smoothed_rms, self.smoothed_peak)
    }
}

/// Instantaneous `(rms, peak)` of a frame; `(0, 0)` when empty
pub fn raw_levels<I>(samples: I) -> (f32, f32)
where
    I: IntoIterator<Item = f32>,
{
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f32;
    let mut count = 0usize;

    for sample in samples {
        sum_sq += (sample as f64) * (sample as f64);
        peak = peak.max(sample.abs());
        count += 1;
    }

    if count == 0 {
        return (0.0, 0.0);
    }

    ((sum_sq / count as f64).sqrt() as f32, peak)
}

/// `smoothed + (raw - smoothed) * factor`, evaluated as
/// `raw * factor + smoothed * (1 - factor)` so that factor 1 returns `raw`
/// exactly.
///
/// The factor weights the new sample, so larger values track the input
/// faster. Factor 0 is treated as "smoothing off" rather than freezing the
/// meter.
pub fn smooth(smoothed: f32, raw: f32, factor: f32) -> f32 {
    if factor <= 0.0 {
        return raw;
    }
    raw * factor + smoothed * (1.0 - factor)
}
