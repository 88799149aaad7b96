//! Windowed FFT magnitude spectrum

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::EngineError;

/// Precomputed window, FFT plan and working buffers for one transform size.
///
/// Everything the audio callback touches is allocated here, so
/// [`SpectrumContext::transform`] never allocates.
pub struct SpectrumContext {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumContext {
    /// Build a context for a power-of-two transform size
    pub fn new(size: usize) -> Result<Self, EngineError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(EngineError::FftSetup(format!(
                "transform size {} is not a power of two",
                size
            )));
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch_len = fft.get_inplace_scratch_len();

        let mut window = reserve(size)?;
        window.extend(hann_window(size));

        Ok(Self {
            size,
            window,
            buffer: zeroed(size, Complex::new(0.0, 0.0))?,
            scratch: zeroed(scratch_len, Complex::new(0.0, 0.0))?,
            magnitudes: zeroed(size / 2, 0.0)?,
            fft,
        })
    }

    /// Transform size `n`
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of magnitude bins produced (`n / 2`)
    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Window, zero-pad or truncate `frame` to `n` samples, transform and
    /// return `n / 2` magnitudes scaled by `2 / n`.
    ///
    /// The scale does not undo the Hann window's coherent gain, so a full
    /// scale sine reads about 0.5.
    pub fn transform(&mut self, frame: &[f32]) -> &[f32] {
        if frame.is_empty() {
            self.magnitudes.fill(0.0);
            return &self.magnitudes;
        }

        let used = frame.len().min(self.size);
        for ((slot, &sample), &w) in self.buffer[..used]
            .iter_mut()
            .zip(&frame[..used])
            .zip(&self.window)
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.buffer[used..].fill(Complex::new(0.0, 0.0));

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        normalized_magnitudes(&self.buffer, &mut self.magnitudes);
        &self.magnitudes
    }
}

/// Symmetric Hann window: `0.5 * (1 - cos(2*pi*i / (n - 1)))`
pub fn hann_window(size: usize) -> impl Iterator<Item = f32> {
    let denom = size.saturating_sub(1).max(1) as f32;
    (0..size).map(move |i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
}

/// Fill `out` with `sqrt(re^2 + im^2) * 2 / n` for the first `out.len()` bins
/// of an `n`-point spectrum.
pub fn normalized_magnitudes(spectrum: &[Complex<f32>], out: &mut [f32]) {
    let scale = 2.0 / spectrum.len().max(1) as f32;
    for (mag, c) in out.iter_mut().zip(spectrum) {
        *mag = (c.re * c.re + c.im * c.im).sqrt() * scale;
    }
}

fn reserve<T>(len: usize) -> Result<Vec<T>, EngineError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| {
        EngineError::FftSetup(format!("cannot allocate {} element buffer: {}", len, e))
    })?;
    Ok(v)
}

fn zeroed<T: Clone>(len: usize, value: T) -> Result<Vec<T>, EngineError> {
    let mut v = reserve(len)?;
    v.resize(len, value);
    Ok(v)
}
