//! Analysis and back windows

use std::f64::consts::PI;

/// Mean square of a hann window
pub const HANN_MEAN_SQUARE: f64 = 0.375;

/// Periodic hann window of `len` samples
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| (0.5 * (1.0 - (2.0 * PI * n as f64 / len as f64).cos())) as f32)
        .collect()
}

/// Forward scaling divisor: `sqrt(0.375 * 0.5 * window_len * fft_len)`.
///
/// Dividing the analysis window by this makes the spectrum a power
/// spectral density estimate.
pub fn psd_scale(window_len: usize, fft_len: usize) -> f64 {
    (HANN_MEAN_SQUARE * 0.5 * window_len as f64 * fft_len as f64).sqrt()
}

/// Taper over the zero-padded edges of a frame, 1 over the window itself.
///
/// `lead` padding samples precede the window of `window_len` samples;
/// the remainder of `fft_len` is trailing padding.
pub fn back_window(fft_len: usize, window_len: usize, lead: usize) -> Vec<f32> {
    let tail = fft_len - window_len - lead;
    let mut out = vec![1.0f32; fft_len];
    for (n, w) in out.iter_mut().take(lead).enumerate() {
        *w = (0.5 * (1.0 - (PI * n as f64 / lead as f64).cos())) as f32;
    }
    for k in 0..tail {
        let w = 0.5 * (1.0 + (PI * (k + 1) as f64 / tail as f64).cos());
        out[lead + window_len + k] = w as f32;
    }
    out
}
