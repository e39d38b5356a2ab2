//! Two real channels in one complex FFT
//!
//! Stereo input is packed as `z = left + j*right`. With `Y = FFT(z)` the
//! channel spectra follow from conjugate symmetry:
//!
//! ```text
//! L(f) = (Y(f) + conj(Y(-f))) / 2
//! R(f) = -j (Y(f) - conj(Y(-f))) / 2
//! ```
//!
//! and the inverse relations rebuild `Y` before the inverse transform.

use crate::Complex32;

/// Split a packed spectrum of length `F` into `F/2 + 1` bins per channel
pub fn unpack_stereo(packed: &[Complex32], left: &mut [Complex32], right: &mut [Complex32]) {
    let n = packed.len();
    let bins = n / 2 + 1;
    debug_assert!(left.len() >= bins && right.len() >= bins);
    let minus_half_j = Complex32::new(0.0, -0.5);
    for f in 0..bins {
        let y = packed[f];
        let y_neg = packed[(n - f) % n].conj();
        left[f] = (y + y_neg) * 0.5;
        right[f] = (y - y_neg) * minus_half_j;
    }
}

/// Inverse of [`unpack_stereo`]
pub fn repack_stereo(left: &[Complex32], right: &[Complex32], packed: &mut [Complex32]) {
    let n = packed.len();
    let bins = n / 2 + 1;
    let j = Complex32::new(0.0, 1.0);
    for f in 0..bins {
        packed[f] = left[f] + j * right[f];
    }
    for f in 1..n / 2 {
        packed[n - f] = left[f].conj() + j * right[f].conj();
    }
}

/// Half spectrum of a single real channel transformed in the real part
pub fn unpack_mono(packed: &[Complex32], spectrum: &mut [Complex32]) {
    let n = packed.len();
    let bins = n / 2 + 1;
    for f in 0..bins {
        spectrum[f] = (packed[f] + packed[(n - f) % n].conj()) * 0.5;
    }
}

/// Inverse of [`unpack_mono`]
pub fn repack_mono(spectrum: &[Complex32], packed: &mut [Complex32]) {
    let n = packed.len();
    for f in 0..=n / 2 {
        packed[f] = spectrum[f];
    }
    for f in 1..n / 2 {
        packed[n - f] = spectrum[f].conj();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rustfft::{Fft, FftPlanner};

    fn assert_close(a: &[Complex32], b: &[Complex32]) {
        for (x, y) in a.iter().zip(b) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-4);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_unpack_repack_identity() {
        let n = 16;
        let packed: Vec<Complex32> = (0..n)
            .map(|i| Complex32::new((i as f32 * 0.7).sin(), (i as f32 * 1.3).cos()))
            .collect();
        let mut left = vec![Complex32::default(); n / 2 + 1];
        let mut right = vec![Complex32::default(); n / 2 + 1];
        unpack_stereo(&packed, &mut left, &mut right);

        let mut rebuilt = vec![Complex32::default(); n];
        repack_stereo(&left, &right, &mut rebuilt);
        assert_close(&packed, &rebuilt);
    }

    #[test]
    fn test_unpack_matches_separate_transforms() {
        let n = 32;
        let l: Vec<f32> = (0..n).map(|i| (i as f32 * 0.3).sin()).collect();
        let r: Vec<f32> = (0..n).map(|i| if i % 5 == 0 { 1.0 } else { -0.2 }).collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);

        let mut packed: Vec<Complex32> = l.iter().zip(&r).map(|(&a, &b)| Complex32::new(a, b)).collect();
        fft.process(&mut packed);

        let mut expect_l: Vec<Complex32> = l.iter().map(|&a| Complex32::new(a, 0.0)).collect();
        let mut expect_r: Vec<Complex32> = r.iter().map(|&b| Complex32::new(b, 0.0)).collect();
        fft.process(&mut expect_l);
        fft.process(&mut expect_r);

        let mut left = vec![Complex32::default(); n / 2 + 1];
        let mut right = vec![Complex32::default(); n / 2 + 1];
        unpack_stereo(&packed, &mut left, &mut right);
        assert_close(&left, &expect_l[..n / 2 + 1]);
        assert_close(&right, &expect_r[..n / 2 + 1]);
    }
}
