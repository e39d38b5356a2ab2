//! Overlap-add filter integration tests
//!
//! Verifies:
//! - Pass-through reconstruction with the documented latency
//! - Stereo packing keeps channels separate
//! - Spectrum hooks see PSD-scaled bins and can modify them
//! - Reset restores the initial state

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use tm_dsp::{Complex32, FilterConfig, OverlapAddFilter, SpectralHook, WindowFeed};

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn mono(fft_len: usize, window_len: usize, feed: WindowFeed) -> OverlapAddFilter {
    OverlapAddFilter::new(&FilterConfig {
        fft_len,
        window_len,
        feed,
        channels: 1,
        back_window: true,
    })
    .unwrap()
}

fn stereo(fft_len: usize, window_len: usize, feed: WindowFeed) -> OverlapAddFilter {
    OverlapAddFilter::new(&FilterConfig {
        fft_len,
        window_len,
        feed,
        channels: 2,
        back_window: true,
    })
    .unwrap()
}

/// Run `input` through the filter in blocks of `block` samples
fn run_mono(filter: &mut OverlapAddFilter, input: &[f32], block: usize) -> Vec<f32> {
    let mut out = vec![0.0; input.len()];
    for (src, dst) in input.chunks(block).zip(out.chunks_mut(block)) {
        filter.process_mono(src, dst).unwrap();
    }
    out
}

fn impulse(len: usize, at: usize) -> Vec<f32> {
    let mut v = vec![0.0; len];
    v[at] = 1.0;
    v
}

// ═══════════════════════════════════════════════════════════════════════════
// RECONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_impulse_round_trip_with_zero_pad() {
    let mut filter = mono(512, 256, WindowFeed::Quarter);
    let latency = filter.latency();
    assert_eq!(latency, 256 + 128);

    let input = impulse(2048, 0);
    let out = run_mono(&mut filter, &input, 100);
    for (i, &s) in out.iter().enumerate() {
        let expected = if i == latency { 1.0 } else { 0.0 };
        assert_relative_eq!(s, expected, epsilon = 1e-4);
    }
}

#[test]
fn test_impulse_round_trip_all_feeds() {
    for feed in [WindowFeed::Half, WindowFeed::Quarter, WindowFeed::Eighth] {
        let mut filter = mono(256, 0, feed);
        let latency = filter.latency();
        assert_eq!(latency, 256);

        let input = impulse(1500, 37);
        let out = run_mono(&mut filter, &input, 64);
        assert_relative_eq!(out[37 + latency], 1.0, epsilon = 1e-4);
        let energy: f32 = out.iter().map(|s| s * s).sum();
        assert_relative_eq!(energy, 1.0, epsilon = 1e-3);
    }
}

#[test]
fn test_sine_delayed_by_latency() {
    let mut filter = mono(1024, 768, WindowFeed::Quarter);
    let latency = filter.latency();
    let input: Vec<f32> = (0..8192).map(|i| (i as f32 * 0.05).sin() * 0.8).collect();
    let out = run_mono(&mut filter, &input, 333);
    for i in latency..input.len() {
        assert_relative_eq!(out[i], input[i - latency], epsilon = 1e-4);
    }
}

#[test]
fn test_stereo_channels_stay_separate() {
    let mut filter = stereo(256, 128, WindowFeed::Half);
    let latency = filter.latency();
    let n = 2048;
    let left: Vec<f32> = (0..n).map(|i| (i as f32 * 0.1).sin()).collect();
    let right = vec![-0.25f32; n];
    let mut out_l = vec![0.0; n];
    let mut out_r = vec![0.0; n];
    for start in (0..n).step_by(128) {
        let end = (start + 128).min(n);
        let (ol, or) = (&mut out_l[start..end], &mut out_r[start..end]);
        filter
            .process_block(&[&left[start..end], &right[start..end]], &mut [ol, or])
            .unwrap();
    }
    for i in latency..n {
        assert_relative_eq!(out_l[i], left[i - latency], epsilon = 1e-4);
        assert_relative_eq!(out_r[i], -0.25, epsilon = 1e-4);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HOOKS
// ═══════════════════════════════════════════════════════════════════════════

struct DcProbe(Arc<Mutex<f32>>);

impl SpectralHook for DcProbe {
    fn spectrum(&mut self, spectra: &mut [Vec<Complex32>]) {
        *self.0.lock().unwrap() = spectra[0][0].re;
    }
}

struct Gain(f32);

impl SpectralHook for Gain {
    fn spectrum(&mut self, spectra: &mut [Vec<Complex32>]) {
        for ch in spectra.iter_mut() {
            for bin in ch.iter_mut() {
                *bin *= self.0;
            }
        }
    }
}

struct SilenceRight;

impl SpectralHook for SilenceRight {
    fn spectrum(&mut self, spectra: &mut [Vec<Complex32>]) {
        spectra[1].fill(Complex32::default());
    }
}

#[test]
fn test_spectrum_is_psd_scaled() {
    let (fft_len, window_len) = (256usize, 256usize);
    let probe = Arc::new(Mutex::new(0.0f32));
    let mut filter = mono(fft_len, window_len, WindowFeed::Half);
    filter.set_hook(Some(Box::new(DcProbe(probe.clone()))));

    run_mono(&mut filter, &vec![1.0; 2048], 256);

    // DC bin of a constant 1.0 = sum(hann) / sqrt(0.375 * 0.5 * W * F)
    let expected = (window_len as f64 / 2.0) / (0.375 * 0.5 * window_len as f64 * fft_len as f64).sqrt();
    assert_relative_eq!(*probe.lock().unwrap(), expected as f32, epsilon = 1e-4);
}

#[test]
fn test_gain_hook_scales_output() {
    let mut filter = mono(512, 512, WindowFeed::Quarter);
    filter.set_hook(Some(Box::new(Gain(0.5))));
    let latency = filter.latency();
    let out = run_mono(&mut filter, &impulse(2048, 10), 128);
    assert_relative_eq!(out[10 + latency], 0.5, epsilon = 1e-4);
}

#[test]
fn test_hook_silences_one_channel() {
    let mut filter = stereo(128, 128, WindowFeed::Half);
    filter.set_hook(Some(Box::new(SilenceRight)));
    let n = 1024;
    let left = vec![0.5f32; n];
    let right = vec![0.5f32; n];
    let mut out_l = vec![0.0; n];
    let mut out_r = vec![0.0; n];
    filter
        .process_block(&[&left, &right], &mut [&mut out_l, &mut out_r])
        .unwrap();
    let latency = filter.latency();
    assert_relative_eq!(out_l[latency + 100], 0.5, epsilon = 1e-4);
    assert!(out_r.iter().all(|s| s.abs() < 1e-4));
}

// ═══════════════════════════════════════════════════════════════════════════
// RESET
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reset_reproduces_first_run() {
    let mut filter = mono(256, 128, WindowFeed::Quarter);
    let input: Vec<f32> = (0..1000).map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0).collect();
    let first = run_mono(&mut filter, &input, 50);

    run_mono(&mut filter, &vec![0.3; 517], 47);
    filter.reset();
    assert_eq!(filter.frames_processed(), 0);
    assert_eq!(filter.available(), filter.hop());

    let second = run_mono(&mut filter, &input, 50);
    for (a, b) in first.iter().zip(&second) {
        assert_relative_eq!(a, b, epsilon = 1e-6);
    }
}
