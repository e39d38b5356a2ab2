//! Overlap-add STFT filter
//!
//! Frame layout for FFT length `F`, window length `W` and padding
//! `zp = F - W`:
//!
//! ```text
//! | zp/2 zeros | W windowed input samples | zp - zp/2 zeros |
//! ```
//!
//! Consecutive frames advance by the hop `H = W / feed`. The input
//! accumulator starts with `W - H` zeros and the output holds `H` zeros
//! before the first frame, so every input sample leaves the filter exactly
//! `W + zp/2` samples later.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tm_core::Sample;

use crate::{
    Complex32, DspError, DspResult, back_window, hann_window, psd_scale, repack_mono,
    repack_stereo, unpack_mono, unpack_stereo,
};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Fraction of the window the filter advances per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFeed {
    /// hop = W/2
    Half,
    /// hop = W/4
    Quarter,
    /// hop = W/8
    Eighth,
}

impl WindowFeed {
    pub fn divisor(self) -> usize {
        match self {
            WindowFeed::Half => 2,
            WindowFeed::Quarter => 4,
            WindowFeed::Eighth => 8,
        }
    }

    pub fn from_divisor(divisor: usize) -> Option<Self> {
        match divisor {
            2 => Some(WindowFeed::Half),
            4 => Some(WindowFeed::Quarter),
            8 => Some(WindowFeed::Eighth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Rounded up to the next power of two
    pub fft_len: usize,
    /// 0 = same as the FFT length
    pub window_len: usize,
    pub feed: WindowFeed,
    /// 1 or 2
    pub channels: usize,
    /// Taper the zero-padded frame edges after the inverse transform
    pub back_window: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            fft_len: 1024,
            window_len: 0,
            feed: WindowFeed::Half,
            channels: 1,
            back_window: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HOOK
// ═══════════════════════════════════════════════════════════════════════════

/// Per-frame callbacks. All methods default to pass-through.
pub trait SpectralHook: Send {
    /// Half spectra (`F/2 + 1` bins), one entry per channel
    fn spectrum(&mut self, _spectra: &mut [Vec<Complex32>]) {}

    /// Windowed and padded frame before the forward transform
    fn pre_wave(&mut self, _frames: &mut [Vec<f32>]) {}

    /// Scaled frame after the inverse transform, before the back window
    fn post_wave(&mut self, _frames: &mut [Vec<f32>]) {}
}

// ═══════════════════════════════════════════════════════════════════════════
// FILTER
// ═══════════════════════════════════════════════════════════════════════════

pub struct OverlapAddFilter {
    fft_len: usize,
    window_len: usize,
    hop: usize,
    feed: usize,
    channels: usize,
    lead_pad: usize,
    zero_pad: usize,

    /// Hann window divided by the PSD scale
    window: Vec<f32>,
    back_window: Option<Vec<f32>>,
    inverse_scale: f32,

    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex32>,
    scratch: Vec<Complex32>,

    /// Per channel, `window_len` long, `input_fill` valid samples
    input: Vec<Vec<f32>>,
    input_fill: usize,
    output: Vec<VecDeque<f32>>,
    /// `2 * (F - H)`, channel `c` at `c * (F - H)`
    carry: Vec<f32>,
    frames: Vec<Vec<f32>>,
    spectra: Vec<Vec<Complex32>>,
    processed: u64,

    hook: Option<Box<dyn SpectralHook>>,
}

impl OverlapAddFilter {
    pub fn new(config: &FilterConfig) -> DspResult<Self> {
        if config.fft_len < 4 {
            return Err(DspError::InvalidConfig(format!(
                "FFT length {} too small",
                config.fft_len
            )));
        }
        if !(1..=2).contains(&config.channels) {
            return Err(DspError::InvalidConfig(format!(
                "{} channels, only 1 or 2 supported",
                config.channels
            )));
        }
        let fft_len = config.fft_len.next_power_of_two();
        let window_len = if config.window_len == 0 {
            fft_len
        } else {
            config.window_len
        };
        let feed = config.feed.divisor();
        if window_len > fft_len || window_len % feed != 0 || window_len < feed {
            return Err(DspError::InvalidConfig(format!(
                "window length {} invalid for FFT length {} and feed 1/{}",
                window_len, fft_len, feed
            )));
        }

        let hop = window_len / feed;
        let zero_pad = fft_len - window_len;
        let lead_pad = zero_pad / 2;

        let scale = psd_scale(window_len, fft_len);
        let window = hann_window(window_len)
            .into_iter()
            .map(|w| (w as f64 / scale) as f32)
            .collect();
        let inverse_scale = (2.0 / feed as f64 * scale / fft_len as f64) as f32;
        let back_window = (config.back_window && zero_pad > 0)
            .then(|| back_window(fft_len, window_len, lead_pad));

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let channels = config.channels;
        let bins = fft_len / 2 + 1;
        let mut filter = Self {
            fft_len,
            window_len,
            hop,
            feed,
            channels,
            lead_pad,
            zero_pad,
            window,
            back_window,
            inverse_scale,
            forward,
            inverse,
            fft_buf: vec![Complex32::default(); fft_len],
            scratch: vec![Complex32::default(); scratch_len],
            input: vec![vec![0.0; window_len]; channels],
            input_fill: 0,
            output: (0..channels)
                .map(|_| VecDeque::with_capacity(4 * hop))
                .collect(),
            carry: vec![0.0; 2 * (fft_len - hop)],
            frames: vec![vec![0.0; fft_len]; channels],
            spectra: vec![vec![Complex32::default(); bins]; channels],
            processed: 0,
            hook: None,
        };
        filter.reset();

        log::debug!(
            "OLA filter: fft {} window {} hop {} channels {} latency {}",
            fft_len,
            window_len,
            hop,
            channels,
            filter.latency()
        );
        Ok(filter)
    }

    pub fn set_hook(&mut self, hook: Option<Box<dyn SpectralHook>>) {
        self.hook = hook;
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn feed(&self) -> usize {
        self.feed
    }

    pub fn zero_pad(&self) -> usize {
        self.zero_pad
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames processed since construction or the last reset
    pub fn frames_processed(&self) -> u64 {
        self.processed
    }

    /// Delay in samples between input and output
    pub fn latency(&self) -> usize {
        self.window_len + self.lead_pad
    }

    /// Samples ready to be pulled per channel
    pub fn available(&self) -> usize {
        self.output[0].len()
    }

    /// Zero all buffers and cursors. No allocation.
    pub fn reset(&mut self) {
        for ch in &mut self.input {
            ch.fill(0.0);
        }
        self.input_fill = self.window_len - self.hop;
        for out in &mut self.output {
            out.clear();
            out.extend(std::iter::repeat_n(0.0, self.hop));
        }
        self.carry.fill(0.0);
        self.processed = 0;
    }

    /// Append input (one slice per channel). Returns the number of frames
    /// processed.
    pub fn push(&mut self, input: &[&[Sample]]) -> DspResult<usize> {
        if input.len() != self.channels {
            return Err(DspError::ChannelMismatch {
                expected: self.channels,
                got: input.len(),
            });
        }
        let len = input[0].len();
        if input.iter().any(|ch| ch.len() != len) {
            return Err(DspError::LengthMismatch);
        }

        let mut consumed = 0;
        let mut frames = 0;
        while consumed < len {
            let take = (self.window_len - self.input_fill).min(len - consumed);
            for (buf, src) in self.input.iter_mut().zip(input) {
                buf[self.input_fill..self.input_fill + take]
                    .copy_from_slice(&src[consumed..consumed + take]);
            }
            self.input_fill += take;
            consumed += take;

            if self.input_fill == self.window_len {
                self.process_frame();
                frames += 1;
            }
        }
        Ok(frames)
    }

    /// Move up to `out[c].len()` samples per channel into `out`. Returns the
    /// number of samples written per channel.
    pub fn pull(&mut self, out: &mut [&mut [Sample]]) -> DspResult<usize> {
        if out.len() != self.channels {
            return Err(DspError::ChannelMismatch {
                expected: self.channels,
                got: out.len(),
            });
        }
        let want = out.iter().map(|ch| ch.len()).min().unwrap_or(0);
        let n = want.min(self.available());
        for (queue, dst) in self.output.iter_mut().zip(out.iter_mut()) {
            for (d, s) in dst[..n].iter_mut().zip(queue.drain(..n)) {
                *d = s;
            }
        }
        Ok(n)
    }

    /// Push `input` and pull the same number of samples into `output`.
    ///
    /// The hop of silence held at the output guarantees the pull is always
    /// satisfied.
    pub fn process_block(&mut self, input: &[&[Sample]], output: &mut [&mut [Sample]]) -> DspResult<()> {
        let len = input.first().map_or(0, |ch| ch.len());
        if output.iter().any(|ch| ch.len() != len) {
            return Err(DspError::LengthMismatch);
        }
        self.push(input)?;
        let pulled = self.pull(output)?;
        debug_assert_eq!(pulled, len);
        Ok(())
    }

    /// Single channel convenience wrapper around [`Self::process_block`]
    pub fn process_mono(&mut self, input: &[Sample], output: &mut [Sample]) -> DspResult<()> {
        self.process_block(&[input], &mut [output])
    }

    fn process_frame(&mut self) {
        let f = self.fft_len;
        let w = self.window_len;
        let lead = self.lead_pad;
        let stereo = self.channels == 2;

        // Analysis window into the padded frame
        for (frame, input) in self.frames.iter_mut().zip(&self.input) {
            frame.fill(0.0);
            for ((dst, &x), &win) in frame[lead..lead + w].iter_mut().zip(input).zip(&self.window) {
                *dst = x * win;
            }
        }
        if let Some(hook) = self.hook.as_mut() {
            hook.pre_wave(&mut self.frames);
        }

        for n in 0..f {
            let im = if stereo { self.frames[1][n] } else { 0.0 };
            self.fft_buf[n] = Complex32::new(self.frames[0][n], im);
        }
        self.forward
            .process_with_scratch(&mut self.fft_buf, &mut self.scratch);

        if stereo {
            let (left, right) = self.spectra.split_at_mut(1);
            unpack_stereo(&self.fft_buf, &mut left[0], &mut right[0]);
        } else {
            unpack_mono(&self.fft_buf, &mut self.spectra[0]);
        }
        if let Some(hook) = self.hook.as_mut() {
            hook.spectrum(&mut self.spectra);
        }
        if stereo {
            repack_stereo(&self.spectra[0], &self.spectra[1], &mut self.fft_buf);
        } else {
            repack_mono(&self.spectra[0], &mut self.fft_buf);
        }

        self.inverse
            .process_with_scratch(&mut self.fft_buf, &mut self.scratch);

        let scale = self.inverse_scale;
        for n in 0..f {
            let y = self.fft_buf[n];
            self.frames[0][n] = y.re * scale;
            if stereo {
                self.frames[1][n] = y.im * scale;
            }
        }
        if let Some(hook) = self.hook.as_mut() {
            hook.post_wave(&mut self.frames);
        }
        if let Some(back) = &self.back_window {
            for frame in &mut self.frames {
                for (s, &b) in frame.iter_mut().zip(back) {
                    *s *= b;
                }
            }
        }

        // Overlap-add with the carried tail, emit one hop, keep the rest
        let hop = self.hop;
        let tail = f - hop;
        for (c, frame) in self.frames.iter_mut().enumerate() {
            let carry = &mut self.carry[c * tail..(c + 1) * tail];
            for (s, &prev) in frame[..tail].iter_mut().zip(carry.iter()) {
                *s += prev;
            }
            self.output[c].extend(frame[..hop].iter().copied());
            carry.copy_from_slice(&frame[hop..]);
        }

        for ch in &mut self.input {
            ch.copy_within(hop.., 0);
        }
        self.input_fill = w - hop;
        self.processed += 1;
    }
}

impl std::fmt::Debug for OverlapAddFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlapAddFilter")
            .field("fft_len", &self.fft_len)
            .field("window_len", &self.window_len)
            .field("hop", &self.hop)
            .field("channels", &self.channels)
            .field("processed", &self.processed)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fft_len: usize, window_len: usize, feed: WindowFeed) -> FilterConfig {
        FilterConfig {
            fft_len,
            window_len,
            feed,
            channels: 1,
            back_window: true,
        }
    }

    #[test]
    fn test_sizes() {
        let filter = OverlapAddFilter::new(&config(1000, 512, WindowFeed::Quarter)).unwrap();
        assert_eq!(filter.fft_len(), 1024);
        assert_eq!(filter.hop(), 128);
        assert_eq!(filter.zero_pad(), 512);
        assert_eq!(filter.latency(), 512 + 256);
        assert_eq!(filter.carry.len(), 2 * (1024 - 128));
        assert_eq!(filter.available(), 128);
    }

    #[test]
    fn test_invalid_config() {
        assert!(OverlapAddFilter::new(&config(256, 512, WindowFeed::Half)).is_err());
        let mut cfg = config(256, 0, WindowFeed::Half);
        cfg.channels = 3;
        assert!(OverlapAddFilter::new(&cfg).is_err());
    }

    #[test]
    fn test_input_consumed_in_hops() {
        let mut filter = OverlapAddFilter::new(&config(64, 32, WindowFeed::Quarter)).unwrap();
        assert_eq!(filter.push(&[&[0.0; 7]]).unwrap(), 0);
        assert_eq!(filter.push(&[&[0.0; 1]]).unwrap(), 1);
        assert_eq!(filter.push(&[&[0.0; 24]]).unwrap(), 3);
        assert_eq!(filter.frames_processed(), 4);
    }

    #[test]
    fn test_channel_mismatch() {
        let mut filter = OverlapAddFilter::new(&config(64, 0, WindowFeed::Half)).unwrap();
        assert_eq!(
            filter.push(&[&[0.0; 4], &[0.0; 4]]),
            Err(DspError::ChannelMismatch { expected: 1, got: 2 })
        );
    }
}
