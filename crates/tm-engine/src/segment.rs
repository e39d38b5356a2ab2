//! Sample segments
//!
//! A segment is one loaded channel of audio placed on a track timeline:
//! leading silence, an optional start offset into the first loop iteration,
//! any number of loop iterations (0 = endless) and hann ramps at its edges,
//! at loop boundaries and towards neighbouring segments.
//!
//! ```text
//!  global_position
//!  |<- offset ->|<-- f0 -->|<----- len ----->|<----- len ----->|
//!               | iter 0   | iter 1          | iter 2          |
//!               ^ data_start                                   ^ end
//! ```

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tm_core::{Sample, hann_fall, hann_rise};
use tm_file::{AudioSource, FileResult};

use crate::{EngineError, EngineResult};

// ═══════════════════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════

/// Where the first loop iteration starts within the source range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartOffset {
    At(usize),
    /// Uniformly drawn from the source range on load
    Random,
}

impl Default for StartOffset {
    fn default() -> Self {
        StartOffset::At(0)
    }
}

/// Load parameters shared by all channels of one load call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    /// Leading silence in samples
    pub offset: u64,
    /// 0 = loop forever
    pub loop_count: u32,
    pub start_offset: StartOffset,
    /// Source range used by the segment
    pub file_offset: usize,
    pub file_length: Option<usize>,
    pub gain: f32,
    /// Fade in and out of the whole segment
    pub ramp_len: usize,
    /// Ramp at every loop boundary
    pub loop_ramp_len: usize,
    /// Overlap consecutive loop iterations by `loop_ramp_len` instead of
    /// ramping down and up again
    pub loop_crossfade: bool,
    /// Crossfade with the previous segment of each target track
    pub crossfade_len: usize,
    pub name: String,
    /// Source channels feeding the target tracks; defaults to `0..tracks`
    pub source_channels: Option<Vec<usize>>,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            offset: 0,
            loop_count: 1,
            start_offset: StartOffset::default(),
            file_offset: 0,
            file_length: None,
            gain: 1.0,
            ramp_len: 0,
            loop_ramp_len: 0,
            loop_crossfade: false,
            crossfade_len: 0,
            name: String::new(),
            source_channels: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SOURCE
// ═══════════════════════════════════════════════════════════════════════════

/// Sample data of one segment
#[derive(Clone)]
pub enum SegmentSource {
    Memory(Arc<[Sample]>),
    File {
        source: Arc<dyn AudioSource>,
        channel: usize,
    },
}

impl SegmentSource {
    pub fn frames(&self) -> usize {
        match self {
            SegmentSource::Memory(data) => data.len(),
            SegmentSource::File { source, .. } => source.frames(),
        }
    }

    /// Fill `out` from `offset`, zero padding past the end
    fn fetch(&self, offset: usize, out: &mut [Sample]) -> FileResult<()> {
        let copied = match self {
            SegmentSource::Memory(data) => {
                let avail = data.len().saturating_sub(offset).min(out.len());
                if avail > 0 {
                    out[..avail].copy_from_slice(&data[offset..offset + avail]);
                }
                avail
            }
            SegmentSource::File { source, channel } => source.read_channel(*channel, offset, out)?,
        };
        out[copied..].fill(0.0);
        Ok(())
    }
}

impl std::fmt::Debug for SegmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentSource::Memory(data) => write!(f, "Memory({} samples)", data.len()),
            SegmentSource::File { source, channel } => write!(
                f,
                "File(channel {} of {}, {} frames)",
                channel,
                source.channels(),
                source.frames()
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEGMENT
// ═══════════════════════════════════════════════════════════════════════════

/// Placement of a loaded segment, returned by load calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub track: usize,
    pub name: String,
    pub global_position: u64,
    pub data_start: u64,
    /// `None` for endless segments
    pub end: Option<u64>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SampleSegment {
    source: SegmentSource,
    name: String,
    /// Start of the source range
    base: usize,
    /// Samples per loop iteration
    len: usize,
    /// Resolved start offset into the first iteration
    start: usize,
    loop_count: u32,
    offset: u64,
    gain: f32,
    ramp_len: usize,
    loop_ramp_len: usize,
    loop_crossfade: bool,
    crossfade_len: usize,
    fade_out_len: usize,
    global_position: u64,
}

impl SampleSegment {
    /// Build and validate a segment. Nothing is shared with the engine yet.
    pub fn new(source: SegmentSource, params: &SegmentParams) -> EngineResult<Self> {
        if !params.gain.is_finite() {
            return Err(EngineError::InvalidParam(format!(
                "segment gain {} is not finite",
                params.gain
            )));
        }
        let frames = source.frames();
        if params.file_offset >= frames {
            return Err(EngineError::InvalidParam(format!(
                "file offset {} beyond source length {}",
                params.file_offset, frames
            )));
        }
        let avail = frames - params.file_offset;
        let len = params.file_length.map_or(avail, |l| l.min(avail));
        if len == 0 {
            return Err(EngineError::InvalidParam("empty segment".into()));
        }
        let start = match params.start_offset {
            StartOffset::At(s) => s,
            StartOffset::Random => rand::rng().random_range(0..len),
        };
        if start >= len {
            return Err(EngineError::InvalidParam(format!(
                "start offset {} not within segment length {}",
                start, len
            )));
        }

        let segment = Self {
            source,
            name: params.name.clone(),
            base: params.file_offset,
            len,
            start,
            loop_count: params.loop_count,
            offset: params.offset,
            gain: params.gain,
            ramp_len: params.ramp_len,
            loop_ramp_len: params.loop_ramp_len,
            loop_crossfade: params.loop_crossfade,
            crossfade_len: params.crossfade_len,
            fade_out_len: 0,
            global_position: 0,
        };
        segment.validate_ramps()?;
        Ok(segment)
    }

    fn validate_ramps(&self) -> EngineResult<()> {
        let first = self.first_len() as u64;
        if self.loop_count != 1 && self.loop_ramp_len > 0 {
            if 2 * self.loop_ramp_len > self.len {
                return Err(EngineError::RampTooLong {
                    ramp: 2 * self.loop_ramp_len as u64,
                    playable: self.len as u64,
                });
            }
            if self.loop_crossfade && self.loop_ramp_len as u64 > first {
                return Err(EngineError::RampTooLong {
                    ramp: self.loop_ramp_len as u64,
                    playable: first,
                });
            }
        }
        // Endless segments only fade in, so the first iteration bounds it
        let playable = self.total_len().unwrap_or(first);
        for ramp in [self.ramp_len, self.crossfade_len] {
            if ramp as u64 > playable {
                return Err(EngineError::RampTooLong {
                    ramp: ramp as u64,
                    playable,
                });
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SegmentSource {
        &self.source
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn is_endless(&self) -> bool {
        self.loop_count == 0
    }

    pub fn global_position(&self) -> u64 {
        self.global_position
    }

    pub(crate) fn set_global_position(&mut self, position: u64) {
        self.global_position = position;
    }

    pub fn crossfade_len(&self) -> usize {
        self.crossfade_len
    }

    /// Fade out over the last `len` samples towards a crossfading successor
    pub(crate) fn set_fade_out(&mut self, len: usize) {
        self.fade_out_len = len;
    }

    /// First sample that is not leading silence
    pub fn data_start(&self) -> u64 {
        self.global_position + self.offset
    }

    /// One past the last sample, `None` for endless segments
    pub fn end(&self) -> Option<u64> {
        self.total_len().map(|t| self.data_start() + t)
    }

    /// Playable samples over all iterations
    pub fn total_len(&self) -> Option<u64> {
        if self.loop_count == 0 {
            return None;
        }
        let loops = self.loop_count as u64;
        let first = self.first_len() as u64;
        Some(first + (loops - 1) * self.stride() as u64)
    }

    pub fn info(&self, track: usize) -> SegmentInfo {
        SegmentInfo {
            track,
            name: self.name.clone(),
            global_position: self.global_position,
            data_start: self.data_start(),
            end: self.end(),
            length: self.total_len(),
        }
    }

    fn first_len(&self) -> usize {
        self.len - self.start
    }

    /// Overlap between consecutive iterations
    fn overlap(&self) -> usize {
        if self.loop_crossfade && self.loop_count != 1 {
            self.loop_ramp_len
        } else {
            0
        }
    }

    fn stride(&self) -> usize {
        self.len - self.overlap()
    }

    fn iteration_start(&self, k: u64) -> u64 {
        if k == 0 {
            return 0;
        }
        (self.first_len() - self.overlap()) as u64 + (k - 1) * self.stride() as u64
    }

    fn iteration_len(&self, k: u64) -> usize {
        if k == 0 { self.first_len() } else { self.len }
    }

    fn is_last(&self, k: u64) -> bool {
        self.loop_count != 0 && k + 1 == self.loop_count as u64
    }

    /// First iteration that may cover relative position `p`
    fn first_iteration_at(&self, p: u64) -> u64 {
        let first_end = (self.first_len() - self.overlap()) as u64;
        if p < first_end {
            return 0;
        }
        let k = 1 + (p - first_end) / self.stride() as u64;
        if self.overlap() > 0 { k - 1 } else { k }
    }

    /// Loop boundary weight of sample `j` within iteration `k`
    fn iteration_weight(&self, k: u64, j: usize, iter_len: usize) -> f32 {
        let r = self.loop_ramp_len;
        if r == 0 || self.loop_count == 1 {
            return 1.0;
        }
        let mut w = 1.0;
        if k > 0 && j < r {
            w *= hann_rise(j, r);
        }
        if !self.is_last(k) && j + r >= iter_len {
            w *= if self.loop_crossfade {
                1.0 - hann_rise(j + r - iter_len, r)
            } else {
                hann_fall(iter_len - 1 - j, r)
            };
        }
        w
    }

    /// Segment edge weight at relative position `p`
    fn envelope(&self, p: u64) -> f32 {
        let total = self.total_len();
        let mut w = 1.0;
        if p < self.ramp_len as u64 {
            w *= hann_rise(p as usize, self.ramp_len);
        }
        if p < self.crossfade_len as u64 {
            w *= hann_rise(p as usize, self.crossfade_len);
        }
        if let Some(total) = total {
            let remaining = total - 1 - p;
            if remaining < self.ramp_len as u64 {
                w *= hann_fall(remaining as usize, self.ramp_len);
            }
            let fade = self.fade_out_len as u64;
            if fade > 0 && p + fade >= total {
                w *= 1.0 - hann_rise((p + fade - total) as usize, self.fade_out_len);
            }
        }
        w
    }

    /// Add this segment's contribution to `out`, which covers timeline
    /// samples `window_start..window_start + out.len()`. `scratch` must be
    /// non-empty; reads are chunked to its length.
    pub(crate) fn render(
        &self,
        window_start: u64,
        out: &mut [Sample],
        scratch: &mut [Sample],
    ) -> FileResult<()> {
        let window_end = window_start + out.len() as u64;
        let data_start = self.data_start();
        let end = self.end().unwrap_or(u64::MAX);
        let from = window_start.max(data_start);
        let to = window_end.min(end);
        if from >= to || scratch.is_empty() {
            return Ok(());
        }
        let (a, b) = (from - data_start, to - data_start);

        let mut k = self.first_iteration_at(a);
        loop {
            if self.loop_count != 0 && k >= self.loop_count as u64 {
                break;
            }
            let start = self.iteration_start(k);
            if start >= b {
                break;
            }
            let iter_len = self.iteration_len(k);
            let x = a.max(start);
            let y = b.min(start + iter_len as u64);
            if x < y {
                let source_start = if k == 0 { self.start } else { 0 };
                let mut done = 0usize;
                let count = (y - x) as usize;
                while done < count {
                    let n = (count - done).min(scratch.len());
                    let j0 = (x - start) as usize + done;
                    let chunk = &mut scratch[..n];
                    self.source.fetch(self.base + source_start + j0, chunk)?;
                    let out_base = (x - a) as usize + done + (from - window_start) as usize;
                    for (i, &sample) in chunk.iter().enumerate() {
                        let j = j0 + i;
                        let p = start + j as u64;
                        let w = self.gain * self.iteration_weight(k, j, iter_len) * self.envelope(p);
                        out[out_base + i] += w * sample;
                    }
                    done += n;
                }
            }
            k += 1;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn memory(data: Vec<Sample>) -> SegmentSource {
        SegmentSource::Memory(data.into())
    }

    fn ramp_data(n: usize) -> Vec<Sample> {
        (0..n).map(|i| i as Sample).collect()
    }

    fn render_all(segment: &SampleSegment, len: usize) -> Vec<Sample> {
        let mut out = vec![0.0; len];
        let mut scratch = vec![0.0; 7];
        segment.render(0, &mut out, &mut scratch).unwrap();
        out
    }

    #[test]
    fn test_single_iteration() {
        let seg = SampleSegment::new(memory(ramp_data(10)), &SegmentParams::default()).unwrap();
        assert_eq!(seg.total_len(), Some(10));
        assert_eq!(seg.end(), Some(10));
        let out = render_all(&seg, 12);
        assert_eq!(&out[..10], &ramp_data(10)[..]);
        assert_eq!(&out[10..], &[0.0, 0.0]);
    }

    #[test]
    fn test_offset_and_start_offset() {
        let params = SegmentParams {
            offset: 3,
            loop_count: 2,
            start_offset: StartOffset::At(2),
            ..Default::default()
        };
        let seg = SampleSegment::new(memory(ramp_data(4)), &params).unwrap();
        assert_eq!(seg.total_len(), Some(6));
        let out = render_all(&seg, 10);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_file_range() {
        let params = SegmentParams {
            file_offset: 2,
            file_length: Some(3),
            loop_count: 2,
            ..Default::default()
        };
        let seg = SampleSegment::new(memory(ramp_data(10)), &params).unwrap();
        let out = render_all(&seg, 6);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ramp_longer_than_playable_rejected() {
        let params = SegmentParams {
            loop_count: 2,
            start_offset: StartOffset::At(3),
            ramp_len: 18,
            ..Default::default()
        };
        let err = SampleSegment::new(memory(vec![1.0; 10]), &params).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RampTooLong {
                ramp: 18,
                playable: 17
            }
        ));

        let params = SegmentParams {
            ramp_len: 17,
            ..params
        };
        assert!(SampleSegment::new(memory(vec![1.0; 10]), &params).is_ok());
    }

    #[test]
    fn test_invalid_params() {
        let source = || memory(vec![1.0; 8]);
        let bad = [
            SegmentParams {
                gain: f32::NAN,
                ..Default::default()
            },
            SegmentParams {
                file_offset: 8,
                ..Default::default()
            },
            SegmentParams {
                start_offset: StartOffset::At(8),
                ..Default::default()
            },
            SegmentParams {
                loop_count: 3,
                loop_ramp_len: 5,
                ..Default::default()
            },
        ];
        for params in &bad {
            assert!(SampleSegment::new(source(), params).is_err(), "{:?}", params);
        }
    }

    #[test]
    fn test_random_start_within_range() {
        let params = SegmentParams {
            start_offset: StartOffset::Random,
            ..Default::default()
        };
        for _ in 0..32 {
            let seg = SampleSegment::new(memory(vec![1.0; 16]), &params).unwrap();
            let total = seg.total_len().unwrap();
            assert!((1..=16).contains(&total));
        }
    }

    #[test]
    fn test_edge_ramp() {
        let params = SegmentParams {
            ramp_len: 4,
            ..Default::default()
        };
        let seg = SampleSegment::new(memory(vec![1.0; 16]), &params).unwrap();
        let out = render_all(&seg, 16);
        assert_eq!(out[0], 0.0);
        assert_relative_eq!(out[2], 0.5, epsilon = 1e-6);
        assert_eq!(out[8], 1.0);
        assert_eq!(out[15], 0.0);
        assert_relative_eq!(out[13], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_endless_loop() {
        let params = SegmentParams {
            loop_count: 0,
            ..Default::default()
        };
        let seg = SampleSegment::new(memory(ramp_data(3)), &params).unwrap();
        assert!(seg.is_endless());
        assert_eq!(seg.end(), None);
        let mut out = vec![0.0; 4];
        let mut scratch = vec![0.0; 8];
        seg.render(3_000_001, &mut out, &mut scratch).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_loop_crossfade_is_constant_gain() {
        let params = SegmentParams {
            loop_count: 3,
            loop_ramp_len: 4,
            loop_crossfade: true,
            ..Default::default()
        };
        let seg = SampleSegment::new(memory(vec![1.0; 10]), &params).unwrap();
        // Iterations overlap by the loop ramp
        assert_eq!(seg.total_len(), Some(10 + 2 * 6));
        let out = render_all(&seg, 22);
        for &s in &out {
            assert_relative_eq!(s, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_loop_ramp_dips_at_boundaries() {
        let params = SegmentParams {
            loop_count: 2,
            loop_ramp_len: 2,
            ..Default::default()
        };
        let seg = SampleSegment::new(memory(vec![1.0; 8]), &params).unwrap();
        let out = render_all(&seg, 16);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[7], 0.0);
        assert_eq!(out[8], 0.0);
        assert_eq!(out[15], 1.0);
    }

    #[test]
    fn test_fade_out_against_crossfade_in() {
        let mut first = SampleSegment::new(memory(vec![1.0; 10]), &SegmentParams::default()).unwrap();
        first.set_fade_out(4);
        let params = SegmentParams {
            crossfade_len: 4,
            ..Default::default()
        };
        let mut second = SampleSegment::new(memory(vec![1.0; 10]), &params).unwrap();
        second.set_global_position(6);

        let mut out = vec![0.0; 16];
        let mut scratch = vec![0.0; 16];
        first.render(0, &mut out, &mut scratch).unwrap();
        second.render(0, &mut out, &mut scratch).unwrap();
        for &s in &out {
            assert_relative_eq!(s, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_render_window_inside_segment() {
        let params = SegmentParams {
            offset: 5,
            ..Default::default()
        };
        let mut seg = SampleSegment::new(memory(ramp_data(10)), &params).unwrap();
        seg.set_global_position(100);
        assert_eq!(seg.data_start(), 105);
        let mut out = vec![0.0; 4];
        let mut scratch = vec![0.0; 4];
        seg.render(103, &mut out, &mut scratch).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0]);
    }
}
