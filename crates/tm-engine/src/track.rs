//! Virtual playback tracks

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tm_core::{LinearRamp, MuteSolo, Sample, clips};
use tm_file::FileResult;

use crate::SampleSegment;

// ═══════════════════════════════════════════════════════════════════════════
// MODE
// ═══════════════════════════════════════════════════════════════════════════

/// How a track combines with lower-index tracks on the same output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackMode {
    #[default]
    Add,
    /// Multiplies what lower-index tracks accumulated so far
    Multiply,
}

impl TrackMode {
    #[inline]
    pub(crate) fn combine(self, accum: &mut [Sample], track: &[Sample]) {
        match self {
            TrackMode::Add => accum.iter_mut().zip(track).for_each(|(a, t)| *a += t),
            TrackMode::Multiply => accum.iter_mut().zip(track).for_each(|(a, t)| *a *= t),
        }
    }
}

/// Snapshot of a track for the control layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatus {
    pub index: usize,
    pub name: String,
    pub output: usize,
    pub mode: TrackMode,
    pub mute: bool,
    pub solo: bool,
    pub volume: f32,
    pub queued: usize,
    /// `None` while an endless segment is queued
    pub queue_end: Option<u64>,
    pub play_position: u64,
    pub underrun: bool,
    pub clip_count: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// TRACK
// ═══════════════════════════════════════════════════════════════════════════

pub struct Track {
    index: usize,
    name: String,
    output: usize,
    mode: TrackMode,
    pub(crate) flags: MuteSolo,
    volume: LinearRamp,
    queue: VecDeque<SampleSegment>,
    /// Played segments kept for rewind
    history: Vec<SampleSegment>,
    /// Played segments waiting to be dropped outside the process lock
    reclaim: Vec<SampleSegment>,
    play_position: u64,
    underrun: bool,
    clip_threshold: f32,
    clip_count: u64,
}

impl Track {
    pub fn new(index: usize, name: String, output: usize, clip_threshold: f32) -> Self {
        Self {
            index,
            name,
            output,
            mode: TrackMode::Add,
            flags: MuteSolo::default(),
            volume: LinearRamp::new(1.0),
            queue: VecDeque::new(),
            history: Vec::new(),
            reclaim: Vec::new(),
            play_position: 0,
            underrun: false,
            clip_threshold,
            clip_count: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn output(&self) -> usize {
        self.output
    }

    pub(crate) fn set_output(&mut self, output: usize) {
        self.output = output;
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TrackMode) {
        self.mode = mode;
    }

    /// Ramp the volume linearly to `volume` over `ramp_len` samples
    pub fn set_volume(&mut self, volume: f32, ramp_len: usize) {
        self.volume.set_target(volume, ramp_len);
    }

    pub fn volume(&self) -> f32 {
        self.volume.current()
    }

    pub fn play_position(&self) -> u64 {
        self.play_position
    }

    pub fn underrun(&self) -> bool {
        self.underrun
    }

    pub fn clear_underrun(&mut self) {
        self.underrun = false;
    }

    pub fn clip_threshold(&self) -> f32 {
        self.clip_threshold
    }

    pub fn set_clip_threshold(&mut self, threshold: f32) {
        self.clip_threshold = threshold;
    }

    pub fn clip_count(&self) -> u64 {
        self.clip_count
    }

    pub fn reset_clip_count(&mut self) {
        self.clip_count = 0;
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_endless(&self) -> bool {
        self.queue.iter().any(SampleSegment::is_endless)
    }

    /// Timeline position where the next load lands, `None` if an endless
    /// segment is queued
    pub fn queue_end(&self) -> Option<u64> {
        let mut end = self.play_position;
        for segment in &self.queue {
            end = end.max(segment.end()?);
        }
        Some(end)
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &SampleSegment> {
        self.queue.iter()
    }

    pub(crate) fn segments_mut(&mut self) -> impl Iterator<Item = &mut SampleSegment> {
        self.queue.iter_mut()
    }

    /// Buffer capacity needed to take `additional` more segments without
    /// growing the queue or the retired lists. `None` if it already fits.
    pub(crate) fn storage_needed(&self, additional: usize) -> Option<usize> {
        let total = self.queue.len() + self.history.len() + self.reclaim.len() + additional;
        let fits = self.queue.capacity() >= total
            && self.history.capacity() >= total
            && self.reclaim.capacity() >= total;
        (!fits).then_some(total)
    }

    /// Move the segments into the larger buffers of `storage`. The old
    /// buffers are left behind in `storage` for the caller to drop.
    pub(crate) fn adopt_storage(&mut self, storage: &mut TrackStorage) {
        if storage.queue.capacity() > self.queue.capacity() {
            storage.queue.append(&mut self.queue);
            std::mem::swap(&mut self.queue, &mut storage.queue);
        }
        grow(&mut self.history, &mut storage.history);
        grow(&mut self.reclaim, &mut storage.reclaim);
    }

    pub(crate) fn enqueue(&mut self, segment: SampleSegment) {
        self.queue.push_back(segment);
    }

    pub fn status(&self) -> TrackStatus {
        TrackStatus {
            index: self.index,
            name: self.name.clone(),
            output: self.output,
            mode: self.mode,
            mute: self.flags.mute,
            solo: self.flags.solo,
            volume: self.volume.current(),
            queued: self.queue.len(),
            queue_end: self.queue_end(),
            play_position: self.play_position,
            underrun: self.underrun,
            clip_count: self.clip_count,
        }
    }

    /// Render the next period into `out` and advance the play position.
    ///
    /// Returns true if the track ran dry during this period.
    pub(crate) fn produce(
        &mut self,
        out: &mut [Sample],
        scratch: &mut [Sample],
        auto_clear: bool,
    ) -> FileResult<bool> {
        out.fill(0.0);
        let window_start = self.play_position;
        let window_end = window_start + out.len() as u64;
        let had_data = !self.queue.is_empty();

        let mut last_end = 0;
        for segment in &self.queue {
            segment.render(window_start, out, scratch)?;
        }

        let mut i = 0;
        while i < self.queue.len() {
            match self.queue[i].end() {
                Some(end) if end <= window_end => {
                    last_end = last_end.max(end);
                    if let Some(segment) = self.queue.remove(i) {
                        if auto_clear {
                            self.reclaim.push(segment);
                        } else {
                            self.history.push(segment);
                        }
                    }
                }
                _ => i += 1,
            }
        }

        self.volume.apply(out);
        if clips(out, self.clip_threshold) {
            self.clip_count += 1;
        }
        self.play_position = window_end;

        let ran_dry = had_data && self.queue.is_empty() && last_end < window_end;
        if ran_dry && !self.underrun {
            self.underrun = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Move played segments back into the queue and restart from 0
    pub(crate) fn rewind(&mut self) {
        self.queue.extend(self.history.drain(..));
        self.queue
            .make_contiguous()
            .sort_unstable_by_key(SampleSegment::data_start);
        self.play_position = 0;
        self.underrun = false;
    }

    /// Hand over retired segments so they are dropped outside the lock
    pub(crate) fn drain_reclaim(&mut self, into: &mut Vec<SampleSegment>) {
        into.append(&mut self.reclaim);
    }

    /// Empty the queue and history. The play position stays on the shared
    /// timeline; the segments are returned to the caller.
    pub(crate) fn clear(&mut self, into: &mut Vec<SampleSegment>) {
        into.extend(self.queue.drain(..));
        into.append(&mut self.history);
        into.append(&mut self.reclaim);
        self.underrun = false;
    }

    /// Clear and restart the timeline at 0, used when the device stops
    pub(crate) fn reset(&mut self, into: &mut Vec<SampleSegment>) {
        self.clear(into);
        self.play_position = 0;
    }
}

/// Spare buffers for one track, allocated outside the process lock
#[derive(Default)]
pub(crate) struct TrackStorage {
    queue: VecDeque<SampleSegment>,
    history: Vec<SampleSegment>,
    reclaim: Vec<SampleSegment>,
}

impl TrackStorage {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            history: Vec::with_capacity(capacity),
            reclaim: Vec::with_capacity(capacity),
        }
    }
}

fn grow(current: &mut Vec<SampleSegment>, spare: &mut Vec<SampleSegment>) {
    if spare.capacity() > current.capacity() {
        spare.append(current);
        std::mem::swap(current, spare);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SegmentParams, SegmentSource};

    fn segment(data: Vec<Sample>, position: u64, params: &SegmentParams) -> SampleSegment {
        let mut seg = SampleSegment::new(SegmentSource::Memory(data.into()), params).unwrap();
        seg.set_global_position(position);
        seg
    }

    fn produce(track: &mut Track, n: usize) -> (Vec<Sample>, bool) {
        let mut out = vec![0.0; n];
        let mut scratch = vec![0.0; n];
        let dry = track.produce(&mut out, &mut scratch, true).unwrap();
        (out, dry)
    }

    #[test]
    fn test_queue_end() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        assert_eq!(track.queue_end(), Some(0));
        track.enqueue(segment(vec![1.0; 10], 0, &SegmentParams::default()));
        track.enqueue(segment(vec![1.0; 5], 10, &SegmentParams::default()));
        assert_eq!(track.queue_end(), Some(15));

        let endless = SegmentParams {
            loop_count: 0,
            ..Default::default()
        };
        track.enqueue(segment(vec![1.0; 5], 15, &endless));
        assert!(track.is_endless());
        assert_eq!(track.queue_end(), None);
    }

    #[test]
    fn test_produce_retires_and_reports_underrun() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        track.enqueue(segment(vec![0.5; 6], 0, &SegmentParams::default()));

        let (out, dry) = produce(&mut track, 4);
        assert_eq!(out, vec![0.5; 4]);
        assert!(!dry);
        assert_eq!(track.queued(), 1);

        let (out, dry) = produce(&mut track, 4);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0]);
        assert!(dry);
        assert!(track.underrun());
        assert_eq!(track.queued(), 0);
        assert_eq!(track.play_position(), 8);

        let mut garbage = Vec::new();
        track.drain_reclaim(&mut garbage);
        assert_eq!(garbage.len(), 1);

        // Staying empty is not a new underrun
        let (_, dry) = produce(&mut track, 4);
        assert!(!dry);
    }

    #[test]
    fn test_exact_end_is_not_underrun() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        track.enqueue(segment(vec![0.5; 4], 0, &SegmentParams::default()));
        let (_, dry) = produce(&mut track, 4);
        assert!(!dry);
        assert_eq!(track.queued(), 0);
    }

    #[test]
    fn test_volume_ramp() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        track.enqueue(segment(vec![1.0; 8], 0, &SegmentParams::default()));
        track.set_volume(0.0, 4);
        let (out, _) = produce(&mut track, 8);
        assert_eq!(out[0], 0.75);
        assert_eq!(out[3], 0.0);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert_eq!(track.volume(), 0.0);
    }

    #[test]
    fn test_clip_counted_once_per_period() {
        let mut track = Track::new(0, "t0".into(), 0, 0.5);
        track.enqueue(segment(vec![0.9; 8], 0, &SegmentParams::default()));
        produce(&mut track, 8);
        assert_eq!(track.clip_count(), 1);
        track.reset_clip_count();
        assert_eq!(track.clip_count(), 0);
    }

    #[test]
    fn test_rewind_requeues_history() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        track.enqueue(segment(vec![0.25; 4], 0, &SegmentParams::default()));
        let mut out = vec![0.0; 4];
        let mut scratch = vec![0.0; 4];
        track.produce(&mut out, &mut scratch, false).unwrap();
        assert_eq!(track.queued(), 0);

        track.rewind();
        assert_eq!(track.queued(), 1);
        assert_eq!(track.play_position(), 0);
        let (out, _) = produce(&mut track, 4);
        assert_eq!(out, vec![0.25; 4]);
    }

    #[test]
    fn test_clear_keeps_timeline_reset_restarts_it() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        track.enqueue(segment(vec![0.5; 16], 0, &SegmentParams::default()));
        produce(&mut track, 8);

        let mut garbage = Vec::new();
        track.clear(&mut garbage);
        assert_eq!(garbage.len(), 1);
        assert_eq!(track.queued(), 0);
        assert_eq!(track.play_position(), 8);
        assert_eq!(track.queue_end(), Some(8));

        track.reset(&mut garbage);
        assert_eq!(track.play_position(), 0);
    }

    #[test]
    fn test_adopted_storage_covers_next_segment() {
        let mut track = Track::new(0, "t0".into(), 0, 1.0);
        track.enqueue(segment(vec![0.5; 4], 0, &SegmentParams::default()));
        let needed = track.storage_needed(1).unwrap();
        assert_eq!(needed, 2);

        let mut storage = TrackStorage::with_capacity(needed);
        track.adopt_storage(&mut storage);
        assert_eq!(track.queued(), 1);
        assert_eq!(track.storage_needed(1), None);

        track.enqueue(segment(vec![0.5; 4], 4, &SegmentParams::default()));
        let (out, _) = produce(&mut track, 8);
        assert_eq!(out, vec![0.5; 8]);
    }

    #[test]
    fn test_combine_modes() {
        let mut accum = vec![2.0, 2.0];
        TrackMode::Add.combine(&mut accum, &[1.0, -1.0]);
        assert_eq!(accum, vec![3.0, 1.0]);
        TrackMode::Multiply.combine(&mut accum, &[0.5, 0.0]);
        assert_eq!(accum, vec![1.5, 0.0]);
    }
}
