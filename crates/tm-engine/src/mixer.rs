//! Channel mixer
//!
//! Everything the audio thread touches per period lives here, behind the
//! engine's process lock. Input rings sit behind their own lock so record
//! buffer reads do not contend with mixing.
//!
//! ```text
//!  tracks (ascending) ──produce──> Add / Multiply ──> output accumulators
//!  device inputs ──gain/clip/mute──> captured ──┐             │
//!                                               ├── bridge ───┤
//!                                               │             v
//!                         rings + record files <┘   gain/mute/ramp/clip ──> device + debug files
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tm_audio::{DeviceInfo, PeriodBuffers};
use tm_bridge::{BridgeConfig, BridgeSession, RegionLayout};
use tm_core::{ChannelClass, MuteSolo, Sample, resolve_audible};

use crate::config::channel_name;
use crate::track::TrackStorage;
use crate::{
    EngineConfig, EngineError, EngineEvent, EngineResult, InputChannel, InputRing, OutputChannel,
    RecordThreshold, SampleSegment, SegmentInfo, Track,
};

// ═══════════════════════════════════════════════════════════════════════════
// MIXER
// ═══════════════════════════════════════════════════════════════════════════

pub struct ChannelMixer {
    sample_rate: u32,
    pub(crate) tracks: Vec<Track>,
    pub(crate) outputs: Vec<OutputChannel>,
    pub(crate) inputs: Vec<InputChannel>,
    rings: Arc<Mutex<Vec<InputRing>>>,

    accum: Vec<Vec<Sample>>,
    captured: Vec<Vec<Sample>>,
    track_buf: Vec<Sample>,
    scratch: Vec<Sample>,
    track_audible: Vec<bool>,
    output_audible: Vec<bool>,
    input_audible: Vec<bool>,

    auto_clear: bool,
    device_mute_ramp: usize,
    paused: bool,
    device_muted: bool,
    pub(crate) threshold: RecordThreshold,

    bridge_config: Option<BridgeConfig>,
    bridge: Option<BridgeSession>,
    user_data_len: usize,
    /// Bridge user data per channel, inputs first
    user_in: Vec<Vec<f32>>,
    user_out: Vec<Vec<f32>>,
}

impl ChannelMixer {
    pub fn new(config: &EngineConfig, info: &DeviceInfo, rings: Arc<Mutex<Vec<InputRing>>>) -> Self {
        let frames = info.period_frames;
        let outputs = info.output_channels;
        let inputs = info.input_channels;
        let tracks = (0..config.tracks)
            .map(|i| {
                Track::new(
                    i,
                    channel_name(&config.track_names, "track", i),
                    i % outputs.max(1),
                    config.clip_threshold,
                )
            })
            .collect();
        let user = vec![vec![0.0; config.user_data_len]; inputs + outputs];

        Self {
            sample_rate: info.sample_rate,
            tracks,
            outputs: (0..outputs)
                .map(|i| {
                    let name = channel_name(&config.output_names, "out", i);
                    OutputChannel::new(i, name, config.clip_threshold)
                })
                .collect(),
            inputs: (0..inputs)
                .map(|i| {
                    let name = channel_name(&config.input_names, "in", i);
                    InputChannel::new(i, name, config.clip_threshold)
                })
                .collect(),
            rings,
            accum: vec![vec![0.0; frames]; outputs],
            captured: vec![vec![0.0; frames]; inputs],
            track_buf: vec![0.0; frames],
            scratch: vec![0.0; frames.max(1)],
            track_audible: Vec::with_capacity(config.tracks),
            output_audible: Vec::with_capacity(outputs),
            input_audible: Vec::with_capacity(inputs),
            auto_clear: config.auto_clear_data,
            device_mute_ramp: config.device_mute_ramp,
            paused: false,
            device_muted: false,
            threshold: RecordThreshold::default(),
            bridge_config: config.bridge.clone(),
            bridge: None,
            user_data_len: config.user_data_len,
            user_in: user.clone(),
            user_out: user,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    pub(crate) fn count(&self, class: ChannelClass) -> usize {
        match class {
            ChannelClass::Track => self.tracks.len(),
            ChannelClass::Output => self.outputs.len(),
            ChannelClass::Input => self.inputs.len(),
        }
    }

    pub(crate) fn check_index(&self, class: ChannelClass, index: usize) -> EngineResult<()> {
        let count = self.count(class);
        if index >= count {
            return Err(EngineError::out_of_range(class, index, count));
        }
        Ok(())
    }

    pub(crate) fn track_mut(&mut self, index: usize) -> EngineResult<&mut Track> {
        let count = self.tracks.len();
        self.tracks
            .get_mut(index)
            .ok_or_else(|| EngineError::out_of_range(ChannelClass::Track, index, count))
    }

    pub(crate) fn output_mut(&mut self, index: usize) -> EngineResult<&mut OutputChannel> {
        let count = self.outputs.len();
        self.outputs
            .get_mut(index)
            .ok_or_else(|| EngineError::out_of_range(ChannelClass::Output, index, count))
    }

    pub(crate) fn input_mut(&mut self, index: usize) -> EngineResult<&mut InputChannel> {
        let count = self.inputs.len();
        self.inputs
            .get_mut(index)
            .ok_or_else(|| EngineError::out_of_range(ChannelClass::Input, index, count))
    }

    pub(crate) fn flags_mut(&mut self, class: ChannelClass, index: usize) -> EngineResult<&mut MuteSolo> {
        Ok(match class {
            ChannelClass::Track => &mut self.track_mut(index)?.flags,
            ChannelClass::Output => &mut self.output_mut(index)?.flags,
            ChannelClass::Input => &mut self.input_mut(index)?.flags,
        })
    }

    // ─── Transport ───────────────────────────────────────────────────────

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_device_muted(&mut self, muted: bool) {
        self.device_muted = muted;
    }

    pub(crate) fn is_device_muted(&self) -> bool {
        self.device_muted
    }

    fn device_gain(&self) -> f32 {
        if self.paused || self.device_muted { 0.0 } else { 1.0 }
    }

    // ─── Routing ─────────────────────────────────────────────────────────

    /// Apply a complete track to output mapping or nothing
    pub(crate) fn set_track_map(&mut self, map: &[usize]) -> EngineResult<()> {
        if map.len() != self.tracks.len() {
            return Err(EngineError::InvalidParam(format!(
                "track map has {} entries for {} tracks",
                map.len(),
                self.tracks.len()
            )));
        }
        for &output in map {
            self.check_index(ChannelClass::Output, output)?;
        }
        for (track, &output) in self.tracks.iter_mut().zip(map) {
            track.set_output(output);
        }
        Ok(())
    }

    pub(crate) fn track_map(&self) -> Vec<usize> {
        self.tracks.iter().map(Track::output).collect()
    }

    // ─── Loading ─────────────────────────────────────────────────────────

    /// Queue prepared segments, one per target track, aligned to the
    /// latest queue end among the targets. All checks happen before the
    /// first queue is touched.
    pub(crate) fn load(
        &mut self,
        segments: Vec<(usize, SampleSegment)>,
        crossfade: usize,
        storage: &mut [TrackStorage],
    ) -> EngineResult<Vec<SegmentInfo>> {
        let mut max_end = 0u64;
        let mut max_play = 0u64;
        for (track, _) in &segments {
            let track = self.track_mut(*track)?;
            let Some(end) = track.queue_end() else {
                return Err(EngineError::InvalidParam(format!(
                    "track {} has an endless segment queued",
                    track.index()
                )));
            };
            max_end = max_end.max(end);
            max_play = max_play.max(track.play_position());
        }

        let fade = crossfade as u64;
        let base = max_end.checked_sub(fade).filter(|&b| b >= max_play || fade == 0);
        let Some(base) = base else {
            return Err(EngineError::InvalidParam(format!(
                "crossfade of {} samples reaches into played audio",
                crossfade
            )));
        };
        if fade > 0 {
            for (track, _) in &segments {
                for previous in self.tracks[*track].segments() {
                    if previous.end() == Some(max_end) {
                        let playable = previous.total_len().unwrap_or(0);
                        if fade > playable {
                            return Err(EngineError::RampTooLong {
                                ramp: fade,
                                playable,
                            });
                        }
                    }
                }
            }
        }

        let mut infos = Vec::with_capacity(segments.len());
        for (slot, (index, mut segment)) in segments.into_iter().enumerate() {
            let track = &mut self.tracks[index];
            if let Some(spare) = storage.get_mut(slot) {
                track.adopt_storage(spare);
            }
            if fade > 0 {
                for previous in track.segments_mut() {
                    if previous.end() == Some(max_end) {
                        previous.set_fade_out(crossfade);
                    }
                }
            }
            segment.set_global_position(base);
            infos.push(segment.info(index));
            track.enqueue(segment);
        }
        Ok(infos)
    }

    pub(crate) fn clear_tracks(&mut self, tracks: &[usize], garbage: &mut Vec<SampleSegment>) {
        for &index in tracks {
            if let Some(track) = self.tracks.get_mut(index) {
                track.clear(garbage);
            }
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.tracks.iter_mut().for_each(Track::rewind);
    }

    pub(crate) fn collect_garbage(&mut self, garbage: &mut Vec<SampleSegment>) {
        for track in &mut self.tracks {
            track.drain_reclaim(garbage);
        }
    }

    // ─── Bridge user data ────────────────────────────────────────────────

    fn user_slot(&self, class: ChannelClass, channel: usize) -> EngineResult<usize> {
        match class {
            ChannelClass::Input => {
                self.check_index(class, channel)?;
                Ok(channel)
            }
            ChannelClass::Output => {
                self.check_index(class, channel)?;
                Ok(self.inputs.len() + channel)
            }
            ChannelClass::Track => Err(EngineError::InvalidParam(
                "tracks carry no bridge user data".into(),
            )),
        }
    }

    pub(crate) fn set_user_data(&mut self, class: ChannelClass, channel: usize, data: &[f32]) -> EngineResult<()> {
        let slot = self.user_slot(class, channel)?;
        if data.len() > self.user_data_len {
            return Err(EngineError::InvalidParam(format!(
                "{} user data values, at most {}",
                data.len(),
                self.user_data_len
            )));
        }
        let dst = &mut self.user_in[slot];
        dst.fill(0.0);
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn user_data(&self, class: ChannelClass, channel: usize) -> EngineResult<Vec<f32>> {
        let slot = self.user_slot(class, channel)?;
        Ok(self.user_out[slot].clone())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Open files and the bridge for a device start. On failure everything
    /// opened here is closed again.
    pub(crate) fn prepare(&mut self, period_frames: usize) -> EngineResult<()> {
        let result = self.try_prepare(period_frames);
        if result.is_err() {
            self.close_all();
        }
        result
    }

    fn try_prepare(&mut self, period_frames: usize) -> EngineResult<()> {
        let gain = self.device_gain();
        let sample_rate = self.sample_rate;
        for output in &mut self.outputs {
            output.reset_device_gain(gain);
            output.open_writer(sample_rate)?;
        }
        for input in &mut self.inputs {
            input.open_writer(sample_rate)?;
        }
        self.rings.lock().iter_mut().for_each(InputRing::reset);

        if let Some(config) = self.bridge_config.clone() {
            for data in self.user_out.iter_mut() {
                data.fill(0.0);
            }
            let layout = RegionLayout {
                in_channels: self.inputs.len(),
                out_channels: self.outputs.len(),
                samples: period_frames,
                user_data: self.user_data_len,
            };
            let mut session = BridgeSession::new(config);
            session.start(layout)?;
            self.bridge = Some(session);
        }
        Ok(())
    }

    fn close_all(&mut self) {
        for output in &mut self.outputs {
            if let Err(e) = output.close_writer() {
                log::warn!("Closing debug file of output {} failed: {}", output.index(), e);
            }
        }
        for input in &mut self.inputs {
            if let Err(e) = input.close_writer() {
                log::warn!("Closing record file of input {} failed: {}", input.index(), e);
            }
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.stop();
        }
    }

    /// Release what `prepare` acquired and drop all queued audio
    pub(crate) fn teardown(&mut self, garbage: &mut Vec<SampleSegment>) {
        self.close_all();
        for track in &mut self.tracks {
            track.reset(garbage);
        }
    }

    // ─── Processing ──────────────────────────────────────────────────────

    fn fit(&mut self, frames: usize) {
        if self.track_buf.len() < frames {
            log::warn!("Period grew to {} frames, reallocating mix buffers", frames);
            self.track_buf.resize(frames, 0.0);
            self.accum.iter_mut().for_each(|b| b.resize(frames, 0.0));
            self.captured.iter_mut().for_each(|b| b.resize(frames, 0.0));
        }
    }

    /// Mix one period into `buffers`
    pub(crate) fn process(
        &mut self,
        buffers: &mut PeriodBuffers,
        emit: &mut dyn FnMut(EngineEvent),
    ) -> EngineResult<()> {
        let n = buffers.frames();
        self.fit(n);
        let device_gain = self.device_gain();
        let halted = self.paused && self.outputs.iter().all(|o| o.is_device_silent());

        for accum in &mut self.accum {
            accum[..n].fill(0.0);
        }

        // Tracks
        if !halted {
            resolve_audible(self.tracks.iter().map(|t| t.flags), &mut self.track_audible);
            for (index, track) in self.tracks.iter_mut().enumerate() {
                let buf = &mut self.track_buf[..n];
                if track.produce(buf, &mut self.scratch, self.auto_clear)? {
                    emit(EngineEvent::TrackUnderrun(index));
                }
                if self.track_audible[index] {
                    if let Some(accum) = self.accum.get_mut(track.output()) {
                        track.mode().combine(&mut accum[..n], buf);
                    }
                }
            }
        }

        // Inputs
        resolve_audible(self.inputs.iter().map(|c| c.flags), &mut self.input_audible);
        for (index, input) in self.inputs.iter_mut().enumerate() {
            let captured = &mut self.captured[index][..n];
            match buffers.inputs().get(index) {
                Some(src) => input.capture(&src[..n], captured, self.input_audible[index]),
                None => captured.fill(0.0),
            }
        }

        let mut record_open = true;
        if self.threshold.is_armed() {
            let inputs = &self.inputs;
            if self.threshold.check(|c| inputs.get(c).map_or(0.0, InputChannel::peak)) {
                self.threshold.value = 0.0;
                emit(EngineEvent::RecordThresholdTriggered);
            } else {
                record_open = false;
            }
        }

        // External processing
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.exchange(&self.captured, &mut self.accum, &self.user_in, &mut self.user_out)?;
        }

        // Outputs
        resolve_audible(self.outputs.iter().map(|c| c.flags), &mut self.output_audible);
        let outputs = buffers.outputs_mut();
        for (index, output) in self.outputs.iter_mut().enumerate() {
            if let Some(device) = outputs.get_mut(index) {
                let frames = n.min(device.len());
                output.finish(
                    &mut self.accum[index][..frames],
                    self.output_audible[index],
                    device_gain,
                    self.device_mute_ramp,
                    &mut device[..frames],
                )?;
            }
        }

        // Recording
        {
            let mut rings = self.rings.lock();
            for (ring, captured) in rings.iter_mut().zip(&self.captured) {
                ring.push(&captured[..n]);
            }
        }
        if record_open {
            for (index, input) in self.inputs.iter_mut().enumerate() {
                if input.write_file(&self.captured[index][..n])? {
                    emit(EngineEvent::RecordLengthReached(index));
                }
            }
        }
        Ok(())
    }
}
