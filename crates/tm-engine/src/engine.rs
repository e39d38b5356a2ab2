//! Engine context
//!
//! Owns the device and the mixer state. Control methods lock the process
//! lock briefly; the device thread takes the same lock once per period.
//! Errors raised on the device thread never cross the callback: they are
//! stored as the sticky async error, reported through events and the
//! optional error callback, and stop the device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tm_audio::{AudioDevice, CallbackAction, DeviceCallback, DeviceInfo, PeriodBuffers};
use tm_core::{ChannelClass, Classify, Sample};
use tm_file::{AudioSource, WavSource};

use crate::track::TrackStorage;
use crate::{
    ChannelMixer, EngineConfig, EngineError, EngineResult, InputRing, RecordSnapshot,
    RecordThreshold, SampleSegment, SegmentInfo, SegmentParams, SegmentSource, StartOffset,
    ThresholdMode, TrackMode, TrackStatus,
};

const EVENT_CAPACITY: usize = 1024;
const WAIT_POLL: Duration = Duration::from_millis(2);

// ═══════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════

/// Notifications from the audio thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    AsyncError(String),
    Xrun,
    TrackUnderrun(usize),
    RecordThresholdTriggered,
    RecordLengthReached(usize),
}

pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════

struct EngineShared {
    process: Mutex<ChannelMixer>,
    rings: Arc<Mutex<Vec<InputRing>>>,
    async_error: Mutex<Option<String>>,
    error_callback: RwLock<Option<ErrorCallback>>,
    events: Sender<EngineEvent>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    xruns: AtomicU64,
    periods: AtomicU64,
}

impl EngineShared {
    fn emit(&self, event: EngineEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::debug!("Event queue full, dropping {:?}", event);
        }
    }

    fn fail(&self, error: &EngineError) {
        let report = error.report();
        log::error!("Audio thread {}", report);
        let message = report.message;
        self.running.store(false, Ordering::Release);
        *self.async_error.lock() = Some(message.clone());
        if let Some(callback) = self.error_callback.read().as_ref() {
            callback(&message);
        }
        self.emit(EngineEvent::AsyncError(message));
    }
}

impl DeviceCallback for EngineShared {
    fn process(&self, buffers: &mut PeriodBuffers) -> CallbackAction {
        if self.stop_requested.load(Ordering::Acquire) {
            buffers.clear_outputs();
            return CallbackAction::Stop;
        }
        let result = {
            let mut mixer = self.process.lock();
            mixer.process(buffers, &mut |event| self.emit(event))
        };
        self.periods.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(()) => CallbackAction::Continue,
            Err(e) => {
                buffers.clear_outputs();
                self.fail(&e);
                CallbackAction::Stop
            }
        }
    }

    fn on_xrun(&self) {
        let count = self.xruns.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!("Xrun #{}", count);
        self.emit(EngineEvent::Xrun);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

pub struct Engine {
    shared: Arc<EngineShared>,
    device: Mutex<Box<dyn AudioDevice>>,
    events: Receiver<EngineEvent>,
    config: EngineConfig,
    info: DeviceInfo,
    /// Device and resources are allocated, possibly stopped by an async error
    started: AtomicBool,
}

impl Engine {
    /// Build the engine around `device`. Channel counts come from the
    /// device, the track count and defaults from `config`.
    pub fn new(config: EngineConfig, device: Box<dyn AudioDevice>) -> EngineResult<Self> {
        config.validate()?;
        let info = device.info();
        info.validate()?;
        config.validate_names(&info)?;

        let rings = Arc::new(Mutex::new(vec![InputRing::default(); info.input_channels]));
        let mixer = ChannelMixer::new(&config, &info, Arc::clone(&rings));
        let (tx, rx) = bounded(EVENT_CAPACITY);

        log::info!(
            "Engine created: {} tracks, {} out, {} in, {} Hz, {} frames/period",
            config.tracks,
            info.output_channels,
            info.input_channels,
            info.sample_rate,
            info.period_frames
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                process: Mutex::new(mixer),
                rings,
                async_error: Mutex::new(None),
                error_callback: RwLock::new(None),
                events: tx,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                xruns: AtomicU64::new(0),
                periods: AtomicU64::new(0),
            }),
            device: Mutex::new(device),
            events: rx,
            config,
            info,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.info
    }

    /// Run `f` under the process lock; retired segments are dropped after
    /// the lock is released
    fn with_mixer<R>(&self, f: impl FnOnce(&mut ChannelMixer) -> R) -> R {
        let mut garbage = Vec::new();
        let result = {
            let mut mixer = self.shared.process.lock();
            let result = f(&mut mixer);
            mixer.collect_garbage(&mut garbage);
            result
        };
        drop(garbage);
        result
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    pub fn start(&self) -> EngineResult<()> {
        let mut device = self.device.lock();
        if self.started.load(Ordering::Acquire) {
            return Err(EngineError::AlreadyRunning);
        }
        self.with_mixer(|m| m.prepare(self.info.period_frames))?;

        *self.shared.async_error.lock() = None;
        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        let callback: Arc<dyn DeviceCallback> = self.shared.clone();
        if let Err(e) = device.start(callback) {
            self.shared.running.store(false, Ordering::Release);
            let mut garbage = Vec::new();
            self.shared.process.lock().teardown(&mut garbage);
            return Err(e.into());
        }
        self.started.store(true, Ordering::Release);
        log::info!("Engine started");
        Ok(())
    }

    /// Stop the device, wait for the audio thread, release files and the
    /// bridge and drop all queued audio. Clears the async error.
    pub fn stop(&self) {
        self.shutdown();
        *self.shared.async_error.lock() = None;
    }

    fn shutdown(&self) {
        let mut device = self.device.lock();
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        if let Err(e) = device.stop() {
            log::warn!("Device stop failed: {}", e);
        }
        self.shared.running.store(false, Ordering::Release);

        let mut garbage = Vec::new();
        self.shared.process.lock().teardown(&mut garbage);
        drop(garbage);
        log::info!(
            "Engine stopped after {} periods",
            self.shared.periods.load(Ordering::Relaxed)
        );
    }

    /// Stop and return tracks and clip counters to their initial state.
    /// Clears the async error.
    pub fn reset(&self) {
        self.stop();
        self.with_mixer(|m| {
            m.tracks.iter_mut().for_each(|t| t.reset_clip_count());
            m.outputs.iter_mut().for_each(|o| o.reset_clip_count());
            m.inputs.iter_mut().for_each(|i| i.reset_clip_count());
            m.set_paused(false);
            m.set_device_muted(false);
        });
        self.shared.xruns.store(0, Ordering::Relaxed);
    }

    /// True while the audio thread is processing periods
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ramp all outputs down and halt playback, or resume
    pub fn set_paused(&self, paused: bool) {
        self.with_mixer(|m| m.set_paused(paused));
    }

    pub fn is_paused(&self) -> bool {
        self.with_mixer(|m| m.is_paused())
    }

    /// Ramped device mute; playback continues
    pub fn set_device_mute(&self, muted: bool) {
        self.with_mixer(|m| m.set_device_muted(muted));
    }

    pub fn is_device_muted(&self) -> bool {
        self.with_mixer(|m| m.is_device_muted())
    }

    /// Re-queue played segments (when not auto clearing) and restart all
    /// tracks at position 0
    pub fn rewind(&self) {
        self.with_mixer(ChannelMixer::rewind);
    }

    // ─── Loading ─────────────────────────────────────────────────────────

    /// Load in-memory channels to `tracks`
    pub fn load_mem(
        &self,
        channels: Vec<Vec<Sample>>,
        tracks: &[usize],
        params: &SegmentParams,
    ) -> EngineResult<Vec<SegmentInfo>> {
        let data: Vec<Arc<[Sample]>> = channels.into_iter().map(Arc::from).collect();
        self.load_with(data.len(), tracks, params, |c| {
            SegmentSource::Memory(Arc::clone(&data[c]))
        })
    }

    /// Load a WAV file to `tracks`
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
        tracks: &[usize],
        params: &SegmentParams,
    ) -> EngineResult<Vec<SegmentInfo>> {
        let source = WavSource::open(path.as_ref())?;
        if source.sample_rate() != self.info.sample_rate {
            log::warn!(
                "{} is {} Hz, device runs at {} Hz",
                path.as_ref().display(),
                source.sample_rate(),
                self.info.sample_rate
            );
        }
        self.load_source(Arc::new(source), tracks, params)
    }

    pub fn load_source(
        &self,
        source: Arc<dyn AudioSource>,
        tracks: &[usize],
        params: &SegmentParams,
    ) -> EngineResult<Vec<SegmentInfo>> {
        self.load_with(source.channels(), tracks, params, |channel| SegmentSource::File {
            source: Arc::clone(&source),
            channel,
        })
    }

    fn load_with(
        &self,
        source_channels: usize,
        tracks: &[usize],
        params: &SegmentParams,
        make: impl Fn(usize) -> SegmentSource,
    ) -> EngineResult<Vec<SegmentInfo>> {
        let channels = self.check_load_targets(source_channels, tracks, params)?;

        // Every channel of one load shares the drawn start offset
        let mut params = params.clone();
        let sources: Vec<SegmentSource> = channels.iter().map(|&c| make(c)).collect();
        if params.start_offset == StartOffset::Random {
            let frames = sources.first().map_or(0, SegmentSource::frames);
            let avail = frames.saturating_sub(params.file_offset);
            let len = params.file_length.map_or(avail, |l| l.min(avail)).max(1);
            params.start_offset = StartOffset::At(rand::rng().random_range(0..len));
        }

        let segments = tracks
            .iter()
            .zip(sources)
            .map(|(&track, source)| Ok((track, SampleSegment::new(source, &params)?)))
            .collect::<EngineResult<Vec<_>>>()?;

        // Queue growth is allocated here; the load itself only moves buffers
        let needed: Vec<Option<usize>> = self.with_mixer(|m| {
            tracks
                .iter()
                .map(|&t| m.tracks.get(t).and_then(|track| track.storage_needed(1)))
                .collect()
        });
        let mut storage: Vec<TrackStorage> = needed
            .into_iter()
            .map(|n| n.map_or_else(TrackStorage::default, TrackStorage::with_capacity))
            .collect();
        let infos = self.with_mixer(|m| m.load(segments, params.crossfade_len, &mut storage));
        drop(storage);
        let infos = infos?;
        for info in &infos {
            log::debug!(
                "Loaded '{}' to track {} at {} (data {}, end {:?})",
                info.name,
                info.track,
                info.global_position,
                info.data_start,
                info.end
            );
        }
        Ok(infos)
    }

    fn check_load_targets(
        &self,
        source_channels: usize,
        tracks: &[usize],
        params: &SegmentParams,
    ) -> EngineResult<Vec<usize>> {
        if tracks.is_empty() {
            return Err(EngineError::InvalidParam("no target tracks".into()));
        }
        for (i, &track) in tracks.iter().enumerate() {
            if track >= self.config.tracks {
                return Err(EngineError::out_of_range(
                    ChannelClass::Track,
                    track,
                    self.config.tracks,
                ));
            }
            if tracks[..i].contains(&track) {
                return Err(EngineError::InvalidParam(format!("track {} listed twice", track)));
            }
        }
        let channels = match &params.source_channels {
            Some(channels) => channels.clone(),
            None => (0..tracks.len()).collect(),
        };
        if channels.len() != tracks.len() {
            return Err(EngineError::InvalidParam(format!(
                "{} source channels for {} tracks",
                channels.len(),
                tracks.len()
            )));
        }
        if let Some(&bad) = channels.iter().find(|&&c| c >= source_channels) {
            return Err(EngineError::InvalidParam(format!(
                "source channel {} of {}",
                bad, source_channels
            )));
        }
        Ok(channels)
    }

    // ─── Tracks ──────────────────────────────────────────────────────────

    /// Drop all queued and played segments of `tracks` and reset their
    /// positions
    pub fn clear_tracks(&self, tracks: &[usize]) -> EngineResult<()> {
        let mut garbage = Vec::new();
        self.with_mixer(|m| {
            for &track in tracks {
                m.check_index(ChannelClass::Track, track)?;
            }
            m.clear_tracks(tracks, &mut garbage);
            Ok(())
        })
    }

    pub fn set_track_map(&self, map: &[usize]) -> EngineResult<()> {
        self.with_mixer(|m| m.set_track_map(map))
    }

    pub fn track_map(&self) -> Vec<usize> {
        self.with_mixer(|m| m.track_map())
    }

    pub fn set_track_mode(&self, track: usize, mode: TrackMode) -> EngineResult<()> {
        self.with_mixer(|m| {
            m.track_mut(track)?.set_mode(mode);
            Ok(())
        })
    }

    /// Ramp the track volume linearly to `volume` over `ramp_len` samples
    pub fn set_track_volume(&self, track: usize, volume: f32, ramp_len: usize) -> EngineResult<()> {
        check_gain(volume)?;
        self.with_mixer(|m| {
            m.track_mut(track)?.set_volume(volume, ramp_len);
            Ok(())
        })
    }

    pub fn track_status(&self, track: usize) -> EngineResult<TrackStatus> {
        self.with_mixer(|m| Ok(m.track_mut(track)?.status()))
    }

    pub fn clear_underrun(&self, track: usize) -> EngineResult<()> {
        self.with_mixer(|m| {
            m.track_mut(track)?.clear_underrun();
            Ok(())
        })
    }

    /// Block until every listed track has played out its queue
    pub fn wait_for_tracks(&self, tracks: &[usize], timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.async_error() {
                return Err(EngineError::Async(message));
            }
            let done = self.with_mixer(|m| -> EngineResult<bool> {
                for &track in tracks {
                    if m.track_mut(track)?.queued() > 0 {
                        return Ok(false);
                    }
                }
                Ok(true)
            })?;
            if done {
                return Ok(());
            }
            if !self.is_running() {
                return Err(EngineError::NotRunning);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::WaitTimeout(timeout));
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    // ─── Mute / solo / clip per class ────────────────────────────────────

    pub fn set_mute(&self, class: ChannelClass, index: usize, mute: bool) -> EngineResult<()> {
        self.with_mixer(|m| {
            m.flags_mut(class, index)?.mute = mute;
            Ok(())
        })
    }

    pub fn set_solo(&self, class: ChannelClass, index: usize, solo: bool) -> EngineResult<()> {
        self.with_mixer(|m| {
            m.flags_mut(class, index)?.solo = solo;
            Ok(())
        })
    }

    pub fn set_clip_threshold(
        &self,
        class: ChannelClass,
        index: usize,
        threshold: f32,
    ) -> EngineResult<()> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(EngineError::InvalidParam(format!(
                "clip threshold {} outside (0, 1]",
                threshold
            )));
        }
        self.with_mixer(|m| {
            match class {
                ChannelClass::Track => m.track_mut(index)?.set_clip_threshold(threshold),
                ChannelClass::Output => m.output_mut(index)?.set_clip_threshold(threshold),
                ChannelClass::Input => m.input_mut(index)?.set_clip_threshold(threshold),
            }
            Ok(())
        })
    }

    pub fn clip_count(&self, class: ChannelClass, index: usize) -> EngineResult<u64> {
        self.with_mixer(|m| {
            Ok(match class {
                ChannelClass::Track => m.track_mut(index)?.clip_count(),
                ChannelClass::Output => m.output_mut(index)?.clip_count(),
                ChannelClass::Input => m.input_mut(index)?.clip_count(),
            })
        })
    }

    pub fn reset_clip_count(&self, class: ChannelClass, index: usize) -> EngineResult<()> {
        self.with_mixer(|m| {
            match class {
                ChannelClass::Track => m.track_mut(index)?.reset_clip_count(),
                ChannelClass::Output => m.output_mut(index)?.reset_clip_count(),
                ChannelClass::Input => m.input_mut(index)?.reset_clip_count(),
            }
            Ok(())
        })
    }

    pub fn set_name(
        &self,
        class: ChannelClass,
        index: usize,
        name: impl Into<String>,
    ) -> EngineResult<()> {
        let name = name.into();
        self.with_mixer(|m| {
            match class {
                ChannelClass::Track => m.track_mut(index)?.set_name(name),
                ChannelClass::Output => m.output_mut(index)?.set_name(name),
                ChannelClass::Input => m.input_mut(index)?.set_name(name),
            }
            Ok(())
        })
    }

    pub fn name(&self, class: ChannelClass, index: usize) -> EngineResult<String> {
        self.with_mixer(|m| {
            Ok(match class {
                ChannelClass::Track => m.track_mut(index)?.name().to_string(),
                ChannelClass::Output => m.output_mut(index)?.name().to_string(),
                ChannelClass::Input => m.input_mut(index)?.name().to_string(),
            })
        })
    }

    // ─── Outputs ─────────────────────────────────────────────────────────

    pub fn set_output_gain(&self, channel: usize, gain: f32) -> EngineResult<()> {
        check_gain(gain)?;
        self.with_mixer(|m| {
            m.output_mut(channel)?.set_gain(gain);
            Ok(())
        })
    }

    /// Write everything sent to `channel` into a WAV file, opened on the
    /// next start
    pub fn set_output_file(&self, channel: usize, path: Option<PathBuf>) -> EngineResult<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(EngineError::Busy(format!(
                "output {} file change while running",
                channel
            )));
        }
        self.with_mixer(|m| {
            m.output_mut(channel)?.set_file(path);
            Ok(())
        })
    }

    // ─── Inputs ──────────────────────────────────────────────────────────

    pub fn set_input_gain(&self, channel: usize, gain: f32) -> EngineResult<()> {
        check_gain(gain)?;
        self.with_mixer(|m| {
            m.input_mut(channel)?.set_gain(gain);
            Ok(())
        })
    }

    /// Peak of the last captured period of `channel`
    pub fn input_peak(&self, channel: usize) -> EngineResult<f32> {
        self.with_mixer(|m| Ok(m.input_mut(channel)?.peak()))
    }

    /// Resize the record ring of the listed inputs; 0 disables buffering
    pub fn set_record_buffer_size(&self, channels: &[usize], size: usize) -> EngineResult<()> {
        for &channel in channels {
            self.check_input(channel)?;
        }
        // Allocate outside the buffer lock, swap inside; the old rings are
        // freed after it is released
        let mut fresh: Vec<InputRing> = channels.iter().map(|_| InputRing::new(size)).collect();
        let mut rings = self.shared.rings.lock();
        for (&channel, ring) in channels.iter().zip(fresh.iter_mut()) {
            ring.continue_from(rings[channel].done_position());
            std::mem::swap(&mut rings[channel], ring);
        }
        drop(rings);
        drop(fresh);
        Ok(())
    }

    /// Most recent ring contents of `channels` and the absolute position of
    /// their first sample
    pub fn read_record_buffer(&self, channels: &[usize]) -> EngineResult<RecordSnapshot> {
        if channels.is_empty() {
            return Err(EngineError::InvalidParam("no channels requested".into()));
        }
        for &channel in channels {
            self.check_input(channel)?;
        }
        let rings = self.shared.rings.lock();
        let size = rings[channels[0]].size();
        if size == 0 {
            return Err(EngineError::InvalidParam(format!(
                "input {} has no record buffer",
                channels[0]
            )));
        }
        if let Some(&other) = channels.iter().find(|&&c| rings[c].size() != size) {
            return Err(EngineError::InvalidParam(format!(
                "record buffer of input {} differs in size from input {}",
                other, channels[0]
            )));
        }
        let mut data = Vec::with_capacity(channels.len());
        let mut position = 0;
        for &channel in channels {
            let mut out = Vec::with_capacity(size);
            position = rings[channel].snapshot(&mut out);
            data.push(out);
        }
        Ok(RecordSnapshot { data, position })
    }

    pub fn set_record_file(&self, channel: usize, path: Option<PathBuf>) -> EngineResult<()> {
        self.with_mixer(|m| {
            let sample_rate = m.sample_rate();
            m.input_mut(channel)?.set_record_file(path, sample_rate)
        })
    }

    pub fn set_record_pause(&self, channel: usize, paused: bool) -> EngineResult<()> {
        self.with_mixer(|m| {
            m.input_mut(channel)?.set_record_pause(paused);
            Ok(())
        })
    }

    /// Cap the record file at `cap` samples; live buffering continues
    pub fn set_record_length(&self, channel: usize, cap: Option<u64>) -> EngineResult<()> {
        self.with_mixer(|m| m.input_mut(channel)?.set_record_length(cap))
    }

    /// Skip the first `samples` of every record file for latency
    /// compensation
    pub fn set_record_ignore(&self, channel: usize, samples: u64) -> EngineResult<()> {
        self.with_mixer(|m| m.input_mut(channel)?.set_record_ignore(samples))
    }

    pub fn set_recording(&self, channel: usize, recording: bool) -> EngineResult<()> {
        let running = self.started.load(Ordering::Acquire);
        self.with_mixer(|m| {
            let sample_rate = m.sample_rate();
            m.input_mut(channel)?.set_recording(recording, running, sample_rate)
        })
    }

    /// Hold back file recording until the peaks of `channels` exceed
    /// `value`. A value of 0 disarms.
    pub fn set_record_threshold(
        &self,
        channels: &[usize],
        value: f32,
        mode: ThresholdMode,
    ) -> EngineResult<()> {
        if !(value.is_finite() && value >= 0.0) {
            return Err(EngineError::InvalidParam(format!("record threshold {}", value)));
        }
        for &channel in channels {
            self.check_input(channel)?;
        }
        let threshold = RecordThreshold {
            channels: channels.to_vec(),
            value,
            mode,
        };
        self.with_mixer(|m| m.threshold = threshold);
        Ok(())
    }

    pub fn record_threshold(&self) -> RecordThreshold {
        self.with_mixer(|m| m.threshold.clone())
    }

    fn check_input(&self, channel: usize) -> EngineResult<()> {
        if channel >= self.info.input_channels {
            return Err(EngineError::out_of_range(
                ChannelClass::Input,
                channel,
                self.info.input_channels,
            ));
        }
        Ok(())
    }

    // ─── Bridge ──────────────────────────────────────────────────────────

    /// User data sent with every block for an input or output channel
    pub fn set_bridge_user_data(
        &self,
        class: ChannelClass,
        channel: usize,
        data: &[f32],
    ) -> EngineResult<()> {
        self.with_mixer(|m| m.set_user_data(class, channel, data))
    }

    /// User data returned with the last processed block
    pub fn bridge_user_data(&self, class: ChannelClass, channel: usize) -> EngineResult<Vec<f32>> {
        self.with_mixer(|m| m.user_data(class, channel))
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn async_error(&self) -> Option<String> {
        self.shared.async_error.lock().clone()
    }

    pub fn clear_async_error(&self) {
        *self.shared.async_error.lock() = None;
    }

    /// Check for an async error. If one is pending, the device and its
    /// resources are released; the error stays set until cleared.
    pub fn poll(&self) -> EngineResult<()> {
        match self.async_error() {
            Some(message) => {
                self.shutdown();
                Err(EngineError::Async(message))
            }
            None => Ok(()),
        }
    }

    pub fn xrun_count(&self) -> u64 {
        self.shared.xruns.load(Ordering::Relaxed)
    }

    pub fn periods_processed(&self) -> u64 {
        self.shared.periods.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events.clone()
    }

    /// Called on the audio thread when an async error is captured. The
    /// callback must not call back into the engine.
    pub fn set_error_callback(&self, callback: Option<ErrorCallback>) {
        *self.shared.error_callback.write() = callback;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_gain(gain: f32) -> EngineResult<()> {
    if !gain.is_finite() {
        return Err(EngineError::InvalidParam(format!("gain {} is not finite", gain)));
    }
    Ok(())
}
