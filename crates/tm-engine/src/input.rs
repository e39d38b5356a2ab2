//! Input channels: capture, ring buffering and record-to-file

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tm_core::{MuteSolo, Sample, clips, peak};
use tm_file::{FileResult, PcmFileWriter};

use crate::{EngineError, EngineResult};

// ═══════════════════════════════════════════════════════════════════════════
// RING BUFFER
// ═══════════════════════════════════════════════════════════════════════════

/// Most recent samples of one input plus the absolute sample count
#[derive(Debug, Clone, Default)]
pub struct InputRing {
    data: Vec<Sample>,
    write: usize,
    done: u64,
}

impl InputRing {
    /// A ring of `size` samples; 0 disables buffering
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0.0; size],
            write: 0,
            done: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Samples captured since start, buffered or not
    pub fn done_position(&self) -> u64 {
        self.done
    }

    /// Carry the absolute position over from a replaced ring
    pub(crate) fn continue_from(&mut self, done: u64) {
        self.done = done;
    }

    pub fn push(&mut self, samples: &[Sample]) {
        self.done += samples.len() as u64;
        let size = self.data.len();
        if size == 0 {
            return;
        }
        // Only the tail survives a push longer than the ring
        let samples = &samples[samples.len().saturating_sub(size)..];
        let first = (size - self.write).min(samples.len());
        self.data[self.write..self.write + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.data[..rest].copy_from_slice(&samples[first..]);
        self.write = (self.write + samples.len()) % size;
    }

    /// Copy the ring oldest first into `out` and return the absolute
    /// position of its first sample. Negative until the ring has filled.
    pub fn snapshot(&self, out: &mut Vec<Sample>) -> i64 {
        out.clear();
        out.extend_from_slice(&self.data[self.write..]);
        out.extend_from_slice(&self.data[..self.write]);
        self.done as i64 - self.data.len() as i64
    }

    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.write = 0;
        self.done = 0;
    }
}

/// Result of reading the record buffers of several inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// One vector per requested channel, oldest sample first
    pub data: Vec<Vec<Sample>>,
    /// Absolute position of the first sample of every vector
    pub position: i64,
}

/// Combination rule of a record threshold over several channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdMode {
    And,
    #[default]
    Or,
}

/// One-shot gate that holds back file recording until a level is reached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordThreshold {
    pub channels: Vec<usize>,
    /// 0 = disarmed
    pub value: f32,
    pub mode: ThresholdMode,
}

impl RecordThreshold {
    pub fn is_armed(&self) -> bool {
        self.value > 0.0 && !self.channels.is_empty()
    }

    /// True if the peaks of this buffer trigger the gate
    pub(crate) fn check(&self, peaks: impl Fn(usize) -> f32) -> bool {
        let mut levels = self.channels.iter().map(|&c| peaks(c) > self.value);
        match self.mode {
            ThresholdMode::And => levels.all(|hit| hit),
            ThresholdMode::Or => levels.any(|hit| hit),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INPUT CHANNEL
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct RecordState {
    path: Option<PathBuf>,
    recording: bool,
    paused: bool,
    length_cap: Option<u64>,
    ignore: u64,
    writer: Option<PcmFileWriter>,
    cap_reported: bool,
}

pub struct InputChannel {
    index: usize,
    name: String,
    gain: f32,
    pub(crate) flags: MuteSolo,
    clip_threshold: f32,
    clip_count: u64,
    peak: f32,
    record: RecordState,
}

impl InputChannel {
    pub fn new(index: usize, name: String, clip_threshold: f32) -> Self {
        Self {
            index,
            name,
            gain: 1.0,
            flags: MuteSolo::default(),
            clip_threshold,
            clip_count: 0,
            peak: 0.0,
            record: RecordState::default(),
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

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
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

    /// Peak of the last captured period after gain
    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn record_path(&self) -> Option<&Path> {
        self.record.path.as_deref()
    }

    pub fn is_recording(&self) -> bool {
        self.record.recording
    }

    pub fn is_paused(&self) -> bool {
        self.record.paused
    }

    /// Writer is open and taking samples
    fn writing(&self) -> bool {
        self.record.writer.is_some() && self.record.recording && !self.record.paused
    }

    /// Change the target file. While paused an open file is closed and the
    /// new one opened; while writing the change is refused.
    pub(crate) fn set_record_file(&mut self, path: Option<PathBuf>, sample_rate: u32) -> EngineResult<()> {
        if self.writing() {
            return Err(EngineError::Busy(format!(
                "input {} file change while recording",
                self.index
            )));
        }
        let reopen = self.record.writer.is_some();
        self.close_writer()?;
        self.record.path = path;
        if reopen {
            self.open_writer(sample_rate)?;
        }
        Ok(())
    }

    pub(crate) fn set_record_pause(&mut self, paused: bool) {
        self.record.paused = paused;
    }

    pub(crate) fn set_record_length(&mut self, cap: Option<u64>) -> EngineResult<()> {
        self.check_idle("record length")?;
        self.record.length_cap = cap;
        Ok(())
    }

    pub(crate) fn set_record_ignore(&mut self, samples: u64) -> EngineResult<()> {
        self.check_idle("record ignore")?;
        self.record.ignore = samples;
        Ok(())
    }

    fn check_idle(&self, what: &str) -> EngineResult<()> {
        if self.record.writer.is_some() {
            return Err(EngineError::Busy(format!(
                "input {} {} change while recording",
                self.index, what
            )));
        }
        Ok(())
    }

    /// Enable or disable recording to file. `running` tells whether the
    /// device is started, in which case the file is opened or closed now.
    pub(crate) fn set_recording(&mut self, recording: bool, running: bool, sample_rate: u32) -> EngineResult<()> {
        if recording == self.record.recording {
            return Ok(());
        }
        if recording && running {
            self.record.recording = true;
            if let Err(e) = self.open_writer(sample_rate) {
                self.record.recording = false;
                return Err(e);
            }
        } else {
            self.record.recording = recording;
            if !recording {
                self.close_writer()?;
            }
        }
        Ok(())
    }

    /// Open the record file if recording is enabled and a path is set
    pub(crate) fn open_writer(&mut self, sample_rate: u32) -> EngineResult<()> {
        if !self.record.recording || self.record.writer.is_some() {
            return Ok(());
        }
        let Some(path) = self.record.path.clone() else {
            return Ok(());
        };
        let mut writer = PcmFileWriter::new(path, sample_rate);
        writer.set_ignore(self.record.ignore);
        writer.set_length_cap(self.record.length_cap);
        writer.open()?;
        self.record.cap_reported = false;
        self.record.writer = Some(writer);
        Ok(())
    }

    pub(crate) fn close_writer(&mut self) -> FileResult<()> {
        match self.record.writer.take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        }
    }

    /// Apply gain into `captured`, measure clip and peak, zero if inaudible
    pub(crate) fn capture(&mut self, input: &[Sample], captured: &mut [Sample], audible: bool) {
        let gain = self.gain;
        for (dst, src) in captured.iter_mut().zip(input) {
            *dst = src * gain;
        }
        if clips(captured, self.clip_threshold) {
            self.clip_count += 1;
        }
        self.peak = peak(captured);
        if !audible {
            captured.fill(0.0);
        }
    }

    /// Write the captured period to the record file. Returns true the first
    /// time the length cap is hit.
    pub(crate) fn write_file(&mut self, captured: &[Sample]) -> FileResult<bool> {
        if !self.writing() {
            return Ok(false);
        }
        let Some(writer) = self.record.writer.as_mut() else {
            return Ok(false);
        };
        writer.write(captured)?;
        if !writer.is_enabled() && !self.record.cap_reported {
            self.record.cap_reported = true;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn samples_recorded(&self) -> u64 {
        self.record
            .writer
            .as_ref()
            .map_or(0, PcmFileWriter::samples_written)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
