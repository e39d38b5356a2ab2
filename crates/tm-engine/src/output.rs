//! Output channels

use std::path::{Path, PathBuf};

use tm_core::{LinearRamp, MuteSolo, Sample, clips};
use tm_file::{FileResult, PcmFileWriter};

pub struct OutputChannel {
    index: usize,
    name: String,
    gain: f32,
    pub(crate) flags: MuteSolo,
    clip_threshold: f32,
    clip_count: u64,
    /// Device level mute/pause gain
    device_ramp: LinearRamp,
    file: Option<PathBuf>,
    writer: Option<PcmFileWriter>,
}

impl OutputChannel {
    pub fn new(index: usize, name: String, clip_threshold: f32) -> Self {
        Self {
            index,
            name,
            gain: 1.0,
            flags: MuteSolo::default(),
            clip_threshold,
            clip_count: 0,
            device_ramp: LinearRamp::new(1.0),
            file: None,
            writer: None,
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

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Debug writer target, opened on start
    pub(crate) fn set_file(&mut self, file: Option<PathBuf>) {
        self.file = file;
    }

    pub(crate) fn open_writer(&mut self, sample_rate: u32) -> FileResult<()> {
        let Some(path) = self.file.clone() else {
            return Ok(());
        };
        let mut writer = PcmFileWriter::new(path, sample_rate);
        writer.open()?;
        self.writer = Some(writer);
        Ok(())
    }

    pub(crate) fn close_writer(&mut self) -> FileResult<()> {
        match self.writer.take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        }
    }

    /// Device mute or pause has fully ramped down
    pub(crate) fn is_device_silent(&self) -> bool {
        self.device_ramp.target() == 0.0 && !self.device_ramp.is_ramping()
    }

    /// Jump the device gain without ramping, used on start
    pub(crate) fn reset_device_gain(&mut self, gain: f32) {
        self.device_ramp = LinearRamp::new(gain);
    }

    /// Apply gain, mute, the device ramp towards `device_gain` and clip
    /// detection to `accum`, then copy it to the device buffer and the
    /// debug writer.
    pub(crate) fn finish(
        &mut self,
        accum: &mut [Sample],
        audible: bool,
        device_gain: f32,
        ramp_len: usize,
        device: &mut [Sample],
    ) -> FileResult<()> {
        if audible {
            let gain = self.gain;
            if gain != 1.0 {
                accum.iter_mut().for_each(|s| *s *= gain);
            }
        } else {
            accum.fill(0.0);
        }

        if self.device_ramp.target() != device_gain {
            self.device_ramp.set_target(device_gain, ramp_len);
        }
        self.device_ramp.apply(accum);

        if clips(accum, self.clip_threshold) {
            self.clip_count += 1;
        }

        let n = device.len().min(accum.len());
        device[..n].copy_from_slice(&accum[..n]);
        if let Some(writer) = self.writer.as_mut() {
            writer.write(accum)?;
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

    #[test]
    fn test_gain_and_clip_once() {
        let mut out = OutputChannel::new(0, "out0".into(), 0.8);
        out.set_gain(2.0);
        let mut accum = vec![0.1, 0.5, -0.45, 0.6];
        let mut device = vec![0.0; 4];
        out.finish(&mut accum, true, 1.0, 0, &mut device).unwrap();
        assert_eq!(device, vec![0.2, 1.0, -0.9, 1.2]);
        assert_eq!(out.clip_count(), 1);
    }

    #[test]
    fn test_mute_is_immediate() {
        let mut out = OutputChannel::new(0, "out0".into(), 1.0);
        let mut accum = vec![0.5; 4];
        let mut device = vec![1.0; 4];
        out.finish(&mut accum, false, 1.0, 0, &mut device).unwrap();
        assert_eq!(device, vec![0.0; 4]);
    }

    #[test]
    fn test_device_mute_ramps() {
        let mut out = OutputChannel::new(0, "out0".into(), 1.0);
        let mut device = vec![0.0; 4];

        let mut accum = vec![1.0; 4];
        out.finish(&mut accum, true, 0.0, 2, &mut device).unwrap();
        assert_eq!(device, vec![0.5, 0.0, 0.0, 0.0]);

        let mut accum = vec![1.0; 4];
        out.finish(&mut accum, true, 1.0, 4, &mut device).unwrap();
        assert_eq!(device, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_debug_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out0.wav");
        let mut out = OutputChannel::new(0, "out0".into(), 1.0);
        out.set_file(Some(path.clone()));
        out.open_writer(44100).unwrap();

        let mut device = vec![0.0; 3];
        out.finish(&mut vec![0.25; 3], true, 1.0, 0, &mut device).unwrap();
        out.finish(&mut vec![0.5; 3], true, 1.0, 0, &mut device).unwrap();
        out.close_writer().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0.25, 0.25, 0.25, 0.5, 0.5, 0.5]);
    }
}
