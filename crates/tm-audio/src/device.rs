//! Device callback contract

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tm_core::Sample;

use crate::{AudioError, AudioResult};

/// Static properties of an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub sample_rate: u32,
    /// Samples per channel per period
    pub period_frames: usize,
    pub input_channels: usize,
    pub output_channels: usize,
}

impl DeviceInfo {
    pub fn validate(&self) -> AudioResult<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::ConfigError("sample rate must be > 0".into()));
        }
        if self.period_frames == 0 {
            return Err(AudioError::ConfigError("period must be > 0 frames".into()));
        }
        if self.output_channels == 0 {
            return Err(AudioError::ConfigError("at least one output channel required".into()));
        }
        Ok(())
    }

    /// Wall-clock duration of one period
    pub fn period_duration(&self) -> Duration {
        Duration::from_secs_f64(self.period_frames as f64 / self.sample_rate as f64)
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            period_frames: 512,
            input_channels: 2,
            output_channels: 2,
        }
    }
}

/// Non-interleaved buffers of one period, allocated once per device start
#[derive(Debug, Clone)]
pub struct PeriodBuffers {
    frames: usize,
    inputs: Vec<Vec<Sample>>,
    outputs: Vec<Vec<Sample>>,
}

impl PeriodBuffers {
    pub fn new(info: &DeviceInfo) -> Self {
        Self {
            frames: info.period_frames,
            inputs: vec![vec![0.0; info.period_frames]; info.input_channels],
            outputs: vec![vec![0.0; info.period_frames]; info.output_channels],
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn inputs(&self) -> &[Vec<Sample>] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut [Vec<Sample>] {
        &mut self.inputs
    }

    pub fn outputs(&self) -> &[Vec<Sample>] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [Vec<Sample>] {
        &mut self.outputs
    }

    pub fn clear_inputs(&mut self) {
        self.inputs.iter_mut().for_each(|ch| ch.fill(0.0));
    }

    pub fn clear_outputs(&mut self) {
        self.outputs.iter_mut().for_each(|ch| ch.fill(0.0));
    }
}

/// What the device does after a period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// Stop the period clock. The device stays allocated until `stop`.
    Stop,
}

/// Called by the device once per period on its audio thread
pub trait DeviceCallback: Send + Sync {
    /// Read `buffers.inputs()`, fill `buffers.outputs_mut()`
    fn process(&self, buffers: &mut PeriodBuffers) -> CallbackAction;

    /// A period deadline was missed
    fn on_xrun(&self) {}
}

/// A backend that drives a [`DeviceCallback`]
pub trait AudioDevice: Send {
    fn info(&self) -> DeviceInfo;

    fn start(&mut self, callback: Arc<dyn DeviceCallback>) -> AudioResult<()>;

    /// Stop the clock and wait until no callback is in flight.
    /// Stopping a stopped device is a no-op.
    fn stop(&mut self) -> AudioResult<()>;

    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_duration() {
        let info = DeviceInfo {
            sample_rate: 48000,
            period_frames: 480,
            ..Default::default()
        };
        assert!((info.period_duration().as_secs_f64() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_validate() {
        assert!(DeviceInfo::default().validate().is_ok());
        let bad = DeviceInfo {
            period_frames: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_period_buffers_layout() {
        let info = DeviceInfo {
            input_channels: 3,
            output_channels: 1,
            period_frames: 16,
            ..Default::default()
        };
        let mut buffers = PeriodBuffers::new(&info);
        assert_eq!(buffers.inputs().len(), 3);
        assert_eq!(buffers.outputs().len(), 1);
        buffers.outputs_mut()[0][3] = 1.0;
        buffers.clear_outputs();
        assert!(buffers.outputs()[0].iter().all(|&s| s == 0.0));
    }
}
