//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use tm_audio::DeviceInfo;
use tm_bridge::BridgeConfig;
use tm_core::{DEFAULT_CLIP_THRESHOLD, DEFAULT_USER_DATA_LEN};

use crate::{EngineError, EngineResult};

/// Engine settings, loadable from TOML.
///
/// ```toml
/// sample_rate = 48000
/// period_frames = 256
/// tracks = 8
/// output_channels = 2
/// auto_clear_data = true
///
/// [bridge]
/// program = "/usr/local/bin/my-dsp"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device settings used when the caller builds the device from the config
    pub sample_rate: u32,
    pub period_frames: usize,
    pub output_channels: usize,
    pub input_channels: usize,

    /// Virtual tracks
    pub tracks: usize,
    /// Drop fully played segments instead of keeping them for `rewind`
    pub auto_clear_data: bool,
    /// Ramp length of device mute/pause in samples
    pub device_mute_ramp: usize,
    pub clip_threshold: f32,
    /// Floats of bridge user data per channel
    pub user_data_len: usize,
    pub bridge: Option<BridgeConfig>,

    pub track_names: Vec<String>,
    pub output_names: Vec<String>,
    pub input_names: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            period_frames: 512,
            output_channels: 2,
            input_channels: 2,
            tracks: 2,
            auto_clear_data: true,
            device_mute_ramp: 441,
            clip_threshold: DEFAULT_CLIP_THRESHOLD,
            user_data_len: DEFAULT_USER_DATA_LEN,
            bridge: None,
            track_names: Vec::new(),
            output_names: Vec::new(),
            input_names: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            sample_rate: self.sample_rate,
            period_frames: self.period_frames,
            input_channels: self.input_channels,
            output_channels: self.output_channels,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.tracks == 0 {
            return Err(EngineError::Config("at least one track required".into()));
        }
        if self.sample_rate == 0 || self.period_frames == 0 {
            return Err(EngineError::Config("sample rate and period must be > 0".into()));
        }
        if self.output_channels == 0 {
            return Err(EngineError::Config("at least one output channel required".into()));
        }
        if !(self.clip_threshold > 0.0 && self.clip_threshold <= 1.0) {
            return Err(EngineError::Config(format!(
                "clip threshold {} outside (0, 1]",
                self.clip_threshold
            )));
        }
        check_names("track", &self.track_names, self.tracks)?;
        check_names("output", &self.output_names, self.output_channels)?;
        check_names("input", &self.input_names, self.input_channels)?;
        Ok(())
    }

    /// Check the channel names against the counts the device actually
    /// opened with
    pub fn validate_names(&self, info: &DeviceInfo) -> EngineResult<()> {
        check_names("output", &self.output_names, info.output_channels)?;
        check_names("input", &self.input_names, info.input_channels)?;
        Ok(())
    }
}

fn check_names(what: &str, names: &[String], count: usize) -> EngineResult<()> {
    if !names.is_empty() && names.len() != count {
        return Err(EngineError::Config(format!(
            "{} {} names for {} channels",
            names.len(),
            what,
            count
        )));
    }
    Ok(())
}

/// Configured name or `<prefix><index>`
pub(crate) fn channel_name(names: &[String], prefix: &str, index: usize) -> String {
    names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("{}{}", prefix, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            sample_rate = 48000
            period_frames = 128
            tracks = 4
            auto_clear_data = false
            track_names = ["kick", "snare", "hat", "bass"]

            [bridge]
            program = "/opt/dsp"
            exchange_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.tracks, 4);
        assert!(!config.auto_clear_data);
        assert_eq!(config.output_channels, 2);
        let bridge = config.bridge.unwrap();
        assert_eq!(bridge.exchange_timeout_ms, 500);
        assert_eq!(bridge.terminate_timeout_ms, 5000);
    }

    #[test]
    fn test_rejects_bad_names() {
        let err = EngineConfig::from_toml_str("tracks = 3\ntrack_names = [\"a\"]").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let config = EngineConfig {
            clip_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_names_checked_against_device() {
        let config = EngineConfig {
            output_names: vec!["left".into(), "right".into()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let mut info = config.device_info();
        assert!(config.validate_names(&info).is_ok());
        info.output_channels = 1;
        assert!(matches!(
            config.validate_names(&info),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_channel_name() {
        let names = vec!["left".to_string()];
        assert_eq!(channel_name(&names, "out", 0), "left");
        assert_eq!(channel_name(&names, "out", 1), "out1");
    }
}
