//! Random-access audio sources for file-backed segments

use std::path::Path;

use tm_core::Sample;

use crate::{FileError, FileResult};

/// Multi-channel source a segment reads from.
///
/// `read_channel` may be called from the audio thread and must not block.
pub trait AudioSource: Send + Sync {
    fn channels(&self) -> usize;

    /// Samples per channel
    fn frames(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Copy up to `out.len()` samples of `channel` starting at `offset`.
    /// Returns the number of samples copied (short at end of source).
    fn read_channel(&self, channel: usize, offset: usize, out: &mut [Sample]) -> FileResult<usize>;
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY SOURCE
// ═══════════════════════════════════════════════════════════════════════════

/// Non-interleaved channels held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    channels: Vec<Vec<Sample>>,
    frames: usize,
    sample_rate: u32,
}

impl MemorySource {
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: u32) -> FileResult<Self> {
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(FileError::InvalidFile(
                "channels of a memory source must have equal length".into(),
            ));
        }
        Ok(Self {
            channels,
            frames,
            sample_rate,
        })
    }

    pub fn channel(&self, index: usize) -> Option<&[Sample]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}

impl AudioSource for MemorySource {
    fn channels(&self) -> usize {
        self.channels.len()
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_channel(&self, channel: usize, offset: usize, out: &mut [Sample]) -> FileResult<usize> {
        let data = self
            .channels
            .get(channel)
            .ok_or(FileError::ChannelOutOfRange {
                channel,
                channels: self.channels.len(),
            })?;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = out.len().min(data.len() - offset);
        out[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WAV SOURCE
// ═══════════════════════════════════════════════════════════════════════════

/// WAV file decoded with hound into memory on open
#[derive(Debug, Clone)]
pub struct WavSource {
    inner: MemorySource,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> FileResult<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let num_channels = spec.channels as usize;
        if num_channels == 0 {
            return Err(FileError::InvalidFile(format!("{}: no channels", path.display())));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let frames = interleaved.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &s) in frame.iter().enumerate() {
                channels[ch].push(s);
            }
        }

        log::debug!(
            "Loaded {}: {} ch, {} frames @ {} Hz",
            path.display(),
            num_channels,
            frames,
            spec.sample_rate
        );

        Ok(Self {
            inner: MemorySource::new(channels, spec.sample_rate)?,
        })
    }
}

impl AudioSource for WavSource {
    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn frames(&self) -> usize {
        self.inner.frames()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn read_channel(&self, channel: usize, offset: usize, out: &mut [Sample]) -> FileResult<usize> {
        self.inner.read_channel(channel, offset, out)
    }
}
