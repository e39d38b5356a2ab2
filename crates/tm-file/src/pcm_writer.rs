//! Mono 32-bit float WAV recorder
//!
//! Writes a canonical 44-byte RIFF/WAVE header (format tag 3, 16-byte
//! `fmt ` chunk) with zero lengths on open and patches the RIFF and `data`
//! lengths on close. A file that is never closed keeps a zero-length header.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tm_core::Sample;

use crate::{FileError, FileResult};

/// IEEE float format tag
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

/// Size of the canonical header
pub const WAV_HEADER_LEN: u64 = 44;

const RIFF_LEN_OFFSET: u64 = 4;
const DATA_LEN_OFFSET: u64 = 40;
const BYTES_PER_SAMPLE: u32 = 4;
const DISK_BUFFER_SIZE: usize = 64 * 1024;

/// Mono float recorder with latency compensation and an optional length cap
#[derive(Debug)]
pub struct PcmFileWriter {
    path: PathBuf,
    sample_rate: u32,
    writer: Option<BufWriter<File>>,
    /// Samples dropped at the start of every opened file
    ignore: u64,
    ignore_remaining: u64,
    /// Maximum samples per file, `None` = unlimited
    length_cap: Option<u64>,
    samples_written: u64,
    enabled: bool,
}

impl PcmFileWriter {
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            writer: None,
            ignore: 0,
            ignore_remaining: 0,
            length_cap: None,
            samples_written: 0,
            enabled: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Change the target path. Takes effect on the next `open`.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn set_ignore(&mut self, samples: u64) {
        self.ignore = samples;
    }

    pub fn ignore(&self) -> u64 {
        self.ignore
    }

    pub fn set_length_cap(&mut self, cap: Option<u64>) {
        self.length_cap = cap;
    }

    pub fn length_cap(&self) -> Option<u64> {
        self.length_cap
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// False once the length cap was hit or before the first `open`
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Create (truncate) the file and write a placeholder header.
    ///
    /// An already open file is closed first.
    pub fn open(&mut self) -> FileResult<()> {
        self.close()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::with_capacity(DISK_BUFFER_SIZE, file);
        write_header(&mut writer, self.sample_rate, 0)?;

        self.writer = Some(writer);
        self.samples_written = 0;
        self.ignore_remaining = self.ignore;
        self.enabled = true;
        log::info!("PCM writer opened: {}", self.path.display());
        Ok(())
    }

    /// Append samples. Returns the number actually written to disk after the
    /// ignore budget and length cap were applied.
    ///
    /// Writing to a closed or disabled writer is a no-op.
    pub fn write(&mut self, samples: &[Sample]) -> FileResult<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(0);
        };

        let skip = (self.ignore_remaining.min(samples.len() as u64)) as usize;
        self.ignore_remaining -= skip as u64;
        let mut pending = &samples[skip..];

        if let Some(cap) = self.length_cap {
            let allowed = cap.saturating_sub(self.samples_written) as usize;
            if pending.len() >= allowed {
                pending = &pending[..allowed];
                self.enabled = false;
            }
        }

        for &sample in pending {
            writer.write_all(&sample.to_le_bytes())?;
        }
        self.samples_written += pending.len() as u64;

        if !self.enabled {
            log::info!(
                "PCM writer reached length cap ({} samples): {}",
                self.samples_written,
                self.path.display()
            );
        }
        Ok(pending.len())
    }

    /// Patch the header lengths and close the file. Closing a writer that is
    /// not open does nothing.
    pub fn close(&mut self) -> FileResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        self.enabled = false;

        let data_len = self.data_len()?;
        writer.flush()?;
        writer.seek(SeekFrom::Start(RIFF_LEN_OFFSET))?;
        writer.write_all(&(data_len + 36).to_le_bytes())?;
        writer.seek(SeekFrom::Start(DATA_LEN_OFFSET))?;
        writer.write_all(&data_len.to_le_bytes())?;
        writer.flush()?;

        log::info!(
            "PCM writer closed: {} ({} samples)",
            self.path.display(),
            self.samples_written
        );
        Ok(())
    }

    fn data_len(&self) -> FileResult<u32> {
        let data_len = self.samples_written * BYTES_PER_SAMPLE as u64;
        u32::try_from(data_len + 36)
            .map(|_| data_len as u32)
            .map_err(|_| {
                FileError::InvalidFile(format!(
                    "{} exceeds the 4 GiB RIFF limit",
                    self.path.display()
                ))
            })
    }
}

impl Drop for PcmFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("PCM writer close failed for {}: {}", self.path.display(), e);
        }
    }
}

fn write_header(writer: &mut impl Write, sample_rate: u32, data_len: u32) -> FileResult<()> {
    let block_align = BYTES_PER_SAMPLE as u16;
    writer.write_all(b"RIFF")?;
    writer.write_all(&(data_len + 36).to_le_bytes())?;
    writer.write_all(b"WAVE")?;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&WAVE_FORMAT_IEEE_FLOAT.to_le_bytes())?;
    writer.write_all(&1u16.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&(sample_rate * BYTES_PER_SAMPLE).to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&32u16.to_le_bytes())?;
    writer.write_all(b"data")?;
    writer.write_all(&data_len.to_le_bytes())?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_header_finalized_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.wav");
        let mut writer = PcmFileWriter::new(&path, 48000);
        writer.open().unwrap();
        writer.write(&[0.25; 100]).unwrap();
        writer.write(&[-0.5; 28]).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16);
        assert_eq!(u16_at(&bytes, 20), 3);
        assert_eq!(u16_at(&bytes, 22), 1);
        assert_eq!(u32_at(&bytes, 24), 48000);
        assert_eq!(u16_at(&bytes, 34), 32);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 128 * 4);
        assert_eq!(u32_at(&bytes, 4), 128 * 4 + 36);
        assert_eq!(bytes.len(), 44 + 128 * 4);
    }

    #[test]
    fn test_unclosed_file_has_zero_length_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("open.wav");
        let mut writer = PcmFileWriter::new(&path, 44100);
        writer.open().unwrap();
        writer.write(&[0.1; 10]).unwrap();
        // Flush the buffered data but skip the patch-up
        if let Some(w) = writer.writer.as_mut() {
            w.flush().unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(u32_at(&bytes, 40), 0);
        std::mem::forget(writer);
    }

    #[test]
    fn test_ignore_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ignore.wav");
        let mut writer = PcmFileWriter::new(&path, 44100);
        writer.set_ignore(15);
        writer.open().unwrap();
        assert_eq!(writer.write(&[1.0; 10]).unwrap(), 0);
        assert_eq!(writer.write(&[1.0; 10]).unwrap(), 5);
        assert_eq!(writer.samples_written(), 5);
    }

    #[test]
    fn test_length_cap_disables_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cap.wav");
        let mut writer = PcmFileWriter::new(&path, 44100);
        writer.set_length_cap(Some(25));
        writer.open().unwrap();
        assert_eq!(writer.write(&[0.5; 10]).unwrap(), 10);
        assert_eq!(writer.write(&[0.5; 10]).unwrap(), 10);
        assert_eq!(writer.write(&[0.5; 10]).unwrap(), 5);
        assert!(!writer.is_enabled());
        assert_eq!(writer.write(&[0.5; 10]).unwrap(), 0);
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(u32_at(&bytes, 40), 25 * 4);
    }

    #[test]
    fn test_reopen_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("again.wav");
        let mut writer = PcmFileWriter::new(&path, 44100);
        writer.open().unwrap();
        writer.write(&[0.5; 64]).unwrap();
        writer.open().unwrap();
        writer.write(&[0.5; 8]).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 32);
    }

    #[test]
    fn test_readable_by_hound() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hound.wav");
        {
            let mut writer = PcmFileWriter::new(&path, 22050);
            writer.open().unwrap();
            writer.write(&[0.0, 0.5, -0.5, 1.0]).unwrap();
            // closed by Drop
        }
        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 1.0]);
    }
}
