//! Shared region layout and signal slots

use std::fs::{File, OpenOptions};
use std::mem::{offset_of, size_of};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use crossbeam_utils::Backoff;
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::{BridgeError, BridgeResult};

/// "TMBR"
pub const REGION_MAGIC: u32 = 0x524D_4254;
pub const REGION_VERSION: u32 = 1;

/// Byte offset of the sample data
pub const DATA_OFFSET: usize = 512;

/// Capacity of the error message slot
pub const ERROR_CAPACITY: usize = 256;

const POLL_INTERVAL: Duration = Duration::from_micros(50);

// ═══════════════════════════════════════════════════════════════════════════
// SIGNALS
// ═══════════════════════════════════════════════════════════════════════════

/// Synchronization signals. The discriminant is the slot index and part of
/// the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Signal {
    Exit = 0,
    Process = 1,
    Error = 2,
    Done = 3,
    Init = 4,
    Terminated = 5,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::Exit,
        Signal::Process,
        Signal::Error,
        Signal::Done,
        Signal::Init,
        Signal::Terminated,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Name of a signal within a session: `<session>_<index>`
pub fn signal_name(session: &str, signal: Signal) -> String {
    format!("{}_{}", session, signal.index())
}

// ═══════════════════════════════════════════════════════════════════════════
// LAYOUT
// ═══════════════════════════════════════════════════════════════════════════

/// Channel and block sizing shared by both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLayout {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Samples per channel per block
    pub samples: usize,
    /// Floats of user data per channel
    pub user_data: usize,
}

impl RegionLayout {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.in_channels + self.out_channels == 0 {
            return Err(BridgeError::Layout("no channels".into()));
        }
        if self.samples == 0 {
            return Err(BridgeError::Layout("block size must be > 0".into()));
        }
        if u32::try_from(self.data_bytes()).is_err() {
            return Err(BridgeError::Layout("region too large".into()));
        }
        Ok(())
    }

    pub fn channels(&self) -> usize {
        self.in_channels + self.out_channels
    }

    /// Floats per channel stride (samples followed by user data)
    pub fn stride(&self) -> usize {
        self.samples + self.user_data
    }

    /// `(samples + user_data) * (in + out) * 4`
    pub fn data_bytes(&self) -> usize {
        self.stride() * self.channels() * size_of::<f32>()
    }

    pub fn region_bytes(&self) -> usize {
        DATA_OFFSET + self.data_bytes()
    }

    /// Float offset of the audio of channel `index` (inputs first)
    pub fn audio_offset(&self, index: usize) -> usize {
        index * self.stride()
    }

    pub fn user_data_offset(&self, index: usize) -> usize {
        index * self.stride() + self.samples
    }
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RegionHeader {
    magic: u32,
    version: u32,
    in_channels: u32,
    out_channels: u32,
    samples: u32,
    user_data: u32,
    signals: [u32; 6],
    error_len: u32,
    reserved: u32,
    error: [u8; ERROR_CAPACITY],
}

const _: () = assert!(size_of::<RegionHeader>() <= DATA_OFFSET);

// ═══════════════════════════════════════════════════════════════════════════
// REGION
// ═══════════════════════════════════════════════════════════════════════════

/// A memory-mapped session region. The creating side removes the backing
/// file on drop.
pub struct SharedRegion {
    path: PathBuf,
    mmap: MmapMut,
    layout: RegionLayout,
    owner: bool,
    _file: File,
}

impl SharedRegion {
    /// Create (or truncate) the backing file and publish the header
    pub fn create(path: impl Into<PathBuf>, layout: RegionLayout) -> BridgeResult<Self> {
        layout.validate()?;
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(layout.region_bytes() as u64)?;

        // SAFETY: the file was just created with the final length and is only
        // resized by this type
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let header = RegionHeader {
            magic: 0,
            version: REGION_VERSION,
            in_channels: layout.in_channels as u32,
            out_channels: layout.out_channels as u32,
            samples: layout.samples as u32,
            user_data: layout.user_data as u32,
            ..Zeroable::zeroed()
        };
        mmap[..size_of::<RegionHeader>()].copy_from_slice(bytemuck::bytes_of(&header));

        let region = Self {
            path,
            mmap,
            layout,
            owner: true,
            _file: file,
        };
        // Magic last: a peer polling the file sees a complete header
        region.atomic_at(offset_of!(RegionHeader, magic)).store(REGION_MAGIC, Ordering::Release);
        Ok(region)
    }

    /// Map an existing region published by [`SharedRegion::create`]
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < DATA_OFFSET {
            return Err(BridgeError::Region(format!(
                "{}: {} bytes, header incomplete",
                path.display(),
                len
            )));
        }
        // SAFETY: the host never resizes a published region
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut region = Self {
            path: path.to_path_buf(),
            mmap,
            layout: RegionLayout {
                in_channels: 0,
                out_channels: 0,
                samples: 0,
                user_data: 0,
            },
            owner: false,
            _file: file,
        };

        let magic = region.atomic_at(offset_of!(RegionHeader, magic)).load(Ordering::Acquire);
        if magic != REGION_MAGIC {
            return Err(BridgeError::Region(format!("{}: bad magic {:#x}", path.display(), magic)));
        }
        let header: RegionHeader =
            bytemuck::pod_read_unaligned(&region.mmap[..size_of::<RegionHeader>()]);
        if header.version != REGION_VERSION {
            return Err(BridgeError::Region(format!(
                "{}: version {} (expected {})",
                path.display(),
                header.version,
                REGION_VERSION
            )));
        }
        region.layout = RegionLayout {
            in_channels: header.in_channels as usize,
            out_channels: header.out_channels as usize,
            samples: header.samples as usize,
            user_data: header.user_data as usize,
        };
        if region.mmap.len() < region.layout.region_bytes() {
            return Err(BridgeError::Region(format!(
                "{}: {} bytes, layout needs {}",
                path.display(),
                region.mmap.len(),
                region.layout.region_bytes()
            )));
        }
        Ok(region)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> RegionLayout {
        self.layout
    }

    fn atomic_at(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0 && offset + 4 <= DATA_OFFSET);
        // SAFETY: the mapping is page aligned, the offset is 4-byte aligned
        // and inside the header, and header slots are only touched through
        // atomics once the region is published
        unsafe { &*(self.mmap.as_ptr().add(offset) as *const AtomicU32) }
    }

    fn slot(&self, signal: Signal) -> &AtomicU32 {
        self.atomic_at(offset_of!(RegionHeader, signals) + 4 * signal.index())
    }

    pub fn set(&self, signal: Signal) {
        self.slot(signal).store(1, Ordering::Release);
    }

    pub fn clear(&self, signal: Signal) {
        self.slot(signal).store(0, Ordering::Release);
    }

    pub fn is_set(&self, signal: Signal) -> bool {
        self.slot(signal).load(Ordering::Acquire) != 0
    }

    /// Consume a set signal (auto-reset)
    pub fn take(&self, signal: Signal) -> bool {
        self.slot(signal).swap(0, Ordering::AcqRel) != 0
    }

    /// Wait until one of `signals` is set and consume it. Earlier entries win
    /// when several are set. `None` on timeout.
    pub fn wait_any(&self, signals: &[Signal], timeout: Duration) -> Option<Signal> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if let Some(&hit) = signals.iter().find(|&&s| self.take(s)) {
                return Some(hit);
            }
            if Instant::now() >= deadline {
                return None;
            }
            if backoff.is_completed() {
                std::thread::sleep(POLL_INTERVAL);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Store an error message (truncated to the slot capacity)
    pub fn write_error(&mut self, message: &str) {
        let bytes = message.as_bytes();
        let mut len = bytes.len().min(ERROR_CAPACITY);
        while !message.is_char_boundary(len) {
            len -= 1;
        }
        let start = offset_of!(RegionHeader, error);
        self.mmap[start..start + len].copy_from_slice(&bytes[..len]);
        self.atomic_at(offset_of!(RegionHeader, error_len)).store(len as u32, Ordering::Release);
    }

    pub fn read_error(&self) -> String {
        let len = (self.atomic_at(offset_of!(RegionHeader, error_len)).load(Ordering::Acquire) as usize)
            .min(ERROR_CAPACITY);
        let start = offset_of!(RegionHeader, error);
        String::from_utf8_lossy(&self.mmap[start..start + len]).into_owned()
    }

    /// Sample data, `layout().data_bytes() / 4` floats
    pub fn data(&self) -> &[f32] {
        let end = DATA_OFFSET + self.layout.data_bytes();
        bytemuck::cast_slice(&self.mmap[DATA_OFFSET..end])
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        let end = DATA_OFFSET + self.layout.data_bytes();
        bytemuck::cast_slice_mut(&mut self.mmap[DATA_OFFSET..end])
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Failed to remove shared region {}: {}", self.path.display(), e);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
