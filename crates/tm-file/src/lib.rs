//! tm-file: audio file I/O for TrackMix
//!
//! - [`PcmFileWriter`]: 32-bit float mono RIFF/WAVE recorder with deferred
//!   header patch-up
//! - [`AudioSource`]: random-access multi-channel reader consumed by file
//!   segments, with [`WavSource`] and [`MemorySource`] implementations

mod error;
mod pcm_writer;
mod source;

pub use error::*;
pub use pcm_writer::*;
pub use source::*;
