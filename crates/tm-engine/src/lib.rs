//! tm-engine: multi-track mixing and streaming engine
//!
//! Segments are queued on virtual tracks, tracks are mixed into device
//! outputs, inputs are captured into ring buffers and record files, and an
//! optional external process gets every block in between.
//!
//! ```text
//!                 ┌──────────────────── process lock ─────────────────────┐
//!  load_* ──────> │ Track 0 ─┐                                            │
//!                 │ Track 1 ─┼─ Add/Multiply ─> OutputChannel ─> device   │
//!                 │ Track N ─┘        ▲                                   │
//!  device in ───> │ InputChannel ─────┴──── BridgeSession (exchange)      │
//!                 └───────┬───────────────────────────────────────────────┘
//!                         └──> InputRing (buffer lock) ──> read_record_buffer
//! ```
//!
//! [`Engine`] is the context object the control layer owns; there is no
//! global state.

mod config;
mod engine;
mod error;
mod input;
mod mixer;
mod output;
mod segment;
mod track;

pub use config::EngineConfig;
pub use engine::*;
pub use error::*;
pub use input::*;
pub use mixer::*;
pub use output::*;
pub use segment::*;
pub use track::*;

pub use tm_core::{ChannelClass, ErrorKind};
