//! tm-audio: device boundary for the TrackMix engine
//!
//! The engine never talks to a driver directly. A device backend owns the
//! period clock and calls a [`DeviceCallback`] once per period with
//! non-interleaved input and output buffers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  start(cb)  ┌───────────────┐  process()  ┌────────────┐
//! │ control side │────────────▶│  AudioDevice  │────────────▶│ callback   │
//! │              │  stop()     │               │  on_xrun()  │ (engine)   │
//! │              │────────────▶│ - period clock│────────────▶│            │
//! └──────────────┘  (joins)    │ - buffers     │             └────────────┘
//!                              └───────────────┘
//! ```
//!
//! Two backends ship here: [`ClockedDevice`] paces periods on its own
//! thread in real time, [`ManualDevice`] runs a period whenever its handle
//! is pumped (tests, offline rendering).

mod clocked;
mod device;
mod error;
mod manual;

pub use clocked::*;
pub use device::*;
pub use error::*;
pub use manual::*;
