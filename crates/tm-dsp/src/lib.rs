//! tm-dsp: block-based spectral processing
//!
//! ```text
//!  push ──► input (W) ──► window ──► pad ──► FFT ──► hook ──► IFFT
//!                                                              │
//!  pull ◄── output ◄── overlap-add (carry F-H) ◄── back-window ◄┘
//! ```
//!
//! [`OverlapAddFilter`] consumes input in hop-sized units, hands the
//! per-channel half spectra to an optional [`SpectralHook`] and emits the
//! resynthesized signal delayed by [`OverlapAddFilter::latency`] samples.

mod error;
mod ola;
mod packing;
mod window;

pub use error::*;
pub use ola::*;
pub use packing::*;
pub use window::*;

pub use rustfft::num_complex::Complex32;
