//! tm-bridge: synchronous block handoff to an external process
//!
//! The host ([`BridgeSession`]) and the counterpart ([`BridgePeer`]) share
//! one memory-mapped region:
//!
//! ```text
//! ┌──────────────────────── header (DATA_OFFSET bytes) ───────────────────┐
//! │ magic │ version │ in │ out │ samples │ user_data │ signals[6] │ error │
//! ├──────────────────────────── data (f32) ───────────────────────────────┤
//! │ in 0: samples + user_data │ ... │ out 0: samples + user_data │ ...    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Signals are 32-bit slots at fixed indices (Exit=0, Process=1, Error=2,
//! Done=3, Init=4, Terminated=5) named `<session>_<index>`. Every wait on
//! them is bounded.

mod error;
mod peer;
mod region;
mod session;

pub use error::*;
pub use peer::*;
pub use region::*;
pub use session::*;
