//! Channel classes and the mute/solo rule

use serde::{Deserialize, Serialize};

/// The three independent mute/solo classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelClass {
    Track,
    Output,
    Input,
}

impl ChannelClass {
    pub fn name(self) -> &'static str {
        match self {
            ChannelClass::Track => "track",
            ChannelClass::Output => "output",
            ChannelClass::Input => "input",
        }
    }
}

/// Mute/solo flags of one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteSolo {
    pub mute: bool,
    pub solo: bool,
}

impl MuteSolo {
    /// Audibility within a class where `any_solo` tells whether some member
    /// of the same class is soloed. If any solo is set, mute flags of the
    /// whole class are ignored.
    #[inline]
    pub fn audible(self, any_solo: bool) -> bool {
        any_solo || !self.mute
    }
}

/// Evaluate the audibility of every member of one class.
///
/// Called once per buffer, nothing is cached.
pub fn resolve_audible(flags: impl Iterator<Item = MuteSolo> + Clone, out: &mut Vec<bool>) {
    let any_solo = flags.clone().any(|f| f.solo);
    out.clear();
    out.extend(flags.map(|f| f.audible(any_solo)));
}
