//! tm-core: Shared types for the TrackMix engine
//!
//! Sample type, the structured error kind every crate reports through,
//! channel classes with their mute/solo rule, and the ramp shapes used by
//! segments and output channels.

mod channel;
mod error;
mod ramp;

pub use channel::*;
pub use error::*;
pub use ramp::*;

/// Audio sample. The whole engine runs on 32-bit float.
pub type Sample = f32;

/// Default length of the per-channel user data vectors exchanged with the
/// external processing bridge.
pub const DEFAULT_USER_DATA_LEN: usize = 100;

/// Default clip threshold (full scale)
pub const DEFAULT_CLIP_THRESHOLD: f32 = 1.0;

/// Peak absolute value of a buffer
#[inline]
pub fn peak(buffer: &[Sample]) -> f32 {
    buffer.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
}

/// True if any sample reaches `threshold` in absolute value
#[inline]
pub fn clips(buffer: &[Sample], threshold: f32) -> bool {
    buffer.iter().any(|s| s.abs() >= threshold)
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak() {
        assert_eq!(peak(&[]), 0.0);
        assert_eq!(peak(&[0.1, -0.7, 0.3]), 0.7);
    }

    #[test]
    fn test_clips_inclusive_threshold() {
        assert!(clips(&[0.0, 0.5], 0.5));
        assert!(clips(&[-0.5], 0.5));
        assert!(!clips(&[0.49, -0.49], 0.5));
    }
}
