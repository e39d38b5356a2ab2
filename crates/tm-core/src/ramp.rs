//! Ramp shapes

use std::f64::consts::PI;

/// Rising hann ramp value for position `pos` of a ramp of `len` samples.
///
/// `pos = 0` yields 0, `pos >= len` yields 1. A zero-length ramp is a step.
#[inline]
pub fn hann_rise(pos: usize, len: usize) -> f32 {
    if pos >= len {
        return 1.0;
    }
    (0.5 * (1.0 - (PI * pos as f64 / len as f64).cos())) as f32
}

/// Falling counterpart of [`hann_rise`]: `remaining` is the number of
/// samples that follow this one before the fade ends, so the last sample of
/// a fade-out is 0.
#[inline]
pub fn hann_fall(remaining: usize, len: usize) -> f32 {
    hann_rise(remaining, len)
}

/// Linear gain ramp towards a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl LinearRamp {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Start a ramp from the current value to `target` over `len` samples
    pub fn set_target(&mut self, target: f32, len: usize) {
        self.target = target;
        if len == 0 {
            self.current = target;
            self.step = 0.0;
            self.remaining = 0;
        } else {
            self.step = (target - self.current) / len as f32;
            self.remaining = len;
        }
    }

    /// Advance one sample and return the gain for that sample
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    /// Multiply `buffer` by the ramp, advancing it
    pub fn apply(&mut self, buffer: &mut [f32]) {
        if !self.is_ramping() {
            let gain = self.current;
            if gain != 1.0 {
                buffer.iter_mut().for_each(|s| *s *= gain);
            }
            return;
        }
        for s in buffer.iter_mut() {
            *s *= self.next_gain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hann_rise_edges() {
        assert_eq!(hann_rise(0, 10), 0.0);
        assert_relative_eq!(hann_rise(5, 10), 0.5, epsilon = 1e-6);
        assert_eq!(hann_rise(10, 10), 1.0);
        assert_eq!(hann_rise(0, 0), 1.0);
    }

    #[test]
    fn test_linear_ramp_reaches_target() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.set_target(1.0, 4);
        let values: Vec<f32> = (0..6).map(|_| ramp.next_gain()).collect();
        assert_relative_eq!(values[0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(values[2], 0.75, epsilon = 1e-6);
        assert_eq!(values[3], 1.0);
        assert_eq!(values[5], 1.0);
        assert!(!ramp.is_ramping());
    }

    #[test]
    fn test_zero_length_ramp_is_step() {
        let mut ramp = LinearRamp::new(1.0);
        ramp.set_target(0.0, 0);
        assert_eq!(ramp.current(), 0.0);
        let mut buf = [1.0f32; 3];
        ramp.apply(&mut buf);
        assert_eq!(buf, [0.0; 3]);
    }
}
