//! Caller-pumped device
//!
//! No thread of its own: every [`ManualDeviceHandle::pump`] runs exactly one
//! period on the calling thread. Used by tests and the offline renderer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tm_core::Sample;

use crate::{AudioDevice, AudioResult, CallbackAction, DeviceCallback, DeviceInfo, PeriodBuffers};

struct ManualShared {
    info: DeviceInfo,
    running: AtomicBool,
    /// Held for the whole period, so `stop` waits for an in-flight callback
    period: Mutex<ManualPeriod>,
    periods: AtomicU64,
}

struct ManualPeriod {
    callback: Option<Arc<dyn DeviceCallback>>,
    buffers: PeriodBuffers,
}

pub struct ManualDevice {
    shared: Arc<ManualShared>,
}

/// Drives a [`ManualDevice`] from another owner (the device itself is
/// usually boxed inside the engine)
#[derive(Clone)]
pub struct ManualDeviceHandle {
    shared: Arc<ManualShared>,
}

impl ManualDevice {
    pub fn new(info: DeviceInfo) -> AudioResult<(Self, ManualDeviceHandle)> {
        info.validate()?;
        let shared = Arc::new(ManualShared {
            info,
            running: AtomicBool::new(false),
            period: Mutex::new(ManualPeriod {
                callback: None,
                buffers: PeriodBuffers::new(&info),
            }),
            periods: AtomicU64::new(0),
        });
        let handle = ManualDeviceHandle {
            shared: Arc::clone(&shared),
        };
        Ok((Self { shared }, handle))
    }
}

impl AudioDevice for ManualDevice {
    fn info(&self) -> DeviceInfo {
        self.shared.info
    }

    fn start(&mut self, callback: Arc<dyn DeviceCallback>) -> AudioResult<()> {
        let mut period = self.shared.period.lock();
        if self.shared.running.load(Ordering::Acquire) {
            return Err(crate::AudioError::AlreadyRunning);
        }
        period.callback = Some(callback);
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.shared.running.store(false, Ordering::Release);
        let mut period = self.shared.period.lock();
        period.callback = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl ManualDeviceHandle {
    pub fn info(&self) -> DeviceInfo {
        self.shared.info
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn periods(&self) -> u64 {
        self.shared.periods.load(Ordering::Relaxed)
    }

    /// Run one period with silent inputs. Returns false if the device is not
    /// running or the callback asked to stop.
    pub fn pump(&self) -> bool {
        self.pump_with(|inputs| inputs.iter_mut().for_each(|ch| ch.fill(0.0)), |_| {})
    }

    /// Run one period. `fill` writes the inputs, `sink` sees the outputs.
    pub fn pump_with<F, S>(&self, fill: F, sink: S) -> bool
    where
        F: FnOnce(&mut [Vec<Sample>]),
        S: FnOnce(&[Vec<Sample>]),
    {
        let mut period = self.shared.period.lock();
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        let Some(callback) = period.callback.clone() else {
            return false;
        };
        fill(period.buffers.inputs_mut());
        let action = callback.process(&mut period.buffers);
        sink(period.buffers.outputs());
        self.shared.periods.fetch_add(1, Ordering::Relaxed);

        if action == CallbackAction::Stop {
            self.shared.running.store(false, Ordering::Release);
            log::info!("Manual device stopped by callback");
            return false;
        }
        true
    }

    /// Run up to `periods` periods and collect the outputs per channel.
    /// Stops early when the device stops.
    pub fn render(&self, periods: usize) -> Vec<Vec<Sample>> {
        let info = self.shared.info;
        let mut out: Vec<Vec<Sample>> = (0..info.output_channels)
            .map(|_| Vec::with_capacity(periods * info.period_frames))
            .collect();
        for _ in 0..periods {
            let mut ok = false;
            let running = self.pump_with(
                |inputs| inputs.iter_mut().for_each(|ch| ch.fill(0.0)),
                |outputs| {
                    ok = true;
                    for (dst, src) in out.iter_mut().zip(outputs) {
                        dst.extend_from_slice(src);
                    }
                },
            );
            if !running || !ok {
                break;
            }
        }
        out
    }

    /// Report a missed deadline to the callback
    pub fn signal_xrun(&self) {
        let period = self.shared.period.lock();
        if let Some(callback) = period.callback.as_ref() {
            callback.on_xrun();
        }
    }
}
