//! Thread-paced device
//!
//! Runs the callback on a dedicated thread at the period rate of the
//! configured sample rate. Inputs and outputs go through an optional
//! [`PeriodIo`] so the device can be fed from and drained to anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::{
    AudioDevice, AudioError, AudioResult, CallbackAction, DeviceCallback, DeviceInfo,
    PeriodBuffers,
};

/// Input source / output sink of a [`ClockedDevice`]
pub trait PeriodIo: Send {
    fn fill_inputs(&mut self, _inputs: &mut [Vec<f32>]) {}
    fn consume_outputs(&mut self, _outputs: &[Vec<f32>]) {}
}

/// Silent inputs, discarded outputs
#[derive(Debug, Default)]
pub struct NullIo;

impl PeriodIo for NullIo {}

pub struct ClockedDevice {
    info: DeviceInfo,
    io: Option<Box<dyn PeriodIo>>,
    thread: Option<JoinHandle<Box<dyn PeriodIo>>>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    periods: Arc<AtomicU64>,
}

impl ClockedDevice {
    pub fn new(info: DeviceInfo) -> AudioResult<Self> {
        info.validate()?;
        Ok(Self {
            info,
            io: Some(Box::new(NullIo)),
            thread: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            periods: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_io(mut self, io: Box<dyn PeriodIo>) -> Self {
        self.io = Some(io);
        self
    }

    /// Periods run since construction
    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }
}

impl AudioDevice for ClockedDevice {
    fn info(&self) -> DeviceInfo {
        self.info
    }

    fn start(&mut self, callback: Arc<dyn DeviceCallback>) -> AudioResult<()> {
        if self.thread.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        let mut io = self.io.take().unwrap_or_else(|| Box::new(NullIo));
        let info = self.info;
        let stop_requested = Arc::clone(&self.stop_requested);
        let running = Arc::clone(&self.running);
        let periods = Arc::clone(&self.periods);

        stop_requested.store(false, Ordering::Release);
        running.store(true, Ordering::Release);

        let spawned = std::thread::Builder::new()
            .name("tm-audio-clock".into())
            .spawn(move || {
                let period = info.period_duration();
                let mut buffers = PeriodBuffers::new(&info);
                let mut deadline = Instant::now() + period;

                while !stop_requested.load(Ordering::Acquire) {
                    io.fill_inputs(buffers.inputs_mut());
                    let started = Instant::now();
                    let action = callback.process(&mut buffers);
                    if started.elapsed() > period {
                        callback.on_xrun();
                    }
                    io.consume_outputs(buffers.outputs());
                    periods.fetch_add(1, Ordering::Relaxed);

                    if action == CallbackAction::Stop {
                        log::info!("Audio clock stopped by callback");
                        break;
                    }

                    let now = Instant::now();
                    if now < deadline {
                        std::thread::sleep(deadline - now);
                        deadline += period;
                    } else {
                        // Missed the slot, resynchronise instead of bursting
                        if now - deadline > period {
                            callback.on_xrun();
                        }
                        deadline = now + period;
                    }
                }
                running.store(false, Ordering::Release);
                io
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                log::info!(
                    "Clocked device started: {} Hz, {} frames, {} in / {} out",
                    info.sample_rate,
                    info.period_frames,
                    info.input_channels,
                    info.output_channels
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(AudioError::ThreadSpawn(e))
            }
        }
    }

    fn stop(&mut self) -> AudioResult<()> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        self.stop_requested.store(true, Ordering::Release);
        let result = handle.join();
        self.running.store(false, Ordering::Release);
        match result {
            Ok(io) => {
                self.io = Some(io);
                log::info!("Clocked device stopped");
                Ok(())
            }
            Err(_) => Err(AudioError::ThreadPanicked),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for ClockedDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Clocked device stop failed: {}", e);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        calls: AtomicUsize,
        stop_after: usize,
        xruns: AtomicUsize,
        delay: Duration,
    }

    impl DeviceCallback for Counter {
        fn process(&self, buffers: &mut PeriodBuffers) -> CallbackAction {
            for ch in buffers.outputs_mut() {
                ch.fill(0.5);
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                CallbackAction::Stop
            } else {
                CallbackAction::Continue
            }
        }

        fn on_xrun(&self) {
            self.xruns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_info() -> DeviceInfo {
        DeviceInfo {
            sample_rate: 48000,
            period_frames: 48,
            input_channels: 1,
            output_channels: 2,
        }
    }

    fn wait_until_stopped(device: &ClockedDevice) {
        let started = Instant::now();
        while device.is_running() && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_callback_stop_ends_clock() {
        let mut device = ClockedDevice::new(fast_info()).unwrap();
        let cb = Arc::new(Counter {
            calls: AtomicUsize::new(0),
            stop_after: 5,
            xruns: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        device.start(cb.clone()).unwrap();
        wait_until_stopped(&device);
        assert!(!device.is_running());
        assert_eq!(cb.calls.load(Ordering::SeqCst), 5);
        device.stop().unwrap();
        device.stop().unwrap();
        assert_eq!(device.periods(), 5);
    }

    #[test]
    fn test_stop_joins_thread() {
        let mut device = ClockedDevice::new(fast_info()).unwrap();
        let cb = Arc::new(Counter {
            calls: AtomicUsize::new(0),
            stop_after: usize::MAX,
            xruns: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        device.start(cb.clone()).unwrap();
        assert!(matches!(device.start(cb.clone()), Err(AudioError::AlreadyRunning)));
        std::thread::sleep(Duration::from_millis(20));
        device.stop().unwrap();
        let calls = cb.calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cb.calls.load(Ordering::SeqCst), calls);
        assert!(!device.is_running());
    }

    #[test]
    fn test_slow_callback_reports_xrun() {
        let mut device = ClockedDevice::new(fast_info()).unwrap();
        let cb = Arc::new(Counter {
            calls: AtomicUsize::new(0),
            stop_after: 2,
            xruns: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        });
        device.start(cb.clone()).unwrap();
        wait_until_stopped(&device);
        device.stop().unwrap();
        assert!(cb.xruns.load(Ordering::SeqCst) >= 2);
    }
}
