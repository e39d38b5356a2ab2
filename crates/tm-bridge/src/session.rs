//! Host side of the bridge

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tm_core::Sample;

use crate::{BridgeError, BridgeResult, RegionLayout, SharedRegion, Signal, signal_name};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Slice of the startup wait between child liveness checks
const START_POLL: Duration = Duration::from_millis(10);

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Counterpart executable. `None` = attach mode: the region is published
    /// and a counterpart started elsewhere connects to it.
    pub program: Option<PathBuf>,
    /// Extra arguments appended after the sizing arguments
    pub args: Vec<String>,
    /// Directory of the region file, default: system temp dir
    pub session_dir: Option<PathBuf>,
    /// Fixed session id, default: generated
    pub session_id: Option<String>,
    pub start_timeout_ms: u64,
    pub exchange_timeout_ms: u64,
    pub terminate_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            session_dir: None,
            session_id: None,
            start_timeout_ms: 10_000,
            exchange_timeout_ms: 1_000,
            terminate_timeout_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

/// Region file of a session
pub fn region_path(dir: &std::path::Path, session: &str) -> PathBuf {
    dir.join(format!("tm-bridge-{}.shm", session))
}

// ═══════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    Idle,
    Starting,
    Ready,
    Processing,
    Stopping,
}

/// How `stop` finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running
    NotRunning,
    /// The counterpart answered Exit with Terminated
    Terminated,
    /// No Terminated within the grace period; the process (if any) was killed
    TimedOut,
}

pub struct BridgeSession {
    config: BridgeConfig,
    state: BridgeState,
    session_id: String,
    region: Option<SharedRegion>,
    child: Option<Child>,
}

impl BridgeSession {
    pub fn new(config: BridgeConfig) -> Self {
        let session_id = config.session_id.clone().unwrap_or_else(|| {
            format!(
                "{}_{}",
                std::process::id(),
                SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
            )
        });
        Self {
            config,
            state: BridgeState::Idle,
            session_id,
            region: None,
            child: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn layout(&self) -> Option<RegionLayout> {
        self.region.as_ref().map(SharedRegion::layout)
    }

    pub fn region_path(&self) -> PathBuf {
        let dir = self
            .config
            .session_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        region_path(&dir, &self.session_id)
    }

    /// Publish the region, spawn the counterpart and wait for Init.
    ///
    /// On failure everything acquired so far is released and the session
    /// is back in `Idle`.
    pub fn start(&mut self, layout: RegionLayout) -> BridgeResult<()> {
        if self.state != BridgeState::Idle {
            return Err(BridgeError::NotReady(self.state));
        }
        // Leftovers of a failed exchange
        self.release();

        self.state = BridgeState::Starting;
        match self.try_start(layout) {
            Ok(()) => {
                self.state = BridgeState::Ready;
                log::info!(
                    "Bridge session {} ready: {} in / {} out, {} samples, {} user data",
                    self.session_id,
                    layout.in_channels,
                    layout.out_channels,
                    layout.samples,
                    layout.user_data
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("Bridge session {} failed to start: {}", self.session_id, e);
                self.kill_child();
                self.release();
                self.state = BridgeState::Idle;
                Err(e)
            }
        }
    }

    fn try_start(&mut self, layout: RegionLayout) -> BridgeResult<()> {
        let path = self.region_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let region = SharedRegion::create(&path, layout)
            .map_err(|e| BridgeError::Region(format!("{}: {}", path.display(), e)))?;
        for signal in Signal::ALL {
            region.clear(signal);
        }
        log::debug!(
            "Bridge region {} signals {}..{}",
            path.display(),
            signal_name(&self.session_id, Signal::Exit),
            signal_name(&self.session_id, Signal::Terminated)
        );
        self.region = Some(region);

        if let Some(program) = self.config.program.clone() {
            let child = Command::new(&program)
                .arg("--region")
                .arg(&path)
                .arg("--session")
                .arg(&self.session_id)
                .arg("--inputs")
                .arg(layout.in_channels.to_string())
                .arg("--outputs")
                .arg(layout.out_channels.to_string())
                .arg("--samples")
                .arg(layout.samples.to_string())
                .arg("--user-data")
                .arg(layout.user_data.to_string())
                .args(&self.config.args)
                .stdin(Stdio::null())
                .spawn()
                .map_err(|e| BridgeError::SpawnFailed(format!("{}: {}", program.display(), e)))?;
            self.child = Some(child);
        }

        let timeout = self.config.start_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let region = self
                .region
                .as_ref()
                .ok_or_else(|| BridgeError::Region("region released".into()))?;
            let slice = deadline.saturating_duration_since(Instant::now()).min(START_POLL);
            match region.wait_any(&[Signal::Error, Signal::Init], slice) {
                Some(Signal::Init) => return Ok(()),
                Some(_) => return Err(BridgeError::Protocol(region.read_error())),
                None => {}
            }
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    // It may have answered right before exiting
                    if let Some(region) = self.region.as_ref() {
                        match region.wait_any(&[Signal::Error, Signal::Init], Duration::ZERO) {
                            Some(Signal::Init) => return Ok(()),
                            Some(_) => return Err(BridgeError::Protocol(region.read_error())),
                            None => {}
                        }
                    }
                    return Err(BridgeError::SpawnFailed(format!(
                        "counterpart exited during startup ({})",
                        status
                    )));
                }
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::StartTimeout(timeout));
            }
        }
    }

    /// Hand one block to the counterpart and wait for the answer.
    ///
    /// `inputs` and `outputs` are copied into the region; on Done the
    /// counterpart's outputs are copied back into `outputs`. User data holds
    /// one vector per channel (inputs first, then outputs); shorter vectors
    /// are zero padded, longer ones truncated. Any error leaves the session
    /// unusable until the next `start`.
    pub fn exchange(
        &mut self,
        inputs: &[Vec<Sample>],
        outputs: &mut [Vec<Sample>],
        user_in: &[Vec<f32>],
        user_out: &mut [Vec<f32>],
    ) -> BridgeResult<()> {
        if self.state != BridgeState::Ready {
            return Err(BridgeError::NotReady(self.state));
        }
        let timeout = self.config.exchange_timeout();
        let region = self
            .region
            .as_mut()
            .ok_or(BridgeError::NotReady(BridgeState::Idle))?;
        let layout = region.layout();
        if inputs.len() != layout.in_channels || outputs.len() != layout.out_channels {
            return Err(BridgeError::Layout(format!(
                "got {} in / {} out, session has {} / {}",
                inputs.len(),
                outputs.len(),
                layout.in_channels,
                layout.out_channels
            )));
        }

        self.state = BridgeState::Processing;
        {
            let data = region.data_mut();
            let audio = inputs.iter().map(Vec::as_slice).chain(outputs.iter().map(Vec::as_slice));
            for (index, src) in audio.enumerate() {
                let dst = &mut data[layout.audio_offset(index)..][..layout.samples];
                copy_padded(dst, src);
            }
            for index in 0..layout.channels() {
                let dst = &mut data[layout.user_data_offset(index)..][..layout.user_data];
                copy_padded(dst, user_in.get(index).map_or(&[][..], Vec::as_slice));
            }
        }

        region.clear(Signal::Done);
        region.clear(Signal::Error);
        region.set(Signal::Process);

        match region.wait_any(&[Signal::Error, Signal::Done], timeout) {
            Some(Signal::Done) => {
                let data = region.data();
                for (index, dst) in outputs.iter_mut().enumerate() {
                    let src = &data[layout.audio_offset(layout.in_channels + index)..][..layout.samples];
                    let n = dst.len().min(src.len());
                    dst[..n].copy_from_slice(&src[..n]);
                }
                for (index, dst) in user_out.iter_mut().enumerate().take(layout.channels()) {
                    let src = &data[layout.user_data_offset(index)..][..layout.user_data];
                    let n = dst.len().min(src.len());
                    dst[..n].copy_from_slice(&src[..n]);
                }
                self.state = BridgeState::Ready;
                Ok(())
            }
            Some(_) => {
                let message = region.read_error();
                self.state = BridgeState::Idle;
                Err(BridgeError::Remote(message))
            }
            None => {
                region.clear(Signal::Process);
                self.state = BridgeState::Idle;
                Err(BridgeError::ExchangeTimeout(timeout))
            }
        }
    }

    /// Signal Exit, wait for Terminated, kill the process if still alive and
    /// release the region. Idempotent; never fails.
    pub fn stop(&mut self) -> StopOutcome {
        if self.region.is_none() && self.child.is_none() {
            self.state = BridgeState::Idle;
            return StopOutcome::NotRunning;
        }
        self.state = BridgeState::Stopping;

        let mut outcome = StopOutcome::TimedOut;
        if let Some(region) = self.region.as_ref() {
            region.set(Signal::Exit);
            if region
                .wait_any(&[Signal::Terminated], self.config.terminate_timeout())
                .is_some()
            {
                outcome = StopOutcome::Terminated;
            } else {
                log::warn!(
                    "Bridge session {}: no Terminated within {:?}",
                    self.session_id,
                    self.config.terminate_timeout()
                );
            }
        }

        if outcome == StopOutcome::Terminated {
            self.wait_child(self.config.terminate_timeout());
        }
        self.kill_child();
        self.release();
        self.state = BridgeState::Idle;
        log::info!("Bridge session {} stopped ({:?})", self.session_id, outcome);
        outcome
    }

    /// Give a terminating child a bounded chance to exit on its own
    fn wait_child(&mut self, timeout: Duration) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => {
                    self.child = None;
                    return;
                }
                Ok(None) => std::thread::sleep(START_POLL),
                Err(e) => {
                    log::warn!("Bridge child wait failed: {}", e);
                    return;
                }
            }
        }
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    log::warn!("Failed to kill bridge process {}: {}", child.id(), e);
                }
            }
            if let Err(e) = child.wait() {
                log::warn!("Failed to reap bridge process: {}", e);
            }
        }
    }

    fn release(&mut self) {
        self.region = None;
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_padded(dst: &mut [f32], src: &[f32]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}
