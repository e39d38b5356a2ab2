//! Counterpart side of the bridge
//!
//! Connects to a published region, announces Init and services Process
//! requests until Exit.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::{BridgeError, BridgeResult, RegionLayout, SharedRegion, Signal};

/// Request received by the counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequest {
    Process,
    Exit,
}

pub struct BridgePeer {
    region: SharedRegion,
}

impl BridgePeer {
    /// Open the region at `path`, retrying until it is published or
    /// `timeout` expires
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> BridgeResult<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + timeout;
        loop {
            match SharedRegion::open(path) {
                Ok(region) => return Ok(Self { region }),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(_) => std::thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    pub fn layout(&self) -> RegionLayout {
        self.region.layout()
    }

    /// Check the published layout against what the counterpart expects
    pub fn expect_layout(&self, expected: &RegionLayout) -> BridgeResult<()> {
        if self.layout() != *expected {
            return Err(BridgeError::Layout(format!(
                "region has {:?}, counterpart expects {:?}",
                self.layout(),
                expected
            )));
        }
        Ok(())
    }

    pub fn signal_init(&self) {
        self.region.set(Signal::Init);
    }

    /// Report a failure to the host (during startup or for one block)
    pub fn signal_error(&mut self, message: &str) {
        self.region.write_error(message);
        self.region.set(Signal::Error);
    }

    pub fn signal_done(&self) {
        self.region.set(Signal::Done);
    }

    pub fn signal_terminated(&self) {
        self.region.set(Signal::Terminated);
    }

    /// Wait for the next request. Exit wins over a pending Process.
    pub fn wait_request(&self, timeout: Duration) -> Option<PeerRequest> {
        match self.region.wait_any(&[Signal::Exit, Signal::Process], timeout)? {
            Signal::Exit => Some(PeerRequest::Exit),
            _ => Some(PeerRequest::Process),
        }
    }

    /// View of the current block
    pub fn block(&mut self) -> PeerBlock<'_> {
        let layout = self.region.layout();
        PeerBlock {
            layout,
            data: self.region.data_mut(),
        }
    }

    /// Announce Init and answer requests with `handler` until Exit.
    ///
    /// A handler error is reported for that block only; the loop goes on.
    /// Returns the number of blocks processed.
    pub fn serve<F>(mut self, mut handler: F) -> BridgeResult<u64>
    where
        F: FnMut(&mut PeerBlock<'_>) -> Result<(), String>,
    {
        self.signal_init();
        let mut blocks = 0u64;
        loop {
            match self.wait_request(Duration::from_millis(100)) {
                Some(PeerRequest::Process) => {
                    let result = handler(&mut self.block());
                    match result {
                        Ok(()) => self.signal_done(),
                        Err(message) => self.signal_error(&message),
                    }
                    blocks += 1;
                }
                Some(PeerRequest::Exit) => {
                    self.signal_terminated();
                    return Ok(blocks);
                }
                None => {
                    if !self.region.path().exists() {
                        return Err(BridgeError::Region("host released the region".into()));
                    }
                }
            }
        }
    }
}

/// Mutable access to one block of the region
pub struct PeerBlock<'a> {
    layout: RegionLayout,
    data: &'a mut [f32],
}

impl PeerBlock<'_> {
    pub fn layout(&self) -> RegionLayout {
        self.layout
    }

    pub fn input(&self, channel: usize) -> &[f32] {
        let offset = self.layout.audio_offset(channel);
        &self.data[offset..offset + self.layout.samples]
    }

    pub fn output(&self, channel: usize) -> &[f32] {
        let offset = self.layout.audio_offset(self.layout.in_channels + channel);
        &self.data[offset..offset + self.layout.samples]
    }

    pub fn output_mut(&mut self, channel: usize) -> &mut [f32] {
        let offset = self.layout.audio_offset(self.layout.in_channels + channel);
        &mut self.data[offset..offset + self.layout.samples]
    }

    /// User data of channel `index` (inputs first, then outputs)
    pub fn user_data(&self, index: usize) -> &[f32] {
        let offset = self.layout.user_data_offset(index);
        &self.data[offset..offset + self.layout.user_data]
    }

    pub fn user_data_mut(&mut self, index: usize) -> &mut [f32] {
        let offset = self.layout.user_data_offset(index);
        &mut self.data[offset..offset + self.layout.user_data]
    }

    /// Add input channel `input` into output channel `output`
    pub fn mix_input_into_output(&mut self, input: usize, output: usize) {
        let samples = self.layout.samples;
        let src = self.layout.audio_offset(input);
        let dst = self.layout.audio_offset(self.layout.in_channels + output);
        for i in 0..samples {
            self.data[dst + i] += self.data[src + i];
        }
    }
}
