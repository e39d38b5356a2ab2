//! Reference bridge counterpart
//!
//! Scales every output channel by `--gain`, optionally mixes the inputs in,
//! and increments the first user data value of every channel per block.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tm_bridge::{BridgePeer, RegionLayout};

#[derive(Parser, Debug)]
#[command(name = "tm-bridge-echo", about = "Echo counterpart for the TrackMix processing bridge")]
struct Args {
    #[arg(long)]
    region: PathBuf,
    #[arg(long)]
    session: String,
    #[arg(long)]
    inputs: usize,
    #[arg(long)]
    outputs: usize,
    #[arg(long)]
    samples: usize,
    #[arg(long = "user-data")]
    user_data: usize,

    /// Output gain
    #[arg(long, default_value_t = 1.0)]
    gain: f32,
    /// Add input N into output N
    #[arg(long)]
    monitor: bool,
    /// Signal Error instead of Init
    #[arg(long)]
    fail_init: bool,
    /// Never answer Process requests
    #[arg(long)]
    hang: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut peer = BridgePeer::connect(&args.region, Duration::from_secs(5))
        .with_context(|| format!("connecting to {}", args.region.display()))?;
    let expected = RegionLayout {
        in_channels: args.inputs,
        out_channels: args.outputs,
        samples: args.samples,
        user_data: args.user_data,
    };
    if let Err(e) = peer.expect_layout(&expected) {
        peer.signal_error(&e.to_string());
        return Err(e.into());
    }
    if args.fail_init {
        peer.signal_error("init refused");
        return Ok(());
    }
    log::info!("Echo counterpart attached to session {}", args.session);

    if args.hang {
        peer.signal_init();
        loop {
            if let Some(tm_bridge::PeerRequest::Exit) = peer.wait_request(Duration::from_millis(50)) {
                peer.signal_terminated();
                return Ok(());
            }
        }
    }

    let blocks = peer.serve(|block| {
        let layout = block.layout();
        for ch in 0..layout.out_channels {
            if args.monitor && ch < layout.in_channels {
                block.mix_input_into_output(ch, ch);
            }
            block.output_mut(ch).iter_mut().for_each(|s| *s *= args.gain);
        }
        if layout.user_data > 0 {
            for index in 0..layout.channels() {
                block.user_data_mut(index)[0] += 1.0;
            }
        }
        Ok(())
    })?;
    log::info!("Echo counterpart exiting after {} blocks", blocks);
    Ok(())
}
