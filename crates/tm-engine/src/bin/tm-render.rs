//! Offline renderer
//!
//! Loads WAV files onto tracks, runs the engine against a caller-pumped
//! device and writes every output channel to `<out-dir>/out<N>.wav`.
//!
//! ```text
//! tm-render --config engine.toml --load drums.wav@0,1 --load bass.wav@2 --seconds 30
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, bail};
use clap::Parser;
use tm_audio::ManualDevice;
use tm_engine::{Engine, EngineConfig, SegmentParams};

/// `<file>@<track>[,<track>...]`
#[derive(Debug, Clone)]
struct LoadArg {
    path: PathBuf,
    tracks: Vec<usize>,
}

impl FromStr for LoadArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, tracks) = s
            .rsplit_once('@')
            .ok_or_else(|| format!("expected <file>@<tracks>, got '{}'", s))?;
        let tracks = tracks
            .split(',')
            .map(|t| t.trim().parse::<usize>().map_err(|e| format!("track '{}': {}", t, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            path: PathBuf::from(path),
            tracks,
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "tm-render", about = "Render TrackMix tracks to WAV files")]
struct Args {
    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// File to load, repeatable
    #[arg(long = "load", required = true)]
    loads: Vec<LoadArg>,

    /// Length to render; defaults to the longest loaded queue
    #[arg(long)]
    seconds: Option<f64>,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Loop count per loaded file, 0 = forever (needs --seconds)
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Fade in/out per loaded file in samples
    #[arg(long, default_value_t = 0)]
    ramp: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    // Offline rendering has no inputs and no external processing
    config.input_channels = 0;
    config.input_names.clear();
    config.bridge = None;
    if args.loops == 0 && args.seconds.is_none() {
        bail!("endless loops need --seconds");
    }

    let (device, handle) = ManualDevice::new(config.device_info())?;
    let info = handle.info();
    let engine = Engine::new(config, Box::new(device))?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    for channel in 0..info.output_channels {
        let path = args.out_dir.join(format!("out{}.wav", channel));
        engine.set_output_file(channel, Some(path))?;
    }

    let params = SegmentParams {
        loop_count: args.loops,
        ramp_len: args.ramp,
        ..Default::default()
    };
    let mut end = 0u64;
    for load in &args.loads {
        let infos = engine
            .load_file(&load.path, &load.tracks, &params)
            .with_context(|| format!("loading {}", load.path.display()))?;
        for info in infos {
            end = end.max(info.end.unwrap_or(0));
        }
    }

    let frames = match args.seconds {
        Some(seconds) if seconds > 0.0 => (seconds * info.sample_rate as f64).ceil() as u64,
        Some(seconds) => bail!("--seconds must be positive, got {}", seconds),
        None => end,
    };
    let periods = frames.div_ceil(info.period_frames as u64) as usize;

    engine.start()?;
    log::info!(
        "Rendering {} periods ({} frames) to {}",
        periods,
        frames,
        args.out_dir.display()
    );
    for _ in 0..periods {
        if !handle.pump() {
            break;
        }
    }
    engine.poll()?;
    engine.stop();

    println!(
        "Rendered {} periods, {} output files in {}",
        engine.periods_processed(),
        info.output_channels,
        args.out_dir.display()
    );
    Ok(())
}
