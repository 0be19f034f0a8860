//! framegrab binary: capture raw frames from a V4L2 device into a file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use framegrab::config::{DEFAULT_BUFFER_COUNT, DEFAULT_DEVICE, DEFAULT_PLANE_COUNT};
use framegrab::{CaptureConfig, CaptureSession, FieldOrder, FourCC};

/// How long the writer waits for a frame before rechecking for shutdown.
const FRAME_WAIT: Duration = Duration::from_millis(100);

/// Field ordering accepted on the command line.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy)]
enum Field {
    /// Let the driver choose
    Any,
    /// Progressive
    None,
    /// Top field only
    Top,
    /// Bottom field only
    Bottom,
    /// Both fields interlaced
    Interlaced,
    /// Sequential, top field first
    SeqTb,
    /// Sequential, bottom field first
    SeqBt,
    /// Alternating fields
    Alternate,
    /// Interlaced, top field first
    InterlacedTb,
    /// Interlaced, bottom field first
    InterlacedBt,
}

impl From<Field> for FieldOrder {
    fn from(field: Field) -> Self {
        match field {
            Field::Any => Self::Any,
            Field::None => Self::None,
            Field::Top => Self::Top,
            Field::Bottom => Self::Bottom,
            Field::Interlaced => Self::Interlaced,
            Field::SeqTb => Self::SequentialTopBottom,
            Field::SeqBt => Self::SequentialBottomTop,
            Field::Alternate => Self::Alternate,
            Field::InterlacedTb => Self::InterlacedTopBottom,
            Field::InterlacedBt => Self::InterlacedBottomTop,
        }
    }
}

/// Capture raw frames from a V4L2 device.
///
/// Frames are written back to back with no header, exactly as the driver
/// produced them. Stops after `--frames` frames, or on SIGINT/SIGTERM.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Camera capture device path
    #[arg(short, long, env = "CAMERA", default_value = DEFAULT_DEVICE)]
    camera: PathBuf,

    /// Capture resolution in pixels (width height)
    #[arg(
        long,
        env = "CAMERA_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    camera_size: Vec<u32>,

    /// Pixel format FourCC (e.g. YUYV, MJPG, NM12)
    #[arg(short, long, env = "CAMERA_FORMAT", default_value = "YUYV")]
    format: FourCC,

    /// Field ordering
    #[arg(long, env = "CAMERA_FIELD", default_value = "any", value_enum)]
    field: Field,

    /// Number of kernel buffers to request
    #[arg(short, long, env = "BUFFERS", default_value_t = DEFAULT_BUFFER_COUNT)]
    buffers: u32,

    /// Planes per buffer for multi-planar devices
    #[arg(long, env = "PLANES", default_value_t = DEFAULT_PLANE_COUNT)]
    planes: u32,

    /// Output file for raw frames
    #[arg(short, long, env = "OUTPUT", default_value = "demo.raw")]
    output: PathBuf,

    /// Stop after writing this many frames (default: run until interrupted)
    #[arg(short = 'n', long, env = "FRAMES")]
    frames: Option<u64>,

    /// Upper bound on one device readiness wait, in milliseconds
    #[arg(long, env = "POLL_TIMEOUT_MS", default_value_t = 2)]
    poll_timeout_ms: u64,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> anyhow::Result<CaptureConfig> {
        let &[width, height] = self.camera_size.as_slice() else {
            bail!("--camera-size takes exactly two values: width height");
        };
        Ok(CaptureConfig::default()
            .with_device(self.camera.clone())
            .with_resolution(width, height)
            .with_format(self.format)
            .with_field(self.field.into())
            .with_buffers(self.buffers)
            .with_planes(self.planes)
            .with_poll_timeout(Duration::from_millis(self.poll_timeout_ms)))
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = args.config()?;
    let session = CaptureSession::start(&config)
        .with_context(|| format!("failed to start capture on {}", config.device.display()))?;
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, session.stop_flag())
            .context("failed to register signal handler")?;
    }

    let format = session.format();
    info!(
        width = format.width,
        height = format.height,
        fourcc = %format.fourcc,
        frame_size = format.frame_size(),
        "capturing"
    );

    let file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut sink = BufWriter::new(file);
    let stop = session.stop_handle();
    let mut written = 0u64;

    loop {
        if let Some(frame) = session.wait_frame(FRAME_WAIT) {
            sink.write_all(&frame.data)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
            written += 1;
            debug!(
                sequence = frame.metadata.sequence,
                bytes = frame.data.len(),
                "frame written"
            );
            if args.frames.is_some_and(|limit| written >= limit) {
                session.request_stop();
                break;
            }
        } else if stop.is_stop_requested() || session.is_closed() || session.is_finished() {
            break;
        }
    }
    sink.flush()
        .with_context(|| format!("failed to flush {}", args.output.display()))?;

    let dropped = session.dropped_frames();
    session.join().context("capture failed")?;
    info!(
        written,
        dropped,
        output = %args.output.display(),
        "capture finished"
    );
    Ok(())
}
