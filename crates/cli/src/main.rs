use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use venc::config::{DEFAULT_MTU, DEFAULT_PORT, MAX_BIT_RATE, MAX_FRAME_RATE};
use venc::{Codec, FrameSize, OutputMode, ReplayChannel, StreamConfig, Streamer};

/// Enter presses that end the run.
const ENTER_PRESSES_TO_EXIT: usize = 2;

#[derive(Parser, Debug)]
#[command(
    name = "venc-stream",
    version,
    about = "Stream encoded H.264/H.265 video to a file or as RTP over UDP"
)]
struct Args {
    /// Output mode: file or rtp
    #[arg(short, long, default_value = "file")]
    mode: OutputMode,

    /// Video format: H.264 (264, h264, avc) or H.265 (265, h265, hevc)
    #[arg(short = 'e', long = "encoding", default_value = "H.264")]
    codec: Codec,

    /// Frame rate in fps, in (0, 30]
    #[arg(short, long, default_value_t = 24, value_parser = parse_frame_rate)]
    frame_rate: u32,

    /// Bit rate in kbps, in (0, 4096]
    #[arg(short, long, default_value_t = 1024, value_parser = parse_bit_rate)]
    bit_rate: u32,

    /// RTP destination IPv4 address
    #[arg(short, long, default_value = "192.168.1.100")]
    ip: Ipv4Addr,

    /// Video size: 1080p, 720p, D1 or CIF
    #[arg(short, long, default_value = "1080p")]
    size: FrameSize,

    /// RTP destination port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Largest RTP payload in bytes
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: usize,

    /// Send every NAL unit on its own instead of aggregating small ones
    #[arg(long)]
    no_aggregation: bool,

    /// Write an SDP description of the RTP session to this path
    #[arg(long)]
    sdp: Option<PathBuf>,

    /// Directory for file-mode output
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Annex B elementary stream to feed the pipeline with
    #[arg(long)]
    input: PathBuf,

    /// Restart the input from the beginning when it ends
    #[arg(long = "loop")]
    looping: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            mode: self.mode,
            frame_rate: self.frame_rate,
            bit_rate: self.bit_rate,
            destination: self.ip,
            port: self.port,
            codec: self.codec,
            frame_size: self.size,
            mtu: self.mtu,
            aggregation: !self.no_aggregation,
            output_dir: self.output_dir.clone(),
            sdp_path: self.sdp.clone(),
            ..StreamConfig::default()
        }
    }
}

fn parse_bounded(s: &str, name: &str, max: u32) -> std::result::Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("{name} must be a number"))?;
    if value == 0 || value > max {
        return Err(format!("{name} is not in (0, {max}]"));
    }
    Ok(value)
}

fn parse_frame_rate(s: &str) -> std::result::Result<u32, String> {
    parse_bounded(s, "frame rate", MAX_FRAME_RATE)
}

fn parse_bit_rate(s: &str) -> std::result::Result<u32, String> {
    parse_bounded(s, "bit rate", MAX_BIT_RATE)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    match run(&args) {
        Ok(()) => {
            println!("program exit normally!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            println!("program exit abnormally!");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.stream_config();
    println!(
        "param:\nmode={}, format={}, frameRate={} fps, bitRate={} kbps, videoSize={}, IP={}",
        config.mode, config.codec, config.frame_rate, config.bit_rate, config.frame_size, config.destination
    );

    let channel = ReplayChannel::open(&args.input, config.codec, config.frame_rate)
        .with_context(|| format!("cannot load {}", args.input.display()))?
        .looping(args.looping);

    let mut streamer = Streamer::new(config);
    streamer
        .start(channel)
        .context("pipeline failed to start")?;

    println!("please press twice ENTER to exit");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build control runtime")?;
    runtime.block_on(wait_for_shutdown(&streamer));
    // stdin is read on a blocking thread that never completes on its own
    runtime.shutdown_background();

    streamer.stop();
    let stats = streamer.join().context("capture loop failed")?;
    info!(
        frames = stats.frames_dispatched,
        dropped = stats.frames_dropped,
        packets = stats.packets_sent,
        bytes = stats.bytes_written,
        "stream finished"
    );
    Ok(())
}

/// Resolve once the user or the system asks us to stop, or the worker ends.
async fn wait_for_shutdown(streamer: &Streamer) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut enters = 0usize;
    let mut tick = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "cannot listen for Ctrl+C");
                }
                info!("interrupt received, shutting down");
                return;
            }
            _ = terminate() => {
                info!("terminate received, shutting down");
                return;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    enters += 1;
                    if enters >= ENTER_PRESSES_TO_EXIT {
                        info!("exit requested from console");
                        return;
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tick.tick() => {
                if streamer.is_finished() {
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
