//! picam_capture - capture frames from a V4L2 camera (or `stub://` source)
//!
//! Subcommands:
//! - `list`: show candidate device nodes and whether the default one exists
//! - `capture`: run the paced capture loop into a counting consumer thread

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use picam_capture::{
    create_display, display_names, image_exchange, initialize, CaptureConfig, CaptureSettings,
    CaptureStats, CaptureStatus, ConsumerEnd,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List candidate capture devices
    List,

    /// Capture frames and print a summary
    Capture {
        /// Device node or stub://name (defaults to config, then /dev/video0).
        #[arg(long)]
        device: Option<String>,
        /// Requested frame width (hint).
        #[arg(long)]
        width: Option<u32>,
        /// Requested frame height (hint).
        #[arg(long)]
        height: Option<u32>,
        /// Requested frames per second (0 = 30).
        #[arg(long)]
        fps: Option<u32>,
        /// Stop after this many new frames (0 = until Ctrl-C).
        #[arg(long, default_value_t = 30)]
        frames: u64,
        /// Write the last new frame as raw BGRA to this file.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Default)]
struct ConsumerReport {
    frames_new: u64,
    frames_repeated: u64,
    last_frame: Option<(u32, u32, Vec<u8>)>,
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    device: &'a str,
    width: u32,
    height: u32,
    status: &'a str,
    frames_received: u64,
    repeats_received: u64,
    pacer: &'a CaptureStats,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::List => {
            let reachable = initialize();
            println!(
                "default device {}",
                if reachable { "reachable" } else { "not found" }
            );
            for name in display_names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Capture {
            device,
            width,
            height,
            fps,
            frames,
            output,
            json,
        } => {
            let settings = CaptureSettings::load()?;
            let device = device.unwrap_or(settings.device.clone());
            let config = settings.capture_with(width, height, fps)?;
            run_capture(&device, config, settings.pool_size, frames, output, json)
        }
    }
}

fn run_capture(
    device: &str,
    config: CaptureConfig,
    pool_size: usize,
    frames: u64,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let mut display = create_display(device, &config)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("install Ctrl-C handler")?;
    }

    let (mut pipeline, consumer) = image_exchange(pool_size);
    let want_pixels = output.is_some();
    let consumer_thread = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || consume(consumer, frames, &stop, want_pixels))
    };

    let status = display.capture(&mut pipeline);
    drop(pipeline);
    let report = consumer_thread
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))?;
    let status = status?;

    if let (Some(path), Some((width, height, pixels))) = (&output, &report.last_frame) {
        std::fs::write(path, pixels)
            .with_context(|| format!("write frame to {}", path.display()))?;
        log::info!("wrote {}x{} BGRA frame to {}", width, height, path.display());
    }

    let summary = Summary {
        device: display.device(),
        width: display.width(),
        height: display.height(),
        status: match status {
            CaptureStatus::Ok => "ok",
            CaptureStatus::Interrupted => "interrupted",
        },
        frames_received: report.frames_new,
        repeats_received: report.frames_repeated,
        pacer: display.stats(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}: {}x{} status={} new={} repeated={} max_overshoot={:?}",
            summary.device,
            summary.width,
            summary.height,
            summary.status,
            summary.frames_received,
            summary.repeats_received,
            summary.pacer.max_overshoot
        );
    }
    Ok(())
}

/// Drain delivered images until `frames` new ones arrived or `stop` is set.
/// Returning drops the consumer end, which stops the pipeline.
fn consume(
    consumer: ConsumerEnd,
    frames: u64,
    stop: &AtomicBool,
    want_pixels: bool,
) -> ConsumerReport {
    let mut report = ConsumerReport::default();

    while !stop.load(Ordering::SeqCst) {
        let delivered = match consumer.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(delivered)) => delivered,
            Ok(None) => continue,
            Err(_) => break,
        };

        if delivered.is_new {
            report.frames_new += 1;
            if want_pixels {
                let image = &delivered.image;
                report.last_frame = Some((image.width, image.height, image.data().to_vec()));
            }
        } else {
            report.frames_repeated += 1;
        }

        if frames > 0 && report.frames_new >= frames {
            break;
        }
        if !consumer.recycle(delivered.image) {
            break;
        }
    }

    log::debug!(
        "consumer done: {} new, {} repeated",
        report.frames_new,
        report.frames_repeated
    );
    report
}
