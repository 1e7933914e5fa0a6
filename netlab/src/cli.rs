//! Shared command-line surface for all four entry points: logging setup
//! and topology loading (§6, mirroring the teacher's `cli.rs`).

use clap::Parser;
use netlab_core::physical::ChannelProfile;
use netlab_core::topology::Topology;
use std::fs::{create_dir_all, OpenOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, Registry};

#[derive(Parser, Debug)]
pub struct Args {
    /// Log to a timestamped file under ./logs.
    #[arg(short, long)]
    pub log: bool,
    /// Log to stdout.
    #[arg(short, long)]
    pub stdout: bool,
    /// Path to a topology file (RON). Defaults to the bundled loopback
    /// topology.
    #[arg(short, long)]
    pub topology: Option<String>,
    /// Use the windowed UI instead of the console (requires the `gui`
    /// feature).
    #[arg(long)]
    pub gui: bool,
    /// Probability in `[0, 1]` that an outgoing frame is silently dropped
    /// (§4.6, §8 scenario S3). The system is built around a lossy
    /// substrate by default; pass `0.0` for a reliable channel.
    #[arg(long, default_value_t = 0.1)]
    pub loss: f64,
    /// Probability in `[0, 1]` that an outgoing frame has a byte flipped
    /// in transit, surfacing as a CRC mismatch at the link layer.
    #[arg(long, default_value_t = 0.05)]
    pub corruption: f64,
    /// Lower bound of the simulated one-way latency, in milliseconds.
    #[arg(long = "min-latency-ms", default_value_t = 10)]
    pub min_latency_ms: u64,
    /// Upper bound of the simulated one-way latency, in milliseconds.
    #[arg(long = "max-latency-ms", default_value_t = 50)]
    pub max_latency_ms: u64,
}

impl Args {
    pub fn load_topology(&self) -> Result<Topology, crate::error::ChatError> {
        match &self.topology {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(ron::from_str(&text)?)
            }
            None => Ok(Topology::default_loopback()),
        }
    }

    /// Builds the channel profile the physical layer runs with, from the
    /// loss/corruption/latency flags (§4.6).
    pub fn channel_profile(&self) -> ChannelProfile {
        ChannelProfile {
            loss_probability: self.loss,
            corruption_probability: self.corruption,
            min_latency: Duration::from_millis(self.min_latency_ms),
            max_latency: Duration::from_millis(self.max_latency_ms),
        }
    }
}

/// Parses arguments and initializes logging as requested. Call once at
/// the start of `main`.
pub fn initialize() -> Args {
    let args = Args::parse();
    if args.log || args.stdout {
        initialize_logging(args.stdout, args.log);
    }
    args
}

fn initialize_logging(stdout: bool, file: bool) {
    let subscriber: Box<dyn Subscriber + Send + Sync> = match (stdout, file) {
        (true, true) => Box::new(
            Registry::default()
                .with(fmt::Layer::default().json().with_writer(Arc::new(open_log_file())))
                .with(fmt::Layer::default().pretty().without_time().with_file(false).with_writer(std::io::stdout)),
        ),
        (true, false) => Box::new(
            Registry::default().with(fmt::Layer::default().pretty().without_time().with_file(false).with_writer(std::io::stdout)),
        ),
        (false, true) => Box::new(
            Registry::default().with(fmt::Layer::default().json().with_writer(Arc::new(open_log_file()))),
        ),
        _ => Box::new(Registry::default()),
    };
    tracing::subscriber::set_global_default(subscriber).expect("global subscriber set exactly once");
}

fn open_log_file() -> std::fs::File {
    let dir = "./logs";
    create_dir_all(dir).expect("log directory is creatable");
    let path = format!("{dir}/debug-{}.log", chrono::Local::now().format("%y-%m-%d_%H-%M-%S"));
    OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(path)
        .expect("log file is creatable")
}
