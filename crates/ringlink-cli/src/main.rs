//! ringlink command line.
//!
//! # Usage
//!
//! ```bash
//! # Classify a scanned code
//! ringlink classify 'ringlink://get-follows?callback=myapp://follows' --source scan
//!
//! # Run a complete handoff in memory and print session counters
//! ringlink handoff-demo --messages 5 --seed 7
//! ```

#![allow(clippy::print_stdout, reason = "JSON results go to stdout")]

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use ringlink_app::{HandoffConfig, InputSource, PollConfig, classify};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod demo;

/// ringlink identity holder tools
#[derive(Parser, Debug)]
#[command(name = "ringlink")]
#[command(about = "Classify ringlink input and exercise the secure key handoff")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify raw input and print the result as JSON
    Classify {
        /// Raw link, code or pasted text
        input: String,

        /// Where the input came from
        #[arg(long, value_enum, default_value_t = Source::Deeplink)]
        source: Source,
    },

    /// Run a handoff end to end against in-memory services
    HandoffDemo {
        /// Consumer device id
        #[arg(long, default_value = "demo-device")]
        device_id: String,

        /// Messages to send over the resulting Noise session
        #[arg(long, default_value_t = 3)]
        messages: u32,

        /// Seed for the simulated environment
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Skip the epoch 1 keypair
        #[arg(long)]
        epoch0_only: bool,

        /// Namespace handoff envelopes are written under
        #[arg(long, default_value = "pub/ringlink.app")]
        namespace: String,

        /// Envelope lifetime in seconds
        #[arg(long, default_value_t = 300)]
        expiry_secs: u64,

        /// Per-call network timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Rendezvous poll interval in milliseconds
        #[arg(long, default_value_t = 2_000)]
        poll_interval_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Source {
    Deeplink,
    Scan,
    Clipboard,
}

impl From<Source> for InputSource {
    fn from(source: Source) -> Self {
        match source {
            Source::Deeplink => Self::Deeplink,
            Source::Scan => Self::Scan,
            Source::Clipboard => Self::Clipboard,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    match args.command {
        Command::Classify { input, source } => {
            let request = classify(&input, source.into());
            let kind = request.kind();
            let output = json!({
                "request": request,
                "requires_identity": kind.requires_identity(),
                "requires_network": kind.requires_network(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        },
        Command::HandoffDemo {
            device_id,
            messages,
            seed,
            epoch0_only,
            namespace,
            expiry_secs,
            timeout_secs,
            poll_interval_ms,
        } => {
            let config = HandoffConfig {
                namespace,
                expiry: Duration::from_secs(expiry_secs),
                network_timeout: Duration::from_secs(timeout_secs),
                ..HandoffConfig::default()
            };
            let poll = PollConfig { interval: Duration::from_millis(poll_interval_ms), ..PollConfig::default() };

            tracing::info!(seed, %device_id, "running handoff demo");
            let report = demo::run(demo::DemoOptions {
                seed,
                device_id,
                include_epoch1: !epoch0_only,
                messages,
                config,
                poll,
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
    }

    Ok(())
}
