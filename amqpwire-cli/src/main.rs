//! amqpwire-cli - Command-line probe for AMQP 0-10 peers
//!
//! Performs the version handshake against a peer and optionally sends one frame.

mod commands;

use amqpwire_client::{Abort, Framer, FramerConfig};
use amqpwire_protocol::{Frame, FrameFlags};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "amqpwire-cli")]
#[command(about = "Handshake with an AMQP 0-10 peer and send raw frames")]
#[command(version)]
struct Cli {
    /// Peer address
    #[arg(short, long, default_value = "127.0.0.1:5672", env = "AMQPWIRE_ADDR")]
    addr: SocketAddr,

    /// YAML file with framer settings
    #[arg(short, long, env = "AMQPWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Socket read timeout in milliseconds (0 blocks forever)
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Socket write timeout in milliseconds (0 blocks forever)
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Give up on the peer after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange version headers and report what the peer announced
    Probe {
        /// Major protocol version to announce
        #[arg(long, default_value = "0")]
        major: u8,

        /// Minor protocol version to announce
        #[arg(long, default_value = "10")]
        minor: u8,
    },

    /// Exchange version headers, then send one frame
    Send {
        /// Major protocol version to announce
        #[arg(long, default_value = "0")]
        major: u8,

        /// Minor protocol version to announce
        #[arg(long, default_value = "10")]
        minor: u8,

        /// Channel number
        #[arg(long, default_value = "0")]
        channel: u16,

        /// Track (only the low 4 bits reach the wire)
        #[arg(long, default_value = "0")]
        track: u8,

        /// Frame type code (0 control, 1 command, 2 header, 3 body)
        #[arg(long = "type")]
        frame_type: u8,

        /// Frame flags, decimal or 0x-prefixed hex
        #[arg(long, default_value = "0x0f", value_parser = commands::parse_flags)]
        flags: u8,

        /// Treat the payload as hex
        #[arg(long)]
        hex: bool,

        /// Frame payload
        payload: String,
    },
}

impl Cli {
    fn framer_config(&self) -> Result<FramerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => FramerConfig::from_file(path)?,
            None => FramerConfig::default(),
        };
        config.apply_env_overrides();

        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout_ms = Some(ms);
        }
        if let Some(ms) = self.write_timeout_ms {
            config.write_timeout_ms = Some(ms);
        }
        if let Some(secs) = self.deadline_secs {
            config.deadline_secs = Some(secs);
        }
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.framer_config()?;

    let framer = Framer::connect(cli.addr, &config).map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    let deadline = config.deadline();
    let mut framer = framer.abort_with(move || deadline.is_some_and(|d| d.aborted()));
    tracing::debug!("Connected to {}", cli.addr);

    match cli.command {
        Commands::Probe { major, minor } => {
            let report = commands::probe(&mut framer, major, minor)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report.to_json())?);
            } else {
                println!("{}", report.render());
            }
        }
        Commands::Send {
            major,
            minor,
            channel,
            track,
            frame_type,
            flags,
            hex,
            payload,
        } => {
            let payload = commands::parse_payload(&payload, hex)?;
            let flags = FrameFlags::from_bits(flags);
            let frame = Frame::new(flags, frame_type, track, channel, payload)?;
            let report = commands::send(&mut framer, major, minor, &frame)?;
            if cli.json {
                let summary = serde_json::json!({
                    "peer": report.to_json(),
                    "frame": commands::frame_json(&frame),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", report.render());
                println!("{}", commands::render_frame(&frame));
            }
        }
    }

    Ok(())
}
