use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "camfeed")]
#[command(about = "📷 Live JPEG camera feed over WebSocket", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture frames and push them to the relay
    Camera {
        /// Relay server URL (ws:// or wss://)
        #[arg(short, long, env = "CAMFEED_SERVER")]
        server: Option<String>,

        /// JSON settings file
        #[arg(long, env = "CAMFEED_CONFIG")]
        config: Option<PathBuf>,

        /// Frame source: synthetic, screen or dir:<path>
        #[arg(long)]
        source: Option<String>,

        /// Minimum milliseconds between frames
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Seconds between reconnect attempts
        #[arg(long)]
        reconnect_s: Option<f64>,

        /// Frame width (max width for screen capture)
        #[arg(long)]
        width: Option<u32>,

        /// Frame height (synthetic source)
        #[arg(long)]
        height: Option<u32>,

        /// JPEG quality 1-100
        #[arg(short, long)]
        quality: Option<u8>,

        /// Capture buffers in the pool
        #[arg(long)]
        buffers: Option<usize>,
    },

    /// Watch the feed
    Viewer {
        /// Relay server URL (ws:// or wss://)
        #[arg(short, long, env = "CAMFEED_SERVER")]
        server: Option<String>,

        /// JSON settings file
        #[arg(long, env = "CAMFEED_CONFIG")]
        config: Option<PathBuf>,

        /// Seconds between reconnect attempts
        #[arg(long)]
        reconnect_s: Option<f64>,

        /// Wait for 'c' instead of connecting on start
        #[arg(long)]
        no_auto_connect: bool,

        /// Run without the terminal UI
        #[arg(long)]
        headless: bool,

        /// Headless only: keep the latest frame in this JPEG file
        #[arg(long, requires = "headless")]
        snapshot: Option<PathBuf>,

        /// Force graphics protocol (sixel, kitty, iterm2, halfblocks)
        #[arg(short, long)]
        graphics: Option<String>,

        /// Write logs here (the terminal UI owns the screen)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Run a relay server
    Relay {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
