//! `rws` - talk to an rws camera from the command line

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use rws_client_core::{LoggingConfig, StillFormat, StillOptions, ZoomAction, setup_logging};
use tracing::Level;

use commands::SdpRewrite;

#[derive(Parser, Debug)]
#[command(name = "rws", version, about = "Query and configure rws cameras", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Configuration file (default: <config dir>/rws/config.toml)
    #[arg(long, global = true, env = "RWS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Signaling URL, e.g. ws://192.168.0.10/rws/ws
    #[arg(long, global = true, env = "RWS_URL")]
    pub url: Option<String>,

    /// Camera host; the URL is derived from it
    #[arg(long, global = true, env = "RWS_HOST")]
    pub host: Option<String>,

    /// Use wss for public hosts given with --host
    #[arg(long, global = true)]
    pub secure: bool,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Log every signaling frame (needs -vvv)
    #[arg(long, global = true)]
    pub dump_traffic: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// More output per occurrence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the device information
    Info,

    /// Print the media configuration
    MediaConfig {
        /// Include parameters still at their default
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Change media parameters
    SetConfig {
        /// name=value pairs
        #[arg(required = true, value_parser = commands::parse_assignment)]
        values: Vec<(String, String)>,
        /// Apply the configuration after updating it
        #[arg(long)]
        apply: bool,
    },

    /// Capture a still image
    Still {
        #[arg(long, requires = "height")]
        width: Option<u32>,
        #[arg(long, requires = "width")]
        height: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,
        /// jpg, png, bmp or gif
        #[arg(long, value_parser = commands::parse_still_format)]
        format: Option<StillFormat>,
    },

    /// Send a zoom command
    Zoom {
        /// in, out, reset or move
        action: ZoomAction,
        #[arg(long, default_value_t = 0.5)]
        x: f64,
        #[arg(long, default_value_t = 0.5)]
        y: f64,
    },

    /// Rewrite an SDP file offline and print the result
    Sdp(SdpArgs),
}

#[derive(Args, Debug)]
struct SdpArgs {
    /// SDP file, or - for stdin
    file: PathBuf,
    #[arg(long)]
    video_codec: Option<String>,
    #[arg(long)]
    audio_codec: Option<String>,
    #[arg(long)]
    min_kbps: Option<u32>,
    #[arg(long)]
    max_kbps: Option<u32>,
    /// Codec to remove; repeatable
    #[arg(long)]
    drop: Vec<String>,
    /// Media section --drop applies to
    #[arg(long, default_value = "video")]
    drop_media: String,
    /// Match codec names exactly instead of by substring
    #[arg(long)]
    exact: bool,
    /// Treat the input as an answer (bitrate rewrite) instead of an offer
    #[arg(long)]
    answer: bool,
}

impl SdpArgs {
    fn rewrite(self) -> (PathBuf, SdpRewrite) {
        let rewrite = SdpRewrite {
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            min_kbps: self.min_kbps,
            max_kbps: self.max_kbps,
            drop: self.drop,
            drop_media: self.drop_media,
            exact: self.exact,
            answer: self.answer,
        };
        (self.file, rewrite)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig::new(Level::WARN, "rws")
        .with_verbosity(cli.global.verbose)
        .with_json(cli.global.json_logs);
    setup_logging(&logging)?;

    let global = &cli.global;
    match cli.command {
        Command::Sdp(args) => {
            let (file, rewrite) = args.rewrite();
            commands::sdp(&file, &rewrite)
        }
        Command::Info => commands::info(settings::resolve(global)?).await,
        Command::MediaConfig { all, json } => commands::media_config(settings::resolve(global)?, all, json).await,
        Command::SetConfig { values, apply } => {
            commands::set_config(settings::resolve(global)?, &values, apply).await
        }
        Command::Still { width, height, quality, format } => {
            let mut options = StillOptions::default();
            if let (Some(width), Some(height)) = (width, height) {
                options = options.with_size(width, height);
            }
            options.quality = quality;
            options.extension = format;
            commands::still(settings::resolve(global)?, options).await
        }
        Command::Zoom { action, x, y } => commands::zoom(settings::resolve(global)?, action, x, y).await,
    }
}
