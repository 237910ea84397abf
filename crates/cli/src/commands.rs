//! Subcommand implementations

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use rws_client_core::{
    ClientConfig, ClientEvent, ConfigParam, MediaConfig, NotificationSeverity, SessionController, StillFormat,
    StillOptions, ZoomAction, ZoomCommand,
};
use rws_sdp_core::{CodecPreferencePolicy, MatchMode, drop_codec_with};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{debug, info};

/// Connected controller that prints notifications while it lives
pub struct Device {
    controller: SessionController,
}

impl Device {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let url = config.signaling_url.clone();
        let controller = SessionController::builder().config(config).build()?;

        let mut events = controller.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let ClientEvent::Notification { severity, message, .. } = event {
                    let line = match severity {
                        NotificationSeverity::Critical => message.red().bold(),
                        NotificationSeverity::Warning => message.yellow(),
                        NotificationSeverity::Info => message.normal(),
                    };
                    eprintln!("{line}");
                }
            }
        });

        controller
            .connect()
            .await
            .with_context(|| format!("cannot connect to {url}"))?;
        info!(%url, "Connected");
        Ok(Self { controller })
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.controller.disconnect();
    }
}

pub async fn info(config: ClientConfig) -> Result<()> {
    let device = Device::connect(config).await?;
    let info = device
        .controller()
        .snapshot()
        .device_info
        .context("device sent no info")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[derive(Tabled)]
struct ParamRow {
    name: String,
    kind: &'static str,
    value: String,
    default: String,
}

impl ParamRow {
    fn new(name: &str, param: &ConfigParam) -> Self {
        let marker = if param.is_default() { "" } else { " *" };
        Self {
            name: name.to_string(),
            kind: param.kind.name(),
            value: format!("{}{marker}", param.current_value),
            default: param.default_value.to_string(),
        }
    }
}

fn media_table(config: &MediaConfig, all: bool) -> String {
    let rows: Vec<ParamRow> = config
        .params()
        .filter(|(_, param)| all || !param.is_default())
        .map(|(name, param)| ParamRow::new(name, param))
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub async fn media_config(config: ClientConfig, all: bool, json: bool) -> Result<()> {
    let device = Device::connect(config).await?;
    let media = device.controller().snapshot().media_config;
    if json {
        println!("{}", serde_json::to_string_pretty(&media.to_json(all))?);
    } else {
        println!("{}", media_table(&media, all));
    }
    Ok(())
}

/// Split `name=value`
pub fn parse_assignment(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{text}'")),
    }
}

pub async fn set_config(config: ClientConfig, values: &[(String, String)], apply: bool) -> Result<()> {
    let device = Device::connect(config).await?;
    let controller = device.controller();

    let mut media = controller.snapshot().media_config;
    for (name, value) in values {
        media.set_from_str(name, value)?;
        debug!(param = %name, %value, "Parameter set");
    }
    controller.update_media_config(&media).await.context("update rejected")?;
    if apply {
        controller.apply_media_config().await.context("apply rejected")?;
    }
    println!("{} parameter(s) updated{}", values.len(), if apply { " and applied" } else { "" });
    Ok(())
}

pub fn parse_still_format(text: &str) -> Result<StillFormat, String> {
    match text.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Ok(StillFormat::Jpg),
        "png" => Ok(StillFormat::Png),
        "bmp" => Ok(StillFormat::Bmp),
        "gif" => Ok(StillFormat::Gif),
        other => Err(format!("unknown image format '{other}'")),
    }
}

pub async fn still(config: ClientConfig, options: StillOptions) -> Result<()> {
    let device = Device::connect(config).await?;
    let image = device.controller().still_image(options).await.context("still capture failed")?;
    println!("{}\t{}", image.filename, image.url);
    Ok(())
}

pub async fn zoom(config: ClientConfig, action: ZoomAction, x: f64, y: f64) -> Result<()> {
    let command = ZoomCommand::new(x, y, action);
    command.validate()?;
    let device = Device::connect(config).await?;
    device.controller().send_zoom(command)?;
    Ok(())
}

/// Options for the offline rewrite
#[derive(Debug, Default)]
pub struct SdpRewrite {
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub min_kbps: Option<u32>,
    pub max_kbps: Option<u32>,
    pub drop: Vec<String>,
    pub drop_media: String,
    pub exact: bool,
    pub answer: bool,
}

impl SdpRewrite {
    fn policy(&self) -> CodecPreferencePolicy {
        let mode = if self.exact { MatchMode::Exact } else { MatchMode::Substring };
        let mut policy = CodecPreferencePolicy::default()
            .with_video_codec(self.video_codec.clone().unwrap_or_default())
            .with_audio_codec(self.audio_codec.clone().unwrap_or_default())
            .with_match_mode(mode);
        if let (Some(min), Some(max)) = (self.min_kbps, self.max_kbps) {
            policy = policy.with_bitrate(min, max);
        }
        policy
    }

    pub fn apply(&self, sdp: &str) -> String {
        let policy = self.policy();
        let mut sdp = if self.answer { policy.rewrite_answer(sdp) } else { policy.rewrite_offer(sdp) };
        for codec in &self.drop {
            sdp = drop_codec_with(&sdp, &self.drop_media, codec, policy.match_mode);
        }
        sdp
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn sdp(path: &Path, rewrite: &SdpRewrite) -> Result<()> {
    if rewrite.min_kbps.is_some() != rewrite.max_kbps.is_some() {
        bail!("--min-kbps and --max-kbps must be given together");
    }
    let input = read_input(path)?;
    print!("{}", rewrite.apply(&input));
    Ok(())
}
