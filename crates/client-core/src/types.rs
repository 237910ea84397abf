//! Device-facing data types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Answer to a `deviceid` request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub deviceid: String,
    pub mcversion: String,
    pub stillcapture: bool,
    pub cameraenabled: bool,
}

/// Image encoding for still captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StillFormat {
    Jpg,
    Png,
    Bmp,
    Gif,
}

/// Options for a still capture; unset fields use the device defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<StillFormat>,
}

impl StillOptions {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_extension(mut self, extension: StillFormat) -> Self {
        self.extension = Some(extension);
        self
    }
}

/// A captured still image on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillImage {
    pub filename: String,
    pub url: String,
}

/// Zoom gesture kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomAction {
    In,
    Out,
    Reset,
    Move,
}

impl ZoomAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoomAction::In => "in",
            ZoomAction::Out => "out",
            ZoomAction::Reset => "reset",
            ZoomAction::Move => "move",
        }
    }
}

impl fmt::Display for ZoomAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ZoomAction {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(ZoomAction::In),
            "out" => Ok(ZoomAction::Out),
            "reset" => Ok(ZoomAction::Reset),
            "move" => Ok(ZoomAction::Move),
            other => Err(ClientError::invalid_argument("command", format!("unknown zoom command {other}"))),
        }
    }
}

/// Camera zoom message
///
/// `x`/`y` are relative to the frame: a zoom center for `in`/`out`, a drag
/// delta for `move`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomCommand {
    pub x: f64,
    pub y: f64,
    pub command: ZoomAction,
}

impl ZoomCommand {
    pub fn new(x: f64, y: f64, command: ZoomAction) -> Self {
        Self { x, y, command }
    }

    pub fn reset() -> Self {
        Self::new(0.0, 0.0, ZoomAction::Reset)
    }

    pub fn validate(&self) -> ClientResult<()> {
        for (field, value) in [("x", self.x), ("y", self.y)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ClientError::invalid_argument(field, format!("{value} is outside [0, 1]")));
            }
        }
        Ok(())
    }
}
