//! Typed camera media configuration
//!
//! The device exposes its camera and audio settings as a flat JSON object of
//! named values. [`MediaConfig`] keeps one [`ConfigParam`] per name with its
//! kind, default and current value, validates updates, and produces the
//! object sent back to the device.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// A parameter value as the device encodes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ConfigValue::Bool(*b)),
            Value::Number(n) => n.as_i64().map(ConfigValue::Integer),
            Value::String(s) => Some(ConfigValue::Text(s.clone())),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Integer(i) => Value::from(*i),
            ConfigValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Integer(i) => write!(f, "{i}"),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Integer(i64::from(value))
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

/// What values a parameter accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ParamKind {
    IntegerRange { min: i64, max: i64 },
    IntegerItem { valid: Vec<i64> },
    Boolean,
    Text { min_len: usize, max_len: usize },
    TextItem { valid: Vec<String> },
    /// `"WxH"`
    VideoResolution,
    /// Comma-separated `"WxH"` list; entries restricted to `valid` when non-empty
    VideoResolutionList { valid: Vec<String> },
    /// Reported by the device but unknown to this client; accepted as-is
    Untyped,
}

impl ParamKind {
    fn check(&self, value: &ConfigValue) -> Result<(), String> {
        match (self, value) {
            (ParamKind::IntegerRange { min, max }, ConfigValue::Integer(v)) => {
                if v < min || v > max {
                    return Err(format!("{v} is outside {min}..{max}"));
                }
            }
            (ParamKind::IntegerItem { valid }, ConfigValue::Integer(v)) => {
                if !valid.contains(v) {
                    return Err(format!("{v} is not one of {valid:?}"));
                }
            }
            (ParamKind::Boolean, ConfigValue::Bool(_)) => {}
            (ParamKind::Text { min_len, max_len }, ConfigValue::Text(s)) => {
                let len = s.chars().count();
                if len < *min_len || len > *max_len {
                    return Err(format!("length {len} is outside {min_len}..{max_len}"));
                }
            }
            (ParamKind::TextItem { valid }, ConfigValue::Text(s)) => {
                if !valid.iter().any(|item| item == s) {
                    return Err(format!("{s} is not one of {valid:?}"));
                }
            }
            (ParamKind::VideoResolution, ConfigValue::Text(s)) => {
                if !is_resolution(s) {
                    return Err(format!("{s} is not a WxH resolution"));
                }
            }
            (ParamKind::VideoResolutionList { valid }, ConfigValue::Text(s)) => {
                for entry in s.split(',').map(str::trim) {
                    if !is_resolution(entry) {
                        return Err(format!("{entry} is not a WxH resolution"));
                    }
                    if !valid.is_empty() && !valid.iter().any(|item| item == entry) {
                        return Err(format!("{entry} is not one of {valid:?}"));
                    }
                }
            }
            (ParamKind::Untyped, _) => {}
            (kind, value) => return Err(format!("{value} does not fit {}", kind.name())),
        }
        Ok(())
    }

    /// Parse user text into a value of this kind
    fn parse(&self, text: &str) -> Result<ConfigValue, String> {
        match self {
            ParamKind::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(ConfigValue::Bool(true)),
                "false" => Ok(ConfigValue::Bool(false)),
                _ => Err(format!("{text} is not true or false")),
            },
            ParamKind::IntegerRange { .. } | ParamKind::IntegerItem { .. } => text
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Integer)
                .map_err(|_| format!("{text} is not an integer")),
            _ => Ok(ConfigValue::Text(text.to_string())),
        }
    }

    /// Convert a device-reported JSON value, tolerating stringly numbers and booleans
    fn coerce(&self, value: &Value) -> Option<ConfigValue> {
        match (self, value) {
            (_, Value::String(s)) if !matches!(self, ParamKind::Untyped) => self.parse(s).ok(),
            _ => ConfigValue::from_json(value),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::IntegerRange { .. } => "integer range",
            ParamKind::IntegerItem { .. } => "integer item",
            ParamKind::Boolean => "boolean",
            ParamKind::Text { .. } => "text",
            ParamKind::TextItem { .. } => "text item",
            ParamKind::VideoResolution => "video resolution",
            ParamKind::VideoResolutionList { .. } => "video resolution list",
            ParamKind::Untyped => "untyped",
        }
    }
}

fn is_resolution(text: &str) -> bool {
    match text.split_once('x') {
        Some((w, h)) => w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok(),
        None => false,
    }
}

/// One named parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigParam {
    pub kind: ParamKind,
    pub default_value: ConfigValue,
    pub current_value: ConfigValue,
}

impl ConfigParam {
    pub fn new(kind: ParamKind, default_value: impl Into<ConfigValue>) -> Self {
        let default_value = default_value.into();
        Self { kind, current_value: default_value.clone(), default_value }
    }

    pub fn is_default(&self) -> bool {
        self.current_value == self.default_value
    }
}

/// Camera and audio settings snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    params: BTreeMap<String, ConfigParam>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let mut config = Self::empty();
        for (name, param) in default_params() {
            config.params.insert(name.to_string(), param);
        }
        config
    }
}

impl MediaConfig {
    /// A configuration with no parameters
    pub fn empty() -> Self {
        Self { params: BTreeMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, param: ConfigParam) {
        self.params.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.params.get(name).map(|p| &p.current_value)
    }

    pub fn param(&self, name: &str) -> Option<&ConfigParam> {
        self.params.get(name)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &ConfigParam)> {
        self.params.iter().map(|(name, param)| (name.as_str(), param))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Set a known parameter after checking it against its kind
    pub fn set(&mut self, name: &str, value: impl Into<ConfigValue>) -> ClientResult<()> {
        let value = value.into();
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| ClientError::invalid_configuration(name, "unknown parameter"))?;
        param.kind.check(&value).map_err(|reason| ClientError::invalid_configuration(name, reason))?;
        param.current_value = value;
        Ok(())
    }

    /// Set from user text, converted by the parameter's kind
    pub fn set_from_str(&mut self, name: &str, text: &str) -> ClientResult<()> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| ClientError::invalid_configuration(name, "unknown parameter"))?;
        let value = param.kind.parse(text).map_err(|reason| ClientError::invalid_configuration(name, reason))?;
        self.set(name, value)
    }

    /// Restore one parameter to its default and return it
    pub fn reset(&mut self, name: &str) -> ClientResult<&ConfigValue> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| ClientError::invalid_configuration(name, "unknown parameter"))?;
        param.current_value = param.default_value.clone();
        Ok(&param.current_value)
    }

    pub fn reset_all(&mut self) {
        for param in self.params.values_mut() {
            param.current_value = param.default_value.clone();
        }
    }

    /// Apply values reported by the device
    ///
    /// Unknown names become untyped parameters. Values that do not fit a
    /// known parameter are skipped with a warning. Returns the number of
    /// values applied.
    pub fn merge_json(&mut self, values: &Value) -> ClientResult<usize> {
        let object = values
            .as_object()
            .ok_or_else(|| ClientError::protocol_error("media configuration is not a JSON object"))?;

        let mut applied = 0;
        for (name, raw) in object {
            match self.params.get_mut(name) {
                Some(param) => {
                    let checked = param
                        .kind
                        .coerce(raw)
                        .ok_or_else(|| format!("{raw} does not fit {}", param.kind.name()))
                        .and_then(|value| param.kind.check(&value).map(|_| value));
                    match checked {
                        Ok(value) => {
                            param.current_value = value;
                            applied += 1;
                        }
                        Err(reason) => warn!(param = %name, reason = %reason, "Ignoring device config value"),
                    }
                }
                None => match ConfigValue::from_json(raw) {
                    Some(value) => {
                        debug!(param = %name, value = %value, "Keeping unknown device config parameter");
                        self.params.insert(name.clone(), ConfigParam::new(ParamKind::Untyped, value));
                        applied += 1;
                    }
                    None => warn!(param = %name, "Ignoring non-scalar device config value"),
                },
            }
        }
        Ok(applied)
    }

    /// The object sent to the device; only changed values unless `include_all`
    pub fn to_json(&self, include_all: bool) -> Value {
        let object: Map<String, Value> = self
            .params
            .iter()
            .filter(|(_, param)| include_all || !param.is_default())
            .map(|(name, param)| (name.clone(), param.current_value.to_json()))
            .collect();
        Value::Object(object)
    }
}

fn text_items(items: &[&str]) -> ParamKind {
    ParamKind::TextItem { valid: items.iter().map(|s| s.to_string()).collect() }
}

fn default_params() -> Vec<(&'static str, ConfigParam)> {
    let boolean = |default: bool| ConfigParam::new(ParamKind::Boolean, default);
    let range = |min: i64, max: i64, default: i64| ConfigParam::new(ParamKind::IntegerRange { min, max }, default);

    vec![
        ("video_rotation", ConfigParam::new(ParamKind::IntegerItem { valid: vec![0, 90, 180, 270] }, 0)),
        ("video_hflip", boolean(false)),
        ("video_vflip", boolean(false)),
        ("video_enable_annotate_text", boolean(false)),
        ("audio_processing_enable", boolean(false)),
        ("audio_echo_cancel", boolean(true)),
        ("audio_gain_control", boolean(true)),
        ("audio_highpass_filter", boolean(true)),
        ("audio_level_control", boolean(true)),
        ("audio_noise_suppression", boolean(true)),
        ("video_sharpness", range(-100, 100, 0)),
        ("video_contrast", range(-100, 100, 0)),
        ("video_saturation", range(-100, 100, 0)),
        ("video_brightness", range(0, 100, 50)),
        ("video_ev", range(-10, 10, 0)),
        (
            "video_exposure_mode",
            ConfigParam::new(
                text_items(&[
                    "off", "auto", "night", "nightpreview", "backlight", "spotlight", "sports", "snow", "beach",
                    "verylong", "fixedfps", "antishake", "fireworks",
                ]),
                "auto",
            ),
        ),
        ("video_flicker_mode", ConfigParam::new(text_items(&["off", "auto", "50hz", "60hz"]), "auto")),
        (
            "video_awb_mode",
            ConfigParam::new(
                text_items(&[
                    "off", "auto", "sun", "cloud", "shade", "tungsten", "fluorescent", "incandescent", "flash",
                    "horizon",
                ]),
                "auto",
            ),
        ),
        ("video_drc_mode", ConfigParam::new(text_items(&["off", "low", "med", "high"]), "high")),
        ("video_annotate_text_size_ratio", range(2, 10, 3)),
        ("video_annotate_text", ConfigParam::new(ParamKind::Text { min_len: 10, max_len: 128 }, "%Y-%m-%d.%X")),
    ]
}
