//! Wire envelopes
//!
//! Every frame on the socket is one JSON object discriminated by `cmd`:
//!
//! ```text
//! {"cmd":"register","roomid":"123456789","clientid":"12345678"}
//! {"cmd":"request","type":"deviceid","transaction":"a1B2c3D4e5F6"}
//! {"cmd":"response","transaction":"a1B2c3D4e5F6","result":"SUCCESS","data":"{...}"}
//! {"cmd":"send","msg":"{\"type\":\"candidate\",\"label\":0,\"id\":\"0\",\"candidate\":\"...\"}"}
//! {"cmd":"event","type":"recording","status":"started"}
//! {"cmd":"message","type":"zoom","data":"{\"x\":0.5,\"y\":0.5,\"command\":\"in\"}"}
//! ```
//!
//! Relay payloads ([`SignalingMessage`]) travel as a JSON *string* inside the
//! `msg` field of a `send` envelope; the server forwards them to the peer
//! without looking inside.

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{SignalingError, SignalingResult};
use crate::transaction::TransactionId;

/// Length of the generated room id
pub const ROOM_ID_DIGITS: usize = 9;
/// Length of the generated client id
pub const CLIENT_ID_DIGITS: usize = 8;

/// Top-level frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Envelope {
    Register { roomid: String, clientid: String },
    Request(RequestMessage),
    Response(ResponseMessage),
    Send { msg: String },
    Event(ServerEvent),
    Message {
        #[serde(rename = "type")]
        kind: String,
        data: String,
    },
}

impl Envelope {
    /// Registration envelope with freshly generated numeric ids
    pub fn register() -> Self {
        Envelope::Register {
            roomid: random_digits(ROOM_ID_DIGITS),
            clientid: random_digits(CLIENT_ID_DIGITS),
        }
    }

    /// Wrap a relay payload into a `send` envelope
    pub fn relay<T: Serialize + ?Sized>(payload: &T) -> SignalingResult<Self> {
        Ok(Envelope::Send { msg: serde_json::to_string(payload)? })
    }

    pub fn to_json(&self) -> SignalingResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an inbound frame; failures are protocol errors
    pub fn from_json(text: &str) -> SignalingResult<Self> {
        serde_json::from_str(text).map_err(|e| SignalingError::protocol(format!("{e}: {text}")))
    }
}

/// Random numeric string of `len` digits
pub fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

/// Correlated request kinds understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Info,
    #[serde(rename = "deviceid")]
    DeviceId,
    Config,
    #[serde(rename = "rtcconfig")]
    RtcConfig,
    #[serde(rename = "mediaconfig")]
    MediaConfig,
    Still,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Info => "info",
            RequestType::DeviceId => "deviceid",
            RequestType::Config => "config",
            RequestType::RtcConfig => "rtcconfig",
            RequestType::MediaConfig => "mediaconfig",
            RequestType::Still => "still",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `cmd: "request"` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "type")]
    pub kind: RequestType,
    /// Filled in by the channel when the request is sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviceid: Option<String>,
}

impl RequestMessage {
    pub fn new(kind: RequestType) -> Self {
        Self { kind, transaction: None, data: None, deviceid: None }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Carry a JSON-encoded value as `data`
    pub fn with_json_data<T: Serialize>(mut self, data: &T) -> SignalingResult<Self> {
        self.data = Some(serde_json::to_string(data)?);
        Ok(self)
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.deviceid = Some(device_id.into());
        self
    }
}

/// Outcome code of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseResult {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(other)]
    Unknown,
}

/// `cmd: "response"` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionId>,
    pub result: ResponseResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseMessage {
    pub fn success(transaction: Option<TransactionId>, data: Option<String>) -> Self {
        Self { transaction, result: ResponseResult::Success, data, error: None }
    }

    pub fn failed(transaction: Option<TransactionId>, error: impl Into<String>) -> Self {
        Self { transaction, result: ResponseResult::Failed, data: None, error: Some(error.into()) }
    }

    /// Parse the JSON carried in `data`
    pub fn data_as<T: DeserializeOwned>(&self) -> SignalingResult<T> {
        let data = self
            .data
            .as_deref()
            .ok_or_else(|| SignalingError::protocol("response carries no data"))?;
        serde_json::from_str(data).map_err(|e| SignalingError::protocol(format!("bad response data: {e}")))
    }

    /// Turn a response into the value a waiter should see
    pub fn into_result(self) -> SignalingResult<ResponseMessage> {
        match self.result {
            ResponseResult::Success => Ok(self),
            ResponseResult::Failed => Err(SignalingError::request_failed(
                self.error.unwrap_or_else(|| "no error description".to_string()),
            )),
            ResponseResult::Unknown => {
                Err(SignalingError::protocol("Internal error, unknown data result code"))
            }
        }
    }
}

/// `cmd: "event"` body; everything besides `type` is kept as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Peer-to-peer signaling payload carried inside `send`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        /// m-line index
        #[serde(default)]
        label: Option<u16>,
        /// media stream id
        #[serde(default)]
        id: Option<String>,
        candidate: String,
    },
    Bye,
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Bye => "bye",
        }
    }
}
