//! Observable controller state and events
//!
//! The controller publishes its [`SessionState`] through a `watch` channel
//! and everything else as [`ClientEvent`]s on a broadcast channel. A UI
//! subscribes to both and never touches the controller's internals.
//!
//! ```text
//!  Disconnected ──connect──► Registering ──register sent──► Configuring
//!       ▲                                                        │
//!       │                                               config fetched
//!       │                                                        ▼
//!       └──── disconnect / channel lost ────── Active ◄──create── Ready
//!                                                 └───destroy────►┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rws_signaling_core::ServerEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::rtc::PeerConnectionState;
use crate::types::StillImage;

/// Default capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Registering,
    Configuring,
    Ready,
    Active,
}

impl SessionState {
    /// The signaling channel is open in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Configuring | SessionState::Ready | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Registering => "registering",
            SessionState::Configuring => "configuring",
            SessionState::Ready => "ready",
            SessionState::Active => "active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Critical,
}

/// Event priority for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Everything the controller reports besides its state value
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged {
        previous: SessionState,
        current: SessionState,
        timestamp: DateTime<Utc>,
    },
    /// Unsolicited `event` from the device
    ServerEvent {
        event: ServerEvent,
        timestamp: DateTime<Utc>,
    },
    TrackAdded {
        stream_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    PeerConnectionStateChanged {
        state: PeerConnectionState,
        timestamp: DateTime<Utc>,
    },
    StillImage {
        image: StillImage,
        timestamp: DateTime<Utc>,
    },
    Reconnecting {
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// Transient user-facing message
    Notification {
        severity: NotificationSeverity,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    pub fn state_changed(previous: SessionState, current: SessionState) -> Self {
        ClientEvent::StateChanged { previous, current, timestamp: Utc::now() }
    }

    pub fn notification(severity: NotificationSeverity, message: impl Into<String>) -> Self {
        ClientEvent::Notification { severity, message: message.into(), timestamp: Utc::now() }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ClientEvent::StateChanged { timestamp, .. }
            | ClientEvent::ServerEvent { timestamp, .. }
            | ClientEvent::TrackAdded { timestamp, .. }
            | ClientEvent::PeerConnectionStateChanged { timestamp, .. }
            | ClientEvent::StillImage { timestamp, .. }
            | ClientEvent::Reconnecting { timestamp, .. }
            | ClientEvent::Notification { timestamp, .. } => *timestamp,
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::Notification { severity: NotificationSeverity::Critical, .. } => EventPriority::Critical,
            ClientEvent::StateChanged { .. }
            | ClientEvent::Reconnecting { .. }
            | ClientEvent::Notification { severity: NotificationSeverity::Warning, .. } => EventPriority::High,
            ClientEvent::PeerConnectionStateChanged { state: PeerConnectionState::Failed, .. } => EventPriority::High,
            ClientEvent::StillImage { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

/// Fan-out of [`ClientEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Deliver to current subscribers; dropped silently when there are none
    pub fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
