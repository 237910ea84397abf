//! Signaling channel
//!
//! One [`SignalingChannel`] owns one transport connection and multiplexes
//! three kinds of traffic over it:
//!
//! - **registration**: `register`, fire-and-forget
//! - **correlated requests**: `request`, one outstanding at a time, settled
//!   through the [`TransactionRegistry`]
//! - **relay**: `send` with `wrap = true`, peer-to-peer signaling carried
//!   inside a `{cmd:"send"}` envelope
//!
//! Inbound frames are dispatched in arrival order by a single task:
//! responses go to the registry, relayed `send` payloads and server `event`s
//! are forwarded as [`ChannelEvent`]s, anything else is logged and dropped.
//!
//! ```text
//!  Idle ──connect──► Connecting ──open──► Open ──close / error──► Closed
//!                         └──────── connect failed ─────────────────┘
//! ```
//!
//! `Closed` is terminal; reconnecting means building a new channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{SignalingError, SignalingResult};
use crate::message::{Envelope, RequestMessage, ResponseMessage, ServerEvent, SignalingMessage};
use crate::transaction::{DEFAULT_REQUEST_TIMEOUT, TransactionId, TransactionRegistry};
use crate::transport::{Transport, TransportEvent};

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Inbound traffic that is not a response
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Relay payload from the peer
    Signaling(SignalingMessage),
    /// Unsolicited server event
    ServerEvent(ServerEvent),
    /// The connection was lost; not sent after a local [`SignalingChannel::close`]
    Closed { code: Option<u16>, reason: String },
}

/// Channel settings
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Window used by `request` when the caller gives none
    pub request_timeout: Duration,
    /// Log every frame at trace level
    pub dump_traffic: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT, dump_traffic: false }
    }
}

impl ChannelConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_dump_traffic(mut self, dump_traffic: bool) -> Self {
        self.dump_traffic = dump_traffic;
        self
    }
}

struct ChannelInner {
    state: Mutex<ChannelState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    registry: TransactionRegistry,
    in_flight: Mutex<Option<TransactionId>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dump_traffic: bool,
}

impl ChannelInner {
    fn ensure_open(&self) -> SignalingResult<()> {
        match *self.state.lock() {
            ChannelState::Open => Ok(()),
            _ => Err(SignalingError::NotConnected),
        }
    }

    fn send_frame(&self, frame: String) -> SignalingResult<()> {
        self.ensure_open()?;
        if self.dump_traffic {
            trace!(direction = "out", frame = %frame, "signaling frame");
        }
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(SignalingError::NotConnected)?;
        sender.send(frame)?;
        Ok(())
    }

    /// Move to `Closed` and fail everything pending; `false` if already closed
    fn shutdown(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ChannelState::Closed {
                return false;
            }
            *state = ChannelState::Closed;
        }
        self.outbound.lock().take();
        self.in_flight.lock().take();
        let rejected = self.registry.reject_all(SignalingError::ConnectionClosed);
        debug!(rejected, "Signaling channel closed");
        true
    }

    fn dispatch(&self, text: &str, events: &mpsc::UnboundedSender<ChannelEvent>) {
        if self.dump_traffic {
            trace!(direction = "in", frame = %text, "signaling frame");
        }

        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable envelope");
                return;
            }
        };

        match envelope {
            Envelope::Response(response) => self.route_response(response),
            Envelope::Send { msg } => match serde_json::from_str::<SignalingMessage>(&msg) {
                Ok(message) => {
                    debug!(kind = message.kind(), "Relay message received");
                    let _ = events.send(ChannelEvent::Signaling(message));
                }
                Err(e) => warn!(error = %e, "Dropping malformed relay payload"),
            },
            Envelope::Event(event) => {
                debug!(kind = %event.kind, "Server event received");
                let _ = events.send(ChannelEvent::ServerEvent(event));
            }
            other => warn!(envelope = ?other, "Dropping unexpected envelope"),
        }
    }

    fn route_response(&self, response: ResponseMessage) {
        let id = match response.transaction.clone() {
            Some(id) => id,
            None => match self.in_flight.lock().clone() {
                Some(id) => {
                    debug!(transaction = %id, "Routing uncorrelated response to in-flight request");
                    id
                }
                None => {
                    warn!("Dropping response with no transaction and nothing in flight");
                    return;
                }
            },
        };

        let delivered = match response.into_result() {
            Ok(response) => self.registry.resolve(&id, response),
            Err(e) => self.registry.reject(&id, e),
        };
        if !delivered {
            warn!(transaction = %id, "Dropping response for unknown or settled transaction");
        }
    }
}

/// Clears the in-flight slot and abandons the transaction when a request ends
struct InFlightGuard<'a> {
    inner: &'a ChannelInner,
    id: TransactionId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        // no-op unless the request future was dropped before settling
        self.inner.registry.reject(&self.id, SignalingError::ConnectionClosed);
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref() == Some(&self.id) {
            *slot = None;
        }
    }
}

/// Transactional signaling channel over one transport connection
pub struct SignalingChannel {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("state", &self.state())
            .field("request_timeout", &self.request_timeout)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl SignalingChannel {
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Self {
        Self {
            transport,
            request_timeout: config.request_timeout,
            inner: Arc::new(ChannelInner {
                state: Mutex::new(ChannelState::Idle),
                outbound: Mutex::new(None),
                registry: TransactionRegistry::new(),
                in_flight: Mutex::new(None),
                dispatcher: Mutex::new(None),
                dump_traffic: config.dump_traffic,
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Pending transactions, for diagnostics
    pub fn registry(&self) -> &TransactionRegistry {
        &self.inner.registry
    }

    /// Open the transport and start dispatching inbound frames
    ///
    /// Resolves once the transport is open. The returned receiver yields
    /// relay messages, server events and, on connection loss, a final
    /// [`ChannelEvent::Closed`].
    pub async fn connect(&self, url: &str) -> SignalingResult<mpsc::UnboundedReceiver<ChannelEvent>> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ChannelState::Idle => *state = ChannelState::Connecting,
                ChannelState::Connecting | ChannelState::Open => {
                    return Err(SignalingError::AlreadyConnected);
                }
                ChannelState::Closed => return Err(SignalingError::ChannelClosed),
            }
        }

        debug!(url, "Connecting signaling channel");
        let connection = match self.transport.connect(url).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(url, error = %e, "Signaling connect failed");
                self.inner.shutdown();
                return Err(e);
            }
        };

        {
            let mut state = self.inner.state.lock();
            if *state != ChannelState::Connecting {
                // closed while the transport was opening
                return Err(SignalingError::ConnectionClosed);
            }
            *self.inner.outbound.lock() = Some(connection.outbound);
            *state = ChannelState::Open;
        }
        info!(url, "Signaling channel open");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let mut inbound = connection.inbound;
        let dispatcher = tokio::spawn(async move {
            let (code, reason) = loop {
                match inbound.recv().await {
                    Some(TransportEvent::Message(text)) => inner.dispatch(&text, &events_tx),
                    Some(TransportEvent::Closed { code, reason }) => break (code, reason),
                    Some(TransportEvent::Error(reason)) => break (None, reason),
                    None => break (None, "transport ended".to_string()),
                }
            };
            if inner.shutdown() {
                warn!(?code, reason = %reason, "Signaling connection lost");
                let _ = events_tx.send(ChannelEvent::Closed { code, reason });
            }
        });
        *self.inner.dispatcher.lock() = Some(dispatcher);

        Ok(events_rx)
    }

    /// Send a fresh registration with random room and client ids
    pub fn register(&self) -> SignalingResult<()> {
        let envelope = Envelope::register();
        if let Envelope::Register { roomid, clientid } = &envelope {
            info!(roomid = %roomid, clientid = %clientid, "Registering");
        }
        self.send(&envelope, false)
    }

    /// Register under caller-chosen ids
    pub fn register_as(&self, roomid: impl Into<String>, clientid: impl Into<String>) -> SignalingResult<()> {
        let envelope = Envelope::Register { roomid: roomid.into(), clientid: clientid.into() };
        if let Envelope::Register { roomid, clientid } = &envelope {
            info!(roomid = %roomid, clientid = %clientid, "Registering");
        }
        self.send(&envelope, false)
    }

    /// Send a payload, wrapped in a relay envelope when `wrap` is set
    ///
    /// Unwrapped sends serialize `payload` as the whole frame and are meant
    /// for protocol commands.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T, wrap: bool) -> SignalingResult<()> {
        let frame = if wrap {
            Envelope::relay(payload)?.to_json()?
        } else {
            serde_json::to_string(payload)?
        };
        self.inner.send_frame(frame)
    }

    /// Relay a signaling message to the peer
    pub fn send_signaling(&self, message: &SignalingMessage) -> SignalingResult<()> {
        debug!(kind = message.kind(), "Relaying signaling message");
        self.send(message, true)
    }

    /// Send a `{cmd:"message"}` envelope with JSON-encoded `data`
    pub fn send_message<T: Serialize + ?Sized>(&self, kind: &str, data: &T) -> SignalingResult<()> {
        let envelope = Envelope::Message { kind: kind.to_string(), data: serde_json::to_string(data)? };
        self.send(&envelope, false)
    }

    /// Issue a correlated request and wait for its response
    ///
    /// Only one request may be outstanding per channel; a second call made
    /// before the first settles fails with
    /// [`SignalingError::RequestInFlight`]. `timeout` defaults to the
    /// channel's configured window.
    pub async fn request(
        &self,
        mut request: RequestMessage,
        timeout: Option<Duration>,
    ) -> SignalingResult<ResponseMessage> {
        self.inner.ensure_open()?;
        let timeout = timeout.unwrap_or(self.request_timeout);

        let handle = {
            let mut slot = self.inner.in_flight.lock();
            if let Some(active) = slot.as_ref() {
                return Err(SignalingError::RequestInFlight { transaction: active.clone() });
            }
            let handle = self.inner.registry.create(timeout);
            *slot = Some(handle.id().clone());
            handle
        };
        let id = handle.id().clone();
        let _guard = InFlightGuard { inner: &self.inner, id: id.clone() };

        let kind = request.kind;
        request.transaction = Some(id.clone());
        let sent = Envelope::Request(request)
            .to_json()
            .and_then(|frame| self.inner.send_frame(frame));
        if let Err(e) = sent {
            self.inner.registry.reject(&id, e.clone());
            return Err(e);
        }
        debug!(transaction = %id, kind = %kind, "Request sent");

        handle.wait().await
    }

    /// Close the channel and reject every pending transaction
    pub fn close(&self) {
        if self.inner.shutdown() {
            info!("Signaling channel closed locally");
        }
        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.abort();
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}
