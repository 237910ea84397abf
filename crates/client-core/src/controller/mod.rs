//! Session controller
//!
//! [`SessionController`] owns the signaling channel for one device and walks
//! it through `connect → register → fetch configuration → create/destroy a
//! media session`, re-establishing the connection when it drops.
//!
//! Every `connect()` starts a new *generation*. Background tasks (channel
//! dispatch, RTC events, still refresh) hold the generation they were
//! started for and a child of its [`CancellationToken`]; anything that
//! completes for a superseded generation is dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> rws_client_core::ClientResult<()> {
//! use rws_client_core::{ClientConfig, SessionController};
//!
//! let controller = SessionController::builder()
//!     .config(ClientConfig::for_host("192.168.0.10", false))
//!     .build()?;
//!
//! controller.connect().await?;
//! let info = controller.device_info().await?;
//! println!("{} running {}", info.deviceid, info.mcversion);
//! controller.disconnect();
//! # Ok(())
//! # }
//! ```

mod background;
mod session;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rws_sdp_core::CodecPreferencePolicy;
use rws_signaling_core::{
    ChannelConfig, ChannelEvent, RequestMessage, RequestType, ResponseMessage, SignalingChannel,
    SignalingError, SignalingMessage, Transport,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EVENT_CHANNEL_CAPACITY, EventEmitter, NotificationSeverity, SessionState};
use crate::media_config::MediaConfig;
use crate::recovery::with_timeout;
use crate::rtc::{RtcConfiguration, RtcPeerFactory, RtcStats, VideoSink};
use crate::types::{DeviceInfo, StillImage, StillOptions, ZoomCommand};

pub(crate) use session::Session;

/// Progress of the reconnect loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectState {
    #[default]
    Off,
    /// Waiting for the next attempt
    Scheduled,
    /// An attempt is running
    InProgress,
}

impl fmt::Display for ReconnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconnectState::Off => "off",
            ReconnectState::Scheduled => "scheduled",
            ReconnectState::InProgress => "in-progress",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the controller's session data
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub generation: u64,
    pub device_info: Option<DeviceInfo>,
    pub media_config: MediaConfig,
    pub rtc_config: Option<RtcConfiguration>,
    pub reconnect: ReconnectState,
    pub session_active: bool,
}

struct ControllerCore {
    generation: u64,
    cancel: CancellationToken,
    channel: Option<Arc<SignalingChannel>>,
    session: Option<Arc<Session>>,
    device_info: Option<DeviceInfo>,
    device_id: Option<String>,
    media_config: MediaConfig,
    rtc_config: Option<RtcConfiguration>,
    reconnect: ReconnectState,
    reconnect_cancel: Option<CancellationToken>,
    reconnect_epoch: u64,
    still_refresh: Option<CancellationToken>,
    next_session_id: u64,
}

pub(crate) struct ControllerInner {
    config: ClientConfig,
    policy: CodecPreferencePolicy,
    transport: Arc<dyn Transport>,
    rtc_factory: Option<Arc<dyn RtcPeerFactory>>,
    state_tx: watch::Sender<SessionState>,
    events: EventEmitter,
    core: Mutex<ControllerCore>,
}

/// Builder for [`SessionController`]
pub struct SessionControllerBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    rtc_factory: Option<Arc<dyn RtcPeerFactory>>,
    event_capacity: usize,
}

impl Default for SessionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            rtc_factory: None,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Signaling transport; defaults to WebSocket when the `ws` feature is on
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Required for [`SessionController::create_session`]
    pub fn rtc_factory(mut self, factory: Arc<dyn RtcPeerFactory>) -> Self {
        self.rtc_factory = Some(factory);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> ClientResult<SessionController> {
        self.config.validate()?;
        if self.event_capacity == 0 {
            return Err(ClientError::invalid_configuration("event_capacity", "must be greater than zero"));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let core = ControllerCore {
            generation: 0,
            cancel: CancellationToken::new(),
            channel: None,
            session: None,
            device_info: None,
            device_id: self.config.device_id.clone(),
            media_config: MediaConfig::default(),
            rtc_config: None,
            reconnect: ReconnectState::Off,
            reconnect_cancel: None,
            reconnect_epoch: 0,
            still_refresh: None,
            next_session_id: 0,
        };

        debug!(url = %self.config.signaling_url, "Session controller created");
        Ok(SessionController {
            inner: Arc::new(ControllerInner {
                policy: self.config.codec.to_policy(),
                config: self.config,
                transport,
                rtc_factory: self.rtc_factory,
                state_tx,
                events: EventEmitter::new(self.event_capacity),
                core: Mutex::new(core),
            }),
        })
    }
}

#[cfg(feature = "ws")]
fn default_transport(config: &ClientConfig) -> ClientResult<Arc<dyn Transport>> {
    Ok(Arc::new(rws_signaling_core::WebSocketTransport::new().with_dump_traffic(config.dump_traffic)))
}

#[cfg(not(feature = "ws"))]
fn default_transport(_config: &ClientConfig) -> ClientResult<Arc<dyn Transport>> {
    Err(ClientError::invalid_configuration(
        "transport",
        "no transport given and the ws feature is disabled",
    ))
}

/// Drives one device connection and its media session
///
/// Cloning is cheap; every clone controls the same connection.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("url", &self.inner.config.signaling_url)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl SessionController {
    pub fn builder() -> SessionControllerBuilder {
        SessionControllerBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.inner.core.lock();
        SessionSnapshot {
            state: self.inner.state(),
            generation: core.generation,
            device_info: core.device_info.clone(),
            media_config: core.media_config.clone(),
            rtc_config: core.rtc_config.clone(),
            reconnect: core.reconnect,
            session_active: core.session.as_ref().is_some_and(|s| !s.is_destroyed()),
        }
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.core.lock().reconnect
    }

    /// Open the channel, register and fetch the device configuration
    ///
    /// Any failure tears down what was set up and returns one
    /// [`ClientError::ConnectFailed`] naming the failed step. A user call
    /// stops a scheduled reconnect and supersedes a reconnect attempt that
    /// is still running. Calling it while connected is an
    /// [`ClientError::InvalidState`] error and changes nothing.
    pub async fn connect(&self) -> ClientResult<()> {
        self.inner.take_over_reconnect()?;
        self.inner.connect_generation().await
    }

    /// Close everything; no reconnect follows
    pub fn disconnect(&self) {
        self.inner.stop_reconnect();

        let (channel, session) = {
            let mut core = self.inner.core.lock();
            core.cancel.cancel();
            if let Some(refresh) = core.still_refresh.take() {
                refresh.cancel();
            }
            core.device_info = None;
            core.rtc_config = None;
            let taken = (core.channel.take(), core.session.take());
            self.inner.set_state(SessionState::Disconnected);
            taken
        };

        if let Some(session) = session {
            if let Some(channel) = &channel {
                send_bye(channel);
            }
            session.teardown();
        }
        if let Some(channel) = channel {
            channel.close();
            info!(url = %self.inner.config.signaling_url, "Disconnected");
        }
    }

    pub async fn device_info(&self) -> ClientResult<DeviceInfo> {
        self.inner.device_info().await
    }

    /// Fetch the device's media configuration and merge it into the snapshot
    pub async fn media_config(&self) -> ClientResult<MediaConfig> {
        self.inner.media_config().await
    }

    /// Ask the device to re-read its stored configuration
    pub async fn read_device_config(&self) -> ClientResult<serde_json::Value> {
        let response = self
            .inner
            .request(RequestMessage::new(RequestType::Config).with_data("read"))
            .await?;
        Ok(response_value(&response))
    }

    /// Send the non-default values of `config` to the device
    pub async fn update_media_config(&self, config: &MediaConfig) -> ClientResult<()> {
        let data = config.to_json(false).to_string();
        self.inner
            .request(RequestMessage::new(RequestType::Config).with_data(data))
            .await?;
        self.inner.core.lock().media_config = config.clone();
        info!(params = config.len(), "Media configuration updated");
        Ok(())
    }

    /// Make the device apply its updated configuration
    pub async fn apply_media_config(&self) -> ClientResult<()> {
        self.inner
            .request(RequestMessage::new(RequestType::Config).with_data("apply"))
            .await?;
        info!("Media configuration applied");
        Ok(())
    }

    pub async fn rtc_configuration(&self) -> ClientResult<RtcConfiguration> {
        self.inner.rtc_configuration().await
    }

    pub async fn still_image(&self, options: StillOptions) -> ClientResult<StillImage> {
        self.inner.still_image(&options).await
    }

    /// Send a zoom gesture over the control channel
    pub fn send_zoom(&self, command: ZoomCommand) -> ClientResult<()> {
        command.validate()?;
        let channel = self.inner.channel()?;
        channel.send_message("zoom", &command).map_err(|e| {
            error!(error = %e, action = %command.command, "Failed to send Zoom command");
            self.inner.notify(NotificationSeverity::Warning, "Failed to send Zoom command");
            ClientError::from(e)
        })
    }

    /// Capture a still every `interval` until stopped or disconnected
    pub fn start_still_refresh(&self, interval: Duration, options: StillOptions) -> ClientResult<()> {
        self.inner.start_still_refresh(interval, options)
    }

    pub fn stop_still_refresh(&self) {
        if let Some(refresh) = self.inner.core.lock().still_refresh.take() {
            refresh.cancel();
            debug!("Still refresh stopped");
        }
    }

    /// Create the media session and ask the device for an offer
    ///
    /// Returns the session id. The remote video is attached to `sink` once
    /// the first track arrives.
    pub async fn create_session(&self, sink: Option<Arc<dyn VideoSink>>) -> ClientResult<u64> {
        let inner = &self.inner;
        let factory = inner
            .rtc_factory
            .clone()
            .ok_or_else(|| ClientError::invalid_configuration("rtc_factory", "no RTC peer factory configured"))?;

        let (generation, cancel, rtc_config) = {
            let core = inner.core.lock();
            let state = inner.state();
            if state != SessionState::Ready {
                return Err(ClientError::invalid_state("ready", state));
            }
            (core.generation, core.cancel.clone(), core.rtc_config.clone().unwrap_or_default())
        };

        let (peer, events) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::cancelled("create session")),
            created = factory.create(&rtc_config) => created.map_err(|e| {
                error!(error = %e, "Failed to create RTC peer");
                ClientError::media_negotiation_failed(e.to_string())
            })?,
        };

        let session = {
            let mut core = inner.core.lock();
            let stale = core.generation != generation
                || cancel.is_cancelled()
                || inner.state() != SessionState::Ready
                || core.session.is_some();
            if stale {
                drop(core);
                peer.close();
                debug!(generation, "Discarding peer created for a stale session");
                return Err(ClientError::cancelled("create session"));
            }
            core.next_session_id += 1;
            let session = Arc::new(Session::new(
                core.next_session_id,
                generation,
                peer,
                sink,
                core.cancel.child_token(),
            ));
            core.session = Some(session.clone());
            inner.set_state(SessionState::Active);
            session
        };
        inner.spawn_rtc_events(session.clone(), events);

        // A fresh registration makes the device send its offer
        if let Err(e) = inner.channel().and_then(|channel| channel.register().map_err(ClientError::from)) {
            error!(session = session.id(), error = %e, "Failed to request an offer");
            inner.end_session(generation);
            return Err(e);
        }
        info!(session = session.id(), generation, "Session created");
        Ok(session.id())
    }

    /// Say bye, release the peer and return to `ready`
    pub fn destroy_session(&self) -> ClientResult<()> {
        let (session, channel) = {
            let mut core = self.inner.core.lock();
            let session = core.session.take().ok_or(ClientError::NoSession)?;
            (session, core.channel.clone())
        };

        match &channel {
            Some(channel) => send_bye(channel),
            None => warn!(session = session.id(), "No channel to send bye on"),
        }
        session.teardown();

        let core = self.inner.core.lock();
        if core.session.is_none() && self.inner.state() == SessionState::Active {
            self.inner.set_state(SessionState::Ready);
        }
        Ok(())
    }

    pub fn is_session_active(&self) -> bool {
        self.inner.core.lock().session.as_ref().is_some_and(|s| !s.is_destroyed())
    }

    pub async fn get_stats(&self) -> ClientResult<RtcStats> {
        let session = self.inner.core.lock().session.clone().ok_or(ClientError::NoSession)?;
        session.peer().get_stats().await
    }
}

fn send_bye(channel: &SignalingChannel) {
    if let Err(e) = channel.send_signaling(&SignalingMessage::Bye) {
        warn!(error = %e, "Failed to send bye");
    }
}

/// `data` of a response as JSON, or as a plain string when it is not JSON
fn response_value(response: &ResponseMessage) -> serde_json::Value {
    match response.data.as_deref() {
        None => serde_json::Value::Null,
        Some(data) => serde_json::from_str(data).unwrap_or_else(|_| serde_json::Value::String(data.to_string())),
    }
}

impl ControllerInner {
    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Publish a state change; callers hold the core lock
    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(%previous, current = %next, "Session state changed");
            self.events.emit(ClientEvent::state_changed(previous, next));
        }
    }

    fn notify(&self, severity: NotificationSeverity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            NotificationSeverity::Info => info!(%message, "Notification"),
            NotificationSeverity::Warning => warn!(%message, "Notification"),
            NotificationSeverity::Critical => error!(%message, "Notification"),
        }
        self.events.emit(ClientEvent::notification(severity, message));
    }

    fn channel(&self) -> ClientResult<Arc<SignalingChannel>> {
        self.core.lock().channel.clone().ok_or(ClientError::NotConnected)
    }

    /// Move to `state` if `generation` is still the live one
    fn advance(&self, generation: u64, state: SessionState) -> ClientResult<()> {
        let core = self.core.lock();
        if core.generation != generation || core.cancel.is_cancelled() {
            return Err(ClientError::cancelled("connect"));
        }
        self.set_state(state);
        Ok(())
    }

    fn live_session(&self, generation: u64) -> Option<Arc<Session>> {
        let core = self.core.lock();
        if core.generation != generation {
            return None;
        }
        core.session.clone().filter(|s| !s.is_destroyed())
    }

    fn is_live(&self, session: &Arc<Session>) -> bool {
        if session.is_destroyed() {
            return false;
        }
        let core = self.core.lock();
        core.generation == session.generation()
            && core.session.as_ref().is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Tear down the session of `generation` without a bye
    fn end_session(&self, generation: u64) {
        let session = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            match core.session.take() {
                Some(session) => session,
                None => {
                    debug!(generation, "No session to end");
                    return;
                }
            }
        };
        session.teardown();

        let core = self.core.lock();
        if core.generation == generation && core.session.is_none() && self.state() == SessionState::Active {
            self.set_state(SessionState::Ready);
        }
    }

    /// Prepare for a user `connect()`
    ///
    /// Fails without side effects unless the controller is disconnected or
    /// the pending connect belongs to the reconnect loop.
    fn take_over_reconnect(&self) -> ClientResult<()> {
        let superseded = {
            let core = self.core.lock();
            match (self.state(), core.reconnect) {
                (SessionState::Disconnected, _) => None,
                (SessionState::Registering | SessionState::Configuring, ReconnectState::InProgress) => {
                    Some(core.generation)
                }
                (state, _) => return Err(ClientError::invalid_state("disconnected", state)),
            }
        };

        self.stop_reconnect();
        if let Some(generation) = superseded {
            debug!(generation, "User connect supersedes reconnect attempt");
            self.abort_connect(generation);
        }
        Ok(())
    }

    pub(crate) async fn connect_generation(self: &Arc<Self>) -> ClientResult<()> {
        let (generation, cancel) = {
            let mut core = self.core.lock();
            let state = self.state();
            if state != SessionState::Disconnected {
                return Err(ClientError::invalid_state("disconnected", state));
            }
            core.generation += 1;
            core.cancel = CancellationToken::new();
            self.set_state(SessionState::Registering);
            (core.generation, core.cancel.clone())
        };
        info!(generation, url = %self.config.signaling_url, "Connecting");
        let mut pending = PendingConnect { inner: self.as_ref(), generation, finished: false };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::cancelled("connect")),
            result = self.establish(generation, &cancel) => result,
        };

        pending.finished = true;
        match result {
            Ok(()) => {
                info!(generation, "Connected");
                Ok(())
            }
            Err(e @ ClientError::Cancelled { .. }) => {
                debug!(generation, "Connect superseded");
                self.abort_connect(generation);
                Err(e)
            }
            Err(e) => {
                self.abort_connect(generation);
                self.notify(NotificationSeverity::Critical, e.to_string());
                Err(e)
            }
        }
    }

    async fn establish(self: &Arc<Self>, generation: u64, cancel: &CancellationToken) -> ClientResult<()> {
        let channel_config = ChannelConfig::default()
            .with_request_timeout(self.config.request_timeout())
            .with_dump_traffic(self.config.dump_traffic);
        let channel = Arc::new(SignalingChannel::new(self.transport.clone(), channel_config));

        let events = with_timeout("connect", self.config.connect_timeout(), async {
            channel.connect(&self.config.signaling_url).await.map_err(ClientError::from)
        })
        .await
        .map_err(|e| match e {
            ClientError::ConnectFailed { .. } => e,
            other => ClientError::connect_failed(other.to_string()),
        })?;

        {
            let mut core = self.core.lock();
            if core.generation != generation || cancel.is_cancelled() {
                drop(core);
                channel.close();
                return Err(ClientError::cancelled("connect"));
            }
            core.channel = Some(channel.clone());
        }
        self.spawn_channel_events(generation, cancel.clone(), events);

        channel
            .register()
            .map_err(|e| ClientError::connect_failed(format!("Failed to register: {e}")))?;
        self.advance(generation, SessionState::Configuring)?;

        self.device_info()
            .await
            .map_err(|e| step_failed(e, "Failed to get Device ID"))?;
        self.media_config()
            .await
            .map_err(|e| step_failed(e, "Failed to get Config Media"))?;

        let rtc_config = match self.rtc_configuration().await {
            Ok(config) => config,
            Err(e @ ClientError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Using default RTC configuration");
                RtcConfiguration::default()
            }
        };
        self.core.lock().rtc_config = Some(rtc_config);

        self.advance(generation, SessionState::Ready)
    }

    /// Undo a failed or superseded connect of `generation`
    ///
    /// A generation that already reached `ready` is left alone.
    fn abort_connect(&self, generation: u64) {
        let channel = {
            let mut core = self.core.lock();
            if core.generation != generation || matches!(self.state(), SessionState::Ready | SessionState::Active) {
                return;
            }
            core.cancel.cancel();
            core.device_info = None;
            core.rtc_config = None;
            let channel = core.channel.take();
            self.set_state(SessionState::Disconnected);
            channel
        };
        if let Some(channel) = channel {
            channel.close();
        }
    }

    async fn request(&self, request: RequestMessage) -> ClientResult<ResponseMessage> {
        let kind = request.kind;
        let (channel, device_id) = {
            let core = self.core.lock();
            (core.channel.clone().ok_or(ClientError::NotConnected)?, core.device_id.clone())
        };
        let request = match device_id {
            Some(id) if request.deviceid.is_none() => request.with_device_id(id),
            _ => request,
        };

        debug!(request = %kind, "Sending request");
        channel.request(request, None).await.map_err(|e| match e {
            SignalingError::RequestFailed { reason } => ClientError::request_failed(kind.as_str(), reason),
            other => ClientError::from(other),
        })
    }

    async fn device_info(&self) -> ClientResult<DeviceInfo> {
        let response = self.request(RequestMessage::new(RequestType::DeviceId)).await?;
        let info: DeviceInfo = response.data_as()?;

        let mut core = self.core.lock();
        if !info.deviceid.is_empty() {
            core.device_id = Some(info.deviceid.clone());
        }
        core.device_info = Some(info.clone());
        debug!(device = %info.deviceid, version = %info.mcversion, "Device info received");
        Ok(info)
    }

    async fn media_config(&self) -> ClientResult<MediaConfig> {
        let response = self.request(RequestMessage::new(RequestType::MediaConfig)).await?;
        let values: serde_json::Value = response.data_as()?;

        let mut core = self.core.lock();
        let applied = core.media_config.merge_json(&values)?;
        debug!(applied, "Media configuration merged");
        Ok(core.media_config.clone())
    }

    async fn rtc_configuration(&self) -> ClientResult<RtcConfiguration> {
        let response = self.request(RequestMessage::new(RequestType::RtcConfig)).await?;
        Ok(response.data_as()?)
    }

    async fn still_image(&self, options: &StillOptions) -> ClientResult<StillImage> {
        let request = RequestMessage::new(RequestType::Still).with_json_data(options)?;
        let image: StillImage = self.request(request).await?.data_as()?;
        debug!(filename = %image.filename, "Still image captured");
        Ok(image)
    }

    fn spawn_channel_events(
        self: &Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        tokio::spawn(run_channel_events(Arc::downgrade(self), generation, cancel, events));
    }
}

/// Aborts the connect of `generation` if its future is dropped early
struct PendingConnect<'a> {
    inner: &'a ControllerInner,
    generation: u64,
    finished: bool,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(generation = self.generation, "Connect dropped before completion");
            self.inner.abort_connect(self.generation);
        }
    }
}

/// Map a failed connect step to one aggregated error
fn step_failed(e: ClientError, step: &str) -> ClientError {
    match e {
        ClientError::Cancelled { .. } => e,
        other => ClientError::connect_failed(format!("{step}: {other}")),
    }
}

async fn run_channel_events(
    controller: Weak<ControllerInner>,
    generation: u64,
    cancel: CancellationToken,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = controller.upgrade() else { break };

        match event {
            Some(ChannelEvent::Signaling(message)) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = inner.handle_signaling(generation, message) => {}
                }
            }
            Some(ChannelEvent::ServerEvent(event)) => {
                debug!(kind = %event.kind, "Server event");
                inner.events.emit(ClientEvent::ServerEvent { event, timestamp: chrono::Utc::now() });
            }
            Some(ChannelEvent::Closed { code, reason }) => {
                inner.handle_channel_lost(generation, code, &reason);
                break;
            }
            None => {
                inner.handle_channel_lost(generation, None, "channel dropped");
                break;
            }
        }
    }
    debug!(generation, "Channel event loop finished");
}
