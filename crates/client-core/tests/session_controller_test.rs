//! Session controller against a scripted in-memory device and a fake RTC engine

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast, mpsc};

use rws_client_core::signaling::{MemoryPeer, MemoryTransport};
use rws_client_core::{
    ClientConfig, ClientError, ClientEvent, ClientResult, CodecPreference, ConfigValue, IceCandidate,
    NotificationSeverity, ReconnectConfig, ReconnectState, RtcConfiguration, RtcEvent, RtcPeer, RtcPeerFactory,
    RtcStats, SessionController, SessionDescription, SessionState, StillOptions, VideoSink, ZoomAction,
    ZoomCommand,
};

const URL: &str = "ws://camera.test/rws/ws";
const WAIT: Duration = Duration::from_secs(30);

const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 98\r\n\
a=mid:0\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:98 H264/90000\r\n";

const ANSWER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 98\r\n\
a=mid:0\r\n\
a=rtpmap:98 H264/90000\r\n";

// ---- scripted device ----

#[derive(Debug, Default, Clone)]
struct Script {
    fail_media_config: bool,
    fail_rtc_config: bool,
}

enum Command {
    Send(Value),
    Close(Option<u16>, String),
}

struct Device {
    frames: mpsc::UnboundedReceiver<Value>,
    requests: Arc<Mutex<Vec<Value>>>,
    commands: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    connections: Arc<AtomicUsize>,
    /// While set, requests are recorded but never answered
    muted: Arc<AtomicBool>,
    transport: MemoryTransport,
}

impl Device {
    fn start(script: Script) -> Self {
        let (transport, mut listener) = MemoryTransport::new();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));
        let muted = Arc::new(AtomicBool::new(false));

        let (requests_out, commands_out, connections_out, muted_out) =
            (requests.clone(), commands.clone(), connections.clone(), muted.clone());
        tokio::spawn(async move {
            while let Some(peer) = listener.accept().await {
                assert_eq!(peer.url(), URL);
                connections_out.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = mpsc::unbounded_channel();
                *commands_out.lock() = Some(tx);
                tokio::spawn(serve(
                    peer,
                    rx,
                    frames_tx.clone(),
                    requests_out.clone(),
                    muted_out.clone(),
                    script.clone(),
                ));
            }
        });

        Self { frames, requests, commands, connections, muted, transport }
    }

    fn send(&self, frame: Value) {
        if let Some(commands) = self.commands.lock().as_ref() {
            let _ = commands.send(Command::Send(frame));
        }
    }

    fn relay(&self, message: Value) {
        self.send(json!({"cmd": "send", "msg": message.to_string()}));
    }

    fn close(&self, code: Option<u16>, reason: &str) {
        if let Some(commands) = self.commands.lock().as_ref() {
            let _ = commands.send(Command::Close(code, reason.to_string()));
        }
    }

    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.frames.recv()).await.unwrap().unwrap()
    }

    /// Next relayed payload, skipping registrations and control messages
    async fn next_relay(&mut self) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["cmd"] == "send" {
                return serde_json::from_str(frame["msg"].as_str().unwrap()).unwrap();
            }
        }
    }

    fn requests_of(&self, kind: &str) -> Vec<Value> {
        self.requests.lock().iter().filter(|r| r["type"] == kind).cloned().collect()
    }
}

async fn serve(
    mut peer: MemoryPeer,
    mut commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::UnboundedSender<Value>,
    requests: Arc<Mutex<Vec<Value>>>,
    muted: Arc<AtomicBool>,
    script: Script,
) {
    loop {
        tokio::select! {
            frame = peer.recv_json() => {
                let Some(frame) = frame else { break };
                if frame["cmd"] == "request" {
                    requests.lock().push(frame.clone());
                    if !muted.load(Ordering::SeqCst) {
                        answer(&peer, &frame, &script);
                    }
                } else {
                    let _ = frames.send(frame);
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    peer.send_json(&frame);
                }
                Some(Command::Close(code, reason)) => peer.close(code, reason),
                None => break,
            },
        }
    }
}

fn answer(peer: &MemoryPeer, request: &Value, script: &Script) {
    let success = |data: Option<Value>| {
        let mut response = json!({"cmd": "response", "transaction": request["transaction"], "result": "SUCCESS"});
        if let Some(data) = data {
            response["data"] = json!(data.to_string());
        }
        response
    };
    let failed = |error: &str| {
        json!({"cmd": "response", "transaction": request["transaction"], "result": "FAILED", "error": error})
    };

    let response = match request["type"].as_str() {
        Some("deviceid") => success(Some(json!({
            "deviceid": "cam-01",
            "mcversion": "1.4.2",
            "stillcapture": true,
            "cameraenabled": true,
        }))),
        Some("mediaconfig") if script.fail_media_config => failed("media config unavailable"),
        Some("mediaconfig") => success(Some(json!({"video_brightness": 60, "video_awb_mode": "cloud"}))),
        Some("rtcconfig") if script.fail_rtc_config => failed("no rtc config"),
        Some("rtcconfig") => success(Some(json!({"iceServers": [{"urls": "stun:stun.camera.test:3478"}]}))),
        Some("still") => success(Some(json!({"filename": "still-0001.jpg", "url": "/stills/still-0001.jpg"}))),
        Some("config") => success(None),
        _ => failed("unknown request"),
    };
    peer.send_json(&response);
}

// ---- fake RTC engine ----

#[derive(Default)]
struct FakePeer {
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    answers_created: AtomicUsize,
    closed: AtomicBool,
    hold_remote: AtomicBool,
    release: Notify,
}

#[async_trait]
impl RtcPeer for FakePeer {
    async fn set_remote_description(&self, description: SessionDescription) -> ClientResult<()> {
        *self.remote.lock() = Some(description);
        if self.hold_remote.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(())
    }

    async fn create_answer(&self) -> ClientResult<SessionDescription> {
        self.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(ANSWER))
    }

    async fn set_local_description(&self, description: SessionDescription) -> ClientResult<()> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> ClientResult<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn get_stats(&self) -> ClientResult<RtcStats> {
        Ok(RtcStats { bytes_received: 4096, frames_decoded: 30, ..Default::default() })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    events: Mutex<Vec<mpsc::UnboundedSender<RtcEvent>>>,
    configs: Mutex<Vec<RtcConfiguration>>,
    hold_remote: AtomicBool,
}

impl FakeFactory {
    fn peer(&self) -> Arc<FakePeer> {
        self.peers.lock().last().cloned().unwrap()
    }

    fn emit(&self, event: RtcEvent) {
        self.events.lock().last().unwrap().send(event).unwrap();
    }
}

#[async_trait]
impl RtcPeerFactory for FakeFactory {
    async fn create(
        &self,
        config: &RtcConfiguration,
    ) -> ClientResult<(Arc<dyn RtcPeer>, mpsc::UnboundedReceiver<RtcEvent>)> {
        let peer = Arc::new(FakePeer::default());
        peer.hold_remote.store(self.hold_remote.load(Ordering::SeqCst), Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().push(peer.clone());
        self.events.lock().push(tx);
        self.configs.lock().push(config.clone());
        Ok((peer, rx))
    }
}

#[derive(Default)]
struct RecordingSink {
    attached: Mutex<Vec<String>>,
    detached: AtomicBool,
}

impl VideoSink for RecordingSink {
    fn attach(&self, stream_ids: &[String]) {
        self.attached.lock().extend(stream_ids.iter().cloned());
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

// ---- helpers ----

struct Harness {
    controller: SessionController,
    device: Device,
    factory: Arc<FakeFactory>,
}

fn harness_with(script: Script, config: ClientConfig) -> Harness {
    let device = Device::start(script);
    let factory = Arc::new(FakeFactory::default());
    let controller = SessionController::builder()
        .config(config)
        .transport(Arc::new(device.transport.clone()))
        .rtc_factory(factory.clone())
        .build()
        .unwrap();
    Harness { controller, device, factory }
}

fn harness() -> Harness {
    harness_with(Script::default(), ClientConfig::new(URL))
}

async fn wait_for_state(controller: &SessionController, state: SessionState) {
    let mut rx = controller.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap()
        .unwrap();
}

async fn wait_for_event<F>(events: &mut broadcast::Receiver<ClientEvent>, mut matches: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Connect, create a session and deliver the device's offer
async fn active_session(h: &mut Harness, sink: Option<Arc<dyn VideoSink>>) {
    h.controller.connect().await.unwrap();
    h.controller.create_session(sink).await.unwrap();
    h.device.relay(json!({"type": "offer", "sdp": OFFER}));
    let answer = h.device.next_relay().await;
    assert_eq!(answer["type"], "answer");
}

// ---- connect ----

#[tokio::test]
async fn test_connect_reaches_ready() {
    let mut h = harness();
    let mut events = h.controller.subscribe_events();

    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);

    let register = h.device.next_frame().await;
    assert_eq!(register["cmd"], "register");

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.device_info.unwrap().mcversion, "1.4.2");
    assert_eq!(snapshot.media_config.get("video_brightness"), Some(&ConfigValue::Integer(60)));
    assert_eq!(snapshot.media_config.get("video_awb_mode"), Some(&ConfigValue::Text("cloud".into())));
    assert_eq!(
        snapshot.rtc_config.unwrap().ice_servers[0].urls,
        vec!["stun:stun.camera.test:3478".to_string()]
    );

    // deviceid is learned from the first request and stamped on later ones
    assert!(h.device.requests_of("deviceid")[0].get("deviceid").is_none());
    assert_eq!(h.device.requests_of("mediaconfig")[0]["deviceid"], "cam-01");

    let mut states = Vec::new();
    while states.last() != Some(&SessionState::Ready) {
        if let ClientEvent::StateChanged { current, .. } = events.recv().await.unwrap() {
            states.push(current);
        }
    }
    assert_eq!(states, vec![SessionState::Registering, SessionState::Configuring, SessionState::Ready]);
}

#[tokio::test]
async fn test_connect_twice_is_usage_error() {
    let h = harness();
    h.controller.connect().await.unwrap();
    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));
    assert_eq!(h.controller.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_connect_fails_on_media_config() {
    let h = harness_with(Script { fail_media_config: true, ..Default::default() }, ClientConfig::new(URL));
    let mut events = h.controller.subscribe_events();

    let err = h.controller.connect().await.unwrap_err();
    match &err {
        ClientError::ConnectFailed { reason } => assert!(reason.starts_with("Failed to get Config Media")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert!(h.controller.snapshot().device_info.is_none());

    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Notification { .. })).await;
    assert!(matches!(event, ClientEvent::Notification { severity: NotificationSeverity::Critical, .. }));
}

#[tokio::test]
async fn test_connect_refused() {
    let h = harness();
    h.device.transport.set_refuse(true);

    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectFailed { .. }));
    assert!(err.is_recoverable());
    assert_eq!(h.controller.state(), SessionState::Disconnected);

    h.device.transport.set_refuse(false);
    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.snapshot().generation, 2);
}

#[tokio::test]
async fn test_rtc_config_falls_back_to_default() {
    let h = harness_with(Script { fail_rtc_config: true, ..Default::default() }, ClientConfig::new(URL));
    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.controller.snapshot().rtc_config, Some(RtcConfiguration::default()));
}

// ---- media session ----

#[tokio::test]
async fn test_create_session_preconditions() {
    let h = harness();
    let err = h.controller.create_session(None).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));

    let device = Device::start(Script::default());
    let controller = SessionController::builder()
        .config(ClientConfig::new(URL))
        .transport(Arc::new(device.transport.clone()))
        .build()
        .unwrap();
    controller.connect().await.unwrap();
    let err = controller.create_session(None).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidConfiguration { .. }));
}

#[tokio::test]
async fn test_offer_is_rewritten_and_answered() {
    let codec = CodecPreference { min_kbps: Some(1000), max_kbps: Some(2000), ..Default::default() };
    let mut h = harness_with(Script::default(), ClientConfig::new(URL).with_codec(codec));
    h.controller.connect().await.unwrap();
    assert_eq!(h.device.next_frame().await["cmd"], "register");

    let id = h.controller.create_session(None).await.unwrap();
    assert_eq!(id, 1);
    assert_eq!(h.controller.state(), SessionState::Active);
    // the fresh registration asks the device for an offer
    assert_eq!(h.device.next_frame().await["cmd"], "register");
    assert_eq!(h.factory.configs.lock()[0].ice_servers[0].urls[0], "stun:stun.camera.test:3478");

    h.device.relay(json!({"type": "offer", "sdp": OFFER}));
    let answer = h.device.next_relay().await;
    assert_eq!(answer["type"], "answer");
    let sdp = answer["sdp"].as_str().unwrap();
    assert!(sdp.contains("x-google-min-bitrate=1000"));
    assert!(sdp.contains("x-google-max-bitrate=2000"));

    let peer = h.factory.peer();
    let remote = peer.remote.lock().clone().unwrap();
    assert!(remote.sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 98 96"));
    // the engine keeps its own answer; only the sent copy is rewritten
    assert_eq!(peer.local.lock().as_ref().unwrap().sdp, ANSWER);
}

#[tokio::test]
async fn test_candidates_are_relayed_both_ways() {
    let mut h = harness();
    active_session(&mut h, None).await;

    h.device.relay(json!({"type": "candidate", "label": 0, "id": "0", "candidate": "candidate:1 1 udp 1 10.0.0.2 5000 typ host"}));
    let peer = h.factory.peer();
    wait_until(|| !peer.candidates.lock().is_empty()).await;
    let remote = peer.candidates.lock()[0].clone();
    assert_eq!(remote.sdp_mline_index, Some(0));
    assert_eq!(remote.sdp_mid.as_deref(), Some("0"));

    h.factory.emit(RtcEvent::IceCandidate(None));
    h.factory.emit(RtcEvent::IceCandidate(Some(IceCandidate {
        candidate: "candidate:2 1 udp 1 10.0.0.3 6000 typ host".into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    })));
    let local = h.device.next_relay().await;
    assert_eq!(
        local,
        json!({"type": "candidate", "label": 0, "id": "0", "candidate": "candidate:2 1 udp 1 10.0.0.3 6000 typ host"})
    );
}

#[tokio::test]
async fn test_track_attaches_sink() {
    let mut h = harness();
    let sink = Arc::new(RecordingSink::default());
    active_session(&mut h, Some(sink.clone())).await;
    let mut events = h.controller.subscribe_events();

    h.factory.emit(RtcEvent::TrackAdded { stream_ids: vec!["camera".into()] });
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::TrackAdded { .. })).await;
    assert_eq!(*sink.attached.lock(), vec!["camera".to_string()]);

    let stats = h.controller.get_stats().await.unwrap();
    assert_eq!(stats.frames_decoded, 30);
}

#[tokio::test]
async fn test_destroy_session_sends_bye_and_returns_to_ready() {
    let mut h = harness();
    let sink = Arc::new(RecordingSink::default());
    active_session(&mut h, Some(sink.clone())).await;

    h.controller.destroy_session().unwrap();
    assert_eq!(h.device.next_relay().await, json!({"type": "bye"}));
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert!(h.factory.peer().closed.load(Ordering::SeqCst));
    assert!(sink.detached.load(Ordering::SeqCst));
    assert!(!h.controller.is_session_active());

    assert_eq!(h.controller.destroy_session().unwrap_err(), ClientError::NoSession);

    // a new session can follow on the same connection
    h.controller.create_session(None).await.unwrap();
    assert_eq!(h.factory.peers.lock().len(), 2);
}

#[tokio::test]
async fn test_remote_bye_tears_down_without_echo() {
    let mut h = harness();
    active_session(&mut h, None).await;

    h.device.relay(json!({"type": "bye"}));
    wait_for_state(&h.controller, SessionState::Ready).await;
    assert!(h.factory.peer().closed.load(Ordering::SeqCst));

    // the next frame is the zoom, not a bye
    h.controller.send_zoom(ZoomCommand::reset()).unwrap();
    let frame = h.device.next_frame().await;
    assert_eq!(frame["cmd"], "message");
}

#[tokio::test]
async fn test_late_completion_after_destroy_is_dropped() {
    let mut h = harness();
    h.factory.hold_remote.store(true, Ordering::SeqCst);
    h.controller.connect().await.unwrap();
    h.controller.create_session(None).await.unwrap();

    h.device.relay(json!({"type": "offer", "sdp": OFFER}));
    let peer = h.factory.peer();
    wait_until(|| peer.remote.lock().is_some()).await;

    h.controller.destroy_session().unwrap();
    peer.release.notify_one();

    assert_eq!(h.device.next_relay().await, json!({"type": "bye"}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.controller.send_zoom(ZoomCommand::reset()).unwrap();
    assert_eq!(h.device.next_frame().await["cmd"], "message");
    assert_eq!(peer.answers_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stuck_rtc_call_does_not_block_channel_loss() {
    let mut h = harness();
    h.factory.hold_remote.store(true, Ordering::SeqCst);
    h.controller.connect().await.unwrap();
    h.controller.create_session(None).await.unwrap();

    h.device.relay(json!({"type": "offer", "sdp": OFFER}));
    let peer = h.factory.peer();
    wait_until(|| peer.remote.lock().is_some()).await;

    // set_remote_description never completes
    h.controller.destroy_session().unwrap();
    assert_eq!(h.device.next_relay().await, json!({"type": "bye"}));
    assert_eq!(h.controller.state(), SessionState::Ready);

    h.device.close(Some(1006), "gone");
    wait_for_state(&h.controller, SessionState::Disconnected).await;
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Scheduled);
    assert_eq!(peer.answers_created.load(Ordering::SeqCst), 0);
    h.controller.disconnect();
}

#[tokio::test]
async fn test_offer_without_session_is_dropped() {
    let mut h = harness();
    h.controller.connect().await.unwrap();
    h.device.relay(json!({"type": "offer", "sdp": OFFER}));

    h.controller.send_zoom(ZoomCommand::reset()).unwrap();
    assert_eq!(h.device.next_frame().await["cmd"], "register");
    assert_eq!(h.device.next_frame().await["cmd"], "message");
    assert_eq!(h.controller.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_disconnect_closes_everything() {
    let mut h = harness();
    active_session(&mut h, None).await;

    h.controller.disconnect();
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert_eq!(h.device.next_relay().await, json!({"type": "bye"}));
    assert!(h.factory.peer().closed.load(Ordering::SeqCst));
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Off);
    assert!(matches!(h.controller.device_info().await, Err(ClientError::NotConnected)));
}

// ---- reconnect ----

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_remote_close() {
    let mut h = harness();
    active_session(&mut h, None).await;
    let mut events = h.controller.subscribe_events();

    h.device.close(Some(1006), "gone");
    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Notification { .. })).await;
    match event {
        ClientEvent::Notification { severity, message, .. } => {
            assert_eq!(severity, NotificationSeverity::Critical);
            assert_eq!(message, "Connection closed code 1006");
        }
        _ => unreachable!(),
    }
    wait_for_state(&h.controller, SessionState::Disconnected).await;
    assert!(h.factory.peer().closed.load(Ordering::SeqCst));
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Scheduled);

    let started = tokio::time::Instant::now();
    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await;
    assert!(matches!(event, ClientEvent::Reconnecting { attempt: 1, .. }));
    assert!(started.elapsed() >= Duration::from_secs(5));

    wait_for_state(&h.controller, SessionState::Ready).await;
    assert_eq!(h.device.connections.load(Ordering::SeqCst), 2);
    wait_until(|| h.controller.reconnect_state() == ReconnectState::Off).await;
    assert_eq!(h.controller.snapshot().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_max_attempts() {
    let config = ClientConfig::new(URL).with_reconnect(ReconnectConfig {
        enabled: true,
        interval_ms: 1000,
        max_attempts: Some(2),
    });
    let h = harness_with(Script::default(), config);
    h.controller.connect().await.unwrap();
    let mut events = h.controller.subscribe_events();

    h.device.transport.set_refuse(true);
    h.device.close(None, "restart");

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::Notification { message, .. } if message.starts_with("Reconnect gave up"))
    })
    .await;
    assert!(matches!(event, ClientEvent::Notification { severity: NotificationSeverity::Critical, .. }));
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Off);
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert_eq!(h.device.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_reconnect() {
    let h = harness();
    h.controller.connect().await.unwrap();

    h.device.close(Some(1001), "going away");
    wait_for_state(&h.controller, SessionState::Disconnected).await;
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Scheduled);

    h.controller.disconnect();
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Off);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.device.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_user_connect_supersedes_reconnect_attempt() {
    let config = ClientConfig::new(URL)
        .with_request_timeout(Duration::from_secs(600))
        .with_reconnect(ReconnectConfig { enabled: true, interval_ms: 1000, max_attempts: None });
    let h = harness_with(Script::default(), config);
    h.controller.connect().await.unwrap();

    // the reconnect attempt registers and then waits on an unanswered request
    h.device.muted.store(true, Ordering::SeqCst);
    h.device.close(Some(1006), "gone");
    wait_for_state(&h.controller, SessionState::Configuring).await;
    assert_eq!(h.controller.reconnect_state(), ReconnectState::InProgress);
    assert_eq!(h.controller.snapshot().generation, 2);

    h.device.muted.store(false, Ordering::SeqCst);
    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Off);
    assert_eq!(h.controller.snapshot().generation, 3);
    assert_eq!(h.device.connections.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.device.connections.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_user_connect_while_reconnect_scheduled() {
    let h = harness();
    h.controller.connect().await.unwrap();

    h.device.close(None, "restart");
    wait_for_state(&h.controller, SessionState::Disconnected).await;
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Scheduled);

    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Off);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.device.connections.load(Ordering::SeqCst), 2);
    assert_eq!(h.controller.state(), SessionState::Ready);

    // connected: a usage error that leaves everything as it was
    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.controller.snapshot().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connect_is_rolled_back() {
    let h = harness_with(
        Script::default(),
        ClientConfig::new(URL).with_request_timeout(Duration::from_secs(600)),
    );
    h.device.muted.store(true, Ordering::SeqCst);

    let abandoned = tokio::time::timeout(Duration::from_secs(1), h.controller.connect()).await;
    assert!(abandoned.is_err());
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert!(matches!(h.controller.device_info().await, Err(ClientError::NotConnected)));

    h.device.muted.store(false, Ordering::SeqCst);
    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.snapshot().generation, 2);
}

#[tokio::test]
async fn test_reconnect_disabled() {
    let h = harness_with(Script::default(), ClientConfig::new(URL).with_reconnect(ReconnectConfig::disabled()));
    h.controller.connect().await.unwrap();

    h.device.close(Some(1006), "gone");
    wait_for_state(&h.controller, SessionState::Disconnected).await;
    assert_eq!(h.controller.reconnect_state(), ReconnectState::Off);
}

// ---- device requests ----

#[tokio::test]
async fn test_zoom_commands() {
    let mut h = harness();
    let err = h.controller.send_zoom(ZoomCommand::new(0.5, 0.5, ZoomAction::In)).unwrap_err();
    assert_eq!(err, ClientError::NotConnected);

    h.controller.connect().await.unwrap();
    assert_eq!(h.device.next_frame().await["cmd"], "register");

    let err = h.controller.send_zoom(ZoomCommand::new(1.5, 0.5, ZoomAction::Move)).unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument { .. }));

    h.controller.send_zoom(ZoomCommand::new(0.25, 0.75, ZoomAction::In)).unwrap();
    let frame = h.device.next_frame().await;
    assert_eq!(frame["cmd"], "message");
    assert_eq!(frame["type"], "zoom");
    let data: Value = serde_json::from_str(frame["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, json!({"x": 0.25, "y": 0.75, "command": "in"}));
}

#[tokio::test]
async fn test_still_image_request() {
    let h = harness();
    h.controller.connect().await.unwrap();

    let image = h
        .controller
        .still_image(StillOptions::default().with_size(640, 480).with_quality(80))
        .await
        .unwrap();
    assert_eq!(image.filename, "still-0001.jpg");

    let request = h.device.requests_of("still").remove(0);
    let options: Value = serde_json::from_str(request["data"].as_str().unwrap()).unwrap();
    assert_eq!(options, json!({"width": 640, "height": 480, "quality": 80}));
}

#[tokio::test(start_paused = true)]
async fn test_still_refresh_until_stopped() {
    let h = harness();
    h.controller.connect().await.unwrap();
    let mut events = h.controller.subscribe_events();

    h.controller.start_still_refresh(Duration::from_secs(2), StillOptions::default()).unwrap();
    for _ in 0..2 {
        let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::StillImage { .. })).await;
        assert!(matches!(event, ClientEvent::StillImage { image, .. } if image.url == "/stills/still-0001.jpg"));
    }

    h.controller.stop_still_refresh();
    let captured = h.device.requests_of("still").len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.device.requests_of("still").len(), captured);

    let err = h.controller.start_still_refresh(Duration::ZERO, StillOptions::default()).unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_update_and_apply_media_config() {
    let h = harness();
    h.controller.connect().await.unwrap();

    let mut config = h.controller.snapshot().media_config;
    config.set("video_brightness", 70).unwrap();
    config.set("video_hflip", true).unwrap();
    assert!(config.set("video_rotation", 45).is_err());

    h.controller.update_media_config(&config).await.unwrap();
    h.controller.apply_media_config().await.unwrap();

    let requests = h.device.requests_of("config");
    let update: Value = serde_json::from_str(requests[0]["data"].as_str().unwrap()).unwrap();
    assert_eq!(update["video_brightness"], 70);
    assert_eq!(update["video_hflip"], true);
    assert_eq!(update["video_awb_mode"], "cloud");
    assert!(update.get("video_contrast").is_none());
    assert_eq!(requests[1]["data"], "apply");
    assert_eq!(h.controller.snapshot().media_config.get("video_brightness"), Some(&ConfigValue::Integer(70)));
}
