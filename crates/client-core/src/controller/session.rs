//! One media session and its negotiation pipeline

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use rws_signaling_core::SignalingMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ControllerInner;
use crate::error::ClientResult;
use crate::events::{ClientEvent, NotificationSeverity};
use crate::rtc::{IceCandidate, PeerConnectionState, RtcEvent, RtcPeer, SessionDescription, VideoSink};

/// An RTC peer bound to one controller generation
pub(crate) struct Session {
    id: u64,
    generation: u64,
    peer: Arc<dyn RtcPeer>,
    sink: Option<Arc<dyn VideoSink>>,
    destroyed: AtomicBool,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        generation: u64,
        peer: Arc<dyn RtcPeer>,
        sink: Option<Arc<dyn VideoSink>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, generation, peer, sink, destroyed: AtomicBool::new(false), cancel }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn peer(&self) -> &Arc<dyn RtcPeer> {
        &self.peer
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Await an RTC operation unless the session is torn down first
    ///
    /// `Ok(None)` means the session went away and the operation was abandoned.
    pub(crate) async fn guarded<T>(&self, operation: impl Future<Output = ClientResult<T>>) -> ClientResult<Option<T>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            result = operation => result.map(Some),
        }
    }

    /// Release the peer and sink; later completions see `is_destroyed`
    pub(crate) fn teardown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.peer.close();
        if let Some(sink) = &self.sink {
            sink.detach();
        }
        info!(session = self.id, generation = self.generation, "Session destroyed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl ControllerInner {
    /// Relay messages from the peer, in arrival order
    pub(crate) async fn handle_signaling(&self, generation: u64, message: SignalingMessage) {
        match message {
            SignalingMessage::Offer { sdp } => {
                let Some(session) = self.live_session(generation) else {
                    warn!(generation, "Dropping offer with no active session");
                    return;
                };
                if let Err(e) = self.apply_offer(&session, sdp).await {
                    error!(session = session.id(), error = %e, "Failed to answer offer");
                    self.notify(NotificationSeverity::Warning, format!("Failed to answer offer: {e}"));
                }
            }
            SignalingMessage::Candidate { label, id, candidate } => {
                let Some(session) = self.live_session(generation) else {
                    debug!(generation, "Dropping candidate with no active session");
                    return;
                };
                let candidate = IceCandidate { candidate, sdp_mid: id, sdp_mline_index: label };
                match session.guarded(session.peer().add_ice_candidate(candidate)).await {
                    Ok(Some(())) => {}
                    Ok(None) => debug!(session = session.id(), "Session gone while adding candidate"),
                    Err(e) => warn!(session = session.id(), error = %e, "Failed to add remote ICE candidate"),
                }
            }
            SignalingMessage::Bye => {
                info!(generation, "Peer ended the session");
                self.end_session(generation);
            }
            SignalingMessage::Answer { .. } => {
                warn!(generation, "Ignoring answer; this client only answers offers");
            }
        }
    }

    /// Rewrite, apply and answer a remote offer
    async fn apply_offer(&self, session: &Arc<Session>, sdp: String) -> ClientResult<()> {
        let offer = self.policy.rewrite_offer(&sdp);
        debug!(session = session.id(), "Applying remote offer");

        let peer = session.peer();
        let remote = session.guarded(peer.set_remote_description(SessionDescription::offer(offer))).await?;
        if remote.is_none() || !self.is_live(session) {
            debug!(session = session.id(), "Session gone during set_remote_description");
            return Ok(());
        }

        let Some(answer) = session.guarded(peer.create_answer()).await? else {
            debug!(session = session.id(), "Session gone during create_answer");
            return Ok(());
        };
        if !self.is_live(session) {
            debug!(session = session.id(), "Session gone after create_answer");
            return Ok(());
        }

        let local = session.guarded(peer.set_local_description(answer.clone())).await?;
        if local.is_none() || !self.is_live(session) {
            debug!(session = session.id(), "Session gone during set_local_description");
            return Ok(());
        }

        let sdp = self.policy.rewrite_answer(&answer.sdp);
        self.channel()?.send_signaling(&SignalingMessage::Answer { sdp })?;
        info!(session = session.id(), "Answer sent");
        Ok(())
    }

    pub(crate) fn spawn_rtc_events(
        self: &Arc<Self>,
        session: Arc<Session>,
        events: mpsc::UnboundedReceiver<RtcEvent>,
    ) {
        tokio::spawn(run_rtc_events(Arc::downgrade(self), session, events));
    }
}

async fn run_rtc_events(
    controller: Weak<ControllerInner>,
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<RtcEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        let Some(inner) = controller.upgrade() else { break };
        if !inner.is_live(&session) {
            break;
        }

        match event {
            RtcEvent::IceCandidate(Some(candidate)) => {
                let message = SignalingMessage::Candidate {
                    label: candidate.sdp_mline_index,
                    id: candidate.sdp_mid,
                    candidate: candidate.candidate,
                };
                let sent = inner.channel().and_then(|channel| Ok(channel.send_signaling(&message)?));
                if let Err(e) = sent {
                    warn!(session = session.id(), error = %e, "Failed to relay local ICE candidate");
                }
            }
            RtcEvent::IceCandidate(None) => debug!(session = session.id(), "ICE gathering complete"),
            RtcEvent::TrackAdded { stream_ids } => {
                debug!(session = session.id(), ?stream_ids, "Remote track added");
                if let Some(sink) = &session.sink {
                    sink.attach(&stream_ids);
                }
                inner.events.emit(ClientEvent::TrackAdded { stream_ids, timestamp: chrono::Utc::now() });
            }
            RtcEvent::ConnectionStateChanged(state) => {
                debug!(session = session.id(), %state, "Peer connection state changed");
                inner
                    .events
                    .emit(ClientEvent::PeerConnectionStateChanged { state, timestamp: chrono::Utc::now() });
                if state == PeerConnectionState::Failed {
                    inner.notify(NotificationSeverity::Critical, "Peer connection failed");
                }
            }
        }
    }
    debug!(session = session.id(), "RTC event loop finished");
}
