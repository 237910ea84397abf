//! Channel loss, reconnect loop and still refresh

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ControllerInner, ReconnectState};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, NotificationSeverity, SessionState};
use crate::recovery::{RetryOutcome, retry_at_fixed_interval};
use crate::types::StillOptions;

impl ControllerInner {
    /// React to the channel of `generation` closing underneath us
    ///
    /// Only an established connection is torn down here; a connect still in
    /// progress sees the loss through its pending request instead.
    pub(crate) fn handle_channel_lost(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: &str) {
        let session = {
            let mut core = self.core.lock();
            let state = self.state();
            if core.generation != generation
                || core.cancel.is_cancelled()
                || !matches!(state, SessionState::Ready | SessionState::Active)
            {
                debug!(generation, %state, "Ignoring loss of an inactive channel");
                return;
            }

            warn!(generation, ?code, reason, "Signaling channel lost");
            core.cancel.cancel();
            core.channel = None;
            core.device_info = None;
            core.rtc_config = None;
            if let Some(refresh) = core.still_refresh.take() {
                refresh.cancel();
            }
            let message = match code {
                Some(code) => format!("Connection closed code {code}"),
                None => "Connection closed".to_string(),
            };
            self.notify(NotificationSeverity::Critical, message);
            let session = core.session.take();
            self.set_state(SessionState::Disconnected);
            session
        };

        if let Some(session) = session {
            session.teardown();
        }
        if self.config.reconnect.enabled {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let (token, epoch) = {
            let mut core = self.core.lock();
            if let Some(previous) = core.reconnect_cancel.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            core.reconnect_epoch += 1;
            core.reconnect_cancel = Some(token.clone());
            core.reconnect = ReconnectState::Scheduled;
            (token, core.reconnect_epoch)
        };

        let interval = self.config.reconnect.interval();
        let max_attempts = self.config.reconnect.max_attempts;
        info!(interval_ms = interval.as_millis() as u64, ?max_attempts, "Reconnect scheduled");

        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            let outcome = retry_at_fixed_interval("reconnect", interval, max_attempts, &token, |attempt| {
                let controller = controller.clone();
                let token = token.clone();
                async move {
                    let Some(inner) = controller.upgrade() else {
                        token.cancel();
                        return Err(ClientError::cancelled("reconnect"));
                    };
                    inner.set_reconnect_state(epoch, ReconnectState::InProgress);
                    inner.events.emit(ClientEvent::Reconnecting { attempt, timestamp: chrono::Utc::now() });

                    let result = inner.connect_generation().await;
                    if result.is_err() {
                        inner.set_reconnect_state(epoch, ReconnectState::Scheduled);
                    }
                    result
                }
            })
            .await;

            if let Some(inner) = controller.upgrade() {
                inner.finish_reconnect(epoch, outcome);
            }
        });
    }

    fn set_reconnect_state(&self, epoch: u64, state: ReconnectState) {
        let mut core = self.core.lock();
        if core.reconnect_epoch == epoch {
            core.reconnect = state;
        }
    }

    fn finish_reconnect(&self, epoch: u64, outcome: RetryOutcome<()>) {
        let mut core = self.core.lock();
        if core.reconnect_epoch != epoch {
            return;
        }
        core.reconnect = ReconnectState::Off;
        core.reconnect_cancel = None;
        drop(core);

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => info!(attempts, "Reconnected"),
            RetryOutcome::Cancelled { attempts } => debug!(attempts, "Reconnect cancelled"),
            RetryOutcome::Exhausted { attempts, last_error } => self.notify(
                NotificationSeverity::Critical,
                format!("Reconnect gave up after {attempts} attempts: {last_error}"),
            ),
        }
    }

    pub(crate) fn stop_reconnect(&self) {
        let mut core = self.core.lock();
        if let Some(token) = core.reconnect_cancel.take() {
            token.cancel();
            debug!("Reconnect stopped");
        }
        core.reconnect_epoch += 1;
        core.reconnect = ReconnectState::Off;
    }

    pub(crate) fn start_still_refresh(self: &Arc<Self>, interval: Duration, options: StillOptions) -> ClientResult<()> {
        if interval.is_zero() {
            return Err(ClientError::invalid_argument("interval", "must be greater than zero"));
        }
        let token = {
            let mut core = self.core.lock();
            let state = self.state();
            if !matches!(state, SessionState::Ready | SessionState::Active) {
                return Err(ClientError::invalid_state("ready", state));
            }
            if let Some(previous) = core.still_refresh.take() {
                previous.cancel();
            }
            let token = core.cancel.child_token();
            core.still_refresh = Some(token.clone());
            token
        };

        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = controller.upgrade() else { break };

                let captured = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    captured = inner.still_image(&options) => captured,
                };
                match captured {
                    Ok(image) => inner.events.emit(ClientEvent::StillImage { image, timestamp: chrono::Utc::now() }),
                    Err(ClientError::RequestInFlight { transaction }) => {
                        debug!(%transaction, "Skipping still refresh while a request is in flight");
                    }
                    Err(e) => warn!(error = %e, "Still refresh failed"),
                }
            }
            debug!("Still refresh loop finished");
        });
        info!(interval_ms = interval.as_millis() as u64, "Still refresh started");
        Ok(())
    }
}
