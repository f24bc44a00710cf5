use anyhow::{anyhow, Result};
use std::time::Duration;
use tracing::{debug, info};

use super::SocketConnection;
use crate::clock::{expected_position, ClockEstimator, SystemClock, TimeSource};
use crate::config::SyncConfig;
use crate::protocol::{
    ActionMediaEvent, ActionStateEvent, ClientEvent, MediaEvent, MediaStatus, ServerEvent,
};

/// What a dispatched server event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    ForwardSample,
    BackwardSample,
    MediaChanged,
    Ignored,
}

/// Clock estimator plus the last media status seen on the socket
#[derive(Debug, Clone)]
pub struct SyncSession<T: TimeSource = SystemClock> {
    estimator: ClockEstimator<T>,
    media: Option<MediaStatus>,
}

impl Default for SyncSession<SystemClock> {
    fn default() -> Self {
        Self::new(ClockEstimator::new())
    }
}

impl<T: TimeSource> SyncSession<T> {
    pub fn new(estimator: ClockEstimator<T>) -> Self {
        Self {
            estimator,
            media: None,
        }
    }

    pub fn estimator(&self) -> &ClockEstimator<T> {
        &self.estimator
    }

    pub fn media(&self) -> Option<&MediaStatus> {
        self.media.as_ref()
    }

    pub fn dispatch(&mut self, event: &ServerEvent) -> SyncEvent {
        match event {
            ServerEvent::ActionState(action) => match action {
                ActionStateEvent::SyncForward(delta) => {
                    self.estimator.add_forward_sample(*delta);
                    SyncEvent::ForwardSample
                }
                ActionStateEvent::SyncBackward(remote_ts) => {
                    self.estimator.add_backward_sample(*remote_ts as f64);
                    SyncEvent::BackwardSample
                }
                ActionStateEvent::Media(ActionMediaEvent::ChangeState(status)) => {
                    self.media = Some(status.clone());
                    SyncEvent::MediaChanged
                }
                ActionStateEvent::Media(
                    ActionMediaEvent::Play | ActionMediaEvent::Pause | ActionMediaEvent::Resume,
                ) => {
                    debug!(?action, "Media control event");
                    SyncEvent::Ignored
                }
            },
            ServerEvent::Error(value) => {
                debug!(%value, "Server error event");
                SyncEvent::Ignored
            }
            ServerEvent::Board(_)
            | ServerEvent::Websocket(_)
            | ServerEvent::Session(_)
            | ServerEvent::Text(_) => SyncEvent::Ignored,
        }
    }

    /// Both directions hold at least `cycles` samples
    pub fn is_synced(&self, cycles: usize) -> bool {
        self.estimator.forward_samples().len() >= cycles
            && self.estimator.backward_samples().len() >= cycles
    }

    /// Expected media position in seconds on the corrected clock
    pub fn expected_position(&self) -> Option<f64> {
        self.media
            .as_ref()
            .map(|status| expected_position(status, self.estimator.global_time()))
    }
}

/// Run one clock sync exchange: send `cycles` forward and backward requests
/// and feed replies into the session until both directions are full.
pub async fn run_sync<T: TimeSource>(
    conn: &mut SocketConnection,
    session: &mut SyncSession<T>,
    config: &SyncConfig,
) -> Result<f64> {
    session.estimator.reset();

    for _ in 0..config.cycles {
        let now = session.estimator.now_ms();
        conn.send_event(&ClientEvent::MediaEvent(MediaEvent::SyncForwardRequest(now)))
            .await?;
        conn.send_event(&ClientEvent::MediaEvent(MediaEvent::SyncBackwardRequest))
            .await?;
    }

    let timeout = Duration::from_millis(config.timeout_ms);
    tokio::time::timeout(timeout, async {
        while !session.is_synced(config.cycles) {
            let event = conn.next_event().await?;
            session.dispatch(&event);
        }
        Ok::<(), anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow!("Clock sync timed out after {}", humantime::format_duration(timeout)))??;

    let correction = session.estimator.correction();
    info!(correction, cycles = config.cycles, "Clock sync complete");
    Ok(correction)
}
