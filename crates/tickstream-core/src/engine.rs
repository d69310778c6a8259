// ── Connection engine ──
//
// One task per live resource drives the transport-selection state
// machine: walk the preference list, give each transport a full retry
// budget with exponential backoff, read frames with a heartbeat
// window, and fall through to the next transport when the budget is
// spent. The cache is applied from exactly this task, so envelope
// application is strictly sequential in receipt order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tickstream_api::envelope::Decoder;
use tickstream_api::frames::{Frame, FrameStream, Transport};

use crate::backoff::BackoffPolicy;
use crate::store::ResourceCache;

/// Connection state observable by consumers.
///
/// `Idle` covers both "not started" and "suspended while hidden" --
/// in either case no transport is open and no attempt is scheduled.
/// `Offline` means the whole preference list is exhausted and the
/// cache is stale-but-available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Offline,
}

impl ConnectionState {
    /// Short label for a UI connection indicator.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "live",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Offline => "offline -- showing cached data",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything one resource's engine task needs.
pub(crate) struct Engine<T: Clone + Send + Sync + 'static> {
    pub(crate) name: String,
    pub(crate) transports: Vec<Arc<dyn Transport>>,
    pub(crate) decoder: Decoder,
    pub(crate) cache: Arc<ResourceCache<T>>,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) visibility: watch::Receiver<bool>,
    pub(crate) cancel: CancellationToken,
    pub(crate) heartbeat: Duration,
    pub(crate) backoff: BackoffPolicy,
}

impl<T> Engine<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Main loop: runs until cancelled.
    pub(crate) async fn run(self) {
        let Self {
            name,
            transports,
            decoder,
            cache,
            state,
            mut visibility,
            cancel,
            heartbeat,
            backoff,
        } = self;

        'restart: loop {
            if cancel.is_cancelled() {
                return;
            }

            // Visibility-driven suspension: while hidden, no transport
            // is open and no reconnect is scheduled. Resuming restarts
            // the chain from the first preferred transport with a
            // fresh retry budget.
            if !*visibility.borrow() {
                let _ = state.send(ConnectionState::Idle);
                tracing::debug!(resource = %name, "hidden, suspending connection attempts");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    res = wait_until_visible(&mut visibility) => {
                        if res.is_err() {
                            return;
                        }
                        tracing::debug!(resource = %name, "visible again, restarting transport chain");
                    }
                }
            }

            for transport in &transports {
                let mut attempt: u32 = 0;
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if !*visibility.borrow() {
                        continue 'restart;
                    }

                    let _ = state.send(if attempt == 0 {
                        ConnectionState::Connecting
                    } else {
                        ConnectionState::Reconnecting { attempt }
                    });

                    let connected = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        result = transport.connect() => result,
                    };

                    match connected {
                        Ok(frames) => {
                            tracing::info!(
                                resource = %name,
                                transport = %transport.kind(),
                                "transport connected"
                            );
                            let _ = state.send(ConnectionState::Connected);
                            attempt = 0;

                            let outcome = read_frames(
                                frames,
                                &decoder,
                                &cache,
                                &mut visibility,
                                &cancel,
                                heartbeat,
                            )
                            .await;

                            match outcome {
                                ReadOutcome::Cancelled => return,
                                ReadOutcome::Hidden => {
                                    tracing::debug!(resource = %name, "hidden, closing transport");
                                    continue 'restart;
                                }
                                ReadOutcome::Stalled => {
                                    tracing::info!(
                                        resource = %name,
                                        transport = %transport.kind(),
                                        "no frames within heartbeat window, reconnecting"
                                    );
                                }
                                ReadOutcome::Closed => {
                                    tracing::info!(
                                        resource = %name,
                                        transport = %transport.kind(),
                                        "transport closed"
                                    );
                                }
                                ReadOutcome::Errored => {}
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                resource = %name,
                                transport = %transport.kind(),
                                error = %e,
                                attempt,
                                "transport connect failed"
                            );
                        }
                    }

                    if attempt >= backoff.max_retries {
                        tracing::warn!(
                            resource = %name,
                            transport = %transport.kind(),
                            "retry budget exhausted, advancing to next transport"
                        );
                        break;
                    }

                    let delay = backoff.delay(attempt);
                    let _ = state.send(ConnectionState::Reconnecting { attempt });
                    tracing::debug!(
                        resource = %name,
                        delay_ms = delay.as_millis() as u64,
                        attempt,
                        "waiting before reconnect"
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        res = visibility_lost(&mut visibility) => {
                            if res.is_err() {
                                return;
                            }
                            continue 'restart;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    attempt += 1;
                }
            }

            // The whole preference list is exhausted: keep the stale
            // cache, stop all timers. Only a hide/show cycle (or a
            // fresh open) restarts the chain from here.
            let _ = state.send(ConnectionState::Offline);
            tracing::warn!(resource = %name, "all transports exhausted, serving cached data");

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    res = visibility.changed() => {
                        if res.is_err() {
                            return;
                        }
                        if *visibility.borrow_and_update() {
                            continue 'restart;
                        }
                    }
                }
            }
        }
    }
}

// ── Frame pump ───────────────────────────────────────────────────────

enum ReadOutcome {
    Cancelled,
    Hidden,
    Closed,
    Stalled,
    Errored,
}

/// Pump one connected transport until it ends, stalls, or is
/// interrupted. Malformed frames are logged and dropped; they never
/// kill the stream.
async fn read_frames<T>(
    mut frames: FrameStream,
    decoder: &Decoder,
    cache: &ResourceCache<T>,
    visibility: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
    heartbeat: Duration,
) -> ReadOutcome
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            res = visibility.changed() => {
                if res.is_err() {
                    return ReadOutcome::Cancelled;
                }
                if !*visibility.borrow_and_update() {
                    return ReadOutcome::Hidden;
                }
            }
            item = tokio::time::timeout(heartbeat, frames.next()) => match item {
                Err(_elapsed) => return ReadOutcome::Stalled,
                Ok(None) => return ReadOutcome::Closed,
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "transport stream error");
                    return ReadOutcome::Errored;
                }
                Ok(Some(Ok(Frame::KeepAlive))) => {
                    tracing::trace!("keep-alive frame");
                }
                Ok(Some(Ok(Frame::Text(text)))) => match decoder(&text) {
                    Ok(envelopes) => cache.apply_all(&envelopes),
                    Err(e) => tracing::debug!(error = %e, "discarding malformed frame"),
                },
            },
        }
    }
}

// ── Visibility helpers ───────────────────────────────────────────────

async fn wait_until_visible(
    visibility: &mut watch::Receiver<bool>,
) -> Result<(), watch::error::RecvError> {
    while !*visibility.borrow_and_update() {
        visibility.changed().await?;
    }
    Ok(())
}

/// Resolves when visibility transitions to hidden.
async fn visibility_lost(
    visibility: &mut watch::Receiver<bool>,
) -> Result<(), watch::error::RecvError> {
    loop {
        visibility.changed().await?;
        if !*visibility.borrow_and_update() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels() {
        assert_eq!(ConnectionState::Connected.label(), "live");
        assert_eq!(ConnectionState::Reconnecting { attempt: 2 }.label(), "reconnecting");
        assert!(ConnectionState::Connected.is_live());
        assert!(!ConnectionState::Offline.is_live());
    }
}
