//! Single-shot command dispatch: `Start -> Connected -> (Published | ListenActive | Cancelled)`
//!
//! The relay session handed to [`CommandDispatch::run`] is closed on every
//! exit path, including cancellation and errors raised mid-dispatch.

use std::future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::envelope::{CommandEnvelope, RelayCommand};
use crate::error::{EnvelopeError, RelayError};
use crate::identity::WatchdogIdentity;
use crate::keepalive::saturating_deadline;
use crate::relay::{CommandRelay, PublishOutcome};
use crate::status::StatusMessage;

/// Time left for the watchdog to answer after a command is published
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published { outcome: PublishOutcome, statuses: usize },
    Listened { statuses: usize },
    /// Cancelled before the command went out; nothing was published
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CommandDispatch {
    identity: WatchdogIdentity,
    command: RelayCommand,
    envelope: Option<CommandEnvelope>,
    grace: Duration,
}

impl CommandDispatch {
    /// Validates the command before any connection is made
    pub fn new(
        identity: WatchdogIdentity,
        command: RelayCommand,
        duration_ms: Option<i64>,
        grace: Duration,
    ) -> Result<Self, EnvelopeError> {
        let envelope = command.envelope(duration_ms)?;
        Ok(Self {
            identity,
            command,
            envelope,
            grace,
        })
    }

    pub fn command(&self) -> RelayCommand {
        self.command
    }

    pub fn envelope(&self) -> Option<&CommandEnvelope> {
        self.envelope.as_ref()
    }

    pub async fn run<R, F>(
        &self,
        relay: &R,
        cancel: &CancellationToken,
        mut on_status: F,
    ) -> Result<DispatchOutcome, RelayError>
    where
        R: CommandRelay + ?Sized,
        F: FnMut(&StatusMessage),
    {
        let result = self.drive(relay, cancel, &mut on_status).await;
        if let Err(e) = relay.close().await {
            warn!("Failed to close relay session: {}", e);
        }
        result
    }

    async fn drive<R, F>(
        &self,
        relay: &R,
        cancel: &CancellationToken,
        on_status: &mut F,
    ) -> Result<DispatchOutcome, RelayError>
    where
        R: CommandRelay + ?Sized,
        F: FnMut(&StatusMessage),
    {
        let mut statuses = relay.subscribe(&self.identity).await?;
        debug!("Dispatch connected for {}", self.identity);

        let Some(envelope) = &self.envelope else {
            info!("Listening for watchdog messages on {}", self.identity.status_topic());
            let received = drain_statuses(&mut statuses, cancel, None, on_status).await;
            return Ok(DispatchOutcome::Listened { statuses: received });
        };

        if cancel.is_cancelled() {
            info!("Command {} cancelled before publishing", self.command);
            return Ok(DispatchOutcome::Cancelled);
        }
        let outcome = relay.publish(&self.identity, envelope).await?;
        if let PublishOutcome::Rejected { reason } = &outcome {
            error!("Command {} was rejected: {}", self.command, reason);
            return Ok(DispatchOutcome::Published { outcome, statuses: 0 });
        }

        let deadline = saturating_deadline(Instant::now(), self.grace);
        let received = drain_statuses(&mut statuses, cancel, Some(deadline), on_status).await;
        Ok(DispatchOutcome::Published { outcome, statuses: received })
    }
}

/// Deliver status messages until the deadline, cancellation or the end of
/// the subscription. `None` waits without a deadline.
async fn drain_statuses<F>(
    statuses: &mut mpsc::Receiver<StatusMessage>,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    on_status: &mut F,
) -> usize
where
    F: FnMut(&StatusMessage),
{
    let expiry = async {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(expiry);

    let mut received = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Dispatch cancelled");
                break;
            }
            message = statuses.recv() => match message {
                Some(message) => {
                    received += 1;
                    on_status(&message);
                }
                None => {
                    debug!("Status subscription ended");
                    break;
                }
            },
            _ = &mut expiry => break,
        }
    }
    received
}
