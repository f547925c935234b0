//! Keepalive supervision loop: `Idle -> Probing -> (Acked | Missed)`, forever
//!
//! The loop only stops on cancellation or a lost transport. Misses are
//! recorded and reported, never retried early: the next probe always waits
//! for the interval boundary.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::LinkUnavailable;
use crate::keepalive::{KeepaliveState, KeepaliveTimer, LinkResult};
use crate::link::{LineTransport, SerialLinkChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepalivePhase {
    Idle,
    Probing,
    Acked,
    Missed,
}

/// Published after every transition for observers of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSnapshot {
    pub phase: KeepalivePhase,
    pub state: KeepaliveState,
    pub probes: u64,
}

/// Session totals, logged when the agent stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepaliveReport {
    pub probes: u64,
    pub acks: u64,
    pub timeouts: u64,
    pub malformed: u64,
    pub longest_streak: u32,
}

impl KeepaliveReport {
    fn record(&mut self, result: &LinkResult, streak: u32) {
        self.probes += 1;
        match result {
            LinkResult::Ack => self.acks += 1,
            LinkResult::Timeout => self.timeouts += 1,
            LinkResult::Malformed(_) => self.malformed += 1,
        }
        self.longest_streak = self.longest_streak.max(streak);
    }

    pub fn misses(&self) -> u64 {
        self.timeouts + self.malformed
    }
}

pub struct KeepaliveSupervisor<T> {
    channel: SerialLinkChannel<T>,
    timer: KeepaliveTimer,
    state: KeepaliveState,
    probe_timeout: Duration,
    report: KeepaliveReport,
    snapshots: watch::Sender<KeepaliveSnapshot>,
}

impl<T: LineTransport> KeepaliveSupervisor<T> {
    pub fn new(
        channel: SerialLinkChannel<T>,
        timer: KeepaliveTimer,
        state: KeepaliveState,
        probe_timeout: Duration,
    ) -> Self {
        let (snapshots, _) = watch::channel(KeepaliveSnapshot {
            phase: KeepalivePhase::Idle,
            state,
            probes: 0,
        });
        Self {
            channel,
            timer,
            state,
            probe_timeout,
            report: KeepaliveReport::default(),
            snapshots,
        }
    }

    /// Live view of the loop, including `consecutive_misses`
    pub fn snapshots(&self) -> watch::Receiver<KeepaliveSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn state(&self) -> &KeepaliveState {
        &self.state
    }

    /// Run until `cancel` fires or the link is lost.
    ///
    /// Consumes the supervisor so the transport is released on every exit.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<KeepaliveReport, LinkUnavailable> {
        info!(
            "Sending {} every {:?} on {}",
            crate::link::KEEPALIVE_TOKEN,
            self.state.interval,
            self.channel.endpoint()
        );
        let outcome = self.supervise(&cancel).await;
        let report = std::mem::take(&mut self.report);
        drop(self);
        outcome.map(|()| report)
    }

    async fn supervise(&mut self, cancel: &CancellationToken) -> Result<(), LinkUnavailable> {
        loop {
            let next = self.timer.next_probe_at(&self.state, Instant::now());
            self.publish(KeepalivePhase::Idle);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Keepalive supervision cancelled");
                    return Ok(());
                }
                _ = sleep_until(next) => {}
            }

            if let Err(e) = self.probe_once().await {
                error!("Keepalive link lost: {}", e);
                return Err(e);
            }
        }
    }

    /// One full transition through `Probing`
    pub async fn probe_once(&mut self) -> Result<LinkResult, LinkUnavailable> {
        self.state = self.timer.mark_sent(&self.state, Instant::now());
        self.publish(KeepalivePhase::Probing);

        let result = self.channel.probe(self.probe_timeout).await?;
        self.state = self.timer.record_result(&self.state, &result, Instant::now());
        self.report.record(&result, self.state.consecutive_misses);

        match &result {
            LinkResult::Ack => info!("Keepalive OK - watchdog active"),
            LinkResult::Timeout => warn!(
                consecutive_misses = self.state.consecutive_misses,
                "No response from watchdog"
            ),
            LinkResult::Malformed(raw) => warn!(
                consecutive_misses = self.state.consecutive_misses,
                "Unexpected watchdog response: {}",
                String::from_utf8_lossy(raw)
            ),
        }
        if let Some(streak) = self.timer.streak_to_report(&self.state) {
            error!(consecutive_misses = streak, "Watchdog missed {} keepalives in a row", streak);
        }

        let phase = if result.is_ack() {
            KeepalivePhase::Acked
        } else {
            KeepalivePhase::Missed
        };
        self.publish(phase);
        Ok(result)
    }

    fn publish(&self, phase: KeepalivePhase) {
        self.snapshots.send_replace(KeepaliveSnapshot {
            phase,
            state: self.state,
            probes: self.report.probes,
        });
    }
}
