use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::trace;

use crate::icmp::probe::Prober;
use crate::icmp::probe_outcome::ProbeOutcome;

#[derive(Debug)]
struct PendingProbe {
    target: String,
    sequence: u16,
    reply: oneshot::Sender<ProbeOutcome>,
}

/// A [Prober] whose probes block until the test supplies their outcome. This gives tests full
///  control over the monitor's timing: a probe is 'in flight' for exactly as long as the test
///  wants it to be.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    pending: Mutex<VecDeque<PendingProbe>>,
    probe_started: Notify,
}
impl ScriptedProber {
    pub fn new() -> ScriptedProber {
        Default::default()
    }

    /// Waits until there is a probe in flight and returns its target
    pub async fn next_probe(&self) -> String {
        loop {
            let notified = self.probe_started.notified();
            if let Some(probe) = self.pending.lock().await.front() {
                return probe.target.clone();
            }
            notified.await;
        }
    }

    /// Completes the oldest probe in flight with the given outcome. If that probe was cancelled
    ///  in the meantime, the outcome is dropped.
    pub async fn answer(&self, outcome: ProbeOutcome) {
        match self.pending.lock().await.pop_front() {
            Some(probe) => {
                trace!("answering probe #{} to {} with {}", probe.sequence, probe.target, outcome);
                let _ = probe.reply.send(outcome);
            }
            None => panic!("no probe in flight"),
        }
    }

    pub async fn num_pending_probes(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn assert_no_pending_probes(&self) {
        assert!(
            self.pending.lock().await
                .is_empty()
        );
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target: &str, sequence: u16) -> ProbeOutcome {
        let (reply, outcome) = oneshot::channel();
        self.pending.lock().await.push_back(PendingProbe {
            target: target.to_string(),
            sequence,
            reply,
        });
        self.probe_started.notify_waiters();

        // the sender is only dropped unanswered if the prober itself goes away
        outcome.await.unwrap_or(ProbeOutcome::Timeout)
    }
}
