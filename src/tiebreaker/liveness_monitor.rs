use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::icmp::probe::Prober;
use crate::icmp::probe_outcome::ProbeOutcome;
use crate::tiebreaker::errors::{ConfigError, StartError};
use crate::tiebreaker::hysteresis_config::HysteresisConfig;
use crate::tiebreaker::vote_tracker::{VoteTracker, VoteTransition};

#[derive(Debug, Clone, Eq, PartialEq)]
struct MonitorTarget {
    host: String,
    config: HysteresisConfig,
}

/// The state shared between the monitor's background task and its callers. The background
///  task owns the vote and the counters; callers only configure, and read the vote.
#[derive(Debug, Default)]
struct MonitorState {
    target: Option<MonitorTarget>,
    /// changes whenever the target does, so a probe can tell that its target was replaced
    ///  while it was in flight, even if it was changed back in the meantime
    generation: u64,
    tracker: VoteTracker,
    running: bool,
}
impl MonitorState {
    fn configure(&mut self, host: &str, config: HysteresisConfig) {
        if !self.is_current_target(host) {
            // counters refer to the previous target, the vote is kept as the best guess we have
            self.tracker.reset_counters();
            self.generation += 1;
        }
        self.target = Some(MonitorTarget {
            host: host.to_string(),
            config,
        });
    }

    fn is_current_target(&self, host: &str) -> bool {
        self.target.as_ref()
            .map(|t| t.host == host)
            .unwrap_or(false)
    }

    fn is_current_generation(&self, generation: u64) -> bool {
        self.target.is_some() && self.generation == generation
    }

    fn on_probe_outcome(&mut self, outcome: &ProbeOutcome) {
        let Some(target) = &self.target else {
            return;
        };

        if let ProbeOutcome::TransportError(e) = outcome {
            if e.is_permission_denied() {
                error!("IPv4 tiebreaker: cannot ping {} - raw sockets need root or CAP_NET_RAW: {}", target.host, e);
            }
            else {
                warn!("IPv4 tiebreaker: pinging {} failed: {}", target.host, e);
            }
        }

        match self.tracker.on_probe(outcome.is_success(), &target.config) {
            VoteTransition::MissTolerated { misses, threshold } => {
                debug!("IPv4 tiebreaker: missed ping ({}/{}); {}", misses, threshold, outcome);
            }
            VoteTransition::HitPending { hits, threshold } => {
                debug!("IPv4 tiebreaker: ping reply from {} ({}/{})", target.host, hits, threshold);
            }
            VoteTransition::CameOnline => {
                info!("IPv4 tiebreaker @ {} online", target.host);
            }
            VoteTransition::WentOffline => {
                info!("IPv4 tiebreaker @ {} offline", target.host);
            }
            VoteTransition::Unchanged => {}
        }
    }

    fn clear(&mut self) {
        self.target = None;
        self.generation += 1;
        self.tracker.reset();
        self.running = false;
    }
}

/// Pings the tiebreaker address in the background and turns the results into a stable vote.
///
/// All access to the shared state goes through one reader / writer lock. Probing (which may
///  block for up to the probe timeout) happens without holding it, so neither reading the vote
///  nor reconfiguring ever waits for the network.
///
/// There is at most one background task per monitor: start / stop are serialized, and starting
///  a running monitor does nothing.
pub struct LivenessMonitor {
    state: Arc<RwLock<MonitorState>>,
    prober: Arc<dyn Prober>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LivenessMonitor {
    pub fn new(prober: Arc<dyn Prober>) -> LivenessMonitor {
        LivenessMonitor {
            state: Default::default(),
            prober,
            task: Default::default(),
        }
    }

    /// Sets (or replaces) the target and derives the hysteresis thresholds. Valid whether the
    ///  monitor is running or not; a probe that is in flight against a previous target is
    ///  discarded, and the next probe goes to the new one.
    pub async fn configure(&self, target: &str, token_timeout_micros: u64, base_interval_micros: u64) -> Result<(), ConfigError> {
        if target.is_empty() {
            return Err(ConfigError::MissingTarget);
        }
        let config = HysteresisConfig::derive(token_timeout_micros, base_interval_micros)?;

        self.state.write().await
            .configure(target, config);
        info!("IPv4 tiebreaker: target is {}", target);
        Ok(())
    }

    pub async fn start(&self) -> Result<(), StartError> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("liveness monitor is already running");
                return Ok(());
            }
        }

        {
            let mut state = self.state.write().await;
            if state.target.is_none() {
                return Err(StartError::NotConfigured);
            }
            state.running = true;
        }

        *task = Some(tokio::spawn(run_monitor_loop(self.state.clone(), self.prober.clone())));
        info!("liveness monitor started");
        Ok(())
    }

    /// Stops the background task and resets vote and target. The task is cancelled at its next
    ///  await point (an in-flight probe is dropped with its socket), and this returns only after
    ///  it has terminated, so there are no state changes afterwards.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("liveness monitor task failed: {}", e),
            }
            info!("liveness monitor stopped");
        }

        self.state.write().await
            .clear();
    }

    pub async fn current_vote(&self) -> bool {
        self.state.read().await
            .tracker.vote()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await
            .running
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_monitor_loop(state: Arc<RwLock<MonitorState>>, prober: Arc<dyn Prober>) {
    let mut sequence: u16 = 0;

    loop {
        let (target, generation) = {
            let state = state.read().await;
            match &state.target {
                Some(target) => (target.clone(), state.generation),
                None => break,
            }
        };

        sequence = sequence.wrapping_add(1);
        let outcome = prober.probe(&target.host, sequence).await;

        {
            let mut state = state.write().await;
            if !state.is_current_generation(generation) {
                // go straight to the new target rather than vote on the old one
                debug!("IPv4 tiebreaker: target changed while pinging {} - discarding result", target.host);
                continue;
            }
            state.on_probe_outcome(&outcome);
        }

        time::sleep(target.config.ping_interval()).await;
    }

    state.write().await.running = false;
    info!("IPv4 tiebreaker: no target - liveness monitor exiting");
}


#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use crate::icmp::probe::MockProber;
    use crate::test_util::prober::ScriptedProber;
    use super::*;

    const TOKEN_TIMEOUT_MICROS: u64 = 10_000_000;
    const BASE_INTERVAL_MICROS: u64 = 1_000_000;

    async fn configured_monitor(prober: Arc<dyn Prober>, target: &str) -> LivenessMonitor {
        let monitor = LivenessMonitor::new(prober);
        monitor.configure(target, TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await.unwrap();
        monitor
    }

    async fn counters(monitor: &LivenessMonitor) -> (u32, u32) {
        let state = monitor.state.read().await;
        (state.tracker.consecutive_hits(), state.tracker.consecutive_misses())
    }

    /// feeds outcomes one probe at a time, returning after the monitor has processed the last
    ///  one and started its next probe
    async fn feed(prober: &ScriptedProber, outcomes: impl IntoIterator<Item=ProbeOutcome>) {
        for outcome in outcomes {
            prober.answer(outcome).await;
            prober.next_probe().await;
        }
    }

    async fn bring_online(monitor: &LivenessMonitor, prober: &ScriptedProber) {
        prober.next_probe().await;
        feed(prober, vec![ProbeOutcome::Success; 9]).await;
        assert!(monitor.current_vote().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_target() {
        let monitor = LivenessMonitor::new(Arc::new(MockProber::new()));
        assert_eq!(monitor.start().await, Err(StartError::NotConfigured));
        assert!(!monitor.is_running().await);
        assert!(!monitor.current_vote().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_rejects_invalid_values() {
        let monitor = LivenessMonitor::new(Arc::new(MockProber::new()));
        assert_eq!(monitor.configure("", TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await, Err(ConfigError::MissingTarget));
        assert!(matches!(monitor.configure("10.0.0.1", 1_999_999, BASE_INTERVAL_MICROS).await, Err(ConfigError::FailoverTooFast { .. })));
        assert_eq!(monitor.start().await, Err(StartError::NotConfigured));
    }

    #[tokio::test(start_paused = true)]
    async fn test_comes_online_with_mock_prober() {
        let mut prober = MockProber::new();
        prober.expect_probe()
            .returning(|target, _| if target == "192.0.2.7" { ProbeOutcome::Success } else { ProbeOutcome::HostNotFound });

        let monitor = configured_monitor(Arc::new(prober), "192.0.2.7").await;
        monitor.start().await.unwrap();
        assert!(monitor.is_running().await);

        // 9 pings at an interval of 1.333s: the 9th ping happens at ~10.7s
        time::sleep(Duration::from_millis(10_500)).await;
        assert!(!monitor.current_vote().await);
        time::sleep(Duration::from_millis(500)).await;
        assert!(monitor.current_vote().await);

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rising_threshold() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();

        assert_eq!(prober.next_probe().await, "10.0.0.1");
        for hits in 1..=8 {
            feed(&prober, [ProbeOutcome::Success]).await;
            assert!(!monitor.current_vote().await);
            assert_eq!(counters(&monitor).await, (hits, 0));
        }

        feed(&prober, [ProbeOutcome::Success]).await;
        assert!(monitor.current_vote().await);
        assert_eq!(counters(&monitor).await, (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_misses_below_falling_threshold() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();
        bring_online(&monitor, &prober).await;

        feed(&prober, [
            ProbeOutcome::Timeout,
            ProbeOutcome::transport("sendto", io::Error::from(io::ErrorKind::PermissionDenied)),
        ]).await;
        assert!(monitor.current_vote().await);
        assert_eq!(counters(&monitor).await, (0, 2));

        feed(&prober, [ProbeOutcome::Success]).await;
        assert!(monitor.current_vote().await);
        assert_eq!(counters(&monitor).await, (0, 0));

        feed(&prober, [ProbeOutcome::HostUnreachable, ProbeOutcome::InvalidChecksum]).await;
        assert!(monitor.current_vote().await);
        feed(&prober, [ProbeOutcome::HostNotFound]).await;
        assert!(!monitor.current_vote().await);
        assert_eq!(counters(&monitor).await, (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_change_discards_in_flight_probe() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();

        assert_eq!(prober.next_probe().await, "10.0.0.1");
        feed(&prober, [ProbeOutcome::Success]).await;
        assert_eq!(counters(&monitor).await, (1, 0));

        // probe against 10.0.0.1 is in flight now
        monitor.configure("10.0.0.2", TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await.unwrap();
        assert_eq!(counters(&monitor).await, (0, 0));

        prober.answer(ProbeOutcome::Success).await;
        assert_eq!(prober.next_probe().await, "10.0.0.2");
        assert_eq!(counters(&monitor).await, (0, 0));
        assert!(!monitor.current_vote().await);

        feed(&prober, [ProbeOutcome::Success]).await;
        assert_eq!(counters(&monitor).await, (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_changed_and_changed_back_discards_in_flight_probe() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();

        assert_eq!(prober.next_probe().await, "10.0.0.1");
        monitor.configure("10.0.0.2", TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await.unwrap();
        monitor.configure("10.0.0.1", TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await.unwrap();

        // the probe was sent before the target changed, so it must not count
        prober.answer(ProbeOutcome::Success).await;
        assert_eq!(prober.next_probe().await, "10.0.0.1");
        assert_eq!(counters(&monitor).await, (0, 0));

        feed(&prober, [ProbeOutcome::Success]).await;
        assert_eq!(counters(&monitor).await, (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_change_keeps_vote() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();
        bring_online(&monitor, &prober).await;

        feed(&prober, [ProbeOutcome::Timeout]).await;
        assert_eq!(counters(&monitor).await, (0, 1));

        monitor.configure("10.0.0.2", TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await.unwrap();
        assert!(monitor.current_vote().await);
        assert_eq!(counters(&monitor).await, (0, 0));

        prober.answer(ProbeOutcome::Timeout).await;
        assert_eq!(prober.next_probe().await, "10.0.0.2");
        assert!(monitor.current_vote().await);
        assert_eq!(counters(&monitor).await, (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_same_target_keeps_counters() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();

        prober.next_probe().await;
        feed(&prober, [ProbeOutcome::Success, ProbeOutcome::Success]).await;

        monitor.configure("10.0.0.1", 20_000_000, BASE_INTERVAL_MICROS).await.unwrap();
        prober.answer(ProbeOutcome::Success).await;
        prober.next_probe().await;
        assert_eq!(counters(&monitor).await, (3, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_spawns_one_task() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();
        monitor.start().await.unwrap();

        prober.next_probe().await;
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(prober.num_pending_probes().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();
        bring_online(&monitor, &prober).await;

        // stop while a probe is in flight
        monitor.stop().await;
        assert!(!monitor.is_running().await);
        assert!(!monitor.current_vote().await);

        // the aborted probe's result has nobody to go to
        prober.answer(ProbeOutcome::Success).await;
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(prober.num_pending_probes().await, 0);
        assert!(!monitor.current_vote().await);

        monitor.stop().await;
        assert_eq!(monitor.start().await, Err(StartError::NotConfigured));

        monitor.configure("10.0.0.1", TOKEN_TIMEOUT_MICROS, BASE_INTERVAL_MICROS).await.unwrap();
        monitor.start().await.unwrap();
        assert!(monitor.is_running().await);
        assert_eq!(prober.next_probe().await, "10.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_target_is_cleared() {
        let prober = Arc::new(ScriptedProber::new());
        let monitor = configured_monitor(prober.clone(), "10.0.0.1").await;
        monitor.start().await.unwrap();
        prober.next_probe().await;

        monitor.state.write().await.target = None;
        prober.answer(ProbeOutcome::Success).await;
        time::sleep(Duration::from_secs(5)).await;

        assert!(!monitor.is_running().await);
        assert_eq!(prober.num_pending_probes().await, 0);
        assert_eq!(monitor.start().await, Err(StartError::NotConfigured));
    }
}
