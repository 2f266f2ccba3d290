use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::select;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::tiebreaker::liveness_monitor::LivenessMonitor;
use crate::tiebreaker::quorum_device::QuorumDevice;
use crate::tiebreaker::tiebreaker_config::TiebreakerConfig;

/// Combines the cluster's own view of quorum with the tiebreaker's vote. The tiebreaker only
///  matters for a member that is alone: it can take quorum away from it, and (with soft quorum
///  allowed) grant it.
pub fn decide_quorum_vote(quorate: bool, member_count: usize, tiebreaker_alive: bool, allow_soft_quorum: bool) -> bool {
    if quorate {
        !(member_count == 1 && !tiebreaker_alive)
    }
    else {
        member_count == 1 && tiebreaker_alive && allow_soft_quorum
    }
}

/// Runs the tiebreaker until `shutdown` completes: pings the target in the background, and
///  reports a vote to the quorum device once per ping interval.
pub async fn run_tiebreaker(
    config: TiebreakerConfig,
    device: Arc<dyn QuorumDevice>,
    monitor: Arc<LivenessMonitor>,
    shutdown: impl Future<Output=()>,
) -> anyhow::Result<()> {
    config.validate()?;
    monitor.configure(&config.target, config.token_timeout_micros()?, config.ping_interval_micros()?).await?;
    monitor.start().await?;

    if let Err(e) = device.register(&config.device_name, config.device_votes).await {
        monitor.stop().await;
        return Err(e.context("quorum device registration failed"));
    }
    info!("tiebreaker {} running against {}", config.device_name, config.target);

    select! {
        _ = shutdown => {
            info!("shutting down tiebreaker");
        }
        _ = _run_poll_loop(&config, device.as_ref(), monitor.as_ref()) => {}
    }

    let result = device.unregister().await
        .context("unregistering quorum device failed");
    monitor.stop().await;
    result
}

async fn _run_poll_loop(config: &TiebreakerConfig, device: &dyn QuorumDevice, monitor: &LivenessMonitor) {
    let mut previous_vote = None;

    loop {
        sleep(config.ping_interval).await;

        match _poll_once(config, device, monitor).await {
            Ok(vote) => {
                if previous_vote != Some(vote) {
                    debug!("reporting quorum vote {}", vote);
                }
                previous_vote = Some(vote);
            }
            Err(e) => {
                warn!("polling quorum device failed: {:#}", e);
            }
        }
    }
}

async fn _poll_once(config: &TiebreakerConfig, device: &dyn QuorumDevice, monitor: &LivenessMonitor) -> anyhow::Result<bool> {
    let quorate = device.is_quorate().await?;
    let member_count = device.member_count().await?;
    let tiebreaker_alive = monitor.current_vote().await;

    let vote = decide_quorum_vote(quorate, member_count, tiebreaker_alive, config.allow_soft_quorum);
    device.report_vote(vote).await?;
    Ok(vote)
}
