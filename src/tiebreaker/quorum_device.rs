use std::fmt::Debug;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::RwLock;
use tracing::info;

/// The cluster manager's side of a quorum device: the tiebreaker registers with it and
///  periodically reports whether the partition it is in should be quorate.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuorumDevice: Debug + Send + Sync + 'static {
    async fn register(&self, name: &str, votes: u32) -> anyhow::Result<()>;
    async fn report_vote(&self, quorate: bool) -> anyhow::Result<()>;
    async fn is_quorate(&self) -> anyhow::Result<bool>;
    async fn member_count(&self) -> anyhow::Result<usize>;
    async fn unregister(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct Registration {
    name: String,
    votes: u32,
    last_vote: Option<bool>,
}

/// A [QuorumDevice] for running standalone: a single member that is always quorate, and every
///  reported vote is logged.
#[derive(Debug, Default)]
pub struct LoggingQuorumDevice {
    registration: RwLock<Option<Registration>>,
}

impl LoggingQuorumDevice {
    pub fn new() -> LoggingQuorumDevice {
        Default::default()
    }

    pub async fn last_vote(&self) -> Option<bool> {
        self.registration.read().await
            .as_ref()
            .and_then(|r| r.last_vote)
    }
}

#[async_trait]
impl QuorumDevice for LoggingQuorumDevice {
    async fn register(&self, name: &str, votes: u32) -> anyhow::Result<()> {
        let mut registration = self.registration.write().await;
        if let Some(existing) = registration.as_ref() {
            anyhow::bail!("quorum device is already registered as {}", existing.name);
        }
        info!("registered quorum device {} with {} vote(s)", name, votes);
        *registration = Some(Registration {
            name: name.to_string(),
            votes,
            last_vote: None,
        });
        Ok(())
    }

    async fn report_vote(&self, quorate: bool) -> anyhow::Result<()> {
        let mut registration = self.registration.write().await;
        match registration.as_mut() {
            Some(r) => {
                if r.last_vote != Some(quorate) {
                    info!("quorum device {}: voting {} ({} vote(s))", r.name, if quorate { "quorate" } else { "not quorate" }, r.votes);
                }
                r.last_vote = Some(quorate);
                Ok(())
            }
            None => anyhow::bail!("quorum device is not registered"),
        }
    }

    async fn is_quorate(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn member_count(&self) -> anyhow::Result<usize> {
        Ok(1)
    }

    async fn unregister(&self) -> anyhow::Result<()> {
        if let Some(r) = self.registration.write().await.take() {
            info!("unregistered quorum device {}", r.name);
        }
        Ok(())
    }
}
