use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{ProvisionError, Result};
use crate::runner::Runner;

/// Blind wait used unless polling is asked for.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(10);

/// How to decide that a freshly created cluster can take workloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep once for a fixed duration.
    Settle(Duration),
    /// Probe the API server with `kubectl` until it answers, backing off
    /// between attempts.
    Poll(PollPolicy),
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Settle(DEFAULT_SETTLE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Wall-clock bound on the whole poll, probes included.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(120),
        }
    }
}

impl PollPolicy {
    /// Pauses between failed probes. The sum never exceeds `timeout`.
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            factor: self.factor.max(1),
            max_delay: self.max_delay,
            remaining: self.timeout,
        }
    }
}

/// Exponential backoff schedule, capped per step and in total.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: u32,
    max_delay: Duration,
    remaining: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining.is_zero() || self.next.is_zero() {
            return None;
        }
        let delay = self.next.min(self.remaining);
        self.remaining -= delay;
        self.next = self
            .next
            .checked_mul(self.factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Some(delay)
    }
}

/// Blocks until the cluster is usable or the policy gives up.
pub async fn wait_until_ready<R: Runner + ?Sized>(
    runner: &R,
    cluster: &ClusterConfig,
    readiness: &Readiness,
) -> Result<()> {
    match readiness {
        Readiness::Settle(duration) => {
            println!("   Waiting for cluster to become ready...");
            runner.pause(*duration).await;
            Ok(())
        }
        Readiness::Poll(policy) => {
            println!("   Waiting for the cluster API to report ready...");
            let started = Instant::now();
            match tokio::time::timeout(policy.timeout, poll(runner, cluster, policy)).await {
                Ok(result) => result,
                Err(_) => Err(ProvisionError::NotReady {
                    cluster: cluster.name.clone(),
                    waited: started.elapsed(),
                }),
            }
        }
    }
}

async fn poll<R: Runner + ?Sized>(
    runner: &R,
    cluster: &ClusterConfig,
    policy: &PollPolicy,
) -> Result<()> {
    let probe = cluster.readiness_probe();
    let mut delays = policy.delays();
    let mut waited = Duration::ZERO;

    loop {
        // Refusals are expected while the control plane boots, so the probe
        // bypasses the status check warning.
        let outcome = runner.capture(&probe).await?;
        if outcome.succeeded() {
            info!(cluster = %cluster.name, ?waited, "cluster API is ready");
            return Ok(());
        }
        debug!(
            exit_code = outcome.exit_code,
            stderr = outcome.stderr.trim(),
            "readiness probe failed"
        );

        match delays.next() {
            Some(delay) => {
                runner.pause(delay).await;
                waited += delay;
            }
            None => {
                return Err(ProvisionError::NotReady {
                    cluster: cluster.name.clone(),
                    waited,
                })
            }
        }
    }
}
