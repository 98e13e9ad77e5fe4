//! Health polling for started sandboxes.

use crate::command::CommandRunner;
use crate::model::HealthState;
use crate::sandbox::SandboxManager;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Upper bound on the polling interval.
pub const MAX_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Polls a sandbox's health signal until it reads healthy or time runs out.
pub struct HealthProbe<'a, R> {
    sandboxes: SandboxManager<'a, R>,
    interval: Duration,
}

impl<'a, R: CommandRunner> HealthProbe<'a, R> {
    pub fn new(sandboxes: SandboxManager<'a, R>, interval: Duration) -> Self {
        Self {
            sandboxes,
            interval: interval.clamp(Duration::from_millis(1), MAX_HEALTH_INTERVAL),
        }
    }

    /// `true` on the first healthy observation, `false` once `timeout` has
    /// elapsed. Inspect failures count as "not yet healthy"; never errors.
    /// Each inspect call is bounded by whatever is left of `timeout`.
    pub async fn wait_healthy(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut polls = 0_u32;
        loop {
            polls += 1;
            // A wedged inspect must not carry the probe past its deadline.
            let budget = self
                .sandboxes
                .call_timeout()
                .min(deadline.saturating_duration_since(Instant::now()));
            let state = self.sandboxes.health_within(name, budget).await;
            if state == HealthState::Healthy {
                info!(sandbox = name, polls, "sandbox healthy");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(sandbox = name, polls, ?state, "health deadline reached");
                return false;
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }
}
