//! Per-run state threaded through setup, scenarios and cleanup.

use crate::command::CommandRunner;
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{RunId, SuiteConfig};
use crate::sandbox::{HealthProbe, SandboxManager, SandboxRegistry};
use crate::trust::{TrustBootstrapper, TrustMaterial};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Owns everything one harness run shares: its id, the loaded config, the
/// process runner, the sandbox registry and the trust material.
pub struct RunContext<R> {
    run_id: RunId,
    config: SuiteConfig,
    runner: R,
    registry: SandboxRegistry,
    trust: Option<TrustMaterial>,
    interrupt: Arc<AtomicBool>,
    started: Instant,
}

impl<R: CommandRunner> RunContext<R> {
    pub fn new(config: SuiteConfig, runner: R) -> Self {
        Self {
            run_id: RunId::new(),
            config,
            runner,
            registry: SandboxRegistry::default(),
            trust: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        }
    }

    /// Share an externally owned interrupt flag (e.g. set by a signal handler).
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Milliseconds since the context was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    #[must_use]
    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn trust(&self) -> Option<&TrustMaterial> {
        self.trust.as_ref()
    }

    pub fn set_trust(&mut self, material: TrustMaterial) {
        self.trust = Some(material);
    }

    #[must_use]
    pub fn sandboxes(&self) -> SandboxManager<'_, R> {
        SandboxManager::new(&self.runner, &self.config.runtime, &self.registry)
    }

    #[must_use]
    pub fn health_probe(&self) -> HealthProbe<'_, R> {
        HealthProbe::new(self.sandboxes(), self.config.health.interval())
    }

    /// Fails with `E_TRUST_MATERIAL` until [`Self::set_trust`] has been called.
    pub fn bootstrapper(&self) -> HarnessResult<TrustBootstrapper<'_, R>> {
        let material = self.trust.as_ref().ok_or_else(|| {
            HarnessError::new(
                ErrorCode::TrustMaterial,
                "trust material has not been prepared for this run",
            )
        })?;
        Ok(TrustBootstrapper::new(
            &self.runner,
            self.sandboxes(),
            &self.config.trust,
            material,
        ))
    }
}
