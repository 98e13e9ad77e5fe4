//! Suite wiring: pre-clean, setup, sequential scenarios, final cleanup.

pub mod load;

pub use load::{image_waves, load_suite_file, validate_suite};

use crate::command::CommandRunner;
use crate::context::RunContext;
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{
    ArtifactOutcome, ArtifactStep, CleanupReport, CommandOptions, RunStatus, ScenarioReport,
    ScenarioSpec, SetupReport, SuiteConfig, SuiteReport, REPORT_VERSION,
};
use crate::runner::{NoopProgress, ProgressCallback, ProgressEvent, ScenarioRunner};
use crate::trust::TrustMaterial;
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Bound for artifact steps that do not set their own.
const DEFAULT_ARTIFACT_TIMEOUT: Duration = Duration::from_secs(600);

/// What [`Suite::run`] should do.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Reuse artifacts, key material and images from an earlier setup.
    pub skip_setup: bool,
    /// Run only these scenarios, in suite order. Empty runs all.
    pub only: Vec<String>,
}

/// A validated suite bound to one run.
pub struct Suite<R> {
    ctx: RunContext<R>,
    progress: Box<dyn ProgressCallback>,
}

impl<R: CommandRunner> Suite<R> {
    /// Validate `config` and open a run for it.
    pub fn new(config: SuiteConfig, runner: R) -> HarnessResult<Self> {
        validate_suite(&config)?;
        Ok(Self {
            ctx: RunContext::new(config, runner),
            progress: Box::new(NoopProgress),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop before the next scenario once `flag` is set.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.ctx = self.ctx.with_interrupt(flag);
        self
    }

    #[must_use]
    pub fn context(&self) -> &RunContext<R> {
        &self.ctx
    }

    fn config(&self) -> &SuiteConfig {
        self.ctx.config()
    }

    fn phase(&self, phase: &str) {
        info!(run = %self.ctx.run_id().short(), phase, "setup");
        self.progress.on_progress(&ProgressEvent::SetupPhase {
            phase: phase.to_string(),
        });
    }

    fn check_interrupt(&self) -> HarnessResult<()> {
        if self.ctx.is_interrupted() {
            return Err(HarnessError::interrupted());
        }
        Ok(())
    }

    /// Pre-clean, artifacts, trust material, then images in dependency waves.
    pub async fn setup(&mut self) -> HarnessResult<SetupReport> {
        self.phase("pre-clean");
        self.preclean().await;
        self.check_interrupt()?;

        self.phase("artifacts");
        let mut artifacts = Vec::new();
        for step in &self.config().artifacts {
            artifacts.push(self.run_artifact(step).await?);
            self.check_interrupt()?;
        }

        self.phase("trust material");
        let material = TrustMaterial::ensure(self.ctx.runner(), self.config()).await?;
        let key_generated = material.generated;
        self.ctx.set_trust(material);
        self.check_interrupt()?;

        self.phase("images");
        let images = self.build_images().await?;

        Ok(SetupReport {
            artifacts,
            images,
            key_generated,
        })
    }

    /// Force-remove every sandbox a scenario names. Errors are ignored.
    async fn preclean(&self) {
        let names: BTreeSet<String> = self
            .config()
            .scenarios
            .iter()
            .filter_map(ScenarioSpec::sandbox_name)
            .map(str::to_string)
            .collect();
        let names: Vec<String> = names.into_iter().collect();
        let failed = self.ctx.sandboxes().remove_all(&names).await;
        if !failed.is_empty() {
            warn!(?failed, "pre-clean left sandboxes behind");
        }
    }

    async fn run_artifact(&self, step: &ArtifactStep) -> HarnessResult<ArtifactOutcome> {
        let config = self.config();
        let output = step.output.as_ref().map(|path| config.resolve(path));
        if step.skip_if_exists && output.as_ref().is_some_and(|path| path.exists()) {
            info!(artifact = %step.name, "cached, skipping");
            return Ok(ArtifactOutcome {
                name: step.name.clone(),
                cached: true,
            });
        }

        info!(artifact = %step.name, program = %step.program, "building artifact");
        let args: Vec<String> = step.args.iter().map(|arg| config.expand(arg)).collect();
        let timeout = step
            .timeout_ms
            .map_or(DEFAULT_ARTIFACT_TIMEOUT, Duration::from_millis);
        let mut options = CommandOptions::with_timeout(timeout).envs(&step.env);
        if let Some(cwd) = &step.cwd {
            options = options.cwd(config.resolve(cwd));
        }
        let result = self.ctx.runner().run(&step.program, &args, &options).await?;
        if !result.success() {
            return Err(HarnessError::with_context(
                ErrorCode::Artifact,
                format!("artifact step '{}' failed", step.name),
                result.diagnostics(),
            ));
        }

        if let Some(path) = &output {
            if !path.exists() {
                return Err(HarnessError::with_context(
                    ErrorCode::Artifact,
                    format!("artifact step '{}' did not produce its output", step.name),
                    serde_json::json!({ "output": path.display().to_string() }),
                ));
            }
            if step.executable {
                make_executable(path).await?;
            }
        }
        Ok(ArtifactOutcome {
            name: step.name.clone(),
            cached: false,
        })
    }

    /// Builds run concurrently within a wave; a wave starts only after the
    /// previous one finished. The first failure in a wave aborts setup once
    /// that wave has settled.
    async fn build_images(&self) -> HarnessResult<Vec<String>> {
        let config = self.config();
        let sandboxes = self.ctx.sandboxes();
        let mut built = Vec::new();
        for wave in image_waves(&config.images)? {
            let results = join_all(
                wave.iter()
                    .map(|image| sandboxes.build(image, &config.work_dir)),
            )
            .await;
            for (image, result) in wave.iter().zip(results) {
                result?;
                built.push(image.tag.clone());
            }
            self.check_interrupt()?;
        }
        Ok(built)
    }

    /// Scenarios to run for `only`, in suite order.
    fn select(&self, only: &[String]) -> HarnessResult<Vec<ScenarioSpec>> {
        if let Some(unknown) = only
            .iter()
            .find(|name| self.config().scenario(name).is_none())
        {
            return Err(HarnessError::config(format!("unknown scenario '{unknown}'")));
        }
        Ok(self
            .config()
            .scenarios
            .iter()
            .filter(|spec| only.is_empty() || only.contains(&spec.name))
            .cloned()
            .collect())
    }

    /// Run the selected scenarios one at a time.
    ///
    /// A failing scenario does not stop the suite; an interrupt does, before
    /// the next scenario starts.
    pub async fn run_scenarios(&mut self, only: &[String]) -> HarnessResult<Vec<ScenarioReport>> {
        let selected = self.select(only)?;
        if self.ctx.trust().is_none()
            && selected.iter().any(|spec| spec.sandbox_name().is_some())
        {
            let material = TrustMaterial::load(self.config()).await?;
            self.ctx.set_trust(material);
        }

        let started = self.ctx.elapsed_ms();
        self.progress.on_progress(&ProgressEvent::RunStarted {
            run_id: self.ctx.run_id(),
            total_scenarios: selected.len(),
        });

        let runner = ScenarioRunner::new(&self.ctx).with_progress(self.progress.as_ref());
        let mut reports = Vec::new();
        for (index, spec) in selected.iter().enumerate() {
            if self.ctx.is_interrupted() {
                warn!(remaining = selected.len() - index, "interrupted, skipping remaining scenarios");
                break;
            }
            self.progress.on_progress(&ProgressEvent::ScenarioStarted {
                name: spec.name.clone(),
                index: index + 1,
            });
            let report = runner.run(spec).await;
            self.progress.on_progress(&ProgressEvent::ScenarioCompleted {
                name: report.name.clone(),
                passed: report.passed(),
                duration_ms: report.ended_at_ms.saturating_sub(report.started_at_ms),
            });
            reports.push(report);
        }

        self.progress.on_progress(&ProgressEvent::RunCompleted {
            run_id: self.ctx.run_id(),
            success: reports.len() == selected.len() && reports.iter().all(ScenarioReport::passed),
            duration_ms: self.ctx.elapsed_ms().saturating_sub(started),
        });
        Ok(reports)
    }

    /// Remove every sandbox matching the name prefix plus every name still
    /// tracked. Per-sandbox failures are swallowed; safe to call repeatedly.
    pub async fn cleanup(&self) -> CleanupReport {
        let sandboxes = self.ctx.sandboxes();
        let prefix = &self.config().runtime.name_prefix;
        let mut targets = match sandboxes.list(prefix).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "could not list leftover sandboxes");
                Vec::new()
            }
        };
        // Listed ids and tracked names can denote the same sandbox.
        let untracked_by_list = sandboxes.tracked_except(&targets);
        targets.extend(untracked_by_list);
        if targets.is_empty() {
            info!("no sandboxes to clean up");
            return CleanupReport::default();
        }

        info!(count = targets.len(), "cleaning up sandboxes");
        let failed = sandboxes.remove_all(&targets).await;
        CleanupReport {
            found: targets.len(),
            removed: targets.len() - failed.len(),
            failed,
        }
    }

    /// Setup (unless skipped), scenarios, then cleanup on every path.
    ///
    /// Setup and selection errors end up in the report's `error` with
    /// status `errored`; an interrupt yields `canceled`.
    pub async fn run(&mut self, options: &RunOptions) -> SuiteReport {
        let started_at_ms = self.ctx.elapsed_ms();
        let mut error = None;

        let setup = if options.skip_setup {
            None
        } else {
            match self.setup().await {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(error = %err, "setup failed");
                    error = Some(err);
                    None
                }
            }
        };

        let mut scenarios = Vec::new();
        if error.is_none() {
            match self.run_scenarios(&options.only).await {
                Ok(reports) => scenarios = reports,
                Err(err) => error = Some(err),
            }
        }

        let cleanup = self.cleanup().await;

        let interrupted = self.ctx.is_interrupted()
            || error
                .as_ref()
                .is_some_and(|err| err.code == ErrorCode::Interrupted);
        let status = if interrupted {
            RunStatus::Canceled
        } else if error.is_some() {
            RunStatus::Errored
        } else if scenarios.iter().all(ScenarioReport::passed) {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };

        SuiteReport {
            report_version: REPORT_VERSION,
            run_id: self.ctx.run_id(),
            suite: self.config().name.clone(),
            status,
            setup,
            scenarios,
            cleanup: Some(cleanup),
            error: error.map(|err| err.to_error_info()),
            started_at_ms,
            ended_at_ms: self.ctx.elapsed_ms(),
        }
    }
}

#[cfg(unix)]
async fn make_executable(path: &std::path::Path) -> HarnessResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|err| {
            HarnessError::io(
                ErrorCode::Io,
                format!("failed to chmod {}", path.display()),
                err,
            )
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &std::path::Path) -> HarnessResult<()> {
    Ok(())
}
