//! Per-scenario state machine.
//!
//! `Pending -> SandboxStarting -> HealthWaiting -> TrustBootstrapping ->
//! Executing -> Classifying -> {Passed, Failed}`. Direct-target scenarios
//! jump from `Pending` to `Executing`. The sandbox is removed on every exit
//! path before the report is returned.

pub mod progress;

pub use progress::{CollectingProgress, NoopProgress, ProgressCallback, ProgressEvent};

use crate::classify::classify;
use crate::command::CommandRunner;
use crate::context::RunContext;
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{
    CommandOptions, CommandResult, ScenarioReport, ScenarioSpec, ScenarioState, ScenarioStatus,
    ScenarioTarget, StateTransition,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Runs one scenario at a time against a [`RunContext`].
pub struct ScenarioRunner<'a, R> {
    ctx: &'a RunContext<R>,
    progress: &'a dyn ProgressCallback,
}

impl<'a, R: CommandRunner> ScenarioRunner<'a, R> {
    pub fn new(ctx: &'a RunContext<R>) -> Self {
        Self {
            ctx,
            progress: &NoopProgress,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Drive `spec` to a terminal state. Never errors; failures land in the
    /// report.
    pub async fn run(&self, spec: &ScenarioSpec) -> ScenarioReport {
        let started_at_ms = self.ctx.elapsed_ms();
        let mut tracker = StateTracker::new(&spec.name, self.progress);
        let mut subject = None;

        let outcome = self.drive(spec, &mut tracker, &mut subject).await;

        if let Some(name) = spec.sandbox_name() {
            if let Err(err) = self.ctx.sandboxes().remove(name).await {
                warn!(scenario = %spec.name, sandbox = name, error = %err, "teardown failed, leaving it to run cleanup");
            }
        }

        let (status, error_info) = match outcome {
            Ok(()) => {
                tracker.enter(ScenarioState::Passed);
                info!(scenario = %spec.name, "scenario passed");
                (ScenarioStatus::Passed, None)
            }
            Err(err) => {
                tracker.enter(ScenarioState::Failed);
                error!(scenario = %spec.name, expected = %spec.expect, error = %err, "scenario failed");
                (ScenarioStatus::Failed, Some(err.to_error_info()))
            }
        };

        ScenarioReport {
            name: spec.name.clone(),
            status,
            states: tracker.states,
            sandbox: spec.sandbox_name().map(str::to_string),
            expected: spec.expect.to_string(),
            subject,
            error: error_info,
            started_at_ms,
            ended_at_ms: self.ctx.elapsed_ms(),
        }
    }

    async fn drive(
        &self,
        spec: &ScenarioSpec,
        tracker: &mut StateTracker<'_>,
        subject: &mut Option<CommandResult>,
    ) -> HarnessResult<()> {
        let config = self.ctx.config();
        let port = config.runtime.port;

        let destination = match &spec.target {
            ScenarioTarget::Sandbox { image, sandbox } => {
                tracker.enter(ScenarioState::SandboxStarting);
                let sandboxes = self.ctx.sandboxes();
                sandboxes.start(image, sandbox, port).await?;

                tracker.enter(ScenarioState::HealthWaiting);
                let healthy = self
                    .ctx
                    .health_probe()
                    .wait_healthy(sandbox, config.health.timeout())
                    .await;
                if !healthy {
                    warn!(
                        sandbox = %sandbox,
                        timeout_ms = config.health.timeout_ms,
                        "sandbox never reported healthy, continuing to trust bootstrap"
                    );
                }

                tracker.enter(ScenarioState::TrustBootstrapping);
                self.ctx.bootstrapper()?.bootstrap(sandbox, port).await?;

                tracker.enter(ScenarioState::Executing);
                for command in &spec.prepare {
                    let result = sandboxes.exec_shell(sandbox, command).await?;
                    if !result.success() {
                        return Err(HarnessError::with_context(
                            ErrorCode::SandboxExec,
                            format!("preparation command failed in '{sandbox}'"),
                            result.diagnostics(),
                        ));
                    }
                }
                format!("{}@{}", config.trust.service_user, config.trust.host)
            }
            ScenarioTarget::Direct { destination } => {
                tracker.enter(ScenarioState::Executing);
                destination.clone()
            }
        };

        let result = self.execute_subject(spec, &destination, port).await?;
        tracker.enter(ScenarioState::Classifying);
        let classified = classify(&result, &spec.expect);
        *subject = Some(result);
        classified
    }

    async fn execute_subject(
        &self,
        spec: &ScenarioSpec,
        destination: &str,
        port: u16,
    ) -> HarnessResult<CommandResult> {
        let config = self.ctx.config();
        let program = config.resolve(&config.subject.program);
        let args = self.subject_args(destination, port);
        let options = CommandOptions::with_timeout(spec.timeout()).envs(&config.subject.env);
        info!(scenario = %spec.name, to = destination, "running subject");
        let result = self
            .ctx
            .runner()
            .run(&program.display().to_string(), &args, &options)
            .await?;
        if result.timed_out {
            warn!(scenario = %spec.name, timeout_ms = spec.timeout_ms, "subject timed out");
        }
        Ok(result)
    }

    /// `<subcommand> -p <source> --to <destination> --app <app> --ssh-port
    /// <port> -i <key> --ssh-args ...`. The exit code is never asserted.
    #[must_use]
    pub fn subject_args(&self, destination: &str, port: u16) -> Vec<String> {
        let config = self.ctx.config();
        let subject = &config.subject;
        let mut args = vec![
            subject.subcommand.clone(),
            "-p".to_string(),
            subject.source_path.clone(),
            "--to".to_string(),
            destination.to_string(),
            "--app".to_string(),
            subject.app_name.clone(),
            "--ssh-port".to_string(),
            port.to_string(),
            "-i".to_string(),
            config.resolve(&config.trust.key_path).display().to_string(),
        ];
        for ssh_arg in &subject.ssh_args {
            args.push("--ssh-args".to_string());
            args.push(ssh_arg.clone());
        }
        args
    }
}

struct StateTracker<'p> {
    name: String,
    started: Instant,
    states: Vec<StateTransition>,
    progress: &'p dyn ProgressCallback,
}

impl<'p> StateTracker<'p> {
    fn new(name: &str, progress: &'p dyn ProgressCallback) -> Self {
        Self {
            name: name.to_string(),
            started: Instant::now(),
            states: vec![StateTransition {
                state: ScenarioState::Pending,
                at_ms: 0,
            }],
            progress,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn enter(&mut self, state: ScenarioState) {
        tracing::debug!(scenario = %self.name, %state, "state");
        self.states.push(StateTransition {
            state,
            at_ms: self.elapsed_ms(),
        });
        self.progress.on_progress(&ProgressEvent::StateChanged {
            name: self.name.clone(),
            state,
        });
    }
}
