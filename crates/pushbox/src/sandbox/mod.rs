//! Sandbox lifecycle on top of the container runtime CLI.

pub mod health;

pub use health::HealthProbe;

use crate::command::CommandRunner;
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{
    CommandOptions, CommandResult, HealthState, ImageSpec, RuntimeConfig,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A running sandbox owned by exactly one scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sandbox {
    pub name: String,
    /// Runtime-assigned id, as printed by `run -d`.
    pub id: String,
    pub image: String,
    pub port: u16,
}

/// Names started during this run and not yet removed, keyed to their port
/// and, once the runtime has printed it, their id.
///
/// The lock is only held for map updates, never across an await.
#[derive(Debug, Default)]
pub struct SandboxRegistry {
    tracked: Mutex<BTreeMap<String, TrackedSandbox>>,
}

#[derive(Debug)]
struct TrackedSandbox {
    port: u16,
    id: Option<String>,
}

impl TrackedSandbox {
    /// `name_or_id` is this sandbox's full id or a short prefix of it.
    fn has_id(&self, name_or_id: &str) -> bool {
        !name_or_id.is_empty()
            && self
                .id
                .as_deref()
                .is_some_and(|id| id.starts_with(name_or_id))
    }
}

impl SandboxRegistry {
    fn with_map<T>(&self, f: impl FnOnce(&mut BTreeMap<String, TrackedSandbox>) -> T) -> T {
        let mut guard = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Track `name` on `port`, refusing when another sandbox holds the port.
    fn claim(&self, name: &str, port: u16) -> HarnessResult<()> {
        self.with_map(|map| {
            if let Some((holder, _)) = map.iter().find(|(n, t)| t.port == port && *n != name) {
                return Err(HarnessError::with_context(
                    ErrorCode::PortInUse,
                    format!("port {port} is still held by sandbox '{holder}'"),
                    serde_json::json!({ "port": port, "holder": holder, "requested": name }),
                ));
            }
            map.insert(name.to_string(), TrackedSandbox { port, id: None });
            Ok(())
        })
    }

    fn record_id(&self, name: &str, id: &str) {
        self.with_map(|map| {
            if let Some(tracked) = map.get_mut(name) {
                tracked.id = Some(id.to_string());
            }
        });
    }

    /// Forget the sandbox named `name_or_id`, or whose id it abbreviates.
    fn release(&self, name_or_id: &str) {
        self.with_map(|map| {
            map.retain(|name, tracked| name != name_or_id && !tracked.has_id(name_or_id));
        });
    }

    #[must_use]
    pub fn tracked(&self) -> Vec<String> {
        self.with_map(|map| map.keys().cloned().collect())
    }

    /// Tracked names not already covered by one of `ids` (full or short).
    #[must_use]
    pub fn tracked_except(&self, ids: &[String]) -> Vec<String> {
        self.with_map(|map| {
            map.iter()
                .filter(|(name, tracked)| {
                    !ids.iter().any(|id| id == *name || tracked.has_id(id))
                })
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.with_map(|map| map.is_empty())
    }
}

/// Starts, inspects and removes sandboxes through the runtime CLI.
pub struct SandboxManager<'a, R> {
    runner: &'a R,
    runtime: &'a RuntimeConfig,
    registry: &'a SandboxRegistry,
}

#[allow(clippy::expl_impl_clone_on_copy)]
impl<R> Clone for SandboxManager<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for SandboxManager<'_, R> {}

impl<'a, R: CommandRunner> SandboxManager<'a, R> {
    pub fn new(runner: &'a R, runtime: &'a RuntimeConfig, registry: &'a SandboxRegistry) -> Self {
        Self {
            runner,
            runtime,
            registry,
        }
    }

    /// Per-call bound for runtime commands other than `build`.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.runtime.call_timeout()
    }

    async fn runtime(&self, args: Vec<String>, timeout: Duration) -> HarnessResult<CommandResult> {
        self.runner
            .run(
                &self.runtime.program,
                &args,
                &CommandOptions::with_timeout(timeout),
            )
            .await
    }

    /// `run -d --rm --name <name> -p <port>:22 <image>`.
    ///
    /// The name is tracked before the runtime call so a half-started
    /// sandbox is still swept by teardown.
    pub async fn start(&self, image: &str, name: &str, port: u16) -> HarnessResult<Sandbox> {
        self.registry.claim(name, port)?;
        info!(sandbox = name, image, port, "starting sandbox");
        let args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-p".to_string(),
            format!("{port}:{}", self.runtime.remote_port),
            image.to_string(),
        ];
        let result = self.runtime(args, self.runtime.call_timeout()).await?;
        if !result.success() {
            return Err(HarnessError::with_context(
                ErrorCode::SandboxStart,
                format!("failed to start sandbox '{name}' from '{image}'"),
                result.diagnostics(),
            ));
        }
        let id = result.stdout.trim().to_string();
        self.registry.record_id(name, &id);
        Ok(Sandbox {
            name: name.to_string(),
            id,
            image: image.to_string(),
            port,
        })
    }

    /// `rm -f <name_or_id>`. A sandbox that is already gone counts as removed.
    pub async fn remove(&self, name_or_id: &str) -> HarnessResult<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), name_or_id.to_string()];
        let result = self.runtime(args, self.runtime.call_timeout()).await?;
        if result.success() || is_not_found(&result) {
            debug!(sandbox = name_or_id, "sandbox removed");
            self.registry.release(name_or_id);
            return Ok(());
        }
        Err(HarnessError::with_context(
            ErrorCode::SandboxExec,
            format!("failed to remove sandbox '{name_or_id}'"),
            result.diagnostics(),
        ))
    }

    /// Run `argv` inside a running sandbox.
    pub async fn exec(
        &self,
        name: &str,
        argv: &[String],
        timeout: Duration,
    ) -> HarnessResult<CommandResult> {
        let mut args = vec!["exec".to_string(), name.to_string()];
        args.extend(argv.iter().cloned());
        self.runtime(args, timeout).await
    }

    /// `exec <name> sh -c <script>`.
    pub async fn exec_shell(&self, name: &str, script: &str) -> HarnessResult<CommandResult> {
        let argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        self.exec(name, &argv, self.runtime.call_timeout()).await
    }

    /// Read the runtime's health status. Any failure reads as `Unknown`.
    pub async fn health(&self, name: &str) -> HealthState {
        self.health_within(name, self.runtime.call_timeout()).await
    }

    /// [`Self::health`] with the inspect call bounded by `timeout`.
    pub async fn health_within(&self, name: &str, timeout: Duration) -> HealthState {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Health.Status}}".to_string(),
            name.to_string(),
        ];
        match self.runtime(args, timeout).await {
            Ok(result) if result.success() => HealthState::parse(&result.stdout),
            Ok(_) | Err(_) => HealthState::Unknown,
        }
    }

    /// Ids of every sandbox, running or not, whose name contains `prefix`.
    pub async fn list(&self, prefix: &str) -> HarnessResult<Vec<String>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("name={prefix}"),
            "--format".to_string(),
            "{{.ID}}".to_string(),
        ];
        let result = self.runtime(args, self.runtime.call_timeout()).await?;
        if !result.success() {
            return Err(HarnessError::with_context(
                ErrorCode::SandboxExec,
                format!("failed to list sandboxes matching '{prefix}'"),
                result.diagnostics(),
            ));
        }
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `build <flags> -t <tag> -f <dockerfile> <context>` from `work_dir`.
    pub async fn build(&self, image: &ImageSpec, work_dir: &Path) -> HarnessResult<()> {
        info!(tag = %image.tag, "building image");
        let mut args = vec!["build".to_string()];
        args.extend(self.runtime.build_flags.to_args());
        args.extend([
            "-t".to_string(),
            image.tag.clone(),
            "-f".to_string(),
            image.dockerfile.display().to_string(),
            image.context.display().to_string(),
        ]);
        let options =
            CommandOptions::with_timeout(self.runtime.build_timeout()).cwd(work_dir.to_path_buf());
        let result = self
            .runner
            .run(&self.runtime.program, &args, &options)
            .await?;
        if !result.success() {
            return Err(HarnessError::with_context(
                ErrorCode::ImageBuild,
                format!("failed to build image '{}'", image.tag),
                result.diagnostics(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn tracked(&self) -> Vec<String> {
        self.registry.tracked()
    }

    /// [`SandboxRegistry::tracked_except`].
    #[must_use]
    pub fn tracked_except(&self, ids: &[String]) -> Vec<String> {
        self.registry.tracked_except(ids)
    }

    /// Remove every name in `names`, swallowing per-sandbox failures.
    ///
    /// Returns the names whose removal failed.
    pub async fn remove_all(&self, names: &[String]) -> Vec<String> {
        let mut failed = Vec::new();
        for name in names {
            if let Err(err) = self.remove(name).await {
                warn!(sandbox = %name, error = %err, "ignoring sandbox removal failure");
                failed.push(name.clone());
            }
        }
        failed
    }
}

fn is_not_found(result: &CommandResult) -> bool {
    let stderr = result.stderr.to_ascii_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}
