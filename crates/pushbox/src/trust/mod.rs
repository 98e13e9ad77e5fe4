//! Key-based remote-shell trust into sandboxes.
//!
//! [`TrustMaterial`] is the run's key pair and ssh client config, created
//! once on the controlling host. [`TrustBootstrapper`] installs the public
//! key into a running sandbox and proves the login works.

use crate::command::CommandRunner;
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{CommandOptions, CommandResult, SuiteConfig, TrustConfig};
use crate::retry::run_with_retry;
use crate::sandbox::SandboxManager;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Written when the suite has no ssh client config of its own.
const DEFAULT_SSH_CONFIG: &str = "Host *\n    \
    StrictHostKeyChecking no\n    \
    UserKnownHostsFile /dev/null\n    \
    LogLevel ERROR\n";

/// The run's key pair and ssh client config. Read-only once created.
#[derive(Clone, Debug)]
pub struct TrustMaterial {
    pub key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub ssh_config_path: PathBuf,
    /// Contents of the public key file, trimmed.
    pub public_key: String,
    /// `true` when this run created the key pair.
    pub generated: bool,
}

impl TrustMaterial {
    /// Generate the key pair and ssh config if absent, then load them.
    pub async fn ensure<R: CommandRunner>(runner: &R, config: &SuiteConfig) -> HarnessResult<Self> {
        let trust = &config.trust;
        let key_path = config.resolve(&trust.key_path);
        let public_key_path = public_key_path(&key_path);

        let mut generated = false;
        if !key_path.exists() {
            info!(key = %key_path.display(), "generating ssh key pair");
            // ssh-keygen refuses to overwrite without a prompt.
            if public_key_path.exists() {
                remove_file(&public_key_path).await?;
            }
            generate_key(runner, trust, &key_path).await?;
            generated = true;
        }

        let ssh_config_path = config.resolve(&trust.ssh_config_path);
        if !ssh_config_path.exists() {
            debug!(path = %ssh_config_path.display(), "writing ssh client config");
            tokio::fs::write(&ssh_config_path, DEFAULT_SSH_CONFIG)
                .await
                .map_err(|err| {
                    HarnessError::io(
                        ErrorCode::TrustMaterial,
                        format!("failed to write {}", ssh_config_path.display()),
                        err,
                    )
                })?;
        }

        let mut material = Self::load(config).await?;
        material.generated = generated;
        Ok(material)
    }

    /// Load existing material without generating anything.
    pub async fn load(config: &SuiteConfig) -> HarnessResult<Self> {
        let key_path = config.resolve(&config.trust.key_path);
        let public_key_path = public_key_path(&key_path);
        if !key_path.exists() {
            return Err(HarnessError::with_context(
                ErrorCode::TrustMaterial,
                "private key is missing; run setup first",
                serde_json::json!({ "key_path": key_path.display().to_string() }),
            ));
        }
        let public_key = tokio::fs::read_to_string(&public_key_path)
            .await
            .map_err(|err| {
                HarnessError::io(
                    ErrorCode::TrustMaterial,
                    format!("failed to read {}", public_key_path.display()),
                    err,
                )
            })?
            .trim()
            .to_string();
        if public_key.is_empty() {
            return Err(HarnessError::new(
                ErrorCode::TrustMaterial,
                format!("{} is empty", public_key_path.display()),
            ));
        }
        Ok(Self {
            key_path,
            public_key_path,
            ssh_config_path: config.resolve(&config.trust.ssh_config_path),
            public_key,
            generated: false,
        })
    }
}

fn public_key_path(key_path: &Path) -> PathBuf {
    let mut os = key_path.as_os_str().to_owned();
    os.push(".pub");
    PathBuf::from(os)
}

async fn remove_file(path: &Path) -> HarnessResult<()> {
    tokio::fs::remove_file(path).await.map_err(|err| {
        HarnessError::io(
            ErrorCode::TrustMaterial,
            format!("failed to remove stale {}", path.display()),
            err,
        )
    })
}

async fn generate_key<R: CommandRunner>(
    runner: &R,
    trust: &TrustConfig,
    key_path: &Path,
) -> HarnessResult<()> {
    let args = vec![
        "-t".to_string(),
        "rsa".to_string(),
        "-b".to_string(),
        trust.key_bits.to_string(),
        "-f".to_string(),
        key_path.display().to_string(),
        "-N".to_string(),
        String::new(),
    ];
    let result = runner
        .run(&trust.keygen_program, &args, &CommandOptions::default())
        .await?;
    if !result.success() {
        return Err(HarnessError::with_context(
            ErrorCode::TrustMaterial,
            "failed to generate ssh key pair",
            result.diagnostics(),
        ));
    }
    Ok(())
}

/// Quote `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// How the public key gets installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionStrategy {
    /// One `sh -c` doing every step.
    Combined,
    /// One runtime exec per step, so a failure names its step.
    Discrete,
}

/// A single exec inside the sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionStep {
    pub name: &'static str,
    pub argv: Vec<String>,
}

impl ProvisionStrategy {
    /// Commands that install `public_key` for `user` under `home`.
    #[must_use]
    pub fn steps(self, user: &str, home: &str, public_key: &str) -> Vec<ProvisionStep> {
        let ssh_dir = format!("{home}/.ssh");
        let keys = format!("{ssh_dir}/authorized_keys");
        let owner = format!("{user}:{user}");
        let write_key = format!("echo {} > {}", shell_quote(public_key), shell_quote(&keys));
        let step = |name: &'static str, argv: &[&str]| ProvisionStep {
            name,
            argv: argv.iter().map(|a| (*a).to_string()).collect(),
        };
        match self {
            Self::Combined => {
                let script = format!(
                    "mkdir -p {dir} && chmod 700 {dir} && {write_key} && chmod 600 {keys} && chown -R {owner} {dir}",
                    dir = shell_quote(&ssh_dir),
                    keys = shell_quote(&keys),
                    owner = shell_quote(&owner),
                );
                vec![step("provision", &["sh", "-c", script.as_str()])]
            }
            Self::Discrete => vec![
                step("mkdir", &["mkdir", "-p", ssh_dir.as_str()]),
                step("chmod-dir", &["chmod", "700", ssh_dir.as_str()]),
                step("write-key", &["sh", "-c", write_key.as_str()]),
                step("chmod-key", &["chmod", "600", keys.as_str()]),
                step("chown", &["chown", "-R", owner.as_str(), ssh_dir.as_str()]),
            ],
        }
    }
}

/// Installs the run's public key into a sandbox and verifies login.
pub struct TrustBootstrapper<'a, R> {
    runner: &'a R,
    sandboxes: SandboxManager<'a, R>,
    trust: &'a TrustConfig,
    material: &'a TrustMaterial,
}

impl<'a, R: CommandRunner> TrustBootstrapper<'a, R> {
    pub fn new(
        runner: &'a R,
        sandboxes: SandboxManager<'a, R>,
        trust: &'a TrustConfig,
        material: &'a TrustMaterial,
    ) -> Self {
        Self {
            runner,
            sandboxes,
            trust,
            material,
        }
    }

    /// Start sshd, install the key, then prove key login on `port`.
    pub async fn bootstrap(&self, name: &str, port: u16) -> HarnessResult<()> {
        info!(sandbox = name, port, "bootstrapping trust");
        self.start_sshd(name).await;
        self.provision(name).await?;
        self.verify(port).await
    }

    async fn start_sshd(&self, name: &str) {
        match self.sandboxes.exec_shell(name, &self.trust.sshd_command).await {
            Ok(result) if result.success() => debug!(sandbox = name, "sshd started"),
            Ok(result) => warn!(
                sandbox = name,
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "sshd start failed, it may already be running"
            ),
            Err(err) => warn!(sandbox = name, error = %err, "sshd start failed"),
        }
    }

    async fn provision(&self, name: &str) -> HarnessResult<()> {
        let user = &self.trust.service_user;
        let home = self.trust.home();
        let key = &self.material.public_key;

        let mut combined_ok = true;
        for step in ProvisionStrategy::Combined.steps(user, &home, key) {
            match self.exec_step(name, &step).await {
                Ok(result) if result.success() => {}
                Ok(result) => {
                    warn!(
                        sandbox = name,
                        exit_code = ?result.exit_code,
                        stderr = %result.stderr.trim(),
                        "combined key provisioning failed, retrying step by step"
                    );
                    combined_ok = false;
                    break;
                }
                Err(err) => {
                    warn!(sandbox = name, error = %err, "combined key provisioning failed, retrying step by step");
                    combined_ok = false;
                    break;
                }
            }
        }
        if combined_ok {
            return Ok(());
        }

        for step in ProvisionStrategy::Discrete.steps(user, &home, key) {
            let result = self.exec_step(name, &step).await.map_err(|err| {
                HarnessError::with_context(
                    ErrorCode::TrustBootstrap,
                    format!("key provisioning step '{}' failed", step.name),
                    serde_json::json!({ "sandbox": name, "source": err.to_string() }),
                )
            })?;
            if !result.success() {
                return Err(HarnessError::with_context(
                    ErrorCode::TrustBootstrap,
                    format!("key provisioning step '{}' failed", step.name),
                    result.diagnostics(),
                ));
            }
        }
        Ok(())
    }

    async fn exec_step(&self, name: &str, step: &ProvisionStep) -> HarnessResult<CommandResult> {
        debug!(sandbox = name, step = step.name, "provisioning");
        self.sandboxes
            .exec(name, &step.argv, self.sandboxes.call_timeout())
            .await
    }

    /// `ssh ... echo "SSH connection successful"` under the verify policy.
    pub async fn verify(&self, port: u16) -> HarnessResult<()> {
        let args = self.verify_args(port);
        let options = CommandOptions::with_timeout(self.trust.verify_timeout());
        let result = run_with_retry(
            self.runner,
            &self.trust.ssh_program,
            &args,
            &options,
            &self.trust.verify,
        )
        .await?;
        if result.success() {
            info!(port, "ssh connection verified");
            return Ok(());
        }
        let mut context = result.diagnostics();
        if let Some(map) = context.as_object_mut() {
            map.insert("attempts".to_string(), self.trust.verify.max_attempts.into());
            map.insert("port".to_string(), port.into());
        }
        Err(HarnessError::with_context(
            ErrorCode::TrustBootstrap,
            format!(
                "failed to establish ssh connection after {} attempts",
                self.trust.verify.max_attempts
            ),
            context,
        ))
    }

    fn verify_args(&self, port: u16) -> Vec<String> {
        vec![
            "-F".to_string(),
            self.material.ssh_config_path.display().to_string(),
            "-i".to_string(),
            self.material.key_path.display().to_string(),
            "-p".to_string(),
            port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            format!("{}@{}", self.trust.service_user, self.trust.host),
            "echo \"SSH connection successful\"".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn combined_strategy_is_one_shell_command() {
        let steps = ProvisionStrategy::Combined.steps("revlay-user", "/home/revlay-user", "ssh-rsa AAA");
        assert_eq!(steps.len(), 1);
        let script = &steps[0].argv[2];
        assert!(script.contains("chmod 700 '/home/revlay-user/.ssh'"));
        assert!(script.contains("echo 'ssh-rsa AAA' > '/home/revlay-user/.ssh/authorized_keys'"));
        assert!(script.contains("chown -R 'revlay-user:revlay-user'"));
    }

    #[test]
    fn discrete_strategy_has_five_named_steps() {
        let steps = ProvisionStrategy::Discrete.steps("u", "/home/u", "k");
        let names: Vec<_> = steps.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["mkdir", "chmod-dir", "write-key", "chmod-key", "chown"]
        );
        assert_eq!(steps[4].argv, vec!["chown", "-R", "u:u", "/home/u/.ssh"]);
    }

    #[test]
    fn public_key_path_appends_suffix() {
        assert_eq!(
            public_key_path(Path::new("/tmp/test_ssh_key")),
            PathBuf::from("/tmp/test_ssh_key.pub")
        );
    }
}
