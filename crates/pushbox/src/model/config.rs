use crate::model::{OutputPattern, ScenarioSpec, ScenarioTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current suite file format version.
pub const SUITE_VERSION: u32 = 1;

/// Everything a run needs, loaded once before the run starts.
///
/// Every section defaults to the built-in revlay suite, so a suite file only
/// has to spell out what it changes. Relative paths resolve against
/// `work_dir`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub suite_version: u32,
    pub name: String,
    pub work_dir: PathBuf,
    pub runtime: RuntimeConfig,
    pub health: HealthConfig,
    pub trust: TrustConfig,
    pub subject: SubjectConfig,
    pub artifacts: Vec<ArtifactStep>,
    pub images: Vec<ImageSpec>,
    pub scenarios: Vec<ScenarioSpec>,
}

impl SuiteConfig {
    /// Resolve `path` against `work_dir` unless it is already absolute.
    #[must_use]
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Expand `{work_dir}` and `{arch}` placeholders in artifact arguments.
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{work_dir}", &self.work_dir.display().to_string())
            .replace("{arch}", release_arch())
    }

    #[must_use]
    pub fn scenario(&self, name: &str) -> Option<&ScenarioSpec> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

/// Architecture suffix used by release downloads.
#[must_use]
pub fn release_arch() -> &'static str {
    if std::env::consts::ARCH == "x86_64" {
        "amd64"
    } else {
        "arm64"
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            suite_version: SUITE_VERSION,
            name: "revlay-e2e".to_string(),
            work_dir: PathBuf::from("docker-test"),
            runtime: RuntimeConfig::default(),
            health: HealthConfig::default(),
            trust: TrustConfig::default(),
            subject: SubjectConfig::default(),
            artifacts: default_artifacts(),
            images: default_images(),
            scenarios: default_scenarios(),
        }
    }
}

/// Container runtime CLI surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub program: String,
    /// Every sandbox name starts with this; cleanup sweeps by it.
    pub name_prefix: String,
    /// Host port published to the sandbox's ssh port.
    pub port: u16,
    pub remote_port: u16,
    pub build_flags: BuildFlags,
    /// Per-call bound for `run`, `exec`, `rm`, `ps` and `inspect`.
    pub call_timeout_ms: u64,
    /// Per-image bound for `build`.
    pub build_timeout_ms: u64,
}

impl RuntimeConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            name_prefix: "revlay-e2e-server".to_string(),
            port: 2222,
            remote_port: 22,
            build_flags: BuildFlags::default(),
            call_timeout_ms: 30_000,
            build_timeout_ms: 600_000,
        }
    }
}

/// Cache and pull behaviour for image builds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildFlags {
    pub no_cache: bool,
    pub pull: bool,
    pub compress: bool,
}

impl Default for BuildFlags {
    fn default() -> Self {
        Self {
            no_cache: false,
            pull: false,
            compress: true,
        }
    }
}

impl BuildFlags {
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--no-cache={}", self.no_cache),
            format!("--pull={}", self.pull),
        ];
        if self.compress {
            args.push("--compress".to_string());
        }
        args
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl HealthConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            interval_ms: 500,
        }
    }
}

/// Bounded retry with a fixed delay; `max_attempts` counts the first try.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay_ms: 2_000,
        }
    }
}

/// Key material and remote-shell settings for trust bootstrap.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub key_path: PathBuf,
    pub ssh_config_path: PathBuf,
    pub ssh_program: String,
    pub keygen_program: String,
    pub key_bits: u32,
    /// Account inside the sandbox that receives the public key.
    pub service_user: String,
    /// Home of `service_user`; `/home/<user>` when unset.
    pub remote_home: Option<String>,
    /// Host the sandbox's published port is reachable on.
    pub host: String,
    pub sshd_command: String,
    pub verify: RetryPolicy,
    pub verify_timeout_ms: u64,
}

impl TrustConfig {
    #[must_use]
    pub fn home(&self) -> String {
        self.remote_home
            .clone()
            .unwrap_or_else(|| format!("/home/{}", self.service_user))
    }

    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("test_ssh_key"),
            ssh_config_path: PathBuf::from("ssh_config"),
            ssh_program: "ssh".to_string(),
            keygen_program: "ssh-keygen".to_string(),
            key_bits: 2048,
            service_user: "revlay-user".to_string(),
            remote_home: None,
            host: "localhost".to_string(),
            sshd_command: "/usr/sbin/sshd".to_string(),
            verify: RetryPolicy::default(),
            verify_timeout_ms: 10_000,
        }
    }
}

/// The binary under test and its fixed argument template.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectConfig {
    pub program: PathBuf,
    pub subcommand: String,
    pub source_path: String,
    pub app_name: String,
    /// Passed as repeated `--ssh-args` values.
    pub ssh_args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        let env = [
            ("REVLAY_NON_INTERACTIVE", "true"),
            ("REVLAY_E2E_TEST", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            program: PathBuf::from("revlay-host"),
            subcommand: "push".to_string(),
            source_path: ".".to_string(),
            app_name: "my-app".to_string(),
            ssh_args: vec![
                "BatchMode=yes".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ],
            env,
        }
    }
}

/// One setup step producing a file the run needs (compiled subject, cached
/// legacy binary, ...). Arguments may use `{work_dir}` and `{arch}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactStep {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Reuse `output` from an earlier run when it already exists.
    #[serde(default)]
    pub skip_if_exists: bool,
    /// Mark `output` as executable after the step.
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A sandbox image built during setup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageSpec {
    pub tag: String,
    pub dockerfile: PathBuf,
    #[serde(default = "default_build_context")]
    pub context: PathBuf,
    /// Tags that must finish building first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_build_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifacts() -> Vec<ArtifactStep> {
    let go_build = |name: &str, output: &str, env: &[(&str, &str)]| ArtifactStep {
        name: name.to_string(),
        program: "go".to_string(),
        args: vec![
            "build".to_string(),
            "-o".to_string(),
            format!("{{work_dir}}/{output}"),
            "./cmd/revlay".to_string(),
        ],
        cwd: Some(PathBuf::from("..")),
        env: env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        output: Some(PathBuf::from(output)),
        skip_if_exists: false,
        executable: false,
        timeout_ms: Some(300_000),
    };
    vec![
        go_build("subject-host", "revlay-host", &[]),
        go_build(
            "subject-linux",
            "revlay",
            &[("GOOS", "linux"), ("GOARCH", "amd64")],
        ),
        ArtifactStep {
            name: "legacy-subject".to_string(),
            program: "curl".to_string(),
            args: vec![
                "-sL".to_string(),
                "-o".to_string(),
                "{work_dir}/revlay-old".to_string(),
                "https://github.com/revlay/revlay/releases/download/v0.1.0/revlay-linux-{arch}"
                    .to_string(),
            ],
            cwd: None,
            env: BTreeMap::new(),
            output: Some(PathBuf::from("revlay-old")),
            skip_if_exists: true,
            executable: true,
            timeout_ms: Some(120_000),
        },
    ]
}

fn default_images() -> Vec<ImageSpec> {
    let image = |tag: &str, dockerfile: &str, depends_on: &[&str]| ImageSpec {
        tag: tag.to_string(),
        dockerfile: PathBuf::from(dockerfile),
        context: default_build_context(),
        depends_on: depends_on.iter().map(|d| (*d).to_string()).collect(),
    };
    vec![
        image("revlay-test-env:base", "Dockerfile.base", &[]),
        image("revlay-test-env:new", "Dockerfile.new", &["revlay-test-env:base"]),
        image("revlay-test-env:old", "Dockerfile.old", &["revlay-test-env:base"]),
    ]
}

fn default_scenarios() -> Vec<ScenarioSpec> {
    let sandbox = |image: &str, name: &str| ScenarioTarget::Sandbox {
        image: image.to_string(),
        sandbox: name.to_string(),
    };
    vec![
        ScenarioSpec {
            name: "remote-tool-missing".to_string(),
            description: Some("reports an error when revlay is not installed remotely".to_string()),
            target: sandbox("revlay-test-env:base", "revlay-e2e-server-base"),
            prepare: Vec::new(),
            expect: OutputPattern::regex_ci("command not found|not installed|error|failed"),
            timeout_ms: 60_000,
        },
        ScenarioSpec {
            name: "app-not-registered".to_string(),
            description: Some("triggers interactive setup when the app is unknown".to_string()),
            target: sandbox("revlay-test-env:new", "revlay-e2e-server-new"),
            prepare: Vec::new(),
            expect: OutputPattern::regex_ci("初始化|setup|initialize|init|引导|guide|prompt"),
            timeout_ms: 60_000,
        },
        ScenarioSpec {
            name: "app-registered".to_string(),
            description: Some("proceeds when the app already exists".to_string()),
            target: sandbox("revlay-test-env:new", "revlay-e2e-server-new"),
            prepare: vec![
                "mkdir -p /home/revlay-user/my-app \
                 && printf 'app:\\n  name: my-app\\n' > /home/revlay-user/my-app/revlay.yml \
                 && revlay service add my-app /home/revlay-user/my-app"
                    .to_string(),
            ],
            expect: OutputPattern::regex_ci(
                "Application found|app found|success|deployed|completed|proceed",
            ),
            timeout_ms: 60_000,
        },
        ScenarioSpec {
            name: "remote-tool-outdated".to_string(),
            description: Some("reports incompatibility with an old remote revlay".to_string()),
            target: sandbox("revlay-test-env:old", "revlay-e2e-server-old"),
            prepare: Vec::new(),
            expect: OutputPattern::regex_ci(
                "incompatible|version|old|outdated|update|upgrade|not supported|error|failed",
            ),
            timeout_ms: 60_000,
        },
        ScenarioSpec {
            name: "host-unreachable".to_string(),
            description: Some("fails fast against a host that does not exist".to_string()),
            target: ScenarioTarget::Direct {
                destination: "user@nonexistent-host:2223".to_string(),
            },
            prepare: Vec::new(),
            expect: OutputPattern::regex_ci(
                "connect|refused|failed|unable|timeout|error|not found|unreachable|host|port",
            ),
            timeout_ms: 10_000,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_flags_match_cached_builds() {
        assert_eq!(
            BuildFlags::default().to_args(),
            vec!["--no-cache=false", "--pull=false", "--compress"]
        );
    }

    #[test]
    fn expand_replaces_placeholders() {
        let config = SuiteConfig {
            work_dir: PathBuf::from("/tmp/suite"),
            ..SuiteConfig::default()
        };
        let expanded = config.expand("{work_dir}/revlay-linux-{arch}");
        assert!(expanded.starts_with("/tmp/suite/revlay-linux-"));
        assert!(!expanded.contains('{'));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let config = SuiteConfig {
            work_dir: PathBuf::from("/srv/e2e"),
            ..SuiteConfig::default()
        };
        assert_eq!(config.resolve("/opt/key"), PathBuf::from("/opt/key"));
        assert_eq!(config.resolve("key"), PathBuf::from("/srv/e2e/key"));
    }

    #[test]
    fn builtin_suite_has_five_scenarios_sharing_one_port() {
        let config = SuiteConfig::default();
        assert_eq!(config.scenarios.len(), 5);
        assert_eq!(config.runtime.port, 2222);
        assert!(config.scenario("host-unreachable").is_some());
        assert_eq!(
            config
                .scenario("host-unreachable")
                .and_then(ScenarioSpec::sandbox_name),
            None
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "name: smoke\nruntime:\n  port: 2299\n";
        let config: SuiteConfig = serde_yml::from_str(yaml).unwrap_or_default();
        assert_eq!(config.name, "smoke");
        assert_eq!(config.runtime.port, 2299);
        assert_eq!(config.runtime.program, "docker");
        assert_eq!(config.trust.service_user, "revlay-user");
    }
}
