//! Behavior of the fake container runtime, ssh client and subject binary.
//!
//! All three share a state directory named by [`STATE_ENV`]. Each container
//! is a directory under `containers/` holding its image, host port and an
//! exec log; `rm -f` deletes it. Every runtime call is appended to
//! `calls.log` so tests can assert on what the harness did.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Environment variable naming the shared state directory.
pub const STATE_ENV: &str = "PUSHBOX_FAKE_STATE";
/// When set, the fake ssh client refuses every connection.
pub const SSH_FAIL_ENV: &str = "PUSHBOX_FAKE_SSH_FAIL";
/// Comma-separated image tags whose build fails.
pub const BUILD_FAIL_ENV: &str = "PUSHBOX_FAKE_BUILD_FAIL";

/// What a fake program prints and how it exits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl Outcome {
    fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            code,
            ..Self::default()
        }
    }
}

/// A container as recorded on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeContainer {
    pub name: String,
    pub image: String,
    pub port: u16,
}

/// On-disk state shared by the fake programs.
#[derive(Debug, Clone)]
pub struct FakeState {
    root: PathBuf,
}

impl FakeState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// State rooted at `$PUSHBOX_FAKE_STATE`, or the system temp dir.
    pub fn from_env() -> Self {
        let root = std::env::var_os(STATE_ENV)
            .map_or_else(|| std::env::temp_dir().join("pushbox-fake"), PathBuf::from);
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    /// Every container currently "running", sorted by name.
    pub fn containers(&self) -> Vec<FakeContainer> {
        let Ok(entries) = fs::read_dir(self.containers_dir()) else {
            return Vec::new();
        };
        let mut containers: Vec<FakeContainer> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| self.container(&entry.file_name().to_string_lossy()))
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        containers
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        let meta = fs::read_to_string(self.container_dir(name).join("meta")).ok()?;
        let mut lines = meta.lines();
        let image = lines.next()?.to_string();
        let port = lines.next()?.parse().ok()?;
        Some(FakeContainer {
            name: name.to_string(),
            image,
            port,
        })
    }

    pub fn container_on_port(&self, port: u16) -> Option<FakeContainer> {
        self.containers().into_iter().find(|c| c.port == port)
    }

    /// Commands exec'd into `name` since it started, one per line.
    pub fn exec_log(&self, name: &str) -> String {
        fs::read_to_string(self.container_dir(name).join("exec.log")).unwrap_or_default()
    }

    /// Every runtime invocation so far, one per line.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.root.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Image tags built so far, in order.
    pub fn builds(&self) -> Vec<String> {
        fs::read_to_string(self.root.join("builds.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn append(path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")
    }

    fn record_call(&self, args: &[String]) {
        // Logging is best effort; a fake must never fail because of it.
        let _ = Self::append(&self.root.join("calls.log"), &args.join(" "));
    }

    fn create(&self, container: &FakeContainer) -> std::io::Result<()> {
        let dir = self.container_dir(&container.name);
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join("meta"),
            format!("{}\n{}\n", container.image, container.port),
        )
    }
}

/// Value following `flag` in `args`.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|idx| args.get(idx + 1))
        .map(String::as_str)
}

/// Imitate the subset of the docker CLI the harness drives.
pub fn runtime(state: &FakeState, args: &[String]) -> Outcome {
    state.record_call(args);
    let Some((command, rest)) = args.split_first() else {
        return Outcome::fail(1, "usage: pushbox-fake-runtime <command> [args]");
    };
    match command.as_str() {
        "run" => runtime_run(state, rest),
        "exec" => runtime_exec(state, rest),
        "inspect" => runtime_inspect(state, rest),
        "rm" => runtime_rm(state, rest),
        "ps" => runtime_ps(state, rest),
        "build" => runtime_build(state, rest),
        other => Outcome::fail(1, format!("unknown command: {other}")),
    }
}

fn runtime_run(state: &FakeState, args: &[String]) -> Outcome {
    let Some(name) = flag_value(args, "--name") else {
        return Outcome::fail(125, "run requires --name");
    };
    let Some(port) = flag_value(args, "-p")
        .and_then(|mapping| mapping.split(':').next())
        .and_then(|host| host.parse::<u16>().ok())
    else {
        return Outcome::fail(125, "run requires -p HOST:CONTAINER");
    };
    let Some(image) = args.last() else {
        return Outcome::fail(125, "run requires an image");
    };
    if state.container(name).is_some() {
        return Outcome::fail(
            125,
            format!("Error response from daemon: Conflict. The container name \"/{name}\" is already in use"),
        );
    }
    if let Some(holder) = state.container_on_port(port) {
        return Outcome::fail(
            125,
            format!(
                "Error response from daemon: driver failed programming external connectivity on endpoint {name}: Bind for 0.0.0.0:{port} failed: port is already allocated (held by {})",
                holder.name
            ),
        );
    }
    let container = FakeContainer {
        name: name.to_string(),
        image: image.clone(),
        port,
    };
    match state.create(&container) {
        Ok(()) => Outcome::ok(format!("{name}\n")),
        Err(err) => Outcome::fail(125, format!("failed to record container: {err}")),
    }
}

fn runtime_exec(state: &FakeState, args: &[String]) -> Outcome {
    let Some((name, command)) = args.split_first() else {
        return Outcome::fail(1, "exec requires a container");
    };
    if state.container(name).is_none() {
        return Outcome::fail(1, format!("Error response from daemon: No such container: {name}"));
    }
    match FakeState::append(&state.container_dir(name).join("exec.log"), &command.join(" ")) {
        Ok(()) => Outcome::ok(""),
        Err(err) => Outcome::fail(1, format!("failed to record exec: {err}")),
    }
}

fn runtime_inspect(state: &FakeState, args: &[String]) -> Outcome {
    let Some(name) = args.last() else {
        return Outcome::fail(1, "inspect requires a container");
    };
    if state.container(name).is_some() {
        Outcome::ok("healthy\n")
    } else {
        Outcome::fail(1, format!("Error: No such object: {name}"))
    }
}

fn runtime_rm(state: &FakeState, args: &[String]) -> Outcome {
    let mut outcome = Outcome::default();
    for name in args.iter().filter(|arg| !arg.starts_with('-')) {
        if state.container(name).is_some()
            && fs::remove_dir_all(state.container_dir(name)).is_ok()
        {
            let _ = writeln!(outcome.stdout, "{name}");
        } else {
            let _ = writeln!(
                outcome.stderr,
                "Error response from daemon: No such container: {name}"
            );
            outcome.code = 1;
        }
    }
    outcome
}

fn runtime_ps(state: &FakeState, args: &[String]) -> Outcome {
    let prefix = flag_value(args, "--filter")
        .and_then(|filter| filter.strip_prefix("name="))
        .unwrap_or("");
    let mut stdout = String::new();
    for container in state.containers() {
        if container.name.starts_with(prefix) {
            let _ = writeln!(stdout, "{}", container.name);
        }
    }
    Outcome::ok(stdout)
}

fn runtime_build(state: &FakeState, args: &[String]) -> Outcome {
    let Some(tag) = flag_value(args, "-t") else {
        return Outcome::fail(1, "build requires -t");
    };
    let failing = std::env::var(BUILD_FAIL_ENV).unwrap_or_default();
    if failing.split(',').any(|t| t == tag) {
        return Outcome::fail(1, format!("failed to solve: {tag}: process did not complete"));
    }
    match FakeState::append(&state.root.join("builds.log"), tag) {
        Ok(()) => Outcome::ok(format!("Successfully tagged {tag}\n")),
        Err(err) => Outcome::fail(1, format!("failed to record build: {err}")),
    }
}

/// Imitate an ssh client that either always connects or never does.
pub fn ssh(refuse: bool) -> Outcome {
    if refuse {
        Outcome::fail(255, "Permission denied (publickey).")
    } else {
        Outcome::ok("SSH connection successful\n")
    }
}

/// Imitate the deployment CLI under test.
///
/// Reads `--to` and `--ssh-port`, then answers according to the image of
/// the sandbox published on that port.
pub fn subject(state: &FakeState, args: &[String]) -> Outcome {
    let Some(destination) = flag_value(args, "--to") else {
        return Outcome::fail(2, "error: --to is required");
    };
    let host = destination
        .rsplit('@')
        .next()
        .and_then(|rest| rest.split(':').next())
        .unwrap_or(destination);
    if host != "localhost" && host != "127.0.0.1" {
        return Outcome::fail(
            255,
            format!("ssh: Could not resolve hostname {host}: Name or service not known\nError: failed to connect to {destination}"),
        );
    }
    let port = flag_value(args, "--ssh-port")
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(22);
    let Some(container) = state.container_on_port(port) else {
        return Outcome::fail(
            255,
            format!("ssh: connect to host {host} port {port}: Connection refused"),
        );
    };
    let app = flag_value(args, "--app").unwrap_or("app");
    let variant = container.image.rsplit(':').next().unwrap_or_default();
    match variant {
        "base" => Outcome::fail(127, "bash: line 1: revlay: command not found"),
        "new" => {
            if state
                .exec_log(&container.name)
                .contains(&format!("service add {app}"))
            {
                Outcome::ok(format!(
                    "Application found: {app}\nDeployment completed\n"
                ))
            } else {
                Outcome::fail(
                    1,
                    format!("Application '{app}' is not registered. Starting setup to initialize it...\n"),
                )
            }
        }
        "old" => Outcome::fail(
            1,
            "Error: remote revlay 0.1.0 is incompatible with this client; please upgrade",
        ),
        other => Outcome::fail(1, format!("unexpected image variant '{other}'")),
    }
}

/// Print an [`Outcome`] and exit with its code.
#[allow(clippy::print_stdout, clippy::print_stderr, clippy::exit)]
pub fn finish(outcome: &Outcome) -> ! {
    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    std::process::exit(outcome.code)
}
