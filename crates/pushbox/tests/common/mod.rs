//! Scripted [`CommandRunner`] shared by the integration tests.
//!
//! Replies are matched by program and argument prefix. The most recently
//! registered matching rule wins, so tests override the defaults installed
//! by [`ScriptedRunner::happy`]. A rule with several queued replies hands
//! them out in order and keeps repeating the last one.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

use pushbox::error::{ErrorCode, HarnessError, HarnessResult};
use pushbox::model::{CommandOptions, CommandResult, SuiteConfig};
use pushbox::CommandRunner;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One recorded invocation.
#[derive(Clone, Debug)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub options_env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Time since the runner was created (virtual under paused clocks).
    pub at: Duration,
}

impl Call {
    pub fn starts_with(&self, program: &str, prefix: &[&str]) -> bool {
        program_matches(&self.program, program)
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    pub fn line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    Result(CommandResult),
    SpawnError,
    /// Never answers; the call ends only when its timeout fires.
    Hang,
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    started: Instant,
}

fn program_matches(actual: &str, wanted: &str) -> bool {
    actual == wanted || actual.ends_with(&format!("/{wanted}"))
}

pub fn ok(stdout: &str) -> Reply {
    Reply::Result(CommandResult {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        ..CommandResult::default()
    })
}

pub fn fail(code: i32, stderr: &str) -> Reply {
    Reply::Result(CommandResult {
        exit_code: Some(code),
        stderr: stderr.to_string(),
        ..CommandResult::default()
    })
}

pub fn output(stdout: &str, stderr: &str) -> Reply {
    Reply::Result(CommandResult {
        exit_code: Some(1),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        ..CommandResult::default()
    })
}

pub fn timed_out(stdout: &str) -> Reply {
    Reply::Result(CommandResult {
        exit_code: None,
        stdout: stdout.to_string(),
        timed_out: true,
        ..CommandResult::default()
    })
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    /// Every call succeeds with empty output.
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    /// A healthy docker + ssh world: sandboxes start, report healthy and
    /// accept key logins. The subject prints nothing.
    pub fn happy() -> Self {
        let runner = Self::new();
        runner.on("docker", &["run"], ok("c0ffee\n"));
        runner.on("docker", &["inspect"], ok("healthy\n"));
        runner.on("docker", &["ps"], ok(""));
        runner.on("ssh", &[], ok("SSH connection successful\n"));
        runner
    }

    pub fn on(&self, program: &str, prefix: &[&str], reply: Reply) -> &Self {
        self.on_seq(program, prefix, vec![reply])
    }

    pub fn on_seq(&self, program: &str, prefix: &[&str], replies: Vec<Reply>) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            prefix: prefix.iter().map(|p| (*p).to_string()).collect(),
            replies: replies.into(),
        });
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str, prefix: &[&str]) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(program, prefix))
            .collect()
    }

    /// Position of the first call matching, for ordering assertions.
    pub fn position(&self, program: &str, prefix: &[&str]) -> Option<usize> {
        self.calls()
            .iter()
            .position(|call| call.starts_with(program, prefix))
    }

    fn reply_for(&self, program: &str, args: &[String]) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().rev().find(|rule| {
            program_matches(program, &rule.program)
                && args.len() >= rule.prefix.len()
                && args.iter().zip(&rule.prefix).all(|(a, p)| a == p)
        });
        match rule {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap(),
            Some(rule) => rule.replies.front().cloned().unwrap_or_else(|| ok("")),
            None => ok(""),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> HarnessResult<CommandResult> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            options_env: options
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: options.timeout,
            at: self.started.elapsed(),
        });
        // Yield so paused-clock tests observe a real suspension point.
        tokio::task::yield_now().await;
        match self.reply_for(program, args) {
            Reply::Result(result) => Ok(result),
            Reply::Hang => {
                tokio::time::sleep(options.timeout.unwrap_or(Duration::from_secs(3600))).await;
                Ok(CommandResult {
                    exit_code: None,
                    timed_out: true,
                    ..CommandResult::default()
                })
            }
            Reply::SpawnError => Err(HarnessError::new(
                ErrorCode::Spawn,
                format!("failed to spawn '{program}'"),
            )),
        }
    }
}

/// Built-in suite rooted at `dir`, with no artifact steps and pre-made key
/// material so nothing needs ssh-keygen.
pub fn suite_in(dir: &Path) -> SuiteConfig {
    write_key_material(dir);
    SuiteConfig {
        work_dir: dir.to_path_buf(),
        artifacts: Vec::new(),
        ..SuiteConfig::default()
    }
}

pub fn write_key_material(dir: &Path) {
    std::fs::write(dir.join("test_ssh_key"), "PRIVATE KEY\n").unwrap();
    std::fs::write(
        dir.join("test_ssh_key.pub"),
        "ssh-rsa AAAAB3Nza test@pushbox\n",
    )
    .unwrap();
}
