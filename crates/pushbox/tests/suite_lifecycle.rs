// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::uninlined_format_args)]
#![allow(missing_docs)]

//! Suite setup, sequencing and cleanup tests.

mod common;

use common::{fail, ok, output, suite_in, ScriptedRunner};
use pushbox::error::ErrorCode;
use pushbox::model::{ArtifactStep, RunStatus, SuiteConfig};
use pushbox::runner::{CollectingProgress, ProgressCallback, ProgressEvent};
use pushbox::{RunOptions, Suite};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Every built-in scenario passes against this world.
fn passing_world() -> ScriptedRunner {
    let runner = ScriptedRunner::happy();
    runner.on_seq(
        "revlay-host",
        &[],
        vec![
            output("", "bash: revlay: command not found"),
            output("", "app not registered, run setup"),
            output("Application found", ""),
            output("", "remote revlay is incompatible"),
            output("", "ssh: Could not resolve hostname nonexistent-host"),
        ],
    );
    runner
}

fn touch_step(name: &str, output: &str) -> ArtifactStep {
    ArtifactStep {
        name: name.to_string(),
        program: "sh".to_string(),
        args: vec!["-c".to_string(), format!("touch {{work_dir}}/{output}")],
        cwd: None,
        env: Default::default(),
        output: Some(PathBuf::from(output)),
        skip_if_exists: false,
        executable: false,
        timeout_ms: None,
    }
}

#[tokio::test(start_paused = true)]
async fn full_run_passes_and_leaves_nothing_tracked() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = Suite::new(suite_in(dir.path()), passing_world()).unwrap();

    let report = suite.run(&RunOptions::default()).await;

    assert_eq!(report.status, RunStatus::Passed, "{:?}", report.error);
    assert_eq!(report.scenarios.len(), 5);
    assert!(report.scenarios.iter().all(|s| s.passed()));
    assert!(suite.context().sandboxes().tracked().is_empty());
    assert_eq!(report.cleanup.unwrap().failed, Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn scenarios_never_overlap_on_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = Suite::new(suite_in(dir.path()), passing_world()).unwrap();

    suite.run(&RunOptions::default()).await;

    // Every `run` must be followed by the matching `rm -f` before the next `run`.
    let mut live: Option<String> = None;
    for call in suite.context().runner().calls() {
        if call.starts_with("docker", &["run"]) {
            assert!(live.is_none(), "started {} while {:?} was live", call.line(), live);
            live = Some(call.args[4].clone());
        } else if call.starts_with("docker", &["rm", "-f"]) && live.as_deref() == Some(call.args[2].as_str()) {
            live = None;
        }
    }
    assert!(live.is_none());
}

#[tokio::test(start_paused = true)]
async fn setup_precleans_then_builds_images_in_waves() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = Suite::new(suite_in(dir.path()), ScriptedRunner::happy()).unwrap();

    let setup = suite.setup().await.unwrap();

    assert_eq!(
        setup.images,
        vec![
            "revlay-test-env:base",
            "revlay-test-env:new",
            "revlay-test-env:old"
        ]
    );
    assert!(!setup.key_generated);
    let runner = suite.context().runner();
    let preclean = runner.position("docker", &["rm", "-f"]).unwrap();
    let base = runner
        .position("docker", &["build", "--no-cache=false", "--pull=false", "--compress", "-t", "revlay-test-env:base"])
        .unwrap();
    let new = runner
        .position("docker", &["build", "--no-cache=false", "--pull=false", "--compress", "-t", "revlay-test-env:new"])
        .unwrap();
    let old = runner
        .position("docker", &["build", "--no-cache=false", "--pull=false", "--compress", "-t", "revlay-test-env:old"])
        .unwrap();
    assert!(preclean < base && base < new && base < old);
    let removed: Vec<String> = runner
        .calls_to("docker", &["rm", "-f"])
        .into_iter()
        .map(|c| c.args[2].clone())
        .collect();
    assert_eq!(
        removed,
        vec![
            "revlay-e2e-server-base",
            "revlay-e2e-server-new",
            "revlay-e2e-server-old"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn base_failure_stops_before_dependent_images() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::happy();
    runner.on(
        "docker",
        &["build", "--no-cache=false", "--pull=false", "--compress", "-t", "revlay-test-env:base"],
        fail(1, "failed to solve: Dockerfile.base: no such file"),
    );
    let mut suite = Suite::new(suite_in(dir.path()), runner).unwrap();

    let err = suite.setup().await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ImageBuild);
    assert_eq!(suite.context().runner().calls_to("docker", &["build"]).len(), 1);
}

#[tokio::test]
async fn artifacts_run_in_order_and_cached_outputs_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = suite_in(dir.path());
    config.images.clear();
    // Pre-clean goes through the runtime program; keep real containers out of it.
    config.runtime.program = "true".to_string();
    std::fs::write(dir.path().join("revlay-old"), "#!/bin/sh\n").unwrap();
    let mut legacy = touch_step("legacy-subject", "revlay-old");
    legacy.skip_if_exists = true;
    legacy.executable = true;
    config.artifacts = vec![touch_step("subject-host", "revlay-host"), legacy];
    let mut suite = Suite::new(config, pushbox::ProcessRunner).unwrap();

    let setup = suite.setup().await.unwrap();

    assert_eq!(setup.artifacts.len(), 2);
    assert!(!setup.artifacts[0].cached);
    assert!(setup.artifacts[1].cached);
    assert!(dir.path().join("revlay-host").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn executable_artifacts_are_chmodded() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let mut config = suite_in(dir.path());
    config.images.clear();
    // Pre-clean goes through the runtime program; keep real containers out of it.
    config.runtime.program = "true".to_string();
    let mut step = touch_step("legacy-subject", "revlay-old");
    step.executable = true;
    config.artifacts = vec![step];
    let mut suite = Suite::new(config, pushbox::ProcessRunner).unwrap();

    suite.setup().await.unwrap();

    let mode = std::fs::metadata(dir.path().join("revlay-old"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn artifact_failure_reports_its_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = suite_in(dir.path());
    config.artifacts = vec![touch_step("subject-host", "revlay-host")];
    let runner = ScriptedRunner::new();
    runner.on("sh", &[], fail(2, "go: cannot find main module"));
    let mut suite = Suite::new(config, runner).unwrap();

    let err = suite.setup().await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Artifact);
    assert_eq!(err.context.unwrap()["stderr"], "go: cannot find main module");
}

#[tokio::test]
async fn cleanup_twice_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    runner.on_seq("docker", &["ps"], vec![ok("aa11\nbb22\n"), ok("")]);
    let suite = Suite::new(suite_in(dir.path()), runner).unwrap();

    let first = suite.cleanup().await;
    let second = suite.cleanup().await;

    assert_eq!(first.found, 2);
    assert_eq!(first.removed, 2);
    assert_eq!(second, Default::default());
    let rm = suite.context().runner().calls_to("docker", &["rm", "-f"]);
    assert_eq!(rm.len(), 2);
}

#[tokio::test]
async fn cleanup_counts_a_leftover_once_when_listed_by_short_id() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    runner.on("docker", &["run"], ok("3f2a9b1c0d4e5f60718293a4b5c6d7e8\n"));
    runner.on("docker", &["ps"], ok("3f2a9b1c0d4e\n"));
    let suite = Suite::new(suite_in(dir.path()), runner).unwrap();
    // Started but never torn down, as after a failed teardown.
    suite
        .context()
        .sandboxes()
        .start("revlay-test-env:base", "revlay-e2e-server-base", 2222)
        .await
        .unwrap();

    let report = suite.cleanup().await;

    assert_eq!(report.found, 1);
    assert_eq!(report.removed, 1);
    let rm = suite.context().runner().calls_to("docker", &["rm", "-f"]);
    assert_eq!(rm.len(), 1);
    assert_eq!(rm[0].args[2], "3f2a9b1c0d4e");
    assert!(suite.context().sandboxes().tracked().is_empty());
}

#[tokio::test]
async fn cleanup_swallows_removal_and_listing_failures() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();
    runner.on("docker", &["ps"], ok("aa11\nbb22\n"));
    runner.on("docker", &["rm", "-f", "aa11"], fail(1, "Error: device or resource busy"));
    let suite = Suite::new(suite_in(dir.path()), runner).unwrap();

    let report = suite.cleanup().await;
    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, vec!["aa11"]);

    let broken = ScriptedRunner::new();
    broken.on("docker", &["ps"], common::Reply::SpawnError);
    let suite = Suite::new(suite_in(dir.path()), broken).unwrap();
    assert_eq!(suite.cleanup().await, Default::default());
}

#[tokio::test(start_paused = true)]
async fn one_failing_scenario_does_not_stop_the_suite() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::happy();
    runner.on("revlay-host", &[], output("", "unexpected"));
    let mut suite = Suite::new(suite_in(dir.path()), runner).unwrap();

    let report = suite
        .run(&RunOptions {
            skip_setup: true,
            only: Vec::new(),
        })
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.scenarios.len(), 5);
    assert_eq!(report.failed_scenarios().len(), 5);
    assert!(report.setup.is_none());
}

#[tokio::test(start_paused = true)]
async fn only_filter_keeps_suite_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = Suite::new(suite_in(dir.path()), passing_world()).unwrap();

    let reports = suite
        .run_scenarios(&["host-unreachable".to_string(), "remote-tool-missing".to_string()])
        .await
        .unwrap();

    let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["remote-tool-missing", "host-unreachable"]);
}

#[tokio::test]
async fn unknown_scenario_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = Suite::new(suite_in(dir.path()), ScriptedRunner::happy()).unwrap();
    let err = suite
        .run_scenarios(&["scenario-f".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
}

/// Sets the interrupt flag as soon as the first scenario finishes.
struct InterruptAfterFirst(Arc<AtomicBool>);

impl ProgressCallback for InterruptAfterFirst {
    fn on_progress(&self, event: &ProgressEvent) {
        if matches!(event, ProgressEvent::ScenarioCompleted { .. }) {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn interrupt_stops_before_the_next_scenario_and_still_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let mut suite = Suite::new(suite_in(dir.path()), passing_world())
        .unwrap()
        .with_interrupt(Arc::clone(&flag))
        .with_progress(Box::new(InterruptAfterFirst(Arc::clone(&flag))));

    let report = suite
        .run(&RunOptions {
            skip_setup: true,
            only: Vec::new(),
        })
        .await;

    assert_eq!(report.status, RunStatus::Canceled);
    assert_eq!(report.scenarios.len(), 1);
    assert!(report.cleanup.is_some());
    assert!(suite.context().runner().position("docker", &["ps"]).is_some());
}

#[tokio::test(start_paused = true)]
async fn setup_error_is_reported_after_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::happy();
    runner.on("docker", &["build"], fail(1, "daemon not running"));
    let mut suite = Suite::new(suite_in(dir.path()), runner).unwrap();

    let report = suite.run(&RunOptions::default()).await;

    assert_eq!(report.status, RunStatus::Errored);
    assert_eq!(report.error.unwrap().code, "E_IMAGE_BUILD");
    assert!(report.scenarios.is_empty());
    assert!(report.cleanup.is_some());
}

struct Shared(Arc<CollectingProgress>);

impl ProgressCallback for Shared {
    fn on_progress(&self, event: &ProgressEvent) {
        self.0.on_progress(event);
    }
}

#[tokio::test(start_paused = true)]
async fn progress_reports_run_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let progress = Arc::new(CollectingProgress::new());
    let mut suite = Suite::new(suite_in(dir.path()), passing_world())
        .unwrap()
        .with_progress(Box::new(Shared(Arc::clone(&progress))));
    suite.run_scenarios(&["host-unreachable".to_string()]).await.unwrap();

    let events = progress.events();
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::RunStarted { total_scenarios: 1, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunCompleted { success: true, .. })
    ));
}

#[test]
fn invalid_suites_are_rejected_at_construction() {
    let mut config = SuiteConfig::default();
    let duplicate = config.scenarios[0].clone();
    config.scenarios.push(duplicate);
    let Err(err) = Suite::new(config, ScriptedRunner::new()) else {
        panic!("duplicate names must be rejected");
    };
    assert_eq!(err.code, ErrorCode::Config);
}
