//! Verbose progress output using indicatif.

use indicatif::{ProgressBar, ProgressStyle};
use pushbox::runner::{ProgressCallback, ProgressEvent};
use std::io::Write;
use std::sync::Mutex;

/// Progress callback that reports scenario progress to stderr.
pub struct VerboseProgress {
    spinner: Mutex<Option<ProgressBar>>,
    total_scenarios: Mutex<usize>,
}

impl VerboseProgress {
    /// Create a new verbose progress callback.
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
            total_scenarios: Mutex::new(0),
        }
    }

    fn finish_spinner(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(pb) = spinner.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressCallback for VerboseProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::SetupPhase { phase } => {
                let _ = writeln!(std::io::stderr(), "setup: {phase}");
            }
            ProgressEvent::RunStarted {
                run_id,
                total_scenarios,
            } => {
                if let Ok(mut total) = self.total_scenarios.lock() {
                    *total = *total_scenarios;
                }
                // stderr only; stdout is reserved for --json
                let _ = writeln!(
                    std::io::stderr(),
                    "run started: {} ({total_scenarios} scenarios)",
                    run_id.short()
                );
            }
            ProgressEvent::ScenarioStarted { name, index } => {
                let total = self.total_scenarios.lock().map(|g| *g).unwrap_or(0);
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.set_message(format!("[{index}/{total}] {name}"));
                pb.enable_steady_tick(std::time::Duration::from_millis(100));

                if let Ok(mut spinner) = self.spinner.lock() {
                    *spinner = Some(pb);
                }
            }
            ProgressEvent::StateChanged { name, state } => {
                if let Ok(spinner) = self.spinner.lock() {
                    if let Some(pb) = spinner.as_ref() {
                        pb.set_message(format!("{name}: {state}"));
                    }
                }
            }
            ProgressEvent::ScenarioCompleted {
                name,
                passed,
                duration_ms,
            } => {
                self.finish_spinner();
                let icon = if *passed {
                    "\x1b[32m✓\x1b[0m"
                } else {
                    "\x1b[31m✗\x1b[0m"
                };
                let _ = writeln!(std::io::stderr(), "  {icon} {name} ({duration_ms}ms)");
            }
            ProgressEvent::RunCompleted {
                run_id: _,
                success,
                duration_ms,
            } => {
                self.finish_spinner();
                let status_msg = if *success {
                    "\x1b[32mpassed\x1b[0m"
                } else {
                    "\x1b[31mfailed\x1b[0m"
                };
                let _ = writeln!(std::io::stderr(), "run {status_msg}: {duration_ms}ms total");
            }
        }
    }
}
