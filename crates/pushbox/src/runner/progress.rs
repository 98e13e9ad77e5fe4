//! Progress callback for reporting run progress.

use crate::model::{RunId, ScenarioState};

/// Event emitted while a suite runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A setup phase began (pre-clean, artifacts, trust material, images).
    SetupPhase {
        /// Phase label.
        phase: String,
    },
    /// Scenarios are about to run.
    RunStarted {
        /// Unique run identifier.
        run_id: RunId,
        /// Number of selected scenarios.
        total_scenarios: usize,
    },
    /// A scenario left `Pending`.
    ScenarioStarted {
        name: String,
        /// 1-based position among the selected scenarios.
        index: usize,
    },
    /// A scenario entered a new state.
    StateChanged { name: String, state: ScenarioState },
    /// A scenario reached a terminal state.
    ScenarioCompleted {
        name: String,
        passed: bool,
        duration_ms: u64,
    },
    /// Every selected scenario ran (or the run was interrupted).
    RunCompleted {
        run_id: RunId,
        /// Whether all scenarios passed.
        success: bool,
        duration_ms: u64,
    },
}

/// Trait for receiving progress events during execution.
pub trait ProgressCallback: Send + Sync {
    /// Called for each progress event.
    fn on_progress(&self, event: &ProgressEvent);
}

/// A no-op progress callback that discards all events.
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// A progress callback that collects events, for tests.
#[derive(Default)]
pub struct CollectingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected events, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ProgressCallback for CollectingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
