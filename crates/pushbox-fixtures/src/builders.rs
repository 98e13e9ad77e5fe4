//! Fluent builder for suites that run against the fake binaries.
//!
//! # Example
//!
//! ```ignore
//! use pushbox_fixtures::{SuiteBuilder, temp_dir};
//!
//! let dir = temp_dir("e2e");
//! let suite = SuiteBuilder::fake(&dir, &bin_dir)
//!     .only(&["remote-tool-missing", "host-unreachable"])
//!     .build();
//! ```

use std::path::Path;

use pushbox::model::SuiteConfig;

/// Fixture binary names, as built by this crate.
pub const FAKE_RUNTIME: &str = "pushbox-fake-runtime";
pub const FAKE_SSH: &str = "pushbox-fake-ssh";
pub const FAKE_SUBJECT: &str = "pushbox-fake-subject";

/// Fluent builder for [`SuiteConfig`] values in tests.
///
/// Starts from the built-in suite with every external program swapped for
/// its fake, no artifact steps, and a fast health interval.
#[derive(Debug, Clone)]
pub struct SuiteBuilder {
    config: SuiteConfig,
}

impl SuiteBuilder {
    /// Built-in suite wired to the fakes found in `bin_dir`.
    #[must_use]
    pub fn fake(work_dir: &Path, bin_dir: &Path) -> Self {
        let mut config = SuiteConfig {
            name: "pushbox-fixture-suite".to_string(),
            work_dir: work_dir.to_path_buf(),
            artifacts: Vec::new(),
            ..SuiteConfig::default()
        };
        config.runtime.program = bin_dir.join(FAKE_RUNTIME).display().to_string();
        config.runtime.call_timeout_ms = 10_000;
        config.trust.ssh_program = bin_dir.join(FAKE_SSH).display().to_string();
        config.subject.program = bin_dir.join(FAKE_SUBJECT);
        config.health.interval_ms = 50;
        Self { config }
    }

    /// Keep only the named scenarios, in suite order.
    #[must_use]
    pub fn only(mut self, names: &[&str]) -> Self {
        self.config
            .scenarios
            .retain(|scenario| names.contains(&scenario.name.as_str()));
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.runtime.port = port;
        self
    }

    #[must_use]
    pub fn with_name_prefix(mut self, prefix: &str) -> Self {
        let old = std::mem::replace(&mut self.config.runtime.name_prefix, prefix.to_string());
        for scenario in &mut self.config.scenarios {
            if let pushbox::model::ScenarioTarget::Sandbox { sandbox, .. } = &mut scenario.target {
                if let Some(rest) = sandbox.strip_prefix(&old) {
                    *sandbox = format!("{prefix}{rest}");
                }
            }
        }
        self
    }

    /// Verification attempts and delay; keep within the suite minimums.
    #[must_use]
    pub fn with_verify(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.config.trust.verify.max_attempts = attempts;
        self.config.trust.verify.delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn build(self) -> SuiteConfig {
        self.config
    }
}
