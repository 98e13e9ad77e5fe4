//! Test utilities and fixtures for pushbox integration tests.
//!
//! - [`SuiteBuilder`] - suites wired to the fake binaries
//! - [`fake`] - behavior of `pushbox-fake-runtime`, `pushbox-fake-ssh` and
//!   `pushbox-fake-subject`, which imitate docker, ssh and the deployment
//!   CLI under test without needing either
//! - [`temp_dir`], [`write_suite`], [`write_key_material`], [`fixture_bin`]
//!
//! # Example
//!
//! ```ignore
//! use pushbox_fixtures::{fixture_bin, temp_dir, write_key_material, write_suite, SuiteBuilder};
//!
//! let dir = temp_dir("e2e");
//! let bin = std::path::Path::new(env!("CARGO_BIN_EXE_pushbox"));
//! let suite = SuiteBuilder::fake(&dir, bin.parent().unwrap()).build();
//! write_key_material(&suite);
//! write_suite(&dir.join("suite.yaml"), &suite);
//! ```

// Test fixtures crate - relaxed lints for test utilities
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]
#![allow(missing_docs)]

pub mod builders;
pub mod fake;
pub mod helpers;

pub use builders::{SuiteBuilder, FAKE_RUNTIME, FAKE_SSH, FAKE_SUBJECT};
pub use fake::{FakeState, Outcome, STATE_ENV};
pub use helpers::{
    fixture_bin, temp_dir, write_key_material, write_suite, write_suite_json, FIXTURE_PUBLIC_KEY,
};
