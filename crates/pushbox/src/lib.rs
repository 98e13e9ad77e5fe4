//! Pushbox: provisioning and verification engine for end-to-end tests of
//! remote deployment CLIs.
//!
//! A suite provisions one disposable, ssh-reachable container per scenario,
//! installs trust, points the binary under test at it and classifies what
//! the binary printed. Scenarios run strictly one at a time and every
//! sandbox is torn down on every exit path.

#![forbid(unsafe_code)]
// Public API types have docs; internal plumbing is documented where it
// is not obvious.
#![allow(missing_docs)]

pub mod classify;
pub mod command;
pub mod context;
pub mod error;
pub mod model;
pub mod retry;
pub mod runner;
pub mod sandbox;
pub mod suite;
pub mod trust;

pub use crate::command::{CommandRunner, ProcessRunner};
pub use crate::context::RunContext;
pub use crate::error::{ErrorCode, HarnessError, HarnessResult};
pub use crate::model::*;
pub use crate::suite::{RunOptions, Suite};
