//! Fixture: stands in for the ssh client during trust verification.
//!
//! Connects unless `PUSHBOX_FAKE_SSH_FAIL` is set.

use pushbox_fixtures::fake::{finish, ssh, SSH_FAIL_ENV};

fn main() {
    finish(&ssh(std::env::var_os(SSH_FAIL_ENV).is_some()));
}
