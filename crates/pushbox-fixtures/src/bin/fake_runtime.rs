//! Fixture: stands in for the docker CLI.
//!
//! Usage: `pushbox-fake-runtime <run|exec|inspect|rm|ps|build> [args]`
//!
//! State lives under `$PUSHBOX_FAKE_STATE`.

use pushbox_fixtures::fake::{finish, runtime, FakeState};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    finish(&runtime(&FakeState::from_env(), &args));
}
