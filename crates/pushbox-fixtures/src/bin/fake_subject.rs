//! Fixture: stands in for the deployment CLI under test.
//!
//! Usage: `pushbox-fake-subject push -p <src> --to <dest> --app <app> --ssh-port <port> ...`
//!
//! Answers according to the image of the fake sandbox on `--ssh-port`.

use pushbox_fixtures::fake::{finish, subject, FakeState};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    finish(&subject(&FakeState::from_env(), &args));
}
