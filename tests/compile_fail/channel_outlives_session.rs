// ABOUTME: Compile-fail test verifying a Channel cannot outlive its Session.
// ABOUTME: This test should fail to compile, validating the borrow.

use sshplex::ssh::{Channel, Session};

fn main() {
    let channel = {
        let session = Session::new().unwrap();
        Channel::new(&session).unwrap()
    }; // ERROR: `session` does not live long enough
    drop(channel);
}
