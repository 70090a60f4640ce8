// ABOUTME: Compile-fail test verifying a Session cannot be disconnected while a Channel borrows it.
// ABOUTME: This test should fail to compile, validating the borrow.

use sshplex::ssh::{Channel, Session};

fn main() {
    let mut session = Session::new().unwrap();
    let channel = Channel::new(&session).unwrap();
    session.disconnect(); // ERROR: cannot borrow `session` as mutable
    drop(channel);
}
