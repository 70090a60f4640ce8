// ABOUTME: Exec command implementation.
// ABOUTME: Runs one remote command and relays its output and exit status.

use super::{open_session, pump_output, wait_exit_status};
use sshplex::config::Profile;
use sshplex::error::Result;
use sshplex::ssh::Channel;

const BUFFER_SIZE: usize = 32 * 1024;

/// Run `command` on the profile's host. Returns the remote exit status.
pub fn exec_command(profile: &Profile, command: &[String]) -> Result<i32> {
    let session = open_session(profile)?;
    let mut channel = Channel::new(&session)?;

    let command = command.join(" ");
    tracing::debug!(command = %command, "executing");
    channel.request_exec(&command)?;
    channel.send_eof()?;

    let mut buf = vec![0u8; BUFFER_SIZE];
    while pump_output(&mut channel, &mut buf)? {}

    let status = wait_exit_status(&channel)?;
    channel.close()?;
    Ok(status)
}
