// ABOUTME: Shell command implementation.
// ABOUTME: Opens a PTY-backed shell and relays local stdin to it.

use super::{open_session, pump_output, wait_exit_status};
use sshplex::config::Profile;
use sshplex::error::Result;
use sshplex::ssh::Channel;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

const BUFFER_SIZE: usize = 32 * 1024;

/// Open an interactive shell. Returns the remote exit status.
pub fn shell_command(profile: &Profile) -> Result<i32> {
    let session = open_session(profile)?;
    let mut channel = Channel::new(&session)?;

    let terminal = &profile.terminal;
    channel.request_pty(&terminal.term, terminal.cols, terminal.rows)?;
    channel.request_shell()?;
    tracing::debug!(channel = %channel.handle(), "shell started");

    let input = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut buf = vec![0u8; BUFFER_SIZE];

    loop {
        if stdin_open {
            stdin_open = forward_input(&mut channel, &input)?;
        }
        if !pump_output(&mut channel, &mut buf)? {
            break;
        }
    }

    let status = wait_exit_status(&channel)?;
    channel.close()?;
    Ok(status)
}

/// Write everything the stdin reader has queued. Sends EOF when stdin ends.
fn forward_input(channel: &mut Channel<'_>, input: &Receiver<Vec<u8>>) -> Result<bool> {
    loop {
        match input.try_recv() {
            Ok(chunk) => {
                channel.write(&chunk, false)?;
            }
            Err(TryRecvError::Empty) => return Ok(true),
            Err(TryRecvError::Disconnected) => {
                channel.send_eof()?;
                return Ok(false);
            }
        }
    }
}

fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut chunk = [0u8; 4096];
        loop {
            match stdin.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
