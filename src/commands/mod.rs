// ABOUTME: Command module aggregator for the sshplex CLI.
// ABOUTME: Resolves connection profiles and opens authenticated sessions.

mod exec;
mod shell;

pub use exec::exec_command;
pub use shell::shell_command;

use crate::cli::ConnectArgs;
use sshplex::config::{Destination, Profile};
use sshplex::error::{Error, Result};
use sshplex::ssh::{Channel, ErrorKind, Session};
use std::env;
use std::io::{self, BufRead, Write};
use std::time::Duration;

pub const PASSWORD_ENV: &str = "SSHPLEX_PASSWORD";
/// Passphrase for the identity file, if it is encrypted.
pub const PASSPHRASE_ENV: &str = "SSHPLEX_KEY_PASSPHRASE";
const AGENT_SOCK_ENV: &str = "SSH_AUTH_SOCK";

/// Read timeout for each pass of the output loops.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Build the effective profile: the profile file (explicit or discovered)
/// with command-line arguments layered on top.
pub fn resolve_profile(args: &ConnectArgs) -> Result<Profile> {
    let destination = args
        .destination
        .as_deref()
        .map(|d| Destination::parse(d).map_err(Error::InvalidDestination))
        .transpose()?;

    let mut profile = match (&args.profile, destination) {
        (Some(path), destination) => {
            let mut profile = Profile::load(path)?;
            if let Some(destination) = destination {
                profile.host = destination;
            }
            profile
        }
        (None, Some(destination)) => Profile::for_destination(destination),
        (None, None) => {
            let cwd = env::current_dir()?;
            Profile::discover(&cwd).map_err(|e| match e {
                Error::ProfileNotFound(_) => Error::MissingDestination,
                other => other,
            })?
        }
    };

    if let Some(port) = args.port {
        profile.port = Some(port);
    }
    if let Some(user) = &args.user {
        profile.user = Some(user.clone());
    }
    if !args.ciphers.is_empty() {
        profile.ciphers = args.ciphers.clone();
    }
    if let Some(term) = &args.term {
        profile.terminal.term = term.clone();
    }
    if let Some(timeout) = args.timeout {
        profile.connect_timeout = Some(timeout);
    }
    if let Some(identity) = &args.identity {
        profile.identity_file = Some(identity.clone());
    }
    if let Some(keepalive) = args.keepalive {
        profile.keepalive = Some(keepalive);
    }
    Ok(profile)
}

/// Connect and authenticate a session for `profile`.
pub fn open_session(profile: &Profile) -> Result<Session> {
    if profile.user().is_none() {
        return Err(Error::MissingUser(profile.host.to_string()));
    }

    let mut session = Session::new()?;
    profile.apply(&mut session)?;
    tracing::info!(destination = %profile.host, "connecting");
    session.connect()?;

    let method = authenticate(&mut session, profile)?;
    tracing::info!(destination = %profile.host, method, "authenticated");
    Ok(session)
}

/// Key file if the profile names one, then a password from the environment,
/// then the ssh-agent, then a password read from stdin.
fn authenticate(session: &mut Session, profile: &Profile) -> Result<&'static str> {
    if let Some(path) = &profile.identity_file {
        let passphrase = env::var(PASSPHRASE_ENV).ok();
        session.public_key_auth(path, passphrase.as_deref())?;
        return Ok("publickey");
    }
    if let Ok(password) = env::var(PASSWORD_ENV) {
        session.password_auth(&password)?;
        return Ok("password");
    }
    if env::var_os(AGENT_SOCK_ENV).is_some() {
        match session.agent_auth() {
            Ok(()) => return Ok("agent"),
            Err(e) => tracing::debug!("agent authentication failed: {}", e),
        }
    }
    let password = read_password()?;
    session.password_auth(&password)?;
    Ok("password")
}

fn read_password() -> Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(Error::MissingPassword);
    }
    Ok(password.to_string())
}

/// Copy whatever stdout and stderr data arrives within one poll interval.
///
/// Returns false once the remote has nothing more to send.
fn pump_output(channel: &mut Channel<'_>, buf: &mut [u8]) -> Result<bool> {
    let out = match channel.read(buf, POLL_INTERVAL) {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::ResourceMisuse => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if out > 0 {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&buf[..out])?;
        stdout.flush()?;
    }

    let err = match channel.read_stderr(buf, Duration::ZERO) {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::ResourceMisuse => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if err > 0 {
        io::stderr().lock().write_all(&buf[..err])?;
    }

    Ok(out > 0 || err > 0 || !channel.is_eof())
}

/// Exit code reported when the remote closes without an exit status.
const NO_EXIT_STATUS: i32 = 255;

/// Wait for the remote to report an exit status or close the channel.
fn wait_exit_status(channel: &Channel<'_>) -> Result<i32> {
    loop {
        if let Some(status) = channel.exit_status()? {
            return Ok(i32::try_from(status).unwrap_or(i32::MAX));
        }
        if channel.is_closed() {
            tracing::debug!(channel = %channel.handle(), "closed without exit status");
            return Ok(NO_EXIT_STATUS);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
