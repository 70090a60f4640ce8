// ABOUTME: Connection profiles loaded from YAML.
// ABOUTME: A profile stages its settings on a session through set_option.

mod destination;
mod terminal;

pub use destination::{DEFAULT_PORT, Destination};
pub use terminal::TerminalConfig;

use crate::error::{Error, Result};
use crate::ssh::{self, Session, SshOption};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PROFILE_FILENAME: &str = "sshplex.yml";
pub const PROFILE_FILENAME_ALT: &str = "sshplex.yaml";
pub const PROFILE_FILENAME_DIR: &str = ".sshplex/profile.yml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// `[user@]host[:port]`
    pub host: Destination,

    /// Overrides the user part of `host`.
    #[serde(default)]
    pub user: Option<String>,

    /// Overrides the port part of `host`.
    #[serde(default)]
    pub port: Option<u16>,

    /// Cipher preference, most preferred first.
    #[serde(default)]
    pub ciphers: Vec<String>,

    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    /// Silence before a keepalive is sent; "0s" disables keepalives.
    #[serde(default, with = "humantime_serde")]
    pub keepalive: Option<Duration>,

    /// Private key used instead of a password.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default = "default_strict_host_key_checking")]
    pub strict_host_key_checking: bool,

    #[serde(default)]
    pub terminal: TerminalConfig,
}

fn default_strict_host_key_checking() -> bool {
    true
}

impl Profile {
    /// Profile for a destination with every other setting at its default.
    pub fn for_destination(host: Destination) -> Self {
        Self {
            host,
            user: None,
            port: None,
            ciphers: Vec::new(),
            connect_timeout: None,
            keepalive: None,
            identity_file: None,
            known_hosts: None,
            strict_host_key_checking: default_strict_host_key_checking(),
            terminal: TerminalConfig::default(),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(PROFILE_FILENAME),
            dir.join(PROFILE_FILENAME_ALT),
            dir.join(PROFILE_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ProfileNotFound(dir.to_path_buf()))
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref().or(self.host.user.as_deref())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(self.host.port)
    }

    /// Stage every setting of this profile on `session`.
    pub fn apply(&self, session: &mut Session) -> ssh::Result<()> {
        session.set_option(SshOption::Host, self.host.host.as_str())?;
        session.set_option(SshOption::Port, self.port())?;
        if let Some(user) = self.user() {
            session.set_option(SshOption::User, user)?;
        }
        if !self.ciphers.is_empty() {
            session.set_option(SshOption::CiphersClientToServer, self.ciphers.join(","))?;
        }
        if let Some(timeout) = self.connect_timeout {
            session.set_option(SshOption::Timeout, timeout_secs(timeout))?;
        }
        if let Some(interval) = self.keepalive {
            session.set_option(SshOption::KeepAliveInterval, timeout_secs(interval))?;
        }
        if let Some(path) = &self.known_hosts {
            session.set_option(SshOption::KnownHosts, path.to_string_lossy().into_owned())?;
        }
        session.set_option(
            SshOption::StrictHostKeyChecking,
            self.strict_host_key_checking,
        )?;
        Ok(())
    }
}

/// Whole seconds, rounding sub-second timeouts up so they stay bounded.
fn timeout_secs(timeout: Duration) -> i64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}
