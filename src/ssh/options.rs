// ABOUTME: Session option keys and values staged before connecting.
// ABOUTME: Checks value kind and range before a value reaches the transport.

use std::fmt;

/// Recognized session option keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SshOption {
    /// Target host (string). `user@host` also sets the user.
    Host,
    /// Target port (integer, 1-65535).
    Port,
    /// Login user (string).
    User,
    /// Comma-separated cipher preference, client to server (string).
    CiphersClientToServer,
    /// Comma-separated cipher preference, server to client (string).
    CiphersServerToClient,
    /// Connect and request timeout in seconds, 0 for none (integer).
    Timeout,
    /// Path of the known_hosts file (string).
    KnownHosts,
    /// 0 accepts and records unknown host keys, anything else rejects them (integer).
    StrictHostKeyChecking,
    /// Seconds of silence from the server before a keepalive is sent, 0 to
    /// disable (integer). Defaults to 20.
    KeepAliveInterval,
}

impl SshOption {
    pub fn name(self) -> &'static str {
        match self {
            SshOption::Host => "Host",
            SshOption::Port => "Port",
            SshOption::User => "User",
            SshOption::CiphersClientToServer => "CiphersClientToServer",
            SshOption::CiphersServerToClient => "CiphersServerToClient",
            SshOption::Timeout => "Timeout",
            SshOption::KnownHosts => "KnownHosts",
            SshOption::StrictHostKeyChecking => "StrictHostKeyChecking",
            SshOption::KeepAliveInterval => "KeepAliveInterval",
        }
    }

    /// The kind of value this option takes.
    pub fn value_kind(self) -> ValueKind {
        match self {
            SshOption::Port
            | SshOption::Timeout
            | SshOption::StrictHostKeyChecking
            | SshOption::KeepAliveInterval => ValueKind::Int,
            _ => ValueKind::Str,
        }
    }

    /// Check a value's kind and range. Content checks (host syntax, cipher
    /// names) belong to the transport.
    pub fn validate(self, value: &OptionValue) -> Result<(), String> {
        if value.kind() != self.value_kind() {
            return Err(format!(
                "expected {} value, got {}",
                self.value_kind(),
                value.kind()
            ));
        }

        match (self, value) {
            (SshOption::Port, OptionValue::Int(port)) if !(1..=65535).contains(port) => {
                Err(format!("port {} is outside 1-65535", port))
            }
            (SshOption::Timeout, OptionValue::Int(secs)) if *secs < 0 => {
                Err(format!("timeout cannot be negative: {}", secs))
            }
            (SshOption::KeepAliveInterval, OptionValue::Int(secs)) if *secs < 0 => {
                Err(format!("keepalive interval cannot be negative: {}", secs))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SshOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Str => f.write_str("string"),
            ValueKind::Int => f.write_str("integer"),
        }
    }
}

/// A staged option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
}

impl OptionValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            OptionValue::Str(_) => ValueKind::Str,
            OptionValue::Int(_) => ValueKind::Int,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            OptionValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(n) => Some(*n),
            OptionValue::Str(_) => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<&String> for OptionValue {
    fn from(value: &String) -> Self {
        OptionValue::Str(value.clone())
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value.into())
    }
}

impl From<u16> for OptionValue {
    fn from(value: u16) -> Self {
        OptionValue::Int(value.into())
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        OptionValue::Int(value.into())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Int(value.into())
    }
}
