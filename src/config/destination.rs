// ABOUTME: SSH destination addresses.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@[::1]:port".

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
}

impl Destination {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("destination cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.rfind('@') {
            Some(at_pos) => (Some(&s[..at_pos]), &s[at_pos + 1..]),
            None => (None, s),
        };
        if user_part.is_some_and(str::is_empty) {
            return Err("user before '@' cannot be empty".to_string());
        }

        let (host, port_str) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| format!("unterminated '[' in {}", s))?;
            match after {
                "" => (host, None),
                _ => match after.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(format!("unexpected text after ']': {}", after)),
                },
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        let port = match port_str {
            Some(port_str) => port_str
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| format!("invalid port: {}", port_str))?,
            None => DEFAULT_PORT,
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(Destination {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
        })
    }
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Destination::parse(&s).map_err(serde::de::Error::custom)
    }
}
