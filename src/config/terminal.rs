// ABOUTME: Pseudo-terminal settings for interactive sessions.
// ABOUTME: Terminal type and initial window size with sensible defaults.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalConfig {
    #[serde(default = "default_term")]
    pub term: String,

    #[serde(default = "default_cols")]
    pub cols: u32,

    #[serde(default = "default_rows")]
    pub rows: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}
