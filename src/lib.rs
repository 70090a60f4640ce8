// ABOUTME: Library root for sshplex - exposes the session and channel API.
// ABOUTME: The CLI binary is in main.rs.

pub mod config;
pub mod error;
pub mod ssh;
pub mod transport;
