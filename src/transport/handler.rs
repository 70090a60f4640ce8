// ABOUTME: russh client handler used by the russh transport engine.
// ABOUTME: Verifies host keys against known_hosts and queues server-opened X11 channels.

use russh::client::{self, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use russh::Channel;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

/// Host key policy for one connection attempt.
#[derive(Debug, Clone)]
pub(crate) struct HostKeyPolicy {
    pub host: String,
    pub port: u16,
    /// Accept and record unknown hosts instead of rejecting them.
    pub trust_on_first_use: bool,
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
}

pub(crate) struct ClientHandler {
    policy: HostKeyPolicy,
    x11_channels: UnboundedSender<Channel<Msg>>,
}

impl ClientHandler {
    pub fn new(policy: HostKeyPolicy, x11_channels: UnboundedSender<Channel<Msg>>) -> Self {
        Self {
            policy,
            x11_channels,
        }
    }

    fn learn(&self, server_public_key: &ssh_key::PublicKey) {
        let policy = &self.policy;
        let learn_result = match &policy.known_hosts_path {
            Some(path) => learn_known_hosts_path(&policy.host, policy.port, server_public_key, path),
            None => learn_known_hosts(&policy.host, policy.port, server_public_key),
        };
        if let Err(e) = learn_result {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let policy = &self.policy;
        let check_result = match &policy.known_hosts_path {
            Some(path) => check_known_hosts_path(&policy.host, policy.port, server_public_key, path),
            None => check_known_hosts(&policy.host, policy.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if policy.trust_on_first_use => {
                tracing::warn!(
                    host = %policy.host,
                    port = policy.port,
                    "Trust-On-First-Use: accepting unknown host key"
                );
                self.learn(server_public_key);
                Ok(true)
            }
            Ok(false) => {
                tracing::debug!(host = %policy.host, "host key not in known_hosts");
                Ok(false)
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!(host = %policy.host, "host key does not match known_hosts entry");
                Ok(false)
            }
            // Unreadable or missing known_hosts file
            Err(e) => {
                tracing::debug!(host = %policy.host, "known_hosts check failed: {}", e);
                Ok(policy.trust_on_first_use)
            }
        }
    }

    async fn server_channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        tracing::debug!(
            originator = %originator_address,
            port = originator_port,
            "server opened X11 channel"
        );
        if self.x11_channels.send(channel).is_err() {
            // Engine is gone; the channel is dropped and closed with it.
            tracing::debug!("X11 channel arrived after transport shutdown");
        }
        Ok(())
    }
}
