// ABOUTME: SSH session owning one transport connection.
// ABOUTME: Stages options, connects, authenticates, and serializes all transport access.

use super::error::{Error, Result};
use super::options::{OptionValue, SshOption};
use crate::transport::{RusshTransport, Transport, TransportResult};
use parking_lot::Mutex;
use std::path::Path;

/// One SSH connection and the channels multiplexed over it.
///
/// Every transport call, including those made by channels, goes through
/// `Session::transport_call`, which holds the per-session lock for the
/// duration of the call. Channels of one session can therefore be driven
/// from several threads without interleaving their transport operations.
///
/// Dropping the session disconnects it.
pub struct Session {
    /// `None` once disconnected.
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let released = self.transport.lock().is_none();
        f.debug_struct("Session")
            .field("transport", &"<dyn Transport>")
            .field("released", &released)
            .finish()
    }
}

impl Session {
    /// Create an unconnected session backed by russh.
    pub fn new() -> Result<Self> {
        Ok(Self::with_transport(RusshTransport::new()?))
    }

    /// Create an unconnected session over a custom transport engine.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Mutex::new(Some(Box::new(transport))),
        }
    }

    /// Run one transport call under the session lock and translate its error.
    pub(crate) fn transport_call<T>(
        &self,
        call: impl FnOnce(&mut dyn Transport) -> TransportResult<T>,
    ) -> Result<T> {
        let mut guard = self.transport.lock();
        let transport = guard.as_deref_mut().ok_or_else(Error::session_released)?;
        call(transport).map_err(Error::from)
    }

    /// Stage an option. Never touches the network.
    pub fn set_option(&mut self, option: SshOption, value: impl Into<OptionValue>) -> Result<()> {
        let value = value.into();
        option
            .validate(&value)
            .map_err(|reason| Error::configuration(option, reason))?;
        self.transport_call(|t| t.set_option(option, &value))
    }

    /// Perform the handshake with the staged options.
    pub fn connect(&mut self) -> Result<()> {
        self.transport_call(|t| t.connect())?;
        tracing::debug!("session connected");
        Ok(())
    }

    /// Authenticate with a password. Only meaningful after [`Session::connect`].
    pub fn password_auth(&mut self, password: &str) -> Result<()> {
        self.transport_call(|t| t.password_auth(password))
    }

    /// Authenticate with a private key file, decrypting it with `passphrase`
    /// when given.
    pub fn public_key_auth(&mut self, path: &Path, passphrase: Option<&str>) -> Result<()> {
        self.transport_call(|t| t.public_key_auth(path, passphrase))
    }

    /// Authenticate with the identities held by the running ssh-agent.
    pub fn agent_auth(&mut self) -> Result<()> {
        self.transport_call(|t| t.agent_auth())
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .as_deref()
            .is_some_and(|transport| transport.is_connected())
    }

    /// Gracefully disconnect and release the transport.
    ///
    /// Errors from the disconnect notification are logged and dropped so the
    /// transport is always released. Calling this again does nothing.
    pub fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.get_mut().take() else {
            return;
        };
        if let Err(e) = transport.disconnect() {
            tracing::warn!("Failed to cleanly disconnect SSH session: {}", e);
        }
        tracing::debug!("session released");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
