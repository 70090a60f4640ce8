// ABOUTME: Narrow blocking interface between sessions and an SSH protocol engine.
// ABOUTME: Defines channel handles, engine error codes, and the Transport trait.

mod engine;
mod handler;

pub use engine::RusshTransport;

use crate::ssh::{OptionValue, SshOption};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Stable numeric codes reported by transport engines.
///
/// The first three values match the classic libssh error enumeration so
/// codes stay meaningful to people used to that library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// The remote refused a request (auth, pty, shell, ...).
    RequestDenied = 1,
    /// Unrecoverable protocol or network failure.
    Fatal = 2,
    /// The operation was interrupted before completing.
    Interrupted = 3,
    /// An argument or option value was rejected.
    InvalidArgument = 4,
    /// The session or channel has already been released.
    InvalidHandle = 5,
    /// The operation requires an established connection.
    NotConnected = 6,
    /// The server's host key was not accepted.
    HostKeyRejected = 7,
    /// A blocking operation ran past its deadline.
    TimedOut = 8,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Native failure signal raised by a transport engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct TransportError {
    pub code: ErrorCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidHandle, message)
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorCode::NotConnected, "session is not connected")
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Engine-assigned identifier of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(u32);

impl ChannelHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which data stream of a channel a read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataStream {
    /// Primary data (remote stdin/stdout).
    Stdout,
    /// Extended data type 1 (stderr).
    Stderr,
}

impl DataStream {
    pub fn from_stderr_flag(is_stderr: bool) -> Self {
        if is_stderr {
            DataStream::Stderr
        } else {
            DataStream::Stdout
        }
    }
}

/// Live state of a channel as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStatus {
    /// A shell/exec/subsystem request succeeded, or the channel was accepted.
    pub open: bool,
    /// Closed locally or by the remote.
    pub closed: bool,
    /// The remote sent EOF.
    pub eof: bool,
}

/// What a channel should run once opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Shell,
    Exec(String),
    Subsystem(String),
}

/// Parameters of an X11 forwarding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X11Request {
    /// Forward only the first X11 connection.
    pub single_connection: bool,
    pub auth_protocol: String,
    pub auth_cookie: String,
    pub screen_number: u32,
}

impl Default for X11Request {
    fn default() -> Self {
        Self {
            single_connection: false,
            auth_protocol: "MIT-MAGIC-COOKIE-1".to_string(),
            auth_cookie: String::new(),
            screen_number: 0,
        }
    }
}

/// Blocking capability set of an SSH protocol engine.
///
/// A session owns exactly one transport and serializes every call into it,
/// so implementations never see concurrent calls. Every method that may wait
/// on the network blocks the calling thread; none of them may spawn work that
/// outlives the call.
pub trait Transport: Send {
    /// Stage an option. Must not touch the network.
    fn set_option(&mut self, option: SshOption, value: &OptionValue) -> TransportResult<()>;

    /// Run the handshake with the staged options.
    fn connect(&mut self) -> TransportResult<()>;

    fn is_connected(&self) -> bool;

    fn password_auth(&mut self, password: &str) -> TransportResult<()>;

    /// Authenticate with a private key loaded from `path`.
    fn public_key_auth(&mut self, path: &Path, passphrase: Option<&str>) -> TransportResult<()>;

    /// Offer each identity of the local ssh-agent until one is accepted.
    fn agent_auth(&mut self) -> TransportResult<()>;

    /// Send a disconnect notification and drop the connection.
    fn disconnect(&mut self) -> TransportResult<()>;

    /// Allocate a channel slot. No request is sent to the remote yet.
    fn open_channel(&mut self) -> TransportResult<ChannelHandle>;

    fn request_pty(
        &mut self,
        channel: ChannelHandle,
        term: &str,
        cols: u32,
        rows: u32,
    ) -> TransportResult<()>;

    fn request(&mut self, channel: ChannelHandle, request: &ChannelRequest)
    -> TransportResult<()>;

    fn request_x11(&mut self, channel: ChannelHandle, request: &X11Request)
    -> TransportResult<()>;

    fn change_pty_size(&mut self, channel: ChannelHandle, cols: u32, rows: u32)
    -> TransportResult<()>;

    /// Read up to `buf.len()` bytes. Returns 0 when the timeout expires
    /// without data or when the remote sent EOF.
    fn read(
        &mut self,
        channel: ChannelHandle,
        buf: &mut [u8],
        stream: DataStream,
        timeout: Duration,
    ) -> TransportResult<usize>;

    fn write(
        &mut self,
        channel: ChannelHandle,
        data: &[u8],
        stream: DataStream,
    ) -> TransportResult<usize>;

    fn send_eof(&mut self, channel: ChannelHandle) -> TransportResult<()>;

    /// Wait for the remote to open a forwarded X11 channel.
    fn accept_x11(&mut self, timeout: Duration) -> TransportResult<Option<ChannelHandle>>;

    /// Close the channel. Closing an already closed channel succeeds.
    fn close_channel(&mut self, channel: ChannelHandle) -> TransportResult<()>;

    fn channel_status(&mut self, channel: ChannelHandle) -> TransportResult<ChannelStatus>;

    fn exit_status(&mut self, channel: ChannelHandle) -> TransportResult<Option<u32>>;
}
