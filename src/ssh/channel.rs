// ABOUTME: Logical channel multiplexed over a session's transport.
// ABOUTME: Covers shell/exec requests, PTY negotiation, bounded I/O, and X11 acceptance.

use super::error::{Error, Result};
use super::session::Session;
use crate::transport::{
    ChannelHandle, ChannelRequest, ChannelStatus, DataStream, Transport, TransportResult,
    X11Request,
};
use std::io;
use std::time::Duration;

/// Wait slice used by the blocking `io::Read` adapter between EOF checks.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A duplex stream over a session's transport.
///
/// Borrows its [`Session`], so it cannot outlive the connection it runs on.
/// Dropping the channel closes it.
pub struct Channel<'s> {
    session: &'s Session,
    handle: ChannelHandle,
    /// Set once `close` has run, so the transport sees a single close.
    closed: bool,
}

impl std::fmt::Debug for Channel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("handle", &self.handle)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<'s> Channel<'s> {
    /// Allocate a new channel on a connected session.
    ///
    /// Nothing is requested from the remote yet; the channel stays in the
    /// created state until a shell, command or subsystem request succeeds.
    pub fn new(session: &'s Session) -> Result<Self> {
        let handle = session.transport_call(|t| t.open_channel())?;
        tracing::debug!(channel = %handle, "channel created");
        Ok(Self {
            session,
            handle,
            closed: false,
        })
    }

    /// Wrap a channel the remote already opened.
    fn accepted(session: &'s Session, handle: ChannelHandle) -> Self {
        Self {
            session,
            handle,
            closed: false,
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    fn call<T>(
        &self,
        op: impl FnOnce(&mut dyn Transport, ChannelHandle) -> TransportResult<T>,
    ) -> Result<T> {
        if self.closed {
            return Err(Error::channel_closed());
        }
        let handle = self.handle;
        self.session.transport_call(|t| op(t, handle))
    }

    /// Request a pseudo-terminal. Must precede [`Channel::request_shell`] for
    /// an interactive terminal.
    pub fn request_pty(&mut self, term: &str, cols: u32, rows: u32) -> Result<()> {
        self.call(|t, ch| t.request_pty(ch, term, cols, rows))
    }

    /// Start an interactive shell.
    pub fn request_shell(&mut self) -> Result<()> {
        self.call(|t, ch| t.request(ch, &ChannelRequest::Shell))
    }

    /// Run a single command.
    pub fn request_exec(&mut self, command: &str) -> Result<()> {
        self.call(|t, ch| t.request(ch, &ChannelRequest::Exec(command.to_string())))
    }

    /// Start a subsystem such as `sftp`.
    pub fn request_subsystem(&mut self, name: &str) -> Result<()> {
        self.call(|t, ch| t.request(ch, &ChannelRequest::Subsystem(name.to_string())))
    }

    /// Ask the remote to forward X11 connections over this session.
    pub fn request_x11(&mut self, request: &X11Request) -> Result<()> {
        self.call(|t, ch| t.request_x11(ch, request))
    }

    /// Notify the remote that the terminal was resized.
    pub fn change_pty_size(&mut self, cols: u32, rows: u32) -> Result<()> {
        self.call(|t, ch| t.change_pty_size(ch, cols, rows))
    }

    /// Read into `buf`, waiting at most `timeout`.
    ///
    /// Returns 0 if the timeout expires with no data or after the remote sent
    /// EOF. A zero timeout polls. Fails once the channel is closed and no
    /// received data is left.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.call(|t, ch| t.read(ch, buf, DataStream::Stdout, timeout))
    }

    /// Read into `buf[offset..offset + length]`.
    pub fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        timeout: Duration,
    ) -> Result<usize> {
        let window = window_mut(buf, offset, length)?;
        self.read(window, timeout)
    }

    /// Read from the remote's standard error stream.
    pub fn read_stderr(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.call(|t, ch| t.read(ch, buf, DataStream::Stderr, timeout))
    }

    /// Write all of `buf`, to the extended stderr stream if `is_stderr`.
    ///
    /// Blocks until the transport accepts the bytes (flow-control window).
    pub fn write(&mut self, buf: &[u8], is_stderr: bool) -> Result<usize> {
        let stream = DataStream::from_stderr_flag(is_stderr);
        self.call(|t, ch| t.write(ch, buf, stream))
    }

    /// Write `buf[offset..offset + length]`.
    pub fn write_at(
        &mut self,
        buf: &[u8],
        offset: usize,
        length: usize,
        is_stderr: bool,
    ) -> Result<usize> {
        let window = offset
            .checked_add(length)
            .and_then(|end| buf.get(offset..end))
            .ok_or_else(|| Error::out_of_range(offset, length, buf.len()))?;
        self.write(window, is_stderr)
    }

    /// Signal that no more data will be written.
    pub fn send_eof(&mut self) -> Result<()> {
        self.call(|t, ch| t.send_eof(ch))
    }

    /// Wait up to `timeout` for the remote to open a forwarded X11 channel.
    ///
    /// The returned channel is already open. `Ok(None)` means the timeout
    /// expired.
    pub fn accept_x11(&self, timeout: Duration) -> Result<Option<Channel<'s>>> {
        let accepted = self.call(|t, _| t.accept_x11(timeout))?;
        Ok(accepted.map(|handle| Channel::accepted(self.session, handle)))
    }

    /// Close the channel. Later calls do nothing.
    ///
    /// Only the first call can fail; the channel counts as closed either way.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let handle = self.handle;
        self.session.transport_call(|t| t.close_channel(handle))?;
        tracing::debug!(channel = %handle, "channel closed");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        if self.closed {
            return ChannelStatus {
                open: false,
                closed: true,
                eof: true,
            };
        }
        self.call(|t, ch| t.channel_status(ch)).unwrap_or_else(|e| {
            tracing::debug!(channel = %self.handle, "status query failed: {}", e);
            ChannelStatus {
                open: false,
                closed: true,
                eof: true,
            }
        })
    }

    /// A shell, command or subsystem is running, or the channel was accepted,
    /// and it has not been closed.
    pub fn is_open(&self) -> bool {
        let status = self.status();
        status.open && !status.closed
    }

    pub fn is_closed(&self) -> bool {
        self.status().closed
    }

    /// The remote will send no more data.
    pub fn is_eof(&self) -> bool {
        self.status().eof
    }

    /// Exit status reported by the remote command or shell, if any yet.
    pub fn exit_status(&self) -> Result<Option<u32>> {
        self.call(|t, ch| t.exit_status(ch))
    }
}

fn window_mut(buf: &mut [u8], offset: usize, length: usize) -> Result<&mut [u8]> {
    let capacity = buf.len();
    offset
        .checked_add(length)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or_else(|| Error::out_of_range(offset, length, capacity))
}

impl Drop for Channel<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(channel = %self.handle, "close on drop failed: {}", e);
        }
    }
}

/// Blocking stream view: reads wait until data arrives and return 0 only at
/// EOF or after the remote closed the channel.
impl io::Read for Channel<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match Channel::read(self, buf, STREAM_POLL_INTERVAL) {
                Ok(n) if n > 0 || self.is_eof() => return Ok(n),
                Ok(_) => {}
                Err(_) if !self.closed && self.is_closed() => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl io::Write for Channel<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Channel::write(self, buf, false)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
