// ABOUTME: In-memory Transport for exercising sessions and channels without a network.
// ABOUTME: Echoes shell input, replays scripted commands, and injects remote events.

use parking_lot::Mutex;
use sshplex::ssh::{OptionValue, SshOption};
use sshplex::transport::{
    ChannelHandle, ChannelRequest, ChannelStatus, DataStream, ErrorCode, Transport,
    TransportError, TransportResult, X11Request,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Output and exit status replayed for one `exec` command.
#[derive(Debug, Clone, Default)]
pub struct CommandScript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: u32,
}

#[derive(Debug, Default)]
struct ScriptedChannel {
    open: bool,
    remote_closed: bool,
    eof: bool,
    pty: Option<(String, u32, u32)>,
    echo: bool,
    stdout: VecDeque<u8>,
    stderr: VecDeque<u8>,
    exit_status: Option<u32>,
}

impl ScriptedChannel {
    fn buffer(&mut self, stream: DataStream) -> &mut VecDeque<u8> {
        match stream {
            DataStream::Stdout => &mut self.stdout,
            DataStream::Stderr => &mut self.stderr,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    options: HashMap<SshOption, OptionValue>,
    connected: bool,
    authenticated_with: Option<&'static str>,
    password: Option<String>,
    authorized_key: Option<PathBuf>,
    agent: bool,
    connect_error: Option<TransportError>,
    disconnect_error: Option<TransportError>,
    denied: HashSet<&'static str>,
    commands: HashMap<String, CommandScript>,
    channels: HashMap<ChannelHandle, ScriptedChannel>,
    next_handle: u32,
    pending_x11: VecDeque<Vec<u8>>,
    calls: Vec<String>,
}

impl State {
    fn channel(&mut self, handle: ChannelHandle) -> TransportResult<&mut ScriptedChannel> {
        self.channels
            .get_mut(&handle)
            .ok_or_else(|| TransportError::invalid_handle(format!("channel {} is closed", handle)))
    }

    fn live_channel(&mut self, handle: ChannelHandle) -> TransportResult<&mut ScriptedChannel> {
        let channel = self.channel(handle)?;
        if channel.remote_closed {
            return Err(TransportError::invalid_handle("channel is closed"));
        }
        Ok(channel)
    }

    fn allocate(&mut self, channel: ScriptedChannel) -> ChannelHandle {
        self.next_handle += 1;
        let handle = ChannelHandle::new(self.next_handle);
        self.channels.insert(handle, channel);
        handle
    }

    fn check_auth_ready(&self) -> TransportResult<()> {
        if !self.connected {
            return Err(not_connected());
        }
        if !self.options.contains_key(&SshOption::User) {
            return Err(TransportError::invalid_argument("user is not set"));
        }
        Ok(())
    }

    fn check_denied(&self, what: &'static str) -> TransportResult<()> {
        if self.denied.contains(what) {
            return Err(TransportError::new(
                ErrorCode::RequestDenied,
                format!("{} request denied", what),
            ));
        }
        Ok(())
    }
}

/// Scripted engine. Clones share state, so a test keeps one clone as a
/// control handle after handing another to a session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only this password.
    pub fn with_password(self, password: &str) -> Self {
        self.state.lock().password = Some(password.to_string());
        self
    }

    /// Accept public key authentication with the key stored at `path`.
    pub fn with_key(self, path: &Path) -> Self {
        self.state.lock().authorized_key = Some(path.to_path_buf());
        self
    }

    /// Pretend an ssh-agent holding an accepted identity is running.
    pub fn with_agent(self) -> Self {
        self.state.lock().agent = true;
        self
    }

    pub fn with_command(self, command: &str, script: CommandScript) -> Self {
        self.state.lock().commands.insert(command.to_string(), script);
        self
    }

    /// Refuse requests named `what` ("pty", "shell", "exec", "subsystem", "x11").
    pub fn deny(self, what: &'static str) -> Self {
        self.state.lock().denied.insert(what);
        self
    }

    pub fn fail_connect(self, code: ErrorCode, message: &str) -> Self {
        self.state.lock().connect_error = Some(TransportError::new(code, message));
        self
    }

    pub fn fail_disconnect(self) -> Self {
        self.state.lock().disconnect_error =
            Some(TransportError::new(ErrorCode::Fatal, "socket already gone"));
        self
    }

    /// Queue an X11 connection the remote will open, carrying `data`.
    pub fn push_x11(&self, data: &[u8]) {
        self.state.lock().pending_x11.push_back(data.to_vec());
    }

    /// Deliver data as if the remote sent it.
    pub fn remote_send(&self, handle: ChannelHandle, stream: DataStream, data: &[u8]) {
        let mut state = self.state.lock();
        if let Some(channel) = state.channels.get_mut(&handle) {
            channel.buffer(stream).extend(data);
        }
    }

    pub fn remote_eof(&self, handle: ChannelHandle) {
        if let Some(channel) = self.state.lock().channels.get_mut(&handle) {
            channel.eof = true;
        }
    }

    pub fn remote_close(&self, handle: ChannelHandle) {
        if let Some(channel) = self.state.lock().channels.get_mut(&handle) {
            channel.eof = true;
            channel.remote_closed = true;
        }
    }

    pub fn option(&self, option: SshOption) -> Option<OptionValue> {
        self.state.lock().options.get(&option).cloned()
    }

    /// Method of the successful authentication, if any.
    pub fn authenticated_with(&self) -> Option<&'static str> {
        self.state.lock().authenticated_with
    }

    pub fn pty(&self, handle: ChannelHandle) -> Option<(String, u32, u32)> {
        self.state
            .lock()
            .channels
            .get(&handle)
            .and_then(|channel| channel.pty.clone())
    }

    /// Every transport call made so far, by name.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    fn enter(&self, call: &str) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.calls.push(call.to_string());
        state
    }
}

fn not_connected() -> TransportError {
    TransportError::not_connected()
}

impl Transport for ScriptedTransport {
    fn set_option(&mut self, option: SshOption, value: &OptionValue) -> TransportResult<()> {
        let mut state = self.enter("set_option");
        if option == SshOption::Host && value.as_str().is_some_and(|h| h.contains(' ')) {
            return Err(TransportError::invalid_argument("malformed host"));
        }
        state.options.insert(option, value.clone());
        Ok(())
    }

    fn connect(&mut self) -> TransportResult<()> {
        let mut state = self.enter("connect");
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        if !state.options.contains_key(&SshOption::Host) {
            return Err(TransportError::invalid_argument("host is not set"));
        }
        state.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn password_auth(&mut self, password: &str) -> TransportResult<()> {
        let mut state = self.enter("password_auth");
        state.check_auth_ready()?;
        if state.password.as_deref().is_some_and(|p| p != password) {
            return Err(TransportError::new(
                ErrorCode::RequestDenied,
                "password authentication rejected",
            ));
        }
        state.authenticated_with = Some("password");
        Ok(())
    }

    fn public_key_auth(&mut self, path: &Path, _passphrase: Option<&str>) -> TransportResult<()> {
        let mut state = self.enter("public_key_auth");
        state.check_auth_ready()?;
        if state.authorized_key.as_deref() != Some(path) {
            return Err(TransportError::new(
                ErrorCode::RequestDenied,
                "public key authentication rejected",
            ));
        }
        state.authenticated_with = Some("publickey");
        Ok(())
    }

    fn agent_auth(&mut self) -> TransportResult<()> {
        let mut state = self.enter("agent_auth");
        state.check_auth_ready()?;
        if !state.agent {
            return Err(TransportError::invalid_argument("ssh agent not available"));
        }
        state.authenticated_with = Some("agent");
        Ok(())
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        let mut state = self.enter("disconnect");
        state.connected = false;
        state.channels.clear();
        match state.disconnect_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn open_channel(&mut self) -> TransportResult<ChannelHandle> {
        let mut state = self.enter("open_channel");
        if !state.connected {
            return Err(not_connected());
        }
        Ok(state.allocate(ScriptedChannel::default()))
    }

    fn request_pty(
        &mut self,
        channel: ChannelHandle,
        term: &str,
        cols: u32,
        rows: u32,
    ) -> TransportResult<()> {
        let mut state = self.enter("request_pty");
        state.check_denied("pty")?;
        state.live_channel(channel)?.pty = Some((term.to_string(), cols, rows));
        Ok(())
    }

    fn request(&mut self, channel: ChannelHandle, request: &ChannelRequest) -> TransportResult<()> {
        let mut state = self.enter("request");
        let what = match request {
            ChannelRequest::Shell => "shell",
            ChannelRequest::Exec(_) => "exec",
            ChannelRequest::Subsystem(_) => "subsystem",
        };
        state.check_denied(what)?;
        let script = match request {
            ChannelRequest::Exec(command) => Some(
                state
                    .commands
                    .get(command)
                    .cloned()
                    .unwrap_or_else(|| CommandScript {
                        exit_status: 127,
                        stderr: format!("{}: command not found\n", command).into_bytes(),
                        ..CommandScript::default()
                    }),
            ),
            _ => None,
        };

        let slot = state.live_channel(channel)?;
        if slot.open {
            return Err(TransportError::invalid_argument(
                "channel already runs a shell, command or subsystem",
            ));
        }
        slot.open = true;
        match script {
            Some(script) => {
                slot.stdout.extend(script.stdout);
                slot.stderr.extend(script.stderr);
                slot.exit_status = Some(script.exit_status);
                slot.eof = true;
            }
            None => slot.echo = true,
        }
        Ok(())
    }

    fn request_x11(&mut self, channel: ChannelHandle, _request: &X11Request) -> TransportResult<()> {
        let mut state = self.enter("request_x11");
        state.check_denied("x11")?;
        state.live_channel(channel)?;
        Ok(())
    }

    fn change_pty_size(&mut self, channel: ChannelHandle, cols: u32, rows: u32) -> TransportResult<()> {
        let mut state = self.enter("change_pty_size");
        let slot = state.live_channel(channel)?;
        match &mut slot.pty {
            Some(pty) => {
                pty.1 = cols;
                pty.2 = rows;
                Ok(())
            }
            None => Err(TransportError::new(ErrorCode::RequestDenied, "no pty allocated")),
        }
    }

    fn read(
        &mut self,
        channel: ChannelHandle,
        buf: &mut [u8],
        stream: DataStream,
        timeout: Duration,
    ) -> TransportResult<usize> {
        {
            let mut state = self.enter("read");
            let slot = state.channel(channel)?;
            if buf.is_empty() {
                return Ok(0);
            }
            if slot.buffer(stream).is_empty() {
                if slot.remote_closed {
                    return Err(TransportError::invalid_handle("channel is closed"));
                }
                if slot.eof {
                    return Ok(0);
                }
            } else {
                return Ok(take(slot.buffer(stream), buf));
            }
        }
        // Nothing buffered: the remote stays quiet for the whole timeout.
        std::thread::sleep(timeout);
        let mut state = self.state.lock();
        let slot = state.channel(channel)?;
        Ok(take(slot.buffer(stream), buf))
    }

    fn write(&mut self, channel: ChannelHandle, data: &[u8], stream: DataStream) -> TransportResult<usize> {
        let mut state = self.enter("write");
        let slot = state.live_channel(channel)?;
        if slot.echo {
            slot.buffer(stream).extend(data);
        }
        Ok(data.len())
    }

    fn send_eof(&mut self, channel: ChannelHandle) -> TransportResult<()> {
        let mut state = self.enter("send_eof");
        let slot = state.live_channel(channel)?;
        if slot.echo {
            slot.eof = true;
            slot.exit_status = Some(0);
        }
        Ok(())
    }

    fn accept_x11(&mut self, timeout: Duration) -> TransportResult<Option<ChannelHandle>> {
        let mut state = self.enter("accept_x11");
        if !state.connected {
            return Err(not_connected());
        }
        if let Some(data) = state.pending_x11.pop_front() {
            let handle = state.allocate(ScriptedChannel {
                open: true,
                stdout: data.into(),
                ..ScriptedChannel::default()
            });
            return Ok(Some(handle));
        }
        drop(state);
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn close_channel(&mut self, channel: ChannelHandle) -> TransportResult<()> {
        let mut state = self.enter("close_channel");
        state.channels.remove(&channel);
        Ok(())
    }

    fn channel_status(&mut self, channel: ChannelHandle) -> TransportResult<ChannelStatus> {
        let state = self.state.lock();
        Ok(match state.channels.get(&channel) {
            Some(slot) => ChannelStatus {
                open: slot.open && !slot.remote_closed,
                closed: slot.remote_closed,
                eof: slot.eof,
            },
            None => ChannelStatus {
                open: false,
                closed: true,
                eof: true,
            },
        })
    }

    fn exit_status(&mut self, channel: ChannelHandle) -> TransportResult<Option<u32>> {
        let mut state = self.state.lock();
        Ok(state.channel(channel)?.exit_status)
    }
}

fn take(pending: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = buf.len().min(pending.len());
    for (dst, src) in buf.iter_mut().zip(pending.drain(..n)) {
        *dst = src;
    }
    n
}
