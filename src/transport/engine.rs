// ABOUTME: Blocking Transport implementation backed by russh.
// ABOUTME: Drives the async client on a current-thread runtime owned by the transport.

use super::handler::{ClientHandler, HostKeyPolicy};
use super::{
    ChannelHandle, ChannelRequest, ChannelStatus, DataStream, ErrorCode, Transport,
    TransportError, TransportResult, X11Request,
};
use crate::ssh::{OptionValue, SshOption};
use bytes::BytesMut;
use russh::client::{self, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, Preferred, cipher};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::future::{Future, poll_fn};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Scheduler passes granted to the connection task before a zero-timeout poll.
const SETTLE_ROUNDS: usize = 4;

/// Extended data type carrying stderr.
const EXTENDED_DATA_STDERR: u32 = 1;

const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Unanswered keepalives before the connection is dropped.
const KEEPALIVE_MAX: usize = 3;

/// Options staged through `set_option`.
#[derive(Debug, Clone)]
struct EngineSettings {
    host: Option<String>,
    port: u16,
    user: Option<String>,
    ciphers_client_to_server: Option<Vec<cipher::Name>>,
    ciphers_server_to_client: Option<Vec<cipher::Name>>,
    timeout: Option<Duration>,
    known_hosts: Option<PathBuf>,
    strict_host_key_checking: bool,
    keepalive_interval: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 22,
            user: None,
            ciphers_client_to_server: None,
            ciphers_server_to_client: None,
            timeout: None,
            known_hosts: None,
            strict_host_key_checking: true,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
        }
    }
}

impl EngineSettings {
    fn apply(&mut self, option: SshOption, value: &OptionValue) -> TransportResult<()> {
        match option {
            SshOption::Host => {
                let (user, host) = parse_host(expect_str(option, value)?)?;
                if let Some(user) = user {
                    self.user = Some(user.to_string());
                }
                self.host = Some(host.to_string());
            }
            SshOption::Port => {
                let port = expect_int(option, value)?;
                self.port = u16::try_from(port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| TransportError::invalid_argument(format!("invalid port: {}", port)))?;
            }
            SshOption::User => {
                let user = expect_str(option, value)?.trim();
                if user.is_empty() {
                    return Err(TransportError::invalid_argument("user cannot be empty"));
                }
                self.user = Some(user.to_string());
            }
            SshOption::CiphersClientToServer => {
                self.ciphers_client_to_server = Some(parse_ciphers(expect_str(option, value)?)?);
            }
            SshOption::CiphersServerToClient => {
                self.ciphers_server_to_client = Some(parse_ciphers(expect_str(option, value)?)?);
            }
            SshOption::Timeout => {
                self.timeout = expect_secs(option, value)?;
            }
            SshOption::KnownHosts => {
                let path = expect_str(option, value)?;
                if path.is_empty() {
                    return Err(TransportError::invalid_argument("known_hosts path cannot be empty"));
                }
                self.known_hosts = Some(PathBuf::from(path));
            }
            SshOption::StrictHostKeyChecking => {
                self.strict_host_key_checking = expect_int(option, value)? != 0;
            }
            SshOption::KeepAliveInterval => {
                self.keepalive_interval = expect_secs(option, value)?;
            }
        }
        Ok(())
    }

    fn client_config(&self) -> client::Config {
        let mut preferred = Preferred::default();
        // russh negotiates a single cipher list for both directions.
        if let Some(ciphers) = self
            .ciphers_client_to_server
            .as_ref()
            .or(self.ciphers_server_to_client.as_ref())
        {
            preferred.cipher = Cow::Owned(ciphers.clone());
        }

        client::Config {
            preferred,
            keepalive_interval: self.keepalive_interval,
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        }
    }

    fn user(&self) -> TransportResult<String> {
        self.user
            .clone()
            .ok_or_else(|| TransportError::invalid_argument("user is not set"))
    }
}

fn expect_str(option: SshOption, value: &OptionValue) -> TransportResult<&str> {
    value
        .as_str()
        .ok_or_else(|| TransportError::invalid_argument(format!("{} takes a string value", option)))
}

fn expect_int(option: SshOption, value: &OptionValue) -> TransportResult<i64> {
    value
        .as_int()
        .ok_or_else(|| TransportError::invalid_argument(format!("{} takes an integer value", option)))
}

/// Whole seconds where 0 switches the setting off.
fn expect_secs(option: SshOption, value: &OptionValue) -> TransportResult<Option<Duration>> {
    let secs = u64::try_from(expect_int(option, value)?)
        .map_err(|_| TransportError::invalid_argument(format!("{} cannot be negative", option)))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Split `[user@]host` and reject hosts that cannot be resolved as written.
fn parse_host(value: &str) -> TransportResult<(Option<&str>, &str)> {
    let value = value.trim();
    let (user, host) = match value.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user), host),
        Some(_) => return Err(TransportError::invalid_argument("user before '@' cannot be empty")),
        None => (None, value),
    };

    if host.is_empty() {
        return Err(TransportError::invalid_argument("hostname cannot be empty"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
        return Err(TransportError::invalid_argument(format!("malformed host: {}", host)));
    }
    Ok((user, host))
}

fn parse_ciphers(list: &str) -> TransportResult<Vec<cipher::Name>> {
    let names = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            cipher::Name::try_from(name).map_err(|_| {
                TransportError::invalid_argument(format!("unsupported cipher: {}", name))
            })
        })
        .collect::<TransportResult<Vec<_>>>()?;

    if names.is_empty() {
        return Err(TransportError::invalid_argument("cipher list is empty"));
    }
    Ok(names)
}

fn from_russh(err: russh::Error) -> TransportError {
    match err {
        russh::Error::UnknownKey => {
            TransportError::new(ErrorCode::HostKeyRejected, "server host key was not accepted")
        }
        russh::Error::Disconnect => {
            TransportError::new(ErrorCode::Fatal, "connection closed by remote")
        }
        other => TransportError::new(ErrorCode::Fatal, other.to_string()),
    }
}

fn auth_rejected(method: &str, user: &str) -> TransportError {
    TransportError::new(
        ErrorCode::RequestDenied,
        format!("{} authentication rejected for {}", method, user),
    )
}

/// Await `fut`, failing with `TimedOut` if `limit` elapses first.
async fn bounded<T>(
    limit: Option<Duration>,
    what: &str,
    fut: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            TransportError::new(ErrorCode::TimedOut, format!("{} timed out after {:?}", what, limit))
        })?,
        None => fut.await,
    }
}

/// Await `fut`, absorbing every channel's traffic each time it would block.
///
/// russh hands each channel a bounded queue and stalls the whole connection
/// when one fills up, so no queue may sit unread while the runtime runs.
async fn pumped<F: Future>(inbox: &mut Inbox, fut: F) -> F::Output {
    let mut fut = pin!(fut);
    poll_fn(|cx| {
        inbox.pump(cx);
        fut.as_mut().poll(cx)
    })
    .await
}

/// Pump until `check` yields a value.
async fn wait_on<T>(inbox: &mut Inbox, mut check: impl FnMut(&mut Inbox) -> Option<T>) -> T {
    poll_fn(|cx| {
        inbox.pump(cx);
        match check(inbox) {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    })
    .await
}

/// Give the connection task a chance to move socket data into channel queues.
async fn settle(inbox: &mut Inbox) {
    for _ in 0..SETTLE_ROUNDS {
        pumped(inbox, tokio::task::yield_now()).await;
    }
    wait_on(inbox, |_| Some(())).await;
}

/// Wait at most `timeout` for `check`; zero settles and checks once.
/// Returns None when the wait ran out.
async fn wait_up_to<T>(
    inbox: &mut Inbox,
    timeout: Duration,
    check: impl FnMut(&mut Inbox) -> Option<T>,
) -> Option<T> {
    if timeout.is_zero() {
        settle(inbox).await;
    }
    tokio::time::timeout(timeout, wait_on(inbox, check)).await.ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Allocated, nothing requested yet.
    Created,
    /// Session channel open at the protocol level, no shell/exec/subsystem yet.
    Negotiating,
    Open,
    /// Closed by the remote. Buffered data may still be read.
    RemoteClosed,
}

/// Per-channel engine state.
struct Slot {
    reader: Option<ChannelReadHalf>,
    writer: Option<Arc<ChannelWriteHalf<Msg>>>,
    phase: Phase,
    eof: bool,
    stdout: BytesMut,
    stderr: BytesMut,
    exit_status: Option<u32>,
    /// Outcomes of want-reply requests, oldest first.
    replies: VecDeque<bool>,
}

impl Slot {
    fn created() -> Self {
        Self {
            reader: None,
            writer: None,
            phase: Phase::Created,
            eof: false,
            stdout: BytesMut::new(),
            stderr: BytesMut::new(),
            exit_status: None,
            replies: VecDeque::new(),
        }
    }

    fn accepted(channel: Channel<Msg>) -> Self {
        let mut slot = Self::created();
        slot.attach(channel);
        slot.phase = Phase::Open;
        slot
    }

    fn attach(&mut self, channel: Channel<Msg>) {
        let (reader, writer) = channel.split();
        self.reader = Some(reader);
        self.writer = Some(Arc::new(writer));
    }

    fn buffer(&mut self, stream: DataStream) -> &mut BytesMut {
        match stream {
            DataStream::Stdout => &mut self.stdout,
            DataStream::Stderr => &mut self.stderr,
        }
    }

    fn remote_closed(&self) -> bool {
        self.phase == Phase::RemoteClosed
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus {
            open: self.phase == Phase::Open,
            closed: self.remote_closed(),
            eof: self.eof,
        }
    }

    fn mark_remote_closed(&mut self) {
        self.phase = Phase::RemoteClosed;
        self.eof = true;
    }

    /// Fold a channel message into buffers and flags.
    fn absorb(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } if ext == EXTENDED_DATA_STDERR => {
                self.stderr.extend_from_slice(&data)
            }
            ChannelMsg::ExtendedData { ext, .. } => {
                tracing::debug!(ext, "dropping unknown extended data");
            }
            ChannelMsg::Eof => self.eof = true,
            ChannelMsg::Close => self.mark_remote_closed(),
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::Success => self.replies.push_back(true),
            ChannelMsg::Failure => self.replies.push_back(false),
            _ => {}
        }
    }

    /// Absorb every message already queued for this channel.
    fn pump(&mut self, cx: &mut Context<'_>) {
        loop {
            let polled = {
                let Some(reader) = self.reader.as_mut() else {
                    return;
                };
                let mut next = pin!(reader.wait());
                next.as_mut().poll(cx)
            };
            match polled {
                Poll::Ready(Some(msg)) => self.absorb(msg),
                Poll::Ready(None) => {
                    self.reader = None;
                    self.mark_remote_closed();
                }
                Poll::Pending => return,
            }
        }
    }

    /// Move up to `buf.len()` buffered bytes into `buf`.
    fn take(&mut self, stream: DataStream, buf: &mut [u8]) -> usize {
        let pending = self.buffer(stream);
        let n = buf.len().min(pending.len());
        let chunk = pending.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        n
    }

    /// A read on `stream` would not block.
    fn readable(&self, stream: DataStream) -> bool {
        let pending = match stream {
            DataStream::Stdout => &self.stdout,
            DataStream::Stderr => &self.stderr,
        };
        !pending.is_empty() || self.eof || self.remote_closed()
    }

    /// Write half of a channel the remote still holds open.
    fn writer(&self) -> TransportResult<Arc<ChannelWriteHalf<Msg>>> {
        if self.remote_closed() {
            return Err(TransportError::invalid_handle("channel is closed"));
        }
        self.writer
            .clone()
            .ok_or_else(|| TransportError::invalid_handle("channel is not open"))
    }
}

/// Every channel of the connection, plus server-opened X11 channels not yet
/// handed out.
#[derive(Default)]
struct Inbox {
    channels: HashMap<ChannelHandle, Slot>,
    next_handle: u32,
    x11_channels: Option<UnboundedReceiver<Channel<Msg>>>,
    accepted_x11: VecDeque<ChannelHandle>,
}

impl Inbox {
    fn allocate(&mut self, slot: Slot) -> ChannelHandle {
        let handle = ChannelHandle::new(self.next_handle);
        self.next_handle += 1;
        self.channels.insert(handle, slot);
        handle
    }

    /// Closed channels drop their slot; their handles stay recognizable.
    fn released(&self, handle: ChannelHandle) -> bool {
        handle.raw() < self.next_handle && !self.channels.contains_key(&handle)
    }

    fn slot_mut(&mut self, handle: ChannelHandle) -> TransportResult<&mut Slot> {
        self.channels
            .get_mut(&handle)
            .ok_or_else(|| TransportError::invalid_handle(format!("channel {} is closed", handle)))
    }

    /// Drop all channel state. Handles keep counting up.
    fn clear(&mut self) {
        self.channels.clear();
        self.x11_channels = None;
        self.accepted_x11.clear();
    }

    /// Adopt newly opened X11 channels and absorb queued traffic on all channels.
    fn pump(&mut self, cx: &mut Context<'_>) {
        while let Some(incoming) = self.x11_channels.as_mut() {
            match incoming.poll_recv(cx) {
                Poll::Ready(Some(channel)) => {
                    let handle = self.allocate(Slot::accepted(channel));
                    tracing::debug!(channel = %handle, "accepted X11 channel");
                    self.accepted_x11.push_back(handle);
                }
                Poll::Ready(None) => self.x11_channels = None,
                Poll::Pending => break,
            }
        }
        for slot in self.channels.values_mut() {
            slot.pump(cx);
        }
    }

    /// Outcome of the oldest unclaimed want-reply request on `handle`.
    fn take_reply(&mut self, handle: ChannelHandle, what: &str) -> Option<TransportResult<()>> {
        let slot = match self.slot_mut(handle) {
            Ok(slot) => slot,
            Err(e) => return Some(Err(e)),
        };
        match slot.replies.pop_front() {
            Some(true) => Some(Ok(())),
            Some(false) => Some(Err(TransportError::new(
                ErrorCode::RequestDenied,
                format!("{} request denied by remote", what),
            ))),
            None if slot.remote_closed() => Some(Err(TransportError::new(
                ErrorCode::Fatal,
                format!("channel closed while waiting for {} reply", what),
            ))),
            None => None,
        }
    }

    fn next_x11(&mut self) -> Option<TransportResult<ChannelHandle>> {
        if let Some(handle) = self.accepted_x11.pop_front() {
            return Some(Ok(handle));
        }
        self.x11_channels.is_none().then(|| {
            Err(TransportError::new(
                ErrorCode::Fatal,
                "connection closed while waiting for X11 channel",
            ))
        })
    }
}

/// Transport engine speaking SSH through russh.
///
/// All async work runs on a current-thread runtime owned by the transport,
/// so the connection only makes progress while a call is blocked in it.
/// Whenever a call blocks, the traffic of every channel is moved into its
/// receive buffers, so an unread channel never stalls the others.
pub struct RusshTransport {
    runtime: Runtime,
    settings: EngineSettings,
    connection: Option<Handle<ClientHandler>>,
    inbox: Inbox,
}

impl std::fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshTransport")
            .field("settings", &self.settings)
            .field("connected", &self.connection.is_some())
            .field("channels", &self.inbox.channels.len())
            .finish()
    }
}

/// Block on `fut` within `limit`, keeping every channel drained meanwhile.
fn drive<T>(
    runtime: &Runtime,
    inbox: &mut Inbox,
    limit: Option<Duration>,
    what: &str,
    fut: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    runtime.block_on(bounded(limit, what, pumped(inbox, fut)))
}

impl RusshTransport {
    pub fn new() -> TransportResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                TransportError::new(ErrorCode::Fatal, format!("failed to start runtime: {}", e))
            })?;

        Ok(Self {
            runtime,
            settings: EngineSettings::default(),
            connection: None,
            inbox: Inbox::default(),
        })
    }

    fn connection(&self) -> TransportResult<&Handle<ClientHandler>> {
        self.connection.as_ref().ok_or_else(TransportError::not_connected)
    }

    /// Open the protocol-level session channel behind a created slot.
    fn ensure_session_channel(&mut self, handle: ChannelHandle) -> TransportResult<()> {
        let connection = self.connection.as_ref().ok_or_else(TransportError::not_connected)?;
        if self.inbox.slot_mut(handle)?.phase != Phase::Created {
            return Ok(());
        }

        let channel = drive(
            &self.runtime,
            &mut self.inbox,
            self.settings.timeout,
            "channel open",
            async { connection.channel_open_session().await.map_err(from_russh) },
        )?;
        tracing::debug!(channel = %handle, remote_id = ?channel.id(), "session channel opened");

        let slot = self.inbox.slot_mut(handle)?;
        slot.attach(channel);
        slot.phase = Phase::Negotiating;
        Ok(())
    }

    fn writer(&mut self, channel: ChannelHandle) -> TransportResult<Arc<ChannelWriteHalf<Msg>>> {
        self.inbox.slot_mut(channel)?.writer()
    }

    /// Send a want-reply request and wait for the remote's answer.
    fn request_with_reply<Fut>(
        &mut self,
        channel: ChannelHandle,
        what: &str,
        send: impl FnOnce(Arc<ChannelWriteHalf<Msg>>) -> Fut,
    ) -> TransportResult<()>
    where
        Fut: Future<Output = Result<(), russh::Error>>,
    {
        let slot = self.inbox.slot_mut(channel)?;
        let writer = slot.writer()?;
        // A late answer to an earlier, timed out request must not count for this one.
        slot.replies.clear();

        let inbox = &mut self.inbox;
        self.runtime
            .block_on(bounded(self.settings.timeout, what, async move {
                pumped(&mut *inbox, send(writer)).await.map_err(from_russh)?;
                wait_on(inbox, |inbox| inbox.take_reply(channel, what)).await
            }))
    }

    /// Block on a channel operation that needs no reply.
    fn channel_op<Fut>(
        &mut self,
        channel: ChannelHandle,
        op: impl FnOnce(Arc<ChannelWriteHalf<Msg>>) -> Fut,
    ) -> TransportResult<()>
    where
        Fut: Future<Output = Result<(), russh::Error>>,
    {
        let writer = self.writer(channel)?;
        self.runtime
            .block_on(pumped(&mut self.inbox, op(writer)))
            .map_err(from_russh)
    }
}

impl Transport for RusshTransport {
    fn set_option(&mut self, option: SshOption, value: &OptionValue) -> TransportResult<()> {
        self.settings.apply(option, value)
    }

    fn connect(&mut self) -> TransportResult<()> {
        if self.connection.is_some() {
            return Err(TransportError::invalid_argument("session is already connected"));
        }
        let host = self
            .settings
            .host
            .clone()
            .ok_or_else(|| TransportError::invalid_argument("host is not set"))?;
        let port = self.settings.port;

        let policy = HostKeyPolicy {
            host: host.clone(),
            port,
            trust_on_first_use: !self.settings.strict_host_key_checking,
            known_hosts_path: self.settings.known_hosts.clone(),
        };
        let (x11_tx, x11_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler::new(policy, x11_tx);
        let config = Arc::new(self.settings.client_config());

        tracing::debug!(host = %host, port, "connecting");
        let handle = drive(
            &self.runtime,
            &mut self.inbox,
            self.settings.timeout,
            "connect",
            async {
                client::connect(config, (host.as_str(), port), handler)
                    .await
                    .map_err(from_russh)
            },
        )?;

        self.connection = Some(handle);
        self.inbox.x11_channels = Some(x11_rx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }

    fn password_auth(&mut self, password: &str) -> TransportResult<()> {
        let handle = self.connection.as_mut().ok_or_else(TransportError::not_connected)?;
        let user = self.settings.user()?;

        let result = drive(
            &self.runtime,
            &mut self.inbox,
            self.settings.timeout,
            "authentication",
            async {
                handle
                    .authenticate_password(user.as_str(), password)
                    .await
                    .map_err(from_russh)
            },
        )?;

        if !result.success() {
            return Err(auth_rejected("password", &user));
        }
        tracing::debug!(user = %user, "authenticated with password");
        Ok(())
    }

    fn public_key_auth(&mut self, path: &Path, passphrase: Option<&str>) -> TransportResult<()> {
        let handle = self.connection.as_mut().ok_or_else(TransportError::not_connected)?;
        let user = self.settings.user()?;
        let key = load_secret_key(path, passphrase).map_err(|e| {
            TransportError::invalid_argument(format!(
                "failed to load key {}: {}",
                path.display(),
                e
            ))
        })?;

        let result = drive(
            &self.runtime,
            &mut self.inbox,
            self.settings.timeout,
            "authentication",
            async {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(from_russh)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        user.as_str(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(from_russh)
            },
        )?;

        if !result.success() {
            return Err(auth_rejected("public key", &user));
        }
        tracing::debug!(user = %user, key = %path.display(), "authenticated with key file");
        Ok(())
    }

    fn agent_auth(&mut self) -> TransportResult<()> {
        let handle = self.connection.as_mut().ok_or_else(TransportError::not_connected)?;
        let user = self.settings.user()?;

        let accepted = drive(
            &self.runtime,
            &mut self.inbox,
            self.settings.timeout,
            "agent authentication",
            async {
                let mut agent = AgentClient::connect_env().await.map_err(|e| {
                    TransportError::invalid_argument(format!("ssh agent not available: {}", e))
                })?;
                let keys = agent.request_identities().await.map_err(|e| {
                    TransportError::new(
                        ErrorCode::Fatal,
                        format!("failed to list agent keys: {}", e),
                    )
                })?;
                if keys.is_empty() {
                    return Err(TransportError::new(
                        ErrorCode::RequestDenied,
                        "no keys in ssh agent",
                    ));
                }

                for key in keys {
                    match handle
                        .authenticate_publickey_with(user.as_str(), key, None, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => return Ok(true),
                        Ok(_) => continue,
                        Err(e) => tracing::debug!("agent key failed: {}", e),
                    }
                }
                Ok(false)
            },
        )?;

        if !accepted {
            return Err(auth_rejected("agent", &user));
        }
        tracing::debug!(user = %user, "authenticated with ssh agent");
        Ok(())
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        let Some(handle) = self.connection.take() else {
            return Ok(());
        };
        // Channels die with the connection.
        self.inbox.clear();

        self.runtime
            .block_on(handle.disconnect(Disconnect::ByApplication, "", "en"))
            .map_err(from_russh)
    }

    fn open_channel(&mut self) -> TransportResult<ChannelHandle> {
        self.connection()?;
        Ok(self.inbox.allocate(Slot::created()))
    }

    fn request_pty(
        &mut self,
        channel: ChannelHandle,
        term: &str,
        cols: u32,
        rows: u32,
    ) -> TransportResult<()> {
        self.ensure_session_channel(channel)?;
        self.request_with_reply(channel, "pty", |writer| async move {
            writer.request_pty(true, term, cols, rows, 0, 0, &[]).await
        })
    }

    fn request(&mut self, channel: ChannelHandle, request: &ChannelRequest) -> TransportResult<()> {
        self.ensure_session_channel(channel)?;
        if self.inbox.slot_mut(channel)?.phase == Phase::Open {
            return Err(TransportError::invalid_argument(
                "channel already runs a shell, command or subsystem",
            ));
        }

        let what = match request {
            ChannelRequest::Shell => "shell",
            ChannelRequest::Exec(_) => "exec",
            ChannelRequest::Subsystem(_) => "subsystem",
        };
        self.request_with_reply(channel, what, |writer| async move {
            match request {
                ChannelRequest::Shell => writer.request_shell(true).await,
                ChannelRequest::Exec(command) => writer.exec(true, command.as_str()).await,
                ChannelRequest::Subsystem(name) => {
                    writer.request_subsystem(true, name.as_str()).await
                }
            }
        })?;

        let slot = self.inbox.slot_mut(channel)?;
        if !slot.remote_closed() {
            slot.phase = Phase::Open;
        }
        tracing::debug!(channel = %channel, request = what, "channel open");
        Ok(())
    }

    fn request_x11(&mut self, channel: ChannelHandle, request: &X11Request) -> TransportResult<()> {
        self.ensure_session_channel(channel)?;
        self.request_with_reply(channel, "x11", |writer| async move {
            writer
                .request_x11(
                    true,
                    request.single_connection,
                    request.auth_protocol.as_str(),
                    request.auth_cookie.as_str(),
                    request.screen_number,
                )
                .await
        })
    }

    fn change_pty_size(&mut self, channel: ChannelHandle, cols: u32, rows: u32) -> TransportResult<()> {
        self.channel_op(channel, |writer| async move {
            writer.window_change(cols, rows, 0, 0).await
        })
    }

    fn read(
        &mut self,
        channel: ChannelHandle,
        buf: &mut [u8],
        stream: DataStream,
        timeout: Duration,
    ) -> TransportResult<usize> {
        let slot = self.inbox.slot_mut(channel)?;
        if buf.is_empty() {
            return Ok(0);
        }

        if slot.buffer(stream).is_empty() {
            slot.writer()?;
            if !slot.eof {
                self.runtime.block_on(wait_up_to(&mut self.inbox, timeout, |inbox| {
                    inbox
                        .channels
                        .get(&channel)
                        .is_some_and(|slot| slot.readable(stream))
                        .then_some(())
                }));
            }
        }
        Ok(self.inbox.slot_mut(channel)?.take(stream, buf))
    }

    fn write(&mut self, channel: ChannelHandle, data: &[u8], stream: DataStream) -> TransportResult<usize> {
        let writer = self.writer(channel)?;
        if data.is_empty() {
            return Ok(0);
        }

        self.runtime
            .block_on(pumped(&mut self.inbox, async {
                match stream {
                    DataStream::Stdout => writer.data(data).await,
                    DataStream::Stderr => writer.extended_data(EXTENDED_DATA_STDERR, data).await,
                }
            }))
            .map_err(from_russh)?;
        Ok(data.len())
    }

    fn send_eof(&mut self, channel: ChannelHandle) -> TransportResult<()> {
        self.channel_op(channel, |writer| async move { writer.eof().await })
    }

    fn accept_x11(&mut self, timeout: Duration) -> TransportResult<Option<ChannelHandle>> {
        self.connection()?;
        let accepted = self
            .runtime
            .block_on(wait_up_to(&mut self.inbox, timeout, Inbox::next_x11));

        match accepted {
            None => Ok(None),
            Some(handle) => handle.map(Some),
        }
    }

    fn close_channel(&mut self, channel: ChannelHandle) -> TransportResult<()> {
        if self.inbox.released(channel) {
            return Ok(());
        }
        let slot = self.inbox.channels.remove(&channel).ok_or_else(|| {
            TransportError::invalid_handle(format!("unknown channel {}", channel))
        })?;

        tracing::debug!(channel = %channel, "closing channel");
        let remote_closed = slot.remote_closed();
        match slot.writer {
            Some(writer) if !remote_closed => self
                .runtime
                .block_on(pumped(&mut self.inbox, writer.close()))
                .map_err(from_russh),
            _ => Ok(()),
        }
    }

    fn channel_status(&mut self, channel: ChannelHandle) -> TransportResult<ChannelStatus> {
        if self.inbox.released(channel) {
            return Ok(ChannelStatus {
                open: false,
                closed: true,
                eof: true,
            });
        }
        let connection_closed = !self.is_connected();
        self.inbox.slot_mut(channel)?;

        self.runtime.block_on(settle(&mut self.inbox));
        let slot = self.inbox.slot_mut(channel)?;
        if connection_closed {
            slot.mark_remote_closed();
        }
        Ok(slot.status())
    }

    fn exit_status(&mut self, channel: ChannelHandle) -> TransportResult<Option<u32>> {
        self.inbox.slot_mut(channel)?;
        self.runtime.block_on(settle(&mut self.inbox));
        Ok(self.inbox.slot_mut(channel)?.exit_status)
    }
}
