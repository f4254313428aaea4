use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use smb_core::error::SMBError;
use smb_core::logging::{debug, info, warn};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::config::SMBClientConfig;
use crate::client::connection::{Connection, Exchange, MessageSecurity, OutgoingRequest, PendingReply};
use crate::client::create::{CreateCapabilities, CreateOutcome, CreatePlan, OpenOptions};
use crate::client::event::ConnectionEvent;
use crate::client::lease::{acknowledge, apply_lease_break, apply_oplock_break};
use crate::client::negotiate::{negotiate, NegotiateMachine, NegotiateMode, NegotiatedParameters};
use crate::client::open::{FileHandle, HandleTable, OpenFile, OpenRef};
use crate::client::pipeline::{self, QuantumOp, QuantumTarget, TransferLimits};
use crate::client::quantum::QuantumPlan;
use crate::client::reconnect::{mark_replay, reclaim_handles, reestablish, ReconnectGate};
use crate::client::session::{Session, SetupMode};
use crate::client::tree::Tree;
use crate::protocol::body::change_notify::{SMBChangeNotifyRequest, SMBCompletionFilter, SMBFileNotifyInformation};
use crate::protocol::body::close::SMBCloseRequest;
use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::empty::SMBEmpty;
use crate::protocol::body::flush::SMBFlushRequest;
use crate::protocol::body::ioctl::{SMBIoCtlCode, SMBIoCtlRequest};
use crate::protocol::body::query_info::{SMBInfoType, SMBQueryInfoRequest};
use crate::protocol::body::set_info::SMBSetInfoRequest;
use crate::protocol::body::{Capabilities, SMBBody, SMBDialect};
use crate::socket::SMBConnector;
use crate::util::auth::AuthProvider;

/// Buffer the server may fill per change notification.
const NOTIFY_OUTPUT_SIZE: u32 = 64 * 1024;

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn tree_gone(tree: &Tree) -> SMBError {
    SMBError::status_error(NTStatus::NetworkNameDeleted, format!("Share {} is not connected", tree.share()))
}

/// Dialect bookkeeping across reconnects.
#[derive(Debug, Default, Clone, Copy)]
struct DialectPin {
    in_use: Option<SMBDialect>,
    /// Upper bound after the server refused a dialect for its cluster.
    cap: Option<SMBDialect>,
}

impl DialectPin {
    fn fresh(&self) -> NegotiateMode {
        self.cap.map(NegotiateMode::Capped).unwrap_or(NegotiateMode::Fresh)
    }

    fn reconnect(&self) -> NegotiateMode {
        match (self.cap, self.in_use) {
            (Some(cap), Some(in_use)) => NegotiateMode::Pinned(cap.min(in_use)),
            (None, Some(in_use)) => NegotiateMode::Pinned(in_use),
            _ => self.fresh(),
        }
    }
}

struct ClientInner<C: SMBConnector, A: AuthProvider> {
    connector: C,
    auth: A,
    config: SMBClientConfig,
    session: Session,
    /// The main channel first, then bound alternates. Never empty once connected.
    channels: RwLock<Vec<Arc<Connection>>>,
    /// Ids of bound alternates, so a lost one is rebound even after it was pruned.
    alternates: Mutex<HashSet<u64>>,
    /// Connected shares by lower-cased name.
    trees: RwLock<HashMap<String, Arc<Tree>>>,
    handles: HandleTable,
    gate: ReconnectGate,
    dialect: Mutex<DialectPin>,
    next_connection_id: AtomicU64,
    next_channel: AtomicUsize,
    /// Set once the server rejected the v2 durable and lease contexts.
    v2_unsupported: AtomicBool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl<C: SMBConnector, A: AuthProvider> ClientInner<C, A> {
    fn pin(&self) -> DialectPin {
        *self.dialect.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn open_connection(&self) -> SMBResult<Arc<Connection>> {
        let id = self.next_connection_id.fetch_add(1, Ordering::AcqRel) + 1;
        Connection::open(&self.connector, id, &self.config, self.events.clone()).await
    }

    /// The first live channel, or the dead main one so callers fail into recovery.
    fn main_channel(&self) -> SMBResult<Arc<Connection>> {
        let channels = read(&self.channels);
        channels.iter()
            .find(|c| c.is_alive())
            .or_else(|| channels.first())
            .cloned()
            .ok_or(SMBError::NotConnected)
    }

    /// Live channels in turn, for spreading I/O.
    fn io_channel(&self) -> SMBResult<Arc<Connection>> {
        let channels = read(&self.channels);
        let alive: Vec<&Arc<Connection>> = channels.iter().filter(|c| c.is_alive()).collect();
        if alive.is_empty() {
            return channels.first().cloned().ok_or(SMBError::NotConnected);
        }
        let next = self.next_channel.fetch_add(1, Ordering::Relaxed) % alive.len();
        Ok(alive[next].clone())
    }

    /// Drops dead channels while at least one live channel remains. The channel
    /// sequence moves on when a channel goes, so resent requests are told apart.
    /// Returns whether a live channel is left.
    fn prune_channels(&self) -> bool {
        let mut channels = write(&self.channels);
        if !channels.iter().any(|c| c.is_alive()) {
            return false;
        }
        let before = channels.len();
        channels.retain(|c| c.is_alive());
        if channels.len() < before {
            let sequence = self.session.bump_channel_sequence();
            info!(dropped = before - channels.len(), left = channels.len(), sequence, "failed over to surviving channels");
        }
        true
    }

    /// Channel sequence on every 3.x request, plus the replay flag on resends.
    fn stamp(&self, request: &mut OutgoingRequest, connection: &Connection, replay: bool) {
        let Ok(parameters) = connection.negotiated() else {
            return;
        };
        if parameters.dialect.supports_replay() {
            request.channel_sequence = self.session.channel_sequence();
        }
        if replay {
            mark_replay(request, parameters.dialect, self.session.channel_sequence());
        }
    }

    /// Records a cluster dialect refusal by capping the next negotiate one step lower.
    fn note_cluster_dialect(&self, connection: &Connection, error: &SMBError) -> bool {
        if error.status() != Some(NTStatus::SMBBadClusterDialect) {
            return false;
        }
        let mut pin = self.dialect.lock().unwrap_or_else(|e| e.into_inner());
        let current = connection.negotiated()
            .map(|p| p.dialect)
            .unwrap_or(pin.cap.unwrap_or(self.config.max_dialect));
        let Some(lower) = current.step_down().filter(|d| *d >= self.config.min_dialect) else {
            return false;
        };
        warn!(refused = ?current, next = ?lower, "server refused the dialect for its cluster");
        pin.cap = Some(lower);
        true
    }

    async fn install_main(&self, connection: Arc<Connection>) -> SMBResult<()> {
        let dialect = connection.negotiated()?.dialect;
        self.dialect.lock().unwrap_or_else(|e| e.into_inner()).in_use = Some(dialect);
        self.alternates.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let old = std::mem::replace(&mut *write(&self.channels), vec![connection]);
        for channel in old {
            if channel.is_alive() {
                channel.close().await;
            }
        }
        Ok(())
    }

    /// Negotiate and a fresh session on a new main channel.
    async fn establish(&self) -> SMBResult<()> {
        let deadline = Instant::now() + self.config.reconnect_wait;
        loop {
            let connection = self.open_connection().await?;
            let result = async {
                let mut machine = NegotiateMachine::new(&self.config, self.pin().fresh());
                negotiate(&connection, &mut machine).await?;
                self.session.setup(&connection, &self.auth, &self.config, SetupMode::Fresh).await
            }.await;
            match result {
                Ok(()) => return self.install_main(connection).await,
                Err(e) => {
                    connection.close().await;
                    if !self.note_cluster_dialect(&connection, &e) || Instant::now() >= deadline {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Rebuilds the main channel, session, trees and reclaimable opens. Callers
    /// that saw the same failure share one attempt.
    async fn reconnect(&self, seen: u64) -> SMBResult<()> {
        let previous = self.session.id();
        let trees: Vec<Arc<Tree>> = read(&self.trees).values().cloned().collect();
        let (this, trees) = (self, &trees);
        self.gate.run(seen, self.config.reconnect_wait, move || async move {
            let connection = this.open_connection().await?;
            let mode = this.pin().reconnect();
            let result = async {
                reestablish(&connection, &this.session, &this.auth, &this.config, mode, previous, trees).await?;
                reclaim_handles(&connection, &this.session, &this.handles).await
            }.await;
            match result {
                Ok(reclaimed) => {
                    debug!(reclaimed, "opens reclaimed");
                    this.install_main(connection).await
                }
                Err(e) => {
                    this.note_cluster_dialect(&connection, &e);
                    connection.close().await;
                    Err(e)
                }
            }
        }).await
    }

    /// A new connection to the same server, bound to the session (MS-SMB2 3.2.4.1.7).
    async fn bind_channel(&self) -> SMBResult<Arc<Connection>> {
        let parameters = self.main_channel()?.negotiated()?;
        if !self.config.multi_channel
            || !parameters.dialect.is_smb3()
            || !parameters.server_supports(Capabilities::MULTI_CHANNEL)
        {
            return Err(SMBError::precondition_failed("Multi-channel is not available on this session"));
        }
        let connection = self.open_connection().await?;
        let result = async {
            let mut machine = NegotiateMachine::new(&self.config, NegotiateMode::Pinned(parameters.dialect));
            let negotiated = negotiate(&connection, &mut machine).await?;
            if negotiated.server_guid != parameters.server_guid {
                return Err(SMBError::precondition_failed("Alternate channel reached a different server"));
            }
            self.session.setup(&connection, &self.auth, &self.config, SetupMode::Bind).await
        }.await;
        if let Err(e) = result {
            connection.close().await;
            return Err(e);
        }
        self.alternates.lock().unwrap_or_else(|e| e.into_inner()).insert(connection.id());
        write(&self.channels).push(connection.clone());
        Ok(connection)
    }

    /// Forgets `connection_id` as an alternate, returning whether it was one.
    fn take_alternate(&self, connection_id: u64) -> bool {
        self.alternates.lock().unwrap_or_else(|e| e.into_inner()).remove(&connection_id)
    }

    /// Replaces a lost alternate. I/O it carried has already failed over to the
    /// remaining channels, so a failed bind leaves the session one channel short.
    async fn rebind(&self, lost: u64) {
        match self.bind_channel().await {
            Ok(connection) => info!(lost, connection = connection.id(), "alternate channel rebound"),
            Err(e) => warn!(lost, error = %e, "alternate channel could not be rebound"),
        }
    }

    /// Makes the client usable after `error`: fail over to a surviving channel, or reconnect.
    async fn recover(&self, error: &SMBError) -> SMBResult<()> {
        let seen = self.gate.epoch();
        let session_lost = error.status().is_some_and(|s| s.is_session_loss());
        if !session_lost && self.prune_channels() {
            return Ok(());
        }
        warn!(error = %error, session_lost, "reconnecting");
        self.reconnect(seen).await
    }

    /// Runs `op` on the main channel, and once more after recovering from a transport fault.
    /// The second run is told it is a replay.
    async fn retrying<T, F, Fut>(&self, mut op: F) -> SMBResult<T>
    where
        F: FnMut(Arc<Connection>, bool) -> Fut,
        Fut: Future<Output = SMBResult<T>>,
    {
        match op(self.main_channel()?, false).await {
            Err(e) if e.is_transport() => {
                self.recover(&e).await?;
                op(self.main_channel()?, true).await
            }
            other => other,
        }
    }

    /// One request against an open, rebuilt from the open's current file id on every attempt.
    async fn file_exchange(&self, open: &OpenRef, context: &str, body: impl Fn(SMBFileId) -> SMBBody) -> SMBResult<Exchange> {
        let body = &body;
        self.retrying(move |connection, replay| async move {
            let file_id = open.file_id()?;
            let tree = open.with(|file| file.tree.clone());
            let tree_id = tree.id().ok_or_else(|| tree_gone(&tree))?;
            let mut request = OutgoingRequest::new(body(file_id), self.session.id(), tree_id)
                .secured(tree.security(&self.session));
            self.stamp(&mut request, &connection, replay);
            connection.exchange(request).await?.check(context)
        }).await
    }

    async fn create(&self, tree: &Arc<Tree>, options: &OpenOptions) -> SMBResult<CreateOutcome> {
        let create_guid = Uuid::new_v4();
        let lease_key = rand::random::<[u8; 16]>();
        loop {
            let used_v2 = AtomicBool::new(false);
            let used = &used_v2;
            let result = self.retrying(move |connection, replay| async move {
                let parameters = connection.negotiated()?;
                let share = tree.info().ok_or_else(|| tree_gone(tree))?;
                let capabilities = CreateCapabilities::new(&parameters, &share, self.v2_unsupported.load(Ordering::Acquire));
                let plan = CreatePlan::open(options, &capabilities, create_guid, lease_key, self.config.durable_timeout)?;
                used.store(plan.requested.uses_v2(), Ordering::Release);
                let mut request = OutgoingRequest::new(SMBBody::CreateRequest(plan.request.clone()), self.session.id(), share.tree_id)
                    .secured(tree.security(&self.session));
                self.stamp(&mut request, &connection, replay);
                let exchange = connection.exchange(request).await?.check("Create failed")?;
                let SMBBody::CreateResponse(response) = exchange.response.body else {
                    return Err(SMBError::parse_error("Create succeeded without a response body"));
                };
                let file_id = response.file_id;
                match plan.reconcile(response) {
                    Err(e) => {
                        warn!(error = %e, "closing an open whose create reply was rejected");
                        if let Err(close) = self.close_file_id(tree, file_id).await {
                            debug!(error = %close, "close of rejected open failed");
                        }
                        Err(e)
                    }
                    accepted => accepted,
                }
            }).await;
            match result {
                Err(e) if used_v2.load(Ordering::Acquire)
                    && matches!(e.status(), Some(NTStatus::InvalidParameter | NTStatus::StatusNotSupported)) =>
                {
                    warn!(error = %e, "server rejected v2 create contexts, using v1");
                    self.v2_unsupported.store(true, Ordering::Release);
                }
                other => return other,
            }
        }
    }

    async fn close_file_id(&self, tree: &Tree, file_id: SMBFileId) -> SMBResult<()> {
        let connection = self.main_channel()?;
        let tree_id = tree.id().ok_or_else(|| tree_gone(tree))?;
        let request = OutgoingRequest::new(SMBBody::CloseRequest(SMBCloseRequest::new(file_id)), self.session.id(), tree_id)
            .secured(tree.security(&self.session));
        connection.exchange(request).await?.check("Close failed")?;
        Ok(())
    }

    fn connection_by_id(&self, id: u64) -> SMBResult<Arc<Connection>> {
        let found = read(&self.channels).iter().find(|c| c.id() == id && c.is_alive()).cloned();
        match found {
            Some(connection) => Ok(connection),
            None => self.main_channel(),
        }
    }
}

/// Applies server notifications and channel losses for one client.
async fn dispatch<C: SMBConnector, A: AuthProvider>(
    inner: Weak<ClientInner<C, A>>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let ack = match &event {
            ConnectionEvent::LeaseBreak { notification, .. } => apply_lease_break(&inner.handles, notification),
            ConnectionEvent::OplockBreak { notification, .. } => apply_oplock_break(&inner.handles, notification),
            ConnectionEvent::Disconnected { connection_id, reason } => {
                debug!(connection = connection_id, reason = %reason, "channel lost");
                // The main channel is rebuilt lazily, by the next request that needs it.
                inner.prune_channels();
                if inner.take_alternate(*connection_id) {
                    let (inner, lost) = (inner.clone(), *connection_id);
                    tokio::spawn(async move { inner.rebind(lost).await });
                }
                None
            }
        };
        let Some(ack) = ack else {
            continue;
        };
        let connection_id = event.connection_id();
        tokio::spawn(async move {
            let result = match inner.connection_by_id(connection_id) {
                Ok(connection) => acknowledge(&connection, &inner.session, ack).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "break acknowledgment failed");
            }
        });
    }
}

/// Reads and writes of one open, spread over the session's channels.
struct FileIo<C: SMBConnector, A: AuthProvider> {
    inner: Arc<ClientInner<C, A>>,
    open: OpenRef,
    limits: TransferLimits,
}

impl<C: SMBConnector, A: AuthProvider> FileIo<C, A> {
    fn new(inner: Arc<ClientInner<C, A>>, open: OpenRef) -> SMBResult<Arc<Self>> {
        let parameters = inner.main_channel()?.negotiated()?;
        let file = open.snapshot();
        let signed_or_sealed = inner.session.should_sign()
            || file.tree.security(&inner.session) == MessageSecurity::Sealed;
        let limits = TransferLimits {
            max_read: parameters.max_read_size,
            max_write: parameters.max_write_size,
            is_pipe: file.is_pipe,
            cooperative: signed_or_sealed,
            strict_sync: inner.config.strict_sync_io,
        };
        Ok(Arc::new(Self { inner, open, limits }))
    }
}

impl<C: SMBConnector, A: AuthProvider> QuantumTarget for FileIo<C, A> {
    fn limits(&self) -> TransferLimits {
        self.limits
    }

    fn plan(&self, max_transfer: u32) -> QuantumPlan {
        let Ok(connection) = self.inner.main_channel() else {
            return QuantumPlan::single(max_transfer);
        };
        connection.with_state(|state| {
            let granted = state.ledger.granted();
            let multi_credit = state.ledger.multi_credit();
            state.tuner.plan(Instant::now(), granted, multi_credit, max_transfer)
        })
    }

    fn record(&self, plan: &QuantumPlan, bytes: u64, elapsed: Duration) {
        if let Ok(connection) = self.inner.main_channel() {
            connection.with_state(|state| state.tuner.record(plan, bytes, elapsed, Instant::now()));
        }
    }

    async fn submit(&self, op: &QuantumOp, replay: bool) -> SMBResult<PendingReply> {
        let connection = self.inner.io_channel()?;
        let file_id = self.open.file_id()?;
        let tree = self.open.with(|file| file.tree.clone());
        let tree_id = tree.id().ok_or_else(|| tree_gone(&tree))?;
        let mut request = OutgoingRequest::new(op.to_body(file_id), self.inner.session.id(), tree_id)
            .secured(tree.security(&self.inner.session));
        self.inner.stamp(&mut request, &connection, replay);
        connection.submit(request).await
    }

    async fn recover(&self, error: &SMBError) -> SMBResult<()> {
        self.inner.recover(error).await
    }
}

/// A change-notification watch on a directory open.
///
/// Changes arrive in batches; an empty batch means the server lost track and
/// the directory should be rescanned.
pub struct Subscription {
    changes: mpsc::UnboundedReceiver<SMBResult<Vec<SMBFileNotifyInformation>>>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<SMBResult<Vec<SMBFileNotifyInformation>>> {
        self.changes.recv().await
    }
}

async fn watch<C: SMBConnector, A: AuthProvider>(
    inner: Arc<ClientInner<C, A>>,
    open: OpenRef,
    filter: SMBCompletionFilter,
    recursive: bool,
    changes: mpsc::UnboundedSender<SMBResult<Vec<SMBFileNotifyInformation>>>,
    stop: CancellationToken,
) {
    loop {
        let submitted = async {
            let connection = inner.main_channel()?;
            let file_id = open.file_id()?;
            let tree = open.with(|file| file.tree.clone());
            let tree_id = tree.id().ok_or_else(|| tree_gone(&tree))?;
            let body = SMBBody::ChangeNotifyRequest(SMBChangeNotifyRequest::new(file_id, filter, recursive, NOTIFY_OUTPUT_SIZE));
            let security = tree.security(&inner.session);
            let request = OutgoingRequest::new(body, inner.session.id(), tree_id)
                .secured(security.clone())
                .without_timeout();
            Ok::<_, SMBError>((connection.submit(request).await?, security))
        }.await;
        let (pending, security) = match submitted {
            Ok(x) => x,
            Err(e) => {
                let _ = changes.send(Err(e));
                return;
            }
        };
        let message_id = pending.message_id();
        let connection = pending.connection().clone();
        let reply = pending.wait();
        tokio::pin!(reply);
        let exchange = tokio::select! {
            _ = stop.cancelled() => {
                if let Err(e) = connection.cancel(message_id, inner.session.id(), security).await {
                    debug!(error = %e, "cancel of change notify failed");
                }
                let _ = reply.await;
                return;
            }
            exchange = &mut reply => exchange,
        };
        let batch = exchange.and_then(|exchange| match exchange.status() {
            NTStatus::NotifyEnumDir => Ok(Vec::new()),
            status if status.is_error() => Err(SMBError::status_error(status, "Change notify failed")),
            _ => match exchange.response.body {
                SMBBody::ChangeNotifyResponse(response) => response.entries(),
                _ => Err(SMBError::parse_error("Change notify without a response body")),
            },
        });
        let failed = batch.is_err();
        if changes.send(batch).is_err() || failed {
            return;
        }
    }
}

/// An SMB 2/3 client: one session, its trees and opens, over one or more channels.
///
/// ```no_run
/// use smb_client::client::{OpenOptions, SMBClient, SMBClientConfig};
/// use smb_client::socket::TcpConnector;
/// use smb_client::util::auth::ntlm::NTLMAuthProvider;
/// use smb_client::util::auth::User;
///
/// # async fn run() -> smb_core::SMBResult<()> {
/// let auth = NTLMAuthProvider::new(User::new("user", "pass"), "workstation");
/// let client = SMBClient::connect(TcpConnector::direct("fileserver"), auth, SMBClientConfig::default()).await?;
/// let share = client.tree_connect("data").await?;
/// let file = client.open(&share, OpenOptions { path: "notes.txt".into(), ..Default::default() }).await?;
/// let contents = client.read(file, 0, 4096).await?;
/// client.close(file).await?;
/// # Ok(())
/// # }
/// ```
pub struct SMBClient<C: SMBConnector, A: AuthProvider> {
    inner: Arc<ClientInner<C, A>>,
    dispatcher: JoinHandle<()>,
}

impl<C: SMBConnector, A: AuthProvider> SMBClient<C, A> {
    /// Connects, negotiates and authenticates the main channel.
    pub async fn connect(connector: C, auth: A, config: SMBClientConfig) -> SMBResult<Self> {
        config.validate()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            connector,
            auth,
            config,
            session: Session::new(),
            channels: RwLock::new(Vec::new()),
            alternates: Mutex::new(HashSet::new()),
            trees: RwLock::new(HashMap::new()),
            handles: HandleTable::new(),
            gate: ReconnectGate::new(),
            dialect: Mutex::new(DialectPin::default()),
            next_connection_id: AtomicU64::new(0),
            next_channel: AtomicUsize::new(0),
            v2_unsupported: AtomicBool::new(false),
            events,
        });
        let dispatcher = tokio::spawn(dispatch(Arc::downgrade(&inner), receiver));
        if let Err(e) = inner.establish().await {
            dispatcher.abort();
            return Err(e);
        }
        info!(server = inner.connector.server_name(), session = inner.session.id(), "client connected");
        Ok(Self { inner, dispatcher })
    }

    pub fn negotiated(&self) -> SMBResult<Arc<NegotiatedParameters>> {
        self.inner.main_channel()?.negotiated()
    }

    pub fn session_id(&self) -> u64 {
        self.inner.session.id()
    }

    pub fn channel_count(&self) -> usize {
        read(&self.inner.channels).iter().filter(|c| c.is_alive()).count()
    }

    /// Binds another channel to the session (MS-SMB2 3.2.4.1.7).
    pub async fn add_channel(&self) -> SMBResult<()> {
        let connection = self.inner.bind_channel().await?;
        info!(connection = connection.id(), "alternate channel added");
        Ok(())
    }

    /// Connects a share, or returns it if it is already connected.
    pub async fn tree_connect(&self, share: &str) -> SMBResult<Arc<Tree>> {
        let inner = &self.inner;
        let key = share.to_ascii_lowercase();
        if let Some(tree) = read(&inner.trees).get(&key).filter(|t| t.id().is_some()) {
            return Ok(tree.clone());
        }
        let tree = Arc::new(Tree::new(share));
        let encrypted = read(&inner.trees).values().any(|t| t.info().is_some_and(|i| i.encrypts_data()));
        let (session, config, target) = (&inner.session, &inner.config, &tree);
        inner.retrying(move |connection, _| async move {
            target.connect(&connection, session, config, encrypted).await
        }).await?;
        write(&inner.trees).insert(key, tree.clone());
        Ok(tree)
    }

    /// Disconnects a share; opens on it become invalid.
    pub async fn tree_disconnect(&self, tree: &Arc<Tree>) -> SMBResult<()> {
        let inner = &self.inner;
        for (handle, open) in inner.handles.on_tree(tree) {
            open.with(|file| file.valid = false);
            inner.handles.remove(handle);
        }
        write(&inner.trees).retain(|_, t| !Arc::ptr_eq(t, tree));
        tree.disconnect(&inner.main_channel()?, &inner.session).await
    }

    /// Opens a file, directory or pipe on `tree`.
    ///
    /// When the server answers a lease request with a classic oplock, the open is
    /// closed and made again without caching.
    pub async fn open(&self, tree: &Arc<Tree>, options: OpenOptions) -> SMBResult<FileHandle> {
        let inner = &self.inner;
        let mut options = options;
        let mut outcome = inner.create(tree, &options).await?;
        if outcome.reopen_without_lease {
            if let Err(e) = inner.close_file_id(tree, outcome.file_id).await {
                debug!(error = %e, "close before uncached reopen failed");
            }
            options = options.without_caching();
            outcome = inner.create(tree, &options).await?;
        }
        let is_pipe = tree.info().is_some_and(|info| info.is_pipe());
        debug!(path = %options.path, file_id = ?outcome.file_id, oplock = ?outcome.oplock_level, "opened");
        Ok(inner.handles.insert(OpenFile::new(tree.clone(), options, outcome, is_pipe)))
    }

    /// Closes an open. The handle is gone afterwards even if the server reported an error.
    pub async fn close(&self, handle: FileHandle) -> SMBResult<()> {
        let inner = &self.inner;
        let open = inner.handles.get(handle)?;
        let result = if open.snapshot().valid {
            inner.file_exchange(&open, "Close failed", |file_id| SMBBody::CloseRequest(SMBCloseRequest::new(file_id)))
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        inner.handles.remove(handle);
        result
    }

    /// Reads up to `length` bytes at `offset`; fewer only at end of file.
    pub async fn read(&self, handle: FileHandle, offset: u64, length: u64) -> SMBResult<Vec<u8>> {
        let open = self.inner.handles.get(handle)?;
        let target = FileIo::new(self.inner.clone(), open)?;
        pipeline::read(&target, offset, length).await
    }

    /// Writes `data` at `offset`. A failure part way reports the bytes that made it.
    pub async fn write(&self, handle: FileHandle, offset: u64, data: impl Into<Bytes>) -> SMBResult<u64> {
        let open = self.inner.handles.get(handle)?;
        let target = FileIo::new(self.inner.clone(), open)?;
        pipeline::write(&target, offset, data.into()).await
    }

    pub async fn flush(&self, handle: FileHandle) -> SMBResult<()> {
        let open = self.inner.handles.get(handle)?;
        self.inner.file_exchange(&open, "Flush failed", |file_id| SMBBody::FlushRequest(SMBFlushRequest { file_id })).await?;
        Ok(())
    }

    pub async fn query_info(
        &self,
        handle: FileHandle,
        info_type: SMBInfoType,
        file_info_class: u8,
        output_buffer_length: u32,
    ) -> SMBResult<Vec<u8>> {
        let open = self.inner.handles.get(handle)?;
        let exchange = self.inner.file_exchange(&open, "Query info failed", |file_id| {
            SMBBody::QueryInfoRequest(SMBQueryInfoRequest::new(info_type, file_info_class, file_id, output_buffer_length))
        }).await?;
        match exchange.response.body {
            SMBBody::QueryInfoResponse(response) => Ok(response.data),
            _ => Err(SMBError::parse_error("Query info without a response body")),
        }
    }

    pub async fn set_info(&self, handle: FileHandle, info_type: SMBInfoType, file_info_class: u8, buffer: Vec<u8>) -> SMBResult<()> {
        let open = self.inner.handles.get(handle)?;
        self.inner.file_exchange(&open, "Set info failed", |file_id| {
            SMBBody::SetInfoRequest(SMBSetInfoRequest::new(info_type, file_info_class, file_id, buffer.clone()))
        }).await?;
        Ok(())
    }

    pub async fn ioctl(&self, handle: FileHandle, ctl_code: SMBIoCtlCode, input: Vec<u8>, max_output: u32) -> SMBResult<Vec<u8>> {
        let open = self.inner.handles.get(handle)?;
        let exchange = self.inner.file_exchange(&open, "IOCTL failed", |file_id| {
            SMBBody::IoCtlRequest(SMBIoCtlRequest::fsctl(ctl_code, file_id, input.clone(), max_output))
        }).await?;
        match exchange.response.body {
            SMBBody::IoCtlResponse(response) => Ok(response.output),
            _ => Err(SMBError::parse_error("IOCTL without a response body")),
        }
    }

    /// Watches a directory open for changes until [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, handle: FileHandle, filter: SMBCompletionFilter, recursive: bool) -> SMBResult<Subscription> {
        let open = self.inner.handles.get(handle)?;
        let (sender, changes) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let task = tokio::spawn(watch(self.inner.clone(), open, filter, recursive, sender, stop.clone()));
        Ok(Subscription { changes, stop, task })
    }

    /// Cancels the outstanding notification request and waits for the watch to end.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        subscription.stop.cancel();
        if let Err(e) = subscription.task.await {
            debug!(error = %e, "change watch ended abnormally");
        }
    }

    /// Round trip on the main channel, reconnecting first if it was lost.
    pub async fn echo(&self) -> SMBResult<()> {
        let session = &self.inner.session;
        self.inner.retrying(move |connection, _| async move {
            let request = OutgoingRequest::new(SMBBody::EchoRequest(SMBEmpty), session.id(), 0);
            connection.exchange(request).await?.check("Echo failed").map(|_| ())
        }).await
    }

    /// Closes every open, disconnects every tree, logs off and drops all channels.
    pub async fn disconnect(self) -> SMBResult<()> {
        let inner = &self.inner;
        for (handle, _) in inner.handles.all() {
            if let Err(e) = self.close(handle).await {
                debug!(handle = handle.id(), error = %e, "close during disconnect failed");
            }
        }
        let main = inner.main_channel()?;
        let trees: Vec<Arc<Tree>> = write(&inner.trees).drain().map(|(_, tree)| tree).collect();
        for tree in trees {
            if let Err(e) = tree.disconnect(&main, &inner.session).await {
                debug!(share = tree.share(), error = %e, "tree disconnect failed");
            }
        }
        let result = inner.session.logoff(&main).await;
        inner.alternates.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let channels = std::mem::take(&mut *write(&inner.channels));
        for channel in channels {
            channel.close().await;
        }
        info!("client disconnected");
        result
    }
}

impl<C: SMBConnector, A: AuthProvider> Drop for SMBClient<C, A> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_pins_the_dialect_in_use_under_any_cap() {
        let mut pin = DialectPin::default();
        assert_eq!(pin.fresh(), NegotiateMode::Fresh);
        assert_eq!(pin.reconnect(), NegotiateMode::Fresh);

        pin.in_use = Some(SMBDialect::V3_1_1);
        assert_eq!(pin.reconnect(), NegotiateMode::Pinned(SMBDialect::V3_1_1));

        pin.cap = Some(SMBDialect::V3_0_2);
        assert_eq!(pin.fresh(), NegotiateMode::Capped(SMBDialect::V3_0_2));
        assert_eq!(pin.reconnect(), NegotiateMode::Pinned(SMBDialect::V3_0_2));
    }
}
