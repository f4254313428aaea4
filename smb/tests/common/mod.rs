//! A small in-memory file server the client under test talks to over duplex pipes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::DuplexStream;
use uuid::Uuid;

use smb_client::protocol::body::close::SMBCloseResponse;
use smb_client::protocol::body::create::{
    CreateRequestContext, CreateResponseContext, DurableHandleResponseV2, DurableHandleV2Flags, ResponseLeaseV2,
    SMBCreateAction, SMBCreateDisposition, SMBCreateName, SMBCreateResponse, SMBFileId, SMBLeaseFlags, SMBOplockLevel,
};
use smb_client::protocol::body::empty::SMBEmpty;
use smb_client::protocol::body::error::SMBErrorResponse;
use smb_client::protocol::body::negotiate::context::{EncryptionCipher, HashAlgorithm, PreAuthIntegrityCapabilities};
use smb_client::protocol::body::negotiate::{NegotiateContext, SMBNegotiateResponse};
use smb_client::protocol::body::read::SMBReadResponse;
use smb_client::protocol::body::session_setup::flags::SMBSessionFlags;
use smb_client::protocol::body::session_setup::SMBSessionSetupResponse;
use smb_client::protocol::body::tree_connect::{SMBShareFlags, SMBShareType, SMBTreeCapabilities, SMBTreeConnectResponse};
use smb_client::protocol::body::write::SMBWriteResponse;
use smb_client::protocol::body::{Capabilities, FileTime, SMBAccessMask, SMBBody, SMBDialect, SecurityMode};
use smb_client::protocol::header::{SMBCommandCode, SMBFlags, SMBSyncHeader};
use smb_client::protocol::message::SMBMessage;
use smb_client::socket::message_stream::{read_frame, SMBFrameCodec, SMBSocketConnection};
use smb_client::socket::SMBConnector;
use smb_client::util::auth::{AuthContext, AuthProvider};
use smb_client::util::crypto::preauth::PreauthHash;
use smb_client::util::crypto::smb2::{sign_message, signing_algorithm_for, SessionKeys};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

pub const TREE_ID: u32 = 7;
const FIRST_SESSION_ID: u64 = 0x4400_0000_0001;
static SESSION_KEY: [u8; 16] = [0x42; 16];

/// Routes client logs to the test harness; filter with `RUST_LOG` and build with `--features tracing`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    /// 1-based, in the order the client connected.
    pub connection: usize,
    pub command: SMBCommandCode,
    pub flags: SMBFlags,
    pub channel_sequence: u16,
    pub session_id: u64,
    pub body: SMBBody,
}

impl Seen {
    pub fn is_replay(&self) -> bool {
        self.flags.contains(SMBFlags::REPLAY_OPERATION)
    }
}

#[derive(Debug, Clone)]
struct ServerOpen {
    path: String,
    volatile: u64,
    create_guid: Option<Uuid>,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<String, Vec<u8>>,
    /// Keyed by persistent id; the volatile id changes when an open is reclaimed.
    opens: HashMap<u64, ServerOpen>,
    next_id: u64,
    next_session: u64,
    connections: usize,
    seen: Vec<Seen>,
    /// Connection and command that make the server hang up instead of answering.
    drop_on: Vec<(usize, SMBCommandCode)>,
    short_reads: bool,
    shortened: HashSet<u64>,
    /// Dialect each connection negotiated.
    dialects: HashMap<usize, SMBDialect>,
    /// Session setup on this dialect fails as a cluster dialect mismatch.
    refused: Option<SMBDialect>,
    /// Negotiate exchange hash per 3.1.1 connection.
    preauth: HashMap<usize, PreauthHash>,
    /// Key each connection signs with once a session is set up or bound on it.
    signing_keys: HashMap<usize, Vec<u8>>,
    /// Lease grants carry a key other than the one requested.
    foreign_lease_key: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
    dialect: SMBDialect,
    server_guid: Uuid,
    capabilities: Capabilities,
    max_io: u32,
}

impl MemoryServer {
    pub fn new(dialect: SMBDialect) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            dialect,
            server_guid: Uuid::new_v4(),
            capabilities: Capabilities::LEASING | Capabilities::LARGE_MTU | Capabilities::MULTI_CHANNEL,
            max_io: 1 << 20,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_file(self, path: &str, data: Vec<u8>) -> Self {
        self.state().files.insert(path.to_string(), data);
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    /// Reads starting on a 64 KiB boundary return half of what was asked.
    pub fn short_reads(&self) {
        self.state().short_reads = true;
    }

    /// Hangs up `connection` when it first receives `command`, leaving it unanswered.
    pub fn drop_on(&self, connection: usize, command: SMBCommandCode) {
        self.state().drop_on.push((connection, command));
    }

    /// Refuses sessions on `dialect` the way a cluster node running an older dialect does.
    pub fn refuse_dialect(&self, dialect: SMBDialect) {
        self.state().refused = Some(dialect);
    }

    /// Grants leases under a key the client never asked for.
    pub fn grant_foreign_lease_keys(&self) {
        self.state().foreign_lease_key = true;
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.state().seen.clone()
    }

    /// Opens the server still holds.
    pub fn open_count(&self) -> usize {
        self.state().opens.len()
    }

    pub fn connections(&self) -> usize {
        self.state().connections
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { server: self.clone() }
    }

    async fn serve(self, index: usize, stream: DuplexStream) {
        let (mut reader, mut writer) = SMBSocketConnection::new("client", stream, SMBFrameCodec::default()).into_streams();
        // A change notification waits here until the client cancels it.
        let mut parked: Option<SMBMessage> = None;
        while let Ok(Some(frame)) = read_frame(&mut reader).await {
            let Ok((_, request)) = SMBMessage::parse(&frame) else {
                return;
            };
            let (answered, reply) = match request.header.command {
                SMBCommandCode::ChangeNotify => {
                    self.record(index, &request);
                    parked = Some(request);
                    continue;
                }
                SMBCommandCode::Cancel => {
                    self.record(index, &request);
                    let Some(notify) = parked.take().filter(|n| n.header.message_id == request.header.message_id) else {
                        continue;
                    };
                    let reply = error(notify.header.create_response_header(NTStatus::Cancelled, 1), NTStatus::Cancelled);
                    (notify, reply)
                }
                _ => match self.answer(index, &request) {
                    Some(reply) => (request, reply),
                    None => return,
                },
            };
            let bytes = self.finish(index, &answered, &frame, &reply);
            if writer.write_frame(&bytes).await.is_err() {
                return;
            }
        }
    }

    /// Serializes `reply`, tracking the pre-auth hash and signing whatever answers a signed request.
    fn finish(&self, index: usize, request: &SMBMessage, request_bytes: &[u8], reply: &SMBMessage) -> Vec<u8> {
        let mut bytes = reply.as_bytes();
        let mut state = self.state();
        let dialect = state.dialects.get(&index).copied().unwrap_or(self.dialect);
        let established = reply.header.status == NTStatus::StatusSuccess;
        match request.header.command {
            SMBCommandCode::Negotiate if dialect == SMBDialect::V3_1_1 => {
                let mut hash = PreauthHash::new();
                hash.update(request_bytes);
                hash.update(&bytes);
                state.preauth.insert(index, hash);
            }
            SMBCommandCode::SessionSetup if established => {
                let mut hash = state.preauth.get(&index).cloned().unwrap_or_default();
                let preauth = if dialect == SMBDialect::V3_1_1 {
                    hash.update(request_bytes);
                    hash.value().to_vec()
                } else {
                    Vec::new()
                };
                let keys = SessionKeys::derive(&SESSION_KEY, dialect, &preauth, EncryptionCipher::AES128GCM).unwrap();
                state.signing_keys.insert(index, keys.signing);
            }
            _ => {}
        }
        let sign = request.is_signed() || (request.header.command == SMBCommandCode::SessionSetup && established);
        if let Some(key) = state.signing_keys.get(&index).filter(|_| sign) {
            sign_message(key, signing_algorithm_for(dialect, None), &mut bytes).unwrap();
        }
        bytes
    }

    fn record(&self, index: usize, request: &SMBMessage) {
        self.state().seen.push(Seen {
            connection: index,
            command: request.header.command,
            flags: request.header.flags,
            channel_sequence: request.header.channel_sequence,
            session_id: request.header.session_id,
            body: request.body.clone(),
        });
    }

    /// The reply to `request`, or `None` to hang up.
    fn answer(&self, index: usize, request: &SMBMessage) -> Option<SMBMessage> {
        self.record(index, request);
        let mut state = self.state();
        let fault = (index, request.header.command);
        if let Some(position) = state.drop_on.iter().position(|f| *f == fault) {
            state.drop_on.remove(position);
            return None;
        }

        let credits = request.header.credits.max(1);
        let mut header = request.header.create_response_header(NTStatus::StatusSuccess, credits);
        let body = match &request.body {
            SMBBody::NegotiateRequest(negotiate) => {
                let dialect = if negotiate.dialects.contains(&self.dialect) {
                    self.dialect
                } else {
                    *negotiate.dialects.iter().max()?
                };
                state.dialects.insert(index, dialect);
                let negotiate_contexts = if dialect == SMBDialect::V3_1_1 {
                    vec![NegotiateContext::PreAuthIntegrityCapabilities(PreAuthIntegrityCapabilities {
                        hash_algorithms: vec![HashAlgorithm::SHA512],
                        salt: vec![9; 32],
                    })]
                } else {
                    Vec::new()
                };
                SMBBody::NegotiateResponse(SMBNegotiateResponse {
                    security_mode: SecurityMode::SIGNING_ENABLED,
                    dialect,
                    server_guid: self.server_guid,
                    capabilities: self.capabilities,
                    max_transact_size: self.max_io,
                    max_read_size: self.max_io,
                    max_write_size: self.max_io,
                    system_time: FileTime::default(),
                    server_start_time: FileTime::default(),
                    buffer: Vec::new(),
                    negotiate_contexts,
                })
            }
            SMBBody::SessionSetupRequest(_) => {
                if state.refused.is_some() && state.refused == state.dialects.get(&index).copied() {
                    return Some(error(header, NTStatus::SMBBadClusterDialect));
                }
                if header.session_id == 0 {
                    state.next_session += 1;
                    header.session_id = FIRST_SESSION_ID + state.next_session - 1;
                }
                SMBBody::SessionSetupResponse(SMBSessionSetupResponse::new(SMBSessionFlags::empty(), Vec::new()))
            }
            SMBBody::TreeConnectRequest(_) => {
                header.tree_id = TREE_ID;
                SMBBody::TreeConnectResponse(SMBTreeConnectResponse {
                    share_type: SMBShareType::Disk,
                    share_flags: SMBShareFlags::empty(),
                    capabilities: SMBTreeCapabilities::empty(),
                    maximal_access: SMBAccessMask::permissive(),
                })
            }
            SMBBody::CreateRequest(create) => {
                let SMBCreateName::Path(path) = &create.name else {
                    return Some(error(header, NTStatus::InvalidParameter));
                };
                let path = path.clone();
                state.next_id += 1;
                let volatile = state.next_id + 1000;
                let mut contexts = Vec::new();
                let reclaim = create.contexts.iter().find_map(|c| match c {
                    CreateRequestContext::DurableHandleReconnectV2(x) => Some(x.clone()),
                    _ => None,
                });
                let file_id = if let Some(reclaim) = reclaim {
                    let persistent = reclaim.file_id.persistent;
                    match state.opens.get_mut(&persistent) {
                        Some(open) if open.create_guid == Some(reclaim.create_guid) => open.volatile = volatile,
                        _ => return Some(error(header, NTStatus::ObjectNameNotFound)),
                    }
                    SMBFileId::new(persistent, volatile)
                } else {
                    let exists = state.files.contains_key(&path);
                    match create.create_disposition {
                        SMBCreateDisposition::Open | SMBCreateDisposition::Overwrite if !exists => {
                            return Some(error(header, NTStatus::ObjectNameNotFound));
                        }
                        SMBCreateDisposition::Supersede
                        | SMBCreateDisposition::Overwrite
                        | SMBCreateDisposition::OverwriteIf => {
                            state.files.insert(path.clone(), Vec::new());
                        }
                        _ => {
                            state.files.entry(path.clone()).or_default();
                        }
                    }
                    let create_guid = create.contexts.iter().find_map(|c| match c {
                        CreateRequestContext::DurableHandleRequestV2(x) => Some(x.create_guid),
                        _ => None,
                    });
                    if create_guid.is_some() {
                        contexts.push(CreateResponseContext::DurableHandleResponseV2(DurableHandleResponseV2 {
                            timeout: 60_000,
                            flags: DurableHandleV2Flags::empty(),
                        }));
                    }
                    let requested_lease = create.contexts.iter().find_map(|c| match c {
                        CreateRequestContext::RequestLeaseV2(x) => Some(x.clone()),
                        _ => None,
                    });
                    if let Some(lease) = requested_lease.filter(|_| state.foreign_lease_key) {
                        contexts.push(CreateResponseContext::ResponseLeaseV2(ResponseLeaseV2 {
                            lease_key: lease.lease_key.map(|b| !b),
                            lease_state: lease.lease_state,
                            lease_flags: SMBLeaseFlags::empty(),
                            parent_lease_key: [0; 16],
                            epoch: lease.epoch + 1,
                        }));
                    }
                    let persistent = state.next_id;
                    state.opens.insert(persistent, ServerOpen { path: path.clone(), volatile, create_guid });
                    SMBFileId::new(persistent, volatile)
                };
                let mut response = SMBCreateResponse::new(file_id, SMBCreateAction::Opened);
                if contexts.iter().any(|c| matches!(c, CreateResponseContext::ResponseLeaseV2(_))) {
                    response.oplock_level = SMBOplockLevel::Lease;
                }
                response.end_of_file = state.files.get(&path).map(|f| f.len() as u64).unwrap_or(0);
                response.contexts = contexts;
                SMBBody::CreateResponse(response)
            }
            SMBBody::ReadRequest(read) => {
                let Some(path) = open_path(&state, read.file_id) else {
                    return Some(error(header, NTStatus::FileClosed));
                };
                let file = state.files.get(&path).cloned().unwrap_or_default();
                let offset = read.read_offset as usize;
                if offset >= file.len() {
                    return Some(error(header, NTStatus::EndOfFile));
                }
                let mut end = file.len().min(offset + read.read_length as usize);
                if state.short_reads && offset % (64 * 1024) == 0 && state.shortened.insert(read.read_offset) {
                    end = offset + (end - offset).div_ceil(2);
                }
                SMBBody::ReadResponse(SMBReadResponse::new(file[offset..end].to_vec(), 0))
            }
            SMBBody::WriteRequest(write) => {
                let Some(path) = open_path(&state, write.file_id) else {
                    return Some(error(header, NTStatus::FileClosed));
                };
                let file = state.files.entry(path).or_default();
                let offset = write.offset as usize;
                let end = offset + write.data.len();
                if file.len() < end {
                    file.resize(end, 0);
                }
                file[offset..end].copy_from_slice(&write.data);
                SMBBody::WriteResponse(SMBWriteResponse::new(write.data.len() as u32))
            }
            SMBBody::CloseRequest(close) => {
                if open_path(&state, close.file_id).is_none() {
                    return Some(error(header, NTStatus::FileClosed));
                }
                state.opens.remove(&close.file_id.persistent);
                SMBBody::CloseResponse(SMBCloseResponse::default())
            }
            SMBBody::FlushRequest(_) => SMBBody::FlushResponse(SMBEmpty),
            SMBBody::EchoRequest(_) => SMBBody::EchoResponse(SMBEmpty),
            SMBBody::TreeDisconnectRequest(_) => SMBBody::TreeDisconnectResponse(SMBEmpty),
            SMBBody::LogoffRequest(_) => SMBBody::LogoffResponse(SMBEmpty),
            _ => return Some(error(header, NTStatus::StatusNotSupported)),
        };
        Some(SMBMessage::new(header, body))
    }
}

fn open_path(state: &State, file_id: SMBFileId) -> Option<String> {
    state.opens
        .get(&file_id.persistent)
        .filter(|open| open.volatile == file_id.volatile)
        .map(|open| open.path.clone())
}

fn error(mut header: SMBSyncHeader, status: NTStatus) -> SMBMessage {
    header.status = status;
    SMBMessage::new(header, SMBBody::ErrorResponse(SMBErrorResponse::default()))
}

/// Hands the client one end of a fresh duplex pipe per connect and serves the other.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl SMBConnector for MemoryConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> SMBResult<DuplexStream> {
        let (client, server) = tokio::io::duplex(4 << 20);
        let index = {
            let mut state = self.server.state();
            state.connections += 1;
            state.connections
        };
        tokio::spawn(self.server.clone().serve(index, server));
        Ok(client)
    }

    fn server_name(&self) -> &str {
        "memory"
    }
}

/// Single-round authentication that always yields the same session key.
#[derive(Debug, Default)]
pub struct StaticAuth;

#[derive(Debug, Default)]
pub struct StaticContext {
    complete: bool,
}

impl AuthContext for StaticContext {
    fn is_complete(&self) -> bool {
        self.complete
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.complete.then_some(SESSION_KEY.as_slice())
    }
}

impl AuthProvider for StaticAuth {
    type Context = StaticContext;

    fn init_context(&self) -> StaticContext {
        StaticContext::default()
    }

    fn initiate_security_context(&self, _input_token: &[u8], context: &mut StaticContext) -> SMBResult<Vec<u8>> {
        context.complete = true;
        Ok(b"static".to_vec())
    }
}

pub fn pattern(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 251) as u8).collect()
}
