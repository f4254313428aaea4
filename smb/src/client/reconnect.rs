//! Recovery after a transport loss (MS-SMB2 3.2.4.1.7, 3.2.5.5.3, 3.2.7.1).
//!
//! A lost main channel is replaced by a new connection that negotiates exactly
//! the dialect already in use, sets up a session naming the old one as previous,
//! reconnects every tree and then reclaims durable or leased opens before any
//! other request may touch them. Concurrent callers that notice the loss share
//! one attempt through [`ReconnectGate`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use smb_core::error::SMBError;
use smb_core::logging::{debug, info, warn};
use smb_core::SMBResult;

use crate::client::config::SMBClientConfig;
use crate::client::connection::{Connection, OutgoingRequest};
use crate::client::create::CreatePlan;
use crate::client::negotiate::{negotiate, NegotiateMachine, NegotiateMode, NegotiatedParameters};
use crate::client::open::HandleTable;
use crate::client::session::{Session, SetupMode};
use crate::client::tree::Tree;
use crate::protocol::body::{SMBBody, SMBDialect};
use crate::protocol::header::SMBFlags;
use crate::util::auth::AuthProvider;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Requests whose resend must tell the server it may already have run them.
/// Reads, queries and the like are idempotent and go out unmarked.
pub fn needs_replay_marker(body: &SMBBody) -> bool {
    match body {
        SMBBody::CreateRequest(_) | SMBBody::WriteRequest(_) => true,
        SMBBody::SetInfoRequest(request) => request.requires_replay_marker(),
        SMBBody::IoCtlRequest(request) => request.ctl_code.is_mutating(),
        _ => false,
    }
}

/// Prepares a resent request: the current channel sequence and, where it applies,
/// the replay flag. Dialects before 3.0 know neither.
pub fn mark_replay(request: &mut OutgoingRequest, dialect: SMBDialect, channel_sequence: u16) {
    if !dialect.supports_replay() {
        return;
    }
    request.channel_sequence = channel_sequence;
    if needs_replay_marker(&request.body) {
        request.flags |= SMBFlags::REPLAY_OPERATION;
    }
}

/// Errors a retry cannot fix.
fn is_permanent(error: &SMBError) -> bool {
    matches!(
        error,
        SMBError::AuthError(_)
            | SMBError::PreconditionFailed(_)
            | SMBError::ParseError(_)
            | SMBError::PayloadTooSmall(_)
            | SMBError::CryptoError(_)
    )
}

/// Single-flight guard around reconnect attempts.
///
/// Callers read [`epoch`](Self::epoch) before the request that failed and pass
/// it to [`run`](Self::run); whoever enters second finds the epoch moved on and
/// returns at once, reusing the first caller's work.
#[derive(Debug, Default)]
pub struct ReconnectGate {
    lock: Mutex<()>,
    epoch: AtomicU64,
}

impl ReconnectGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Retries `attempt` with exponential backoff until it succeeds, fails for
    /// good, or `wait` runs out. Running out is reported as `NotConnected`.
    pub async fn run<F, Fut>(&self, seen: u64, wait: Duration, mut attempt: F) -> SMBResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SMBResult<()>>,
    {
        let _guard = self.lock.lock().await;
        if self.epoch() != seen {
            debug!("reconnect already done by another caller");
            return Ok(());
        }
        let deadline = Instant::now() + wait;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match tokio::time::timeout_at(deadline, attempt()).await {
                Ok(Ok(())) => {
                    self.epoch.fetch_add(1, Ordering::AcqRel);
                    info!(attempts, "reconnected");
                    return Ok(());
                }
                Ok(Err(e)) if is_permanent(&e) => {
                    warn!(error = %e, "reconnect failed permanently");
                    return Err(e);
                }
                Ok(Err(e)) => debug!(attempts, error = %e, "reconnect attempt failed"),
                Err(_) => break,
            }
            if Instant::now() + backoff >= deadline {
                break;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        warn!(attempts, wait = ?wait, "gave up reconnecting");
        Err(SMBError::NotConnected)
    }
}

/// Brings a session and its trees back on a new main connection. `previous` is
/// the id of the session that was lost, or 0 when there is none to name.
///
/// A tree the server no longer lets us connect stays invalidated; opens on it
/// are then lost during reclaim. Transport faults abort the attempt.
pub async fn reestablish<A: AuthProvider>(
    connection: &Arc<Connection>,
    session: &Session,
    auth: &A,
    config: &SMBClientConfig,
    mode: NegotiateMode,
    previous: u64,
    trees: &[Arc<Tree>],
) -> SMBResult<Arc<NegotiatedParameters>> {
    let mut machine = NegotiateMachine::new(config, mode);
    let parameters = negotiate(connection, &mut machine).await?;
    session.setup(connection, auth, config, SetupMode::Reconnect { previous }).await?;

    let encrypted = trees.iter().any(|tree| tree.info().is_some_and(|info| info.encrypts_data()));
    for tree in trees {
        tree.invalidate();
        match tree.connect(connection, session, config, encrypted).await {
            Ok(_) => {}
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => warn!(share = tree.share(), error = %e, "share not reconnected"),
        }
    }
    info!(
        connection = connection.id(),
        previous_session = previous,
        session = session.id(),
        trees = trees.len(),
        "session re-established"
    );
    Ok(parameters)
}

/// Asks the server for every durable or leased open back with its original
/// create GUID and lease key. Returns how many came back.
///
/// An open that cannot be reclaimed is invalidated on its own and keeps its
/// handle, so callers see `STATUS_INVALID_HANDLE` instead of a stale file id.
pub async fn reclaim_handles(connection: &Arc<Connection>, session: &Session, handles: &HandleTable) -> SMBResult<usize> {
    let mut reclaimed = 0;
    for (handle, open) in handles.all() {
        let file = open.snapshot();
        if !file.valid {
            continue;
        }
        let (Some(state), Some(tree_id)) = (file.reclaim_state(), file.tree.id()) else {
            debug!(handle = handle.id(), "open cannot be reclaimed");
            open.with(|file| file.valid = false);
            continue;
        };
        let plan = match CreatePlan::reclaim(&file.options, &state) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(handle = handle.id(), error = %e, "no reclaim request for open");
                open.with(|file| file.valid = false);
                continue;
            }
        };
        let request = OutgoingRequest::new(SMBBody::CreateRequest(plan.request.clone()), session.id(), tree_id)
            .secured(file.tree.security(session));
        let outcome = match connection.exchange(request).await {
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => Err(e),
            Ok(exchange) => exchange.check("Durable reconnect failed").and_then(|exchange| match exchange.response.body {
                SMBBody::CreateResponse(response) => plan.reconcile(response),
                _ => Err(SMBError::parse_error("Create succeeded without a response body")),
            }),
        };
        match outcome {
            Ok(outcome) => {
                debug!(handle = handle.id(), file_id = ?outcome.file_id, "open reclaimed");
                open.with(|file| file.refresh(outcome));
                reclaimed += 1;
            }
            Err(e) => {
                warn!(handle = handle.id(), error = %e, "open lost on reconnect");
                open.with(|file| file.valid = false);
            }
        }
    }
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use uuid::Uuid;

    use smb_core::nt_status::NTStatus;

    use crate::client::create::{ContextVersion, CreateOutcome, DurableGrant, LeaseGrant, OpenOptions};
    use crate::client::open::OpenFile;
    use crate::client::test_support::{established_session, negotiated_pair, pair, parameters, Peer, ScriptedAuth, SESSION_ID, SESSION_KEY};
    use crate::protocol::body::create::{
        CreateRequestContext, CreateResponseContext, ResponseLeaseV2, SMBCreateAction, SMBCreateResponse, SMBFileAttributes,
        SMBFileId, SMBLeaseFlags, SMBLeaseState, SMBOplockLevel,
    };
    use crate::protocol::body::error::SMBErrorResponse;
    use crate::protocol::body::ioctl::{SMBIoCtlCode, SMBIoCtlRequest};
    use crate::protocol::body::negotiate::SMBNegotiateResponse;
    use crate::protocol::body::read::SMBReadRequest;
    use crate::protocol::body::session_setup::flags::SMBSessionFlags;
    use crate::protocol::body::session_setup::SMBSessionSetupResponse;
    use crate::protocol::body::set_info::SMBSetInfoRequest;
    use crate::protocol::body::tree_connect::{SMBShareFlags, SMBShareType, SMBTreeCapabilities, SMBTreeConnectResponse};
    use crate::protocol::body::write::SMBWriteRequest;
    use crate::protocol::body::{Capabilities, FileTime, SecurityMode, SMBAccessMask};
    use crate::protocol::message::SMBMessage;

    use super::*;

    const FILE_ID: SMBFileId = SMBFileId { persistent: 7, volatile: 8 };

    #[test]
    fn only_non_idempotent_requests_are_replay_marked() {
        let write = SMBBody::WriteRequest(SMBWriteRequest::new(FILE_ID, 0, vec![1]));
        let read = SMBBody::ReadRequest(SMBReadRequest::new(FILE_ID, 0, 1));
        let rename = SMBBody::SetInfoRequest(SMBSetInfoRequest::rename(FILE_ID, "b", false));
        let resize = SMBBody::SetInfoRequest(SMBSetInfoRequest::end_of_file(FILE_ID, 10));
        let copy = SMBBody::IoCtlRequest(SMBIoCtlRequest::fsctl(SMBIoCtlCode::SrvCopyChunk, FILE_ID, vec![], 0));
        let peek = SMBBody::IoCtlRequest(SMBIoCtlRequest::fsctl(SMBIoCtlCode::PipePeek, FILE_ID, vec![], 0));
        assert!(needs_replay_marker(&write));
        assert!(needs_replay_marker(&rename));
        assert!(needs_replay_marker(&copy));
        assert!(!needs_replay_marker(&read));
        assert!(!needs_replay_marker(&resize));
        assert!(!needs_replay_marker(&peek));

        let mut request = OutgoingRequest::new(write.clone(), 1, 1);
        mark_replay(&mut request, SMBDialect::V3_0_2, 4);
        assert!(request.flags.contains(SMBFlags::REPLAY_OPERATION));
        assert_eq!(request.channel_sequence, 4);
        let mut request = OutgoingRequest::new(write, 1, 1);
        mark_replay(&mut request, SMBDialect::V2_1_0, 4);
        assert!(request.flags.is_empty());
        assert_eq!(request.channel_sequence, 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_reconnect() {
        let gate = ReconnectGate::new();
        let attempts = &AtomicUsize::new(0);
        let seen = gate.epoch();
        let attempt = move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        };
        let (first, second) = tokio::join!(
            gate.run(seen, Duration::from_secs(1), attempt),
            gate.run(seen, Duration::from_secs(1), attempt),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.epoch(), seen + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_the_wait() {
        let gate = ReconnectGate::new();
        let attempts = &AtomicUsize::new(0);
        let started = Instant::now();
        let result = gate.run(gate.epoch(), Duration::from_secs(2), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(SMBError::connection_lost("refused"))
        }).await;
        assert!(matches!(result, Err(SMBError::NotConnected)));
        assert!(started.elapsed() <= Duration::from_secs(2));
        assert!(attempts.load(Ordering::SeqCst) > 1);
        assert_eq!(gate.epoch(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_failure_is_not_retried() {
        let gate = ReconnectGate::new();
        let attempts = &AtomicUsize::new(0);
        let result = gate.run(gate.epoch(), Duration::from_secs(60), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(SMBError::auth_error("bad password"))
        }).await;
        assert!(matches!(result, Err(SMBError::AuthError(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    fn tree_response(tree_id: u32) -> impl FnOnce(&SMBMessage) -> SMBMessage {
        move |request| {
            let mut header = request.header.create_response_header(NTStatus::StatusSuccess, 8);
            header.tree_id = tree_id;
            SMBMessage::new(header, SMBBody::TreeConnectResponse(SMBTreeConnectResponse {
                share_type: SMBShareType::Disk,
                share_flags: SMBShareFlags::empty(),
                capabilities: SMBTreeCapabilities::empty(),
                maximal_access: SMBAccessMask::permissive(),
            }))
        }
    }

    async fn connect_tree(connection: &Arc<Connection>, peer: &mut Peer, session: &Session, config: &SMBClientConfig) -> Arc<Tree> {
        let tree = Arc::new(Tree::new("data"));
        let server = async {
            let request = peer.next().await;
            peer.send(tree_response(3)(&request)).await;
        };
        let (result, _) = tokio::join!(tree.connect(connection, session, config, false), server);
        result.unwrap();
        tree
    }

    /// MS-SMB2 3.2.4.2.3: the new session names the old one, on the dialect already in use.
    #[tokio::test]
    async fn reestablish_pins_the_dialect_and_names_the_previous_session() {
        let config = SMBClientConfig::default();
        let (old, mut old_peer, _old_events) = negotiated_pair(&config, parameters(SMBDialect::V2_1_0));
        let session = established_session(&old, &mut old_peer, &config, SMBSessionFlags::empty()).await;
        let tree = connect_tree(&old, &mut old_peer, &session, &config).await;

        let (connection, mut peer, _events) = pair(&config);
        let auth = ScriptedAuth { tokens: vec![b"token".to_vec()], session_key: Some(SESSION_KEY.to_vec()) };
        let server = async {
            let request = peer.next().await;
            let SMBBody::NegotiateRequest(negotiate) = &request.body else { panic!("expected negotiate") };
            assert_eq!(negotiate.dialects, vec![SMBDialect::V2_1_0]);
            let body = SMBBody::NegotiateResponse(SMBNegotiateResponse {
                security_mode: SecurityMode::SIGNING_ENABLED,
                dialect: SMBDialect::V2_1_0,
                server_guid: Uuid::new_v4(),
                capabilities: Capabilities::LEASING | Capabilities::LARGE_MTU,
                max_transact_size: 1 << 16,
                max_read_size: 1 << 16,
                max_write_size: 1 << 16,
                system_time: FileTime::default(),
                server_start_time: FileTime::default(),
                buffer: vec![],
                negotiate_contexts: vec![],
            });
            peer.reply(&request, NTStatus::StatusSuccess, 31, body).await;

            let request = peer.next().await;
            let SMBBody::SessionSetupRequest(setup) = &request.body else { panic!("expected session setup") };
            assert_eq!(setup.previous_session_id, SESSION_ID);
            let mut header = request.header.create_response_header(NTStatus::StatusSuccess, 8);
            header.session_id = SESSION_ID + 1;
            let body = SMBBody::SessionSetupResponse(SMBSessionSetupResponse::new(SMBSessionFlags::empty(), vec![]));
            peer.send(SMBMessage::new(header, body)).await;

            let request = peer.next().await;
            assert_eq!(request.header.session_id, SESSION_ID + 1);
            peer.send(tree_response(9)(&request)).await;
        };
        let mode = NegotiateMode::Pinned(SMBDialect::V2_1_0);
        let trees = [tree.clone()];
        let (result, _) = tokio::join!(reestablish(&connection, &session, &auth, &config, mode, SESSION_ID, &trees), server);
        assert_eq!(result.unwrap().dialect, SMBDialect::V2_1_0);
        assert_eq!(session.id(), SESSION_ID + 1);
        assert_eq!(tree.id(), Some(9));
    }

    fn outcome(volatile: u64, durable: bool) -> CreateOutcome {
        CreateOutcome {
            file_id: SMBFileId::new(7, volatile),
            action: SMBCreateAction::Opened,
            oplock_level: SMBOplockLevel::Lease,
            creation_time: FileTime::default(),
            last_write_time: FileTime::default(),
            end_of_file: 0,
            allocation_size: 0,
            file_attributes: SMBFileAttributes::NORMAL,
            durable: durable.then(|| DurableGrant {
                version: ContextVersion::V2,
                persistent: false,
                timeout: 60_000,
                create_guid: Uuid::from_u128(volatile as u128),
            }),
            lease: durable.then(|| LeaseGrant {
                version: ContextVersion::V2,
                key: [volatile as u8; 16],
                parent_key: None,
                state: SMBLeaseState::read_handle(),
                epoch: 1,
            }),
            maximal_access: SMBAccessMask::permissive(),
            on_disk_id: None,
            reopen_without_lease: false,
        }
    }

    /// A reclaimed open keeps its handle and takes the new volatile id; a refused
    /// reclaim invalidates that open alone.
    #[tokio::test]
    async fn reclaim_refreshes_or_invalidates_each_open_on_its_own() {
        let config = SMBClientConfig::default();
        let (connection, mut peer, _events) = negotiated_pair(&config, parameters(SMBDialect::V3_0_2));
        let session = Session::new();
        let tree = connect_tree(&connection, &mut peer, &session, &config).await;

        let handles = HandleTable::new();
        let options = OpenOptions { path: "a".into(), durable: true, ..Default::default() };
        let kept = handles.insert(OpenFile::new(tree.clone(), options.clone(), outcome(1, true), false));
        let refused = handles.insert(OpenFile::new(tree.clone(), options.clone(), outcome(2, true), false));
        let plain = handles.insert(OpenFile::new(tree.clone(), OpenOptions::default(), outcome(3, false), false));

        let server = async {
            for _ in 0..2 {
                let request = peer.next().await;
                let SMBBody::CreateRequest(create) = &request.body else { panic!("expected create") };
                let Some(CreateRequestContext::DurableHandleReconnectV2(reconnect)) = create.contexts.get(1) else {
                    panic!("expected a durable v2 reconnect");
                };
                if reconnect.file_id.volatile == 2 {
                    let body = SMBBody::ErrorResponse(SMBErrorResponse::default());
                    peer.reply(&request, NTStatus::ObjectNameNotFound, 1, body).await;
                    continue;
                }
                assert_eq!(reconnect.create_guid, Uuid::from_u128(1));
                let mut response = SMBCreateResponse::new(SMBFileId::new(7, 100), SMBCreateAction::Opened);
                response.oplock_level = SMBOplockLevel::Lease;
                response.contexts = vec![CreateResponseContext::ResponseLeaseV2(ResponseLeaseV2 {
                    lease_key: [1; 16],
                    lease_state: SMBLeaseState::read_handle(),
                    lease_flags: SMBLeaseFlags::empty(),
                    parent_lease_key: [0; 16],
                    epoch: 2,
                })];
                peer.reply(&request, NTStatus::StatusSuccess, 1, SMBBody::CreateResponse(response)).await;
            }
        };
        let (reclaimed, _) = tokio::join!(reclaim_handles(&connection, &session, &handles), server);
        assert_eq!(reclaimed.unwrap(), 1);

        let open = handles.get(kept).unwrap();
        assert_eq!(open.file_id().unwrap(), SMBFileId::new(7, 100));
        assert_eq!(open.snapshot().durable.unwrap().create_guid, Uuid::from_u128(1));
        for lost in [refused, plain] {
            let error = handles.get(lost).unwrap().file_id().unwrap_err();
            assert_eq!(error.status(), Some(NTStatus::InvalidHandle));
        }
    }
}
