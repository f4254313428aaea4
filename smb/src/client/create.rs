//! Create context negotiation (MS-SMB2 2.2.13.2, 3.2.4.3, 3.2.5.5).
//!
//! [`CreatePlan`] turns what the caller wants from an open into a create request
//! the server will accept, remembers what it asked for, and reconciles the
//! reply into a [`CreateOutcome`].

use std::time::Duration;

use derive_builder::Builder;
use uuid::Uuid;

use smb_core::error::SMBError;
use smb_core::logging::{debug, warn};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::negotiate::NegotiatedParameters;
use crate::client::tree::ShareInfo;
use crate::protocol::body::create::{
    CreateRequestContext, CreateResponseContext, DurableHandleReconnectV2, DurableHandleRequestV2, DurableHandleV2Flags,
    QueryOnDiskIDResponse, RequestLease, RequestLeaseV2, SMBCreateAction, SMBCreateDisposition, SMBCreateName,
    SMBCreateOptions, SMBCreateRequest, SMBCreateResponse, SMBFileAttributes, SMBFileId, SMBLeaseFlags, SMBLeaseKey,
    SMBLeaseState, SMBOplockLevel, SMBShareAccess,
};
use crate::protocol::body::{Capabilities, FileTime, SMBAccessMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableGrant {
    pub version: ContextVersion,
    pub persistent: bool,
    /// Milliseconds the server keeps the open after a disconnect; 0 for v1.
    pub timeout: u32,
    pub create_guid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    pub version: ContextVersion,
    pub key: SMBLeaseKey,
    pub parent_key: Option<SMBLeaseKey>,
    pub state: SMBLeaseState,
    pub epoch: u16,
}

/// Everything needed to ask the server for a durable or leased open back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimState {
    pub file_id: SMBFileId,
    pub durable: Option<DurableGrant>,
    pub lease: Option<LeaseGrant>,
}

/// What the caller wants from an open.
///
/// ```
/// use smb_client::client::OpenOptionsBuilder;
/// use smb_client::protocol::body::create::{SMBCreateDisposition, SMBLeaseState};
///
/// let options = OpenOptionsBuilder::default()
///     .path("docs\\report.txt")
///     .disposition(SMBCreateDisposition::OpenIf)
///     .durable(true)
///     .lease(Some(SMBLeaseState::full()))
///     .build()
///     .unwrap();
/// assert!(options.durable);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into), default)]
pub struct OpenOptions {
    pub path: String,
    /// Open by on-disk file id instead of `path`.
    pub file_id: Option<u64>,
    pub desired_access: SMBAccessMask,
    pub disposition: SMBCreateDisposition,
    pub share_access: SMBShareAccess,
    pub file_attributes: SMBFileAttributes,
    pub create_options: SMBCreateOptions,
    pub durable: bool,
    pub persistent: bool,
    pub lease: Option<SMBLeaseState>,
    pub parent_lease_key: Option<SMBLeaseKey>,
    pub query_maximal_access: bool,
    pub query_on_disk_id: bool,
    /// Opens the snapshot taken at this time.
    pub timewarp: Option<FileTime>,
    pub allocation_size: Option<u64>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            file_id: None,
            desired_access: SMBAccessMask::generic_read(),
            disposition: SMBCreateDisposition::Open,
            share_access: SMBShareAccess::READ | SMBShareAccess::WRITE,
            file_attributes: SMBFileAttributes::empty(),
            create_options: SMBCreateOptions::empty(),
            durable: false,
            persistent: false,
            lease: None,
            parent_lease_key: None,
            query_maximal_access: false,
            query_on_disk_id: false,
            timewarp: None,
            allocation_size: None,
        }
    }
}

impl OpenOptions {
    pub fn builder() -> OpenOptionsBuilder {
        OpenOptionsBuilder::default()
    }

    pub fn create_name(&self) -> SMBCreateName {
        match self.file_id {
            Some(id) => SMBCreateName::FileId(id),
            None => SMBCreateName::Path(self.path.clone()),
        }
    }

    /// The same open without any caching, used after the server refused a lease.
    pub fn without_caching(&self) -> Self {
        Self {
            durable: false,
            persistent: false,
            lease: None,
            parent_lease_key: None,
            ..self.clone()
        }
    }
}

/// What the server and share allow a create to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateCapabilities {
    pub leasing: bool,
    pub directory_leasing: bool,
    pub persistent_handles: bool,
    pub v2_contexts: bool,
}

impl CreateCapabilities {
    /// `v2_unsupported` is set once a server rejected the v2 context forms.
    pub fn new(parameters: &NegotiatedParameters, share: &ShareInfo, v2_unsupported: bool) -> Self {
        Self {
            leasing: parameters.dialect.supports_multi_credit() && parameters.server_supports(Capabilities::LEASING),
            directory_leasing: parameters.dialect.is_smb3() && parameters.server_supports(Capabilities::DIRECTORY_LEASING),
            persistent_handles: parameters.dialect.is_smb3()
                && parameters.server_supports(Capabilities::PERSISTENT_HANDLES)
                && share.is_continuously_available(),
            v2_contexts: parameters.dialect.supports_v2_contexts() && !v2_unsupported,
        }
    }
}

/// The contexts a create carried, for matching the reply against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedContexts {
    pub durable: Option<DurableGrant>,
    pub lease: Option<LeaseGrant>,
    pub maximal_access: bool,
    pub on_disk_id: bool,
    pub reclaim: bool,
}

impl RequestedContexts {
    pub fn uses_v2(&self) -> bool {
        self.durable.as_ref().is_some_and(|d| d.version == ContextVersion::V2)
            || self.lease.as_ref().is_some_and(|l| l.version == ContextVersion::V2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub file_id: SMBFileId,
    pub action: SMBCreateAction,
    pub oplock_level: SMBOplockLevel,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: SMBFileAttributes,
    pub durable: Option<DurableGrant>,
    pub lease: Option<LeaseGrant>,
    pub maximal_access: SMBAccessMask,
    pub on_disk_id: Option<QueryOnDiskIDResponse>,
    /// The server answered a lease request with a classic oplock; close and reopen uncached.
    pub reopen_without_lease: bool,
}

#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub request: SMBCreateRequest,
    pub requested: RequestedContexts,
}

fn lease_context(lease: &LeaseGrant) -> CreateRequestContext {
    match lease.version {
        ContextVersion::V1 => CreateRequestContext::RequestLease(RequestLease {
            lease_key: lease.key,
            lease_state: lease.state,
        }),
        ContextVersion::V2 => CreateRequestContext::RequestLeaseV2(RequestLeaseV2 {
            lease_key: lease.key,
            lease_state: lease.state,
            lease_flags: if lease.parent_key.is_some() { SMBLeaseFlags::PARENT_LEASE_KEY_SET } else { SMBLeaseFlags::empty() },
            parent_lease_key: lease.parent_key.unwrap_or_default(),
            epoch: lease.epoch,
        }),
    }
}

impl CreatePlan {
    /// A fresh open. `create_guid` and `lease_key` are only used if the matching context is sent.
    pub fn open(
        options: &OpenOptions,
        capabilities: &CreateCapabilities,
        create_guid: Uuid,
        lease_key: SMBLeaseKey,
        durable_timeout: Duration,
    ) -> SMBResult<Self> {
        let mut request = SMBCreateRequest::new(options.create_name(), options.desired_access, options.disposition);
        request.share_access = options.share_access;
        request.file_attributes = options.file_attributes;
        request.create_options |= options.create_options;
        let mut requested = RequestedContexts::default();
        let version = if capabilities.v2_contexts { ContextVersion::V2 } else { ContextVersion::V1 };
        let directory = options.create_options.contains(SMBCreateOptions::DIRECTORY_FILE);

        let persistent = options.persistent && capabilities.persistent_handles && version == ContextVersion::V2;
        if options.persistent && !persistent {
            debug!("persistent handle not available, falling back to durable");
        }
        let durable = options.durable || options.persistent;
        let can_lease = capabilities.leasing && (!directory || capabilities.directory_leasing);

        let mut lease_state = options.lease.filter(|_| can_lease);
        if durable && !persistent && lease_state.is_none() && can_lease {
            lease_state = Some(SMBLeaseState::read_handle());
        }
        if persistent {
            lease_state = None;
        }
        if let Some(state) = lease_state {
            let lease = LeaseGrant {
                version,
                key: lease_key,
                parent_key: options.parent_lease_key.filter(|_| version == ContextVersion::V2),
                state,
                epoch: 0,
            };
            request.oplock_level = SMBOplockLevel::Lease;
            request.contexts.push(lease_context(&lease));
            requested.lease = Some(lease);
        } else if durable && !persistent {
            // Durable opens without a lease need a batch oplock.
            request.oplock_level = SMBOplockLevel::Batch;
        }

        if durable {
            let grant = match version {
                ContextVersion::V2 => {
                    let timeout = u32::try_from(durable_timeout.as_millis()).unwrap_or(u32::MAX);
                    let flags = if persistent { DurableHandleV2Flags::PERSISTENT } else { DurableHandleV2Flags::empty() };
                    request.contexts.push(CreateRequestContext::DurableHandleRequestV2(DurableHandleRequestV2 {
                        timeout,
                        flags,
                        create_guid,
                    }));
                    DurableGrant { version, persistent, timeout, create_guid }
                }
                ContextVersion::V1 => {
                    request.contexts.push(CreateRequestContext::DurableHandleRequest);
                    DurableGrant { version, persistent: false, timeout: 0, create_guid: Uuid::nil() }
                }
            };
            requested.durable = Some(grant);
        }

        if options.query_maximal_access {
            request.contexts.push(CreateRequestContext::QueryMaximalAccessRequest(None));
            requested.maximal_access = true;
        }
        if options.query_on_disk_id {
            request.contexts.push(CreateRequestContext::QueryOnDiskID);
            requested.on_disk_id = true;
        }
        if let Some(timestamp) = options.timewarp {
            request.contexts.push(CreateRequestContext::TimewarpToken(timestamp));
        }
        if let Some(size) = options.allocation_size {
            request.contexts.push(CreateRequestContext::AllocationSize(size));
        }
        Ok(Self { request, requested })
    }

    /// Reconnects a durable or leased open with the version that was granted.
    pub fn reclaim(options: &OpenOptions, state: &ReclaimState) -> SMBResult<Self> {
        let mut request = SMBCreateRequest::new(options.create_name(), options.desired_access, SMBCreateDisposition::Open);
        request.share_access = options.share_access;
        request.create_options |= options.create_options & !SMBCreateOptions::DELETE_ON_CLOSE;
        let mut requested = RequestedContexts { reclaim: true, ..Default::default() };

        let persistent = state.durable.as_ref().is_some_and(|d| d.persistent);
        if let Some(lease) = state.lease.as_ref().filter(|_| !persistent) {
            request.oplock_level = SMBOplockLevel::Lease;
            request.contexts.push(lease_context(lease));
            requested.lease = Some(lease.clone());
        } else if state.durable.is_some() && !persistent {
            request.oplock_level = SMBOplockLevel::Batch;
        }
        match &state.durable {
            Some(durable) if durable.version == ContextVersion::V2 => {
                request.contexts.push(CreateRequestContext::DurableHandleReconnectV2(DurableHandleReconnectV2 {
                    file_id: state.file_id,
                    create_guid: durable.create_guid,
                    flags: if durable.persistent { DurableHandleV2Flags::PERSISTENT } else { DurableHandleV2Flags::empty() },
                }));
                requested.durable = Some(durable.clone());
            }
            Some(durable) => {
                request.contexts.push(CreateRequestContext::DurableHandleReconnect(state.file_id));
                requested.durable = Some(durable.clone());
            }
            None if state.lease.is_none() => {
                return Err(SMBError::precondition_failed("Open holds neither a durable handle nor a lease"));
            }
            None => {}
        }
        Ok(Self { request, requested })
    }

    /// Matches the returned contexts to what was asked for.
    pub fn reconcile(&self, response: SMBCreateResponse) -> SMBResult<CreateOutcome> {
        let requested = &self.requested;
        let mut durable = None;
        let mut lease = None;
        let mut maximal_access = None;
        let mut on_disk_id = None;

        for context in response.contexts {
            match context {
                CreateResponseContext::DurableHandleResponse => {
                    durable = requested.durable.clone();
                }
                CreateResponseContext::DurableHandleResponseV2(granted) => {
                    let create_guid = requested.durable.as_ref().map(|d| d.create_guid).unwrap_or_default();
                    durable = Some(DurableGrant {
                        version: ContextVersion::V2,
                        persistent: granted.flags.contains(DurableHandleV2Flags::PERSISTENT),
                        timeout: granted.timeout,
                        create_guid,
                    });
                }
                CreateResponseContext::QueryMaximalAccessResponse(mxac) => {
                    maximal_access = Some(if mxac.status == NTStatus::StatusSuccess {
                        mxac.maximal_access
                    } else {
                        debug!(status = ?mxac.status, "maximal access query failed, assuming full access");
                        SMBAccessMask::permissive()
                    });
                }
                CreateResponseContext::QueryOnDiskIDResponse(id) => on_disk_id = Some(id),
                CreateResponseContext::ResponseLease(granted) => {
                    lease = Some(self.accept_lease(ContextVersion::V1, granted.lease_key, granted.lease_state, None, 0)?);
                }
                CreateResponseContext::ResponseLeaseV2(granted) => {
                    let parent = granted.lease_flags
                        .contains(SMBLeaseFlags::PARENT_LEASE_KEY_SET)
                        .then_some(granted.parent_lease_key);
                    lease = Some(self.accept_lease(ContextVersion::V2, granted.lease_key, granted.lease_state, parent, granted.epoch)?);
                }
            }
        }

        // A reconnect need not repeat the durable context; the grant carries over.
        if requested.reclaim && durable.is_none() {
            durable = requested.durable.clone();
        }
        if response.oplock_level == SMBOplockLevel::Lease && lease.is_none() && requested.lease.is_some() {
            return Err(SMBError::parse_error("Lease granted without a lease context"));
        }
        let reopen_without_lease = requested.lease.is_some()
            && lease.is_none()
            && matches!(response.oplock_level, SMBOplockLevel::II | SMBOplockLevel::Exclusive | SMBOplockLevel::Batch);
        if reopen_without_lease {
            warn!(oplock = ?response.oplock_level, "server granted an oplock instead of the requested lease");
        }

        Ok(CreateOutcome {
            file_id: response.file_id,
            action: response.action,
            oplock_level: response.oplock_level,
            creation_time: response.creation_time,
            last_write_time: response.last_write_time,
            end_of_file: response.end_of_file,
            allocation_size: response.allocation_size,
            file_attributes: response.file_attributes,
            durable,
            lease,
            maximal_access: maximal_access.unwrap_or_else(SMBAccessMask::permissive),
            on_disk_id: on_disk_id.filter(|_| requested.on_disk_id),
            reopen_without_lease,
        })
    }

    fn accept_lease(
        &self,
        version: ContextVersion,
        key: SMBLeaseKey,
        state: SMBLeaseState,
        parent_key: Option<SMBLeaseKey>,
        epoch: u16,
    ) -> SMBResult<LeaseGrant> {
        let Some(requested) = &self.requested.lease else {
            return Err(SMBError::parse_error("Lease context in reply to a create without one"));
        };
        if requested.key != key {
            return Err(SMBError::parse_error("Lease key in reply does not match the request"));
        }
        if version == ContextVersion::V2 && requested.parent_key != parent_key {
            warn!(requested = ?requested.parent_key, granted = ?parent_key, "parent lease key mismatch ignored");
        }
        Ok(LeaseGrant {
            version,
            key,
            parent_key: requested.parent_key,
            state,
            epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::client::test_support::parameters;
    use crate::protocol::body::create::{DurableHandleResponseV2, QueryMaximalAccessResponse, ResponseLease, ResponseLeaseV2};
    use crate::protocol::body::tree_connect::{SMBShareFlags, SMBShareType, SMBTreeCapabilities};
    use crate::protocol::body::SMBDialect;

    use super::*;

    const KEY: SMBLeaseKey = [0x11; 16];

    fn share(continuously_available: bool) -> ShareInfo {
        ShareInfo {
            tree_id: 1,
            share_type: SMBShareType::Disk,
            share_flags: SMBShareFlags::empty(),
            capabilities: if continuously_available { SMBTreeCapabilities::CONTINUOUS_AVAILABILITY } else { SMBTreeCapabilities::empty() },
            maximal_access: SMBAccessMask::permissive(),
        }
    }

    fn capabilities(dialect: SMBDialect, v2_unsupported: bool) -> CreateCapabilities {
        let mut negotiated = parameters(dialect);
        negotiated.server_capabilities |= Capabilities::PERSISTENT_HANDLES;
        CreateCapabilities::new(&negotiated, &share(true), v2_unsupported)
    }

    fn response(contexts: Vec<CreateResponseContext>, oplock: SMBOplockLevel) -> SMBCreateResponse {
        let mut response = SMBCreateResponse::new(SMBFileId::new(1, 2), SMBCreateAction::Opened);
        response.oplock_level = oplock;
        response.contexts = contexts;
        response
    }

    fn tags(plan: &CreatePlan) -> Vec<&'static [u8]> {
        plan.request.contexts.iter().map(|c| c.tag()).collect()
    }

    /// MS-SMB2 3.2.4.3.5: a non-persistent durable open travels with a lease.
    #[test]
    fn durable_open_attaches_a_lease() {
        let options = OpenOptions { path: "a".into(), durable: true, ..Default::default() };
        let guid = Uuid::new_v4();
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V3_0_2, false), guid, KEY, Duration::from_secs(60)).unwrap();
        assert_eq!(tags(&plan), vec![&b"RqLs"[..], &b"DH2Q"[..]]);
        assert_eq!(plan.request.oplock_level, SMBOplockLevel::Lease);
        let durable = plan.requested.durable.as_ref().unwrap();
        assert_eq!(durable.create_guid, guid);
        assert_eq!(durable.timeout, 60_000);
        assert_eq!(plan.requested.lease.as_ref().unwrap().state, SMBLeaseState::read_handle());
    }

    #[test]
    fn persistent_open_omits_the_lease() {
        let options = OpenOptions {
            path: "a".into(),
            persistent: true,
            lease: Some(SMBLeaseState::full()),
            ..Default::default()
        };
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V3_0_2, false), Uuid::new_v4(), KEY, Duration::ZERO).unwrap();
        assert_eq!(tags(&plan), vec![&b"DH2Q"[..]]);
        assert!(plan.requested.durable.as_ref().unwrap().persistent);
        assert!(plan.requested.lease.is_none());
    }

    #[test]
    fn v1_forms_below_smb3_or_after_rejection() {
        let options = OpenOptions { path: "a".into(), durable: true, lease: Some(SMBLeaseState::full()), ..Default::default() };
        for caps in [capabilities(SMBDialect::V2_1_0, false), capabilities(SMBDialect::V3_1_1, true)] {
            let plan = CreatePlan::open(&options, &caps, Uuid::new_v4(), KEY, Duration::ZERO).unwrap();
            assert_eq!(tags(&plan), vec![&b"RqLs"[..], &b"DHnQ"[..]]);
            assert!(matches!(plan.request.contexts[0], CreateRequestContext::RequestLease(_)));
            assert!(!plan.requested.uses_v2());
        }
    }

    #[test]
    fn resolve_by_id_uses_the_file_id_as_name() {
        let options = OpenOptions { file_id: Some(0xABCD), query_on_disk_id: true, ..Default::default() };
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V3_0_0, false), Uuid::new_v4(), KEY, Duration::ZERO).unwrap();
        assert_eq!(plan.request.name, SMBCreateName::FileId(0xABCD));
        assert!(plan.request.create_options.contains(SMBCreateOptions::OPEN_BY_FILE_ID));
        assert_eq!(tags(&plan), vec![&b"QFid"[..]]);
    }

    #[test]
    fn reclaim_repeats_the_granted_version_and_guid() {
        let guid = Uuid::new_v4();
        let state = ReclaimState {
            file_id: SMBFileId::new(7, 8),
            durable: Some(DurableGrant { version: ContextVersion::V2, persistent: false, timeout: 1000, create_guid: guid }),
            lease: Some(LeaseGrant { version: ContextVersion::V1, key: KEY, parent_key: None, state: SMBLeaseState::read_handle(), epoch: 0 }),
        };
        let options = OpenOptions { path: "a".into(), ..Default::default() };
        let plan = CreatePlan::reclaim(&options, &state).unwrap();
        let CreateRequestContext::DurableHandleReconnectV2(reconnect) = &plan.request.contexts[1] else { panic!() };
        assert_eq!(reconnect.create_guid, guid);
        assert_eq!(reconnect.file_id, SMBFileId::new(7, 8));
        assert!(matches!(plan.request.contexts[0], CreateRequestContext::RequestLease(_)));

        // The server does not repeat the durable context on reconnect.
        let outcome = plan.reconcile(response(
            vec![CreateResponseContext::ResponseLease(ResponseLease { lease_key: KEY, lease_state: SMBLeaseState::read_handle(), lease_flags: SMBLeaseFlags::empty() })],
            SMBOplockLevel::Lease,
        )).unwrap();
        assert_eq!(outcome.durable, state.durable);
        assert_eq!(outcome.file_id, SMBFileId::new(1, 2));
    }

    #[test]
    fn lease_key_mismatch_is_fatal_but_parent_mismatch_is_not() {
        let options = OpenOptions {
            path: "a".into(),
            lease: Some(SMBLeaseState::full()),
            parent_lease_key: Some([0x22; 16]),
            ..Default::default()
        };
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V3_1_1, false), Uuid::new_v4(), KEY, Duration::ZERO).unwrap();
        let granted = |key: SMBLeaseKey, parent: SMBLeaseKey| CreateResponseContext::ResponseLeaseV2(ResponseLeaseV2 {
            lease_key: key,
            lease_state: SMBLeaseState::read_handle(),
            lease_flags: SMBLeaseFlags::PARENT_LEASE_KEY_SET,
            parent_lease_key: parent,
            epoch: 1,
        });
        assert!(plan.reconcile(response(vec![granted([0x99; 16], [0x22; 16])], SMBOplockLevel::Lease)).is_err());
        let outcome = plan.reconcile(response(vec![granted(KEY, [0x33; 16])], SMBOplockLevel::Lease)).unwrap();
        let lease = outcome.lease.unwrap();
        assert_eq!(lease.parent_key, Some([0x22; 16]));
        assert_eq!(lease.epoch, 1);
        assert_eq!(lease.state, SMBLeaseState::read_handle());
    }

    #[test]
    fn failed_or_missing_maximal_access_is_permissive() {
        let options = OpenOptions { path: "a".into(), query_maximal_access: true, ..Default::default() };
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V2_1_0, false), Uuid::new_v4(), KEY, Duration::ZERO).unwrap();
        let failed = CreateResponseContext::QueryMaximalAccessResponse(QueryMaximalAccessResponse {
            status: NTStatus::AccessDenied,
            maximal_access: SMBAccessMask::empty(),
        });
        let outcome = plan.reconcile(response(vec![failed], SMBOplockLevel::None)).unwrap();
        assert_eq!(outcome.maximal_access, SMBAccessMask::permissive());
        let outcome = plan.reconcile(response(vec![], SMBOplockLevel::None)).unwrap();
        assert_eq!(outcome.maximal_access, SMBAccessMask::permissive());
    }

    #[test]
    fn classic_oplock_in_place_of_lease_asks_for_reopen() {
        let options = OpenOptions { path: "a".into(), lease: Some(SMBLeaseState::full()), ..Default::default() };
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V3_0_0, false), Uuid::new_v4(), KEY, Duration::ZERO).unwrap();
        let outcome = plan.reconcile(response(vec![], SMBOplockLevel::Batch)).unwrap();
        assert!(outcome.reopen_without_lease);
        let outcome = plan.reconcile(response(vec![], SMBOplockLevel::None)).unwrap();
        assert!(!outcome.reopen_without_lease);
        assert!(plan.reconcile(response(vec![], SMBOplockLevel::Lease)).is_err());
    }

    #[test]
    fn durable_v2_grant_keeps_the_create_guid() {
        let guid = Uuid::new_v4();
        let options = OpenOptions { path: "a".into(), durable: true, ..Default::default() };
        let plan = CreatePlan::open(&options, &capabilities(SMBDialect::V3_0_2, false), guid, KEY, Duration::ZERO).unwrap();
        let outcome = plan.reconcile(response(
            vec![
                CreateResponseContext::ResponseLeaseV2(ResponseLeaseV2 {
                    lease_key: KEY,
                    lease_state: SMBLeaseState::read_handle(),
                    lease_flags: SMBLeaseFlags::empty(),
                    parent_lease_key: [0; 16],
                    epoch: 1,
                }),
                CreateResponseContext::DurableHandleResponseV2(DurableHandleResponseV2 { timeout: 120_000, flags: DurableHandleV2Flags::empty() }),
            ],
            SMBOplockLevel::Lease,
        )).unwrap();
        let durable = outcome.durable.unwrap();
        assert_eq!(durable.create_guid, guid);
        assert_eq!(durable.timeout, 120_000);
        assert!(!durable.persistent);
    }
}
