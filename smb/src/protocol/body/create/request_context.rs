use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::body::create::context::CreateContextWrapper;
use crate::protocol::body::create::file_id::SMBFileId;
use crate::protocol::body::create::lease::{SMBLeaseFlags, SMBLeaseKey, SMBLeaseState};
use crate::protocol::body::filetime::FileTime;
use crate::util::flags_helper::{impl_smb_byte_size_for_bitflag, impl_smb_from_bytes_for_bitflag, impl_smb_to_bytes_for_bitflag};

pub const DURABLE_HANDLE_REQUEST_TAG: &[u8] = b"DHnQ";
pub const DURABLE_HANDLE_RECONNECT_TAG: &[u8] = b"DHnC";
pub const ALLOCATION_SIZE_TAG: &[u8] = b"AlSi";
pub const QUERY_MAXIMAL_ACCESS_REQUEST_TAG: &[u8] = b"MxAc";
pub const TIMEWARP_TOKEN_TAG: &[u8] = b"TWrp";
pub const QUERY_ON_DISK_ID_TAG: &[u8] = b"QFid";
// Same tag for v1 and v2, told apart by data length
pub const REQUEST_LEASE_TAG: &[u8] = b"RqLs";
pub const DURABLE_HANDLE_REQUEST_V2_TAG: &[u8] = b"DH2Q";
pub const DURABLE_HANDLE_RECONNECT_V2_TAG: &[u8] = b"DH2C";

pub const LEASE_V1_SIZE: usize = 32;
pub const LEASE_V2_SIZE: usize = 52;

bitflags! {
    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone, Copy, Default)]
    pub struct DurableHandleV2Flags: u32 {
        const PERSISTENT = 0x2;
    }
}

impl_smb_byte_size_for_bitflag! { DurableHandleV2Flags }
impl_smb_from_bytes_for_bitflag! { DurableHandleV2Flags }
impl_smb_to_bytes_for_bitflag! { DurableHandleV2Flags }

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub enum CreateRequestContext {
    DurableHandleRequest,
    DurableHandleReconnect(SMBFileId),
    DurableHandleRequestV2(DurableHandleRequestV2),
    DurableHandleReconnectV2(DurableHandleReconnectV2),
    AllocationSize(u64),
    QueryMaximalAccessRequest(Option<FileTime>),
    TimewarpToken(FileTime),
    QueryOnDiskID,
    RequestLease(RequestLease),
    RequestLeaseV2(RequestLeaseV2),
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct DurableHandleRequestV2 {
    pub timeout: u32,
    pub flags: DurableHandleV2Flags,
    pub create_guid: Uuid,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct DurableHandleReconnectV2 {
    pub file_id: SMBFileId,
    pub create_guid: Uuid,
    pub flags: DurableHandleV2Flags,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct RequestLease {
    pub lease_key: SMBLeaseKey,
    pub lease_state: SMBLeaseState,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct RequestLeaseV2 {
    pub lease_key: SMBLeaseKey,
    pub lease_state: SMBLeaseState,
    pub lease_flags: SMBLeaseFlags,
    pub parent_lease_key: SMBLeaseKey,
    pub epoch: u16,
}

impl CreateRequestContext {
    pub fn tag(&self) -> &'static [u8] {
        match self {
            CreateRequestContext::DurableHandleRequest => DURABLE_HANDLE_REQUEST_TAG,
            CreateRequestContext::DurableHandleReconnect(_) => DURABLE_HANDLE_RECONNECT_TAG,
            CreateRequestContext::DurableHandleRequestV2(_) => DURABLE_HANDLE_REQUEST_V2_TAG,
            CreateRequestContext::DurableHandleReconnectV2(_) => DURABLE_HANDLE_RECONNECT_V2_TAG,
            CreateRequestContext::AllocationSize(_) => ALLOCATION_SIZE_TAG,
            CreateRequestContext::QueryMaximalAccessRequest(_) => QUERY_MAXIMAL_ACCESS_REQUEST_TAG,
            CreateRequestContext::TimewarpToken(_) => TIMEWARP_TOKEN_TAG,
            CreateRequestContext::QueryOnDiskID => QUERY_ON_DISK_ID_TAG,
            CreateRequestContext::RequestLease(_) | CreateRequestContext::RequestLeaseV2(_) => REQUEST_LEASE_TAG,
        }
    }

    pub fn is_lease(&self) -> bool {
        matches!(self, CreateRequestContext::RequestLease(_) | CreateRequestContext::RequestLeaseV2(_))
    }

    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            CreateRequestContext::DurableHandleRequest
                | CreateRequestContext::DurableHandleReconnect(_)
                | CreateRequestContext::DurableHandleRequestV2(_)
                | CreateRequestContext::DurableHandleReconnectV2(_)
        )
    }

    fn data(&self) -> Vec<u8> {
        match self {
            CreateRequestContext::DurableHandleRequest => vec![0; 16],
            CreateRequestContext::DurableHandleReconnect(file_id) => [
                &file_id.persistent.to_le_bytes()[..],
                &file_id.volatile.to_le_bytes(),
            ].concat(),
            CreateRequestContext::DurableHandleRequestV2(x) => [
                &x.timeout.to_le_bytes()[..],
                &x.flags.bits().to_le_bytes(),
                &[0; 8],
                &x.create_guid.to_bytes_le(),
            ].concat(),
            CreateRequestContext::DurableHandleReconnectV2(x) => [
                &x.file_id.persistent.to_le_bytes()[..],
                &x.file_id.volatile.to_le_bytes(),
                &x.create_guid.to_bytes_le(),
                &x.flags.bits().to_le_bytes(),
            ].concat(),
            CreateRequestContext::AllocationSize(size) => size.to_le_bytes().to_vec(),
            CreateRequestContext::QueryMaximalAccessRequest(timestamp) => timestamp
                .map(|t| t.raw().to_le_bytes().to_vec())
                .unwrap_or_default(),
            CreateRequestContext::TimewarpToken(timestamp) => timestamp.raw().to_le_bytes().to_vec(),
            CreateRequestContext::QueryOnDiskID => Vec::new(),
            CreateRequestContext::RequestLease(x) => [
                &x.lease_key[..],
                &x.lease_state.bits().to_le_bytes(),
                &[0; 12],
            ].concat(),
            CreateRequestContext::RequestLeaseV2(x) => [
                &x.lease_key[..],
                &x.lease_state.bits().to_le_bytes(),
                &x.lease_flags.bits().to_le_bytes(),
                &[0; 8],
                &x.parent_lease_key,
                &x.epoch.to_le_bytes(),
                &[0; 2],
            ].concat(),
        }
    }

    pub fn to_wrapper(&self) -> CreateContextWrapper {
        CreateContextWrapper::new(self.tag(), self.data())
    }

    pub fn from_wrapper(wrapper: &CreateContextWrapper) -> SMBResult<Self> {
        let mut cursor = SMBCursor::new(&wrapper.data);
        let context = match wrapper.name.as_slice() {
            DURABLE_HANDLE_REQUEST_TAG => Self::DurableHandleRequest,
            DURABLE_HANDLE_RECONNECT_TAG => Self::DurableHandleReconnect(SMBFileId::new(cursor.u64()?, cursor.u64()?)),
            DURABLE_HANDLE_REQUEST_V2_TAG => {
                let timeout = cursor.u32()?;
                let flags = DurableHandleV2Flags::from_bits_truncate(cursor.u32()?);
                cursor.skip(8)?;
                Self::DurableHandleRequestV2(DurableHandleRequestV2 { timeout, flags, create_guid: cursor.guid()? })
            }
            DURABLE_HANDLE_RECONNECT_V2_TAG => {
                let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
                let create_guid = cursor.guid()?;
                let flags = DurableHandleV2Flags::from_bits_truncate(cursor.u32()?);
                Self::DurableHandleReconnectV2(DurableHandleReconnectV2 { file_id, create_guid, flags })
            }
            ALLOCATION_SIZE_TAG => Self::AllocationSize(cursor.u64()?),
            QUERY_MAXIMAL_ACCESS_REQUEST_TAG if wrapper.data.is_empty() => Self::QueryMaximalAccessRequest(None),
            QUERY_MAXIMAL_ACCESS_REQUEST_TAG => Self::QueryMaximalAccessRequest(Some(FileTime::from_raw(cursor.u64()?))),
            TIMEWARP_TOKEN_TAG => Self::TimewarpToken(FileTime::from_raw(cursor.u64()?)),
            QUERY_ON_DISK_ID_TAG => Self::QueryOnDiskID,
            REQUEST_LEASE_TAG if wrapper.data.len() == LEASE_V1_SIZE => {
                let lease_key = cursor.array::<16>()?;
                let lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
                Self::RequestLease(RequestLease { lease_key, lease_state })
            }
            REQUEST_LEASE_TAG if wrapper.data.len() == LEASE_V2_SIZE => {
                let lease_key = cursor.array::<16>()?;
                let lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
                let lease_flags = SMBLeaseFlags::from_bits_truncate(cursor.u32()?);
                cursor.skip(8)?;
                let parent_lease_key = cursor.array::<16>()?;
                let epoch = cursor.u16()?;
                Self::RequestLeaseV2(RequestLeaseV2 { lease_key, lease_state, lease_flags, parent_lease_key, epoch })
            }
            _ => return Err(SMBError::parse_error("Invalid context tag")),
        };
        Ok(context)
    }
}
