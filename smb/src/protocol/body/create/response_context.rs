use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::protocol::body::access_mask::SMBAccessMask;
use crate::protocol::body::create::context::CreateContextWrapper;
use crate::protocol::body::create::lease::{SMBLeaseFlags, SMBLeaseKey, SMBLeaseState};
use crate::protocol::body::create::request_context::{DurableHandleV2Flags, DURABLE_HANDLE_REQUEST_TAG, DURABLE_HANDLE_REQUEST_V2_TAG, LEASE_V1_SIZE, LEASE_V2_SIZE, QUERY_MAXIMAL_ACCESS_REQUEST_TAG, QUERY_ON_DISK_ID_TAG, REQUEST_LEASE_TAG};

const DURABLE_HANDLE_RESPONSE_TAG: &[u8] = DURABLE_HANDLE_REQUEST_TAG;
const QUERY_MAXIMAL_ACCESS_RESPONSE_TAG: &[u8] = QUERY_MAXIMAL_ACCESS_REQUEST_TAG;
const QUERY_ON_DISK_ID_RESPONSE_TAG: &[u8] = QUERY_ON_DISK_ID_TAG;
const RESPONSE_LEASE_TAG: &[u8] = REQUEST_LEASE_TAG;
const DURABLE_HANDLE_RESPONSE_V2_TAG: &[u8] = DURABLE_HANDLE_REQUEST_V2_TAG;

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub enum CreateResponseContext {
    DurableHandleResponse,
    DurableHandleResponseV2(DurableHandleResponseV2),
    QueryMaximalAccessResponse(QueryMaximalAccessResponse),
    QueryOnDiskIDResponse(QueryOnDiskIDResponse),
    ResponseLease(ResponseLease),
    ResponseLeaseV2(ResponseLeaseV2),
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct DurableHandleResponseV2 {
    pub timeout: u32,
    pub flags: DurableHandleV2Flags,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct QueryMaximalAccessResponse {
    pub status: NTStatus,
    pub maximal_access: SMBAccessMask,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct QueryOnDiskIDResponse {
    pub disk_file_id: u64,
    pub volume_id: u64,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct ResponseLease {
    pub lease_key: SMBLeaseKey,
    pub lease_state: SMBLeaseState,
    pub lease_flags: SMBLeaseFlags,
}

#[derive(Debug, Eq, PartialEq, Serialize, Deserialize, Clone)]
pub struct ResponseLeaseV2 {
    pub lease_key: SMBLeaseKey,
    pub lease_state: SMBLeaseState,
    pub lease_flags: SMBLeaseFlags,
    pub parent_lease_key: SMBLeaseKey,
    pub epoch: u16,
}

impl CreateResponseContext {
    pub fn tag(&self) -> &'static [u8] {
        match self {
            CreateResponseContext::DurableHandleResponse => DURABLE_HANDLE_RESPONSE_TAG,
            CreateResponseContext::DurableHandleResponseV2(_) => DURABLE_HANDLE_RESPONSE_V2_TAG,
            CreateResponseContext::QueryMaximalAccessResponse(_) => QUERY_MAXIMAL_ACCESS_RESPONSE_TAG,
            CreateResponseContext::QueryOnDiskIDResponse(_) => QUERY_ON_DISK_ID_RESPONSE_TAG,
            CreateResponseContext::ResponseLease(_) | CreateResponseContext::ResponseLeaseV2(_) => RESPONSE_LEASE_TAG,
        }
    }

    fn data(&self) -> Vec<u8> {
        match self {
            CreateResponseContext::DurableHandleResponse => vec![0; 8],
            CreateResponseContext::DurableHandleResponseV2(x) => [
                x.timeout.to_le_bytes(),
                x.flags.bits().to_le_bytes(),
            ].concat(),
            CreateResponseContext::QueryMaximalAccessResponse(x) => [
                u32::from(x.status).to_le_bytes(),
                x.maximal_access.bits().to_le_bytes(),
            ].concat(),
            CreateResponseContext::QueryOnDiskIDResponse(x) => [
                &x.disk_file_id.to_le_bytes()[..],
                &x.volume_id.to_le_bytes(),
                &[0; 16],
            ].concat(),
            CreateResponseContext::ResponseLease(x) => [
                &x.lease_key[..],
                &x.lease_state.bits().to_le_bytes(),
                &x.lease_flags.bits().to_le_bytes(),
                &[0; 8],
            ].concat(),
            CreateResponseContext::ResponseLeaseV2(x) => [
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

    /// Interprets a returned context; an unrecognized tag is a decode fault.
    pub fn from_wrapper(wrapper: &CreateContextWrapper) -> SMBResult<Self> {
        let mut cursor = SMBCursor::new(&wrapper.data);
        let context = match wrapper.name.as_slice() {
            DURABLE_HANDLE_RESPONSE_TAG => Self::DurableHandleResponse,
            DURABLE_HANDLE_RESPONSE_V2_TAG => {
                let timeout = cursor.u32()?;
                let flags = DurableHandleV2Flags::from_bits_truncate(cursor.u32()?);
                Self::DurableHandleResponseV2(DurableHandleResponseV2 { timeout, flags })
            }
            QUERY_MAXIMAL_ACCESS_RESPONSE_TAG => {
                let status = NTStatus::from(cursor.u32()?);
                let maximal_access = SMBAccessMask::from_bits_truncate(cursor.u32()?);
                Self::QueryMaximalAccessResponse(QueryMaximalAccessResponse { status, maximal_access })
            }
            QUERY_ON_DISK_ID_RESPONSE_TAG => {
                let disk_file_id = cursor.u64()?;
                let volume_id = cursor.u64()?;
                Self::QueryOnDiskIDResponse(QueryOnDiskIDResponse { disk_file_id, volume_id })
            }
            RESPONSE_LEASE_TAG if wrapper.data.len() == LEASE_V1_SIZE => {
                let lease_key = cursor.array::<16>()?;
                let lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
                let lease_flags = SMBLeaseFlags::from_bits_truncate(cursor.u32()?);
                Self::ResponseLease(ResponseLease { lease_key, lease_state, lease_flags })
            }
            RESPONSE_LEASE_TAG if wrapper.data.len() == LEASE_V2_SIZE => {
                let lease_key = cursor.array::<16>()?;
                let lease_state = SMBLeaseState::from_bits_truncate(cursor.u32()?);
                let lease_flags = SMBLeaseFlags::from_bits_truncate(cursor.u32()?);
                cursor.skip(8)?;
                let parent_lease_key = cursor.array::<16>()?;
                let epoch = cursor.u16()?;
                Self::ResponseLeaseV2(ResponseLeaseV2 { lease_key, lease_state, lease_flags, parent_lease_key, epoch })
            }
            RESPONSE_LEASE_TAG => return Err(SMBError::parse_error("Lease context has invalid size")),
            _ => return Err(SMBError::parse_error("Invalid context tag")),
        };
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_fatal() {
        let wrapper = CreateContextWrapper::new(b"Zzzz", vec![0; 8]);
        assert!(CreateResponseContext::from_wrapper(&wrapper).is_err());
    }

    /// MS-SMB2 2.2.14.2.5: maximal access response is status followed by the mask.
    #[test]
    fn maximal_access_response_layout() {
        let wrapper = CreateContextWrapper::new(b"MxAc", [0_u32.to_le_bytes(), 0x001F01FF_u32.to_le_bytes()].concat());
        let parsed = CreateResponseContext::from_wrapper(&wrapper).unwrap();
        let CreateResponseContext::QueryMaximalAccessResponse(mxac) = parsed else {
            panic!("expected maximal access");
        };
        assert_eq!(mxac.status, NTStatus::StatusSuccess);
        assert!(mxac.maximal_access.contains(SMBAccessMask::FILE_READ_DATA | SMBAccessMask::SYNCHRONIZE));
    }

    #[test]
    fn lease_with_odd_size_is_rejected() {
        let wrapper = CreateContextWrapper::new(b"RqLs", vec![0; 40]);
        assert!(CreateResponseContext::from_wrapper(&wrapper).is_err());
    }
}
