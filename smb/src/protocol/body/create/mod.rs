use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBResult, SMBToBytes};

use crate::byte_helper::{align_up, pad_to, utf16_bytes, utf16_string};
use crate::protocol::body::access_mask::SMBAccessMask;
use crate::protocol::body::read_buffer;
use crate::protocol::body::filetime::FileTime;
use crate::protocol::header::SMB2_HEADER_SIZE;

pub use action::SMBCreateAction;
pub use context::{create_contexts_to_bytes, parse_create_contexts, CreateContextWrapper};
pub use disposition::SMBCreateDisposition;
pub use file_attributes::SMBFileAttributes;
pub use file_id::SMBFileId;
pub use flags::SMBCreateFlags;
pub use impersonation_level::SMBImpersonationLevel;
pub use lease::{SMBLeaseFlags, SMBLeaseKey, SMBLeaseState};
pub use oplock::SMBOplockLevel;
pub use options::SMBCreateOptions;
pub use request_context::{CreateRequestContext, DurableHandleReconnectV2, DurableHandleRequestV2, DurableHandleV2Flags, RequestLease, RequestLeaseV2};
pub use response_context::{CreateResponseContext, DurableHandleResponseV2, QueryMaximalAccessResponse, QueryOnDiskIDResponse, ResponseLease, ResponseLeaseV2};
pub use share_access::SMBShareAccess;

mod action;
mod context;
mod disposition;
mod file_attributes;
mod file_id;
mod flags;
mod impersonation_level;
mod lease;
mod oplock;
mod options;
pub mod request_context;
pub mod response_context;
mod share_access;

const CREATE_REQUEST_SIZE: u16 = 57;
const CREATE_RESPONSE_SIZE: u16 = 89;
const CREATE_REQUEST_FIXED: usize = 56;
const CREATE_RESPONSE_FIXED: usize = 88;

/// Target of a create: a share-relative path, or an 8-byte file id for resolve-by-id opens.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub enum SMBCreateName {
    Path(String),
    FileId(u64),
}

impl SMBCreateName {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            SMBCreateName::Path(path) => utf16_bytes(path),
            SMBCreateName::FileId(id) => id.to_le_bytes().to_vec(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCreateRequest {
    pub oplock_level: SMBOplockLevel,
    pub impersonation_level: SMBImpersonationLevel,
    pub desired_access: SMBAccessMask,
    pub file_attributes: SMBFileAttributes,
    pub share_access: SMBShareAccess,
    pub create_disposition: SMBCreateDisposition,
    pub create_options: SMBCreateOptions,
    pub name: SMBCreateName,
    pub contexts: Vec<CreateRequestContext>,
}

impl SMBCreateRequest {
    pub fn new(name: SMBCreateName, desired_access: SMBAccessMask, create_disposition: SMBCreateDisposition) -> Self {
        let mut create_options = SMBCreateOptions::empty();
        if matches!(name, SMBCreateName::FileId(_)) {
            create_options |= SMBCreateOptions::OPEN_BY_FILE_ID;
        }
        Self {
            oplock_level: SMBOplockLevel::None,
            impersonation_level: SMBImpersonationLevel::Impersonation,
            desired_access,
            file_attributes: SMBFileAttributes::empty(),
            share_access: SMBShareAccess::READ | SMBShareAccess::WRITE,
            create_disposition,
            create_options,
            name,
            contexts: Vec::new(),
        }
    }

    pub fn lease_context(&self) -> Option<&CreateRequestContext> {
        self.contexts.iter().find(|c| c.is_lease())
    }
}

impl SMBByteSize for SMBCreateRequest {
    fn smb_byte_size(&self) -> usize {
        self.smb_to_bytes().len()
    }
}

impl SMBToBytes for SMBCreateRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let name = self.name.to_bytes();
        let name_offset = SMB2_HEADER_SIZE + CREATE_REQUEST_FIXED;
        let wrappers = self.contexts.iter().map(|c| c.to_wrapper()).collect::<Vec<_>>();
        let contexts = create_contexts_to_bytes(&wrappers);
        let contexts_offset = if contexts.is_empty() {
            0
        } else {
            align_up(name_offset + name.len(), 8)
        };
        let mut bytes = [
            &CREATE_REQUEST_SIZE.to_le_bytes()[..],
            &[0, u8::from(self.oplock_level)],
            &u32::from(self.impersonation_level).to_le_bytes(),
            &[0; 16],
            &self.desired_access.bits().to_le_bytes(),
            &self.file_attributes.bits().to_le_bytes(),
            &self.share_access.bits().to_le_bytes(),
            &u32::from(self.create_disposition).to_le_bytes(),
            &self.create_options.bits().to_le_bytes(),
            &(name_offset as u16).to_le_bytes(),
            &(name.len() as u16).to_le_bytes(),
            &(contexts_offset as u32).to_le_bytes(),
            &(contexts.len() as u32).to_le_bytes(),
            &name,
        ].concat();
        if contexts.is_empty() {
            if name.is_empty() {
                bytes.push(0);
            }
        } else {
            let mut padded = bytes;
            pad_to(&mut padded, 8);
            padded.extend_from_slice(&contexts);
            bytes = padded;
        }
        bytes
    }
}

impl SMBFromBytes for SMBCreateRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(CREATE_REQUEST_SIZE)?;
        cursor.skip(1)?;
        let oplock_level = SMBOplockLevel::try_from(cursor.u8()?)
            .map_err(|_| SMBError::parse_error("Invalid oplock level"))?;
        let impersonation_level = SMBImpersonationLevel::try_from(cursor.u32()?)
            .map_err(|_| SMBError::parse_error("Invalid impersonation level"))?;
        cursor.skip(16)?;
        let desired_access = SMBAccessMask::from_bits_truncate(cursor.u32()?);
        let file_attributes = SMBFileAttributes::from_bits_truncate(cursor.u32()?);
        let share_access = SMBShareAccess::from_bits_truncate(cursor.u32()?);
        let create_disposition = SMBCreateDisposition::try_from(cursor.u32()?)
            .map_err(|_| SMBError::parse_error("Invalid create disposition"))?;
        let create_options = SMBCreateOptions::from_bits_truncate(cursor.u32()?);
        let name_offset = cursor.u16()? as usize;
        let name_length = cursor.u16()? as usize;
        let contexts_offset = cursor.u32()? as usize;
        let contexts_length = cursor.u32()? as usize;
        let raw_name = read_buffer(&cursor, name_offset, name_length)?;
        let name = if create_options.contains(SMBCreateOptions::OPEN_BY_FILE_ID) && name_length == 8 {
            let mut id = [0_u8; 8];
            id.copy_from_slice(&raw_name);
            SMBCreateName::FileId(u64::from_le_bytes(id))
        } else {
            SMBCreateName::Path(utf16_string(&raw_name)?)
        };
        let contexts = read_contexts(&cursor, contexts_offset, contexts_length)?
            .iter()
            .map(CreateRequestContext::from_wrapper)
            .collect::<SMBResult<Vec<_>>>()?;
        Ok((&[], Self {
            oplock_level,
            impersonation_level,
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            name,
            contexts,
        }))
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBCreateResponse {
    pub oplock_level: SMBOplockLevel,
    pub flags: SMBCreateFlags,
    pub action: SMBCreateAction,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: SMBFileAttributes,
    pub file_id: SMBFileId,
    pub contexts: Vec<CreateResponseContext>,
}

impl SMBCreateResponse {
    pub fn new(file_id: SMBFileId, action: SMBCreateAction) -> Self {
        Self {
            oplock_level: SMBOplockLevel::None,
            flags: SMBCreateFlags::empty(),
            action,
            creation_time: FileTime::default(),
            last_access_time: FileTime::default(),
            last_write_time: FileTime::default(),
            change_time: FileTime::default(),
            allocation_size: 0,
            end_of_file: 0,
            file_attributes: SMBFileAttributes::NORMAL,
            file_id,
            contexts: Vec::new(),
        }
    }
}

impl SMBByteSize for SMBCreateResponse {
    fn smb_byte_size(&self) -> usize {
        self.smb_to_bytes().len()
    }
}

impl SMBToBytes for SMBCreateResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let wrappers = self.contexts.iter().map(|c| c.to_wrapper()).collect::<Vec<_>>();
        let contexts = create_contexts_to_bytes(&wrappers);
        let contexts_offset = if contexts.is_empty() { 0 } else { SMB2_HEADER_SIZE + CREATE_RESPONSE_FIXED };
        let mut bytes = [
            &CREATE_RESPONSE_SIZE.to_le_bytes()[..],
            &[u8::from(self.oplock_level), self.flags.bits()],
            &u32::from(self.action).to_le_bytes(),
            &self.creation_time.raw().to_le_bytes(),
            &self.last_access_time.raw().to_le_bytes(),
            &self.last_write_time.raw().to_le_bytes(),
            &self.change_time.raw().to_le_bytes(),
            &self.allocation_size.to_le_bytes(),
            &self.end_of_file.to_le_bytes(),
            &self.file_attributes.bits().to_le_bytes(),
            &[0; 4],
            &self.file_id.smb_to_bytes(),
            &(contexts_offset as u32).to_le_bytes(),
            &(contexts.len() as u32).to_le_bytes(),
        ].concat();
        if contexts.is_empty() {
            bytes.push(0);
        } else {
            bytes.extend_from_slice(&contexts);
        }
        bytes
    }
}

impl SMBFromBytes for SMBCreateResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(CREATE_RESPONSE_SIZE)?;
        let oplock_level = SMBOplockLevel::try_from(cursor.u8()?)
            .map_err(|_| SMBError::parse_error("Invalid oplock level"))?;
        let flags = SMBCreateFlags::from_bits_truncate(cursor.u8()?);
        let action = SMBCreateAction::try_from(cursor.u32()?)
            .map_err(|_| SMBError::parse_error("Invalid create action"))?;
        let creation_time = FileTime::from_raw(cursor.u64()?);
        let last_access_time = FileTime::from_raw(cursor.u64()?);
        let last_write_time = FileTime::from_raw(cursor.u64()?);
        let change_time = FileTime::from_raw(cursor.u64()?);
        let allocation_size = cursor.u64()?;
        let end_of_file = cursor.u64()?;
        let file_attributes = SMBFileAttributes::from_bits_truncate(cursor.u32()?);
        cursor.skip(4)?;
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let contexts_offset = cursor.u32()? as usize;
        let contexts_length = cursor.u32()? as usize;
        let contexts = read_contexts(&cursor, contexts_offset, contexts_length)?
            .iter()
            .map(CreateResponseContext::from_wrapper)
            .collect::<SMBResult<Vec<_>>>()?;
        Ok((&[], Self {
            oplock_level,
            flags,
            action,
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
            allocation_size,
            end_of_file,
            file_attributes,
            file_id,
            contexts,
        }))
    }
}

fn read_contexts(cursor: &SMBCursor, offset: usize, length: usize) -> SMBResult<Vec<CreateContextWrapper>> {
    parse_create_contexts(&read_buffer(cursor, offset, length)?)
}
