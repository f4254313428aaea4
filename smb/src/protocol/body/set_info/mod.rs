use serde::{Deserialize, Serialize};

use smb_core::cursor::SMBCursor;
use smb_core::error::SMBError;
use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

use crate::byte_helper::utf16_bytes;
use crate::protocol::body::create::SMBFileId;
use crate::protocol::body::query_info::{SMBFileInfoClass, SMBInfoType, SMBSecurityInformation};
use crate::protocol::body::read_buffer;
use crate::protocol::header::SMB2_HEADER_SIZE;

const SET_INFO_REQUEST_SIZE: u16 = 33;
const SET_INFO_RESPONSE_SIZE: u16 = 2;
const SET_INFO_REQUEST_FIXED: usize = 32;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct SMBSetInfoRequest {
    pub info_type: SMBInfoType,
    pub file_info_class: u8,
    pub additional_information: SMBSecurityInformation,
    pub file_id: SMBFileId,
    pub buffer: Vec<u8>,
}

impl SMBSetInfoRequest {
    pub fn new(info_type: SMBInfoType, file_info_class: u8, file_id: SMBFileId, buffer: Vec<u8>) -> Self {
        Self {
            info_type,
            file_info_class,
            additional_information: SMBSecurityInformation::empty(),
            file_id,
            buffer,
        }
    }

    pub fn rename(file_id: SMBFileId, target: &str, replace_if_exists: bool) -> Self {
        let name = utf16_bytes(target);
        let buffer = [
            &[replace_if_exists as u8][..],
            &[0; 7],
            &0_u64.to_le_bytes(),
            &(name.len() as u32).to_le_bytes(),
            &name,
        ].concat();
        Self::new(SMBInfoType::File, SMBFileInfoClass::Rename.into(), file_id, buffer)
    }

    pub fn delete_on_close(file_id: SMBFileId, delete: bool) -> Self {
        Self::new(SMBInfoType::File, SMBFileInfoClass::Disposition.into(), file_id, vec![delete as u8])
    }

    pub fn end_of_file(file_id: SMBFileId, size: u64) -> Self {
        Self::new(SMBInfoType::File, SMBFileInfoClass::EndOfFile.into(), file_id, size.to_le_bytes().to_vec())
    }

    /// Rename, disposition and security descriptor changes must be replay-marked when resent.
    pub fn requires_replay_marker(&self) -> bool {
        match self.info_type {
            SMBInfoType::Security => true,
            SMBInfoType::File => matches!(
                SMBFileInfoClass::from(self.file_info_class),
                SMBFileInfoClass::Rename | SMBFileInfoClass::Disposition | SMBFileInfoClass::DispositionEx
            ),
            _ => false,
        }
    }
}

impl SMBByteSize for SMBSetInfoRequest {
    fn smb_byte_size(&self) -> usize {
        SET_INFO_REQUEST_FIXED + self.buffer.len().max(1)
    }
}

impl SMBToBytes for SMBSetInfoRequest {
    fn smb_to_bytes(&self) -> Vec<u8> {
        let offset = (SMB2_HEADER_SIZE + SET_INFO_REQUEST_FIXED) as u16;
        let mut bytes = [
            &SET_INFO_REQUEST_SIZE.to_le_bytes()[..],
            &[u8::from(self.info_type), self.file_info_class],
            &(self.buffer.len() as u32).to_le_bytes(),
            &offset.to_le_bytes(),
            &[0; 2],
            &self.additional_information.bits().to_le_bytes(),
            &self.file_id.smb_to_bytes(),
            &self.buffer,
        ].concat();
        if self.buffer.is_empty() {
            bytes.push(0);
        }
        bytes
    }
}

impl SMBFromBytes for SMBSetInfoRequest {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(SET_INFO_REQUEST_SIZE)?;
        let info_type = SMBInfoType::try_from(cursor.u8()?)
            .map_err(|_| SMBError::parse_error("Invalid info type"))?;
        let file_info_class = cursor.u8()?;
        let length = cursor.u32()? as usize;
        let offset = cursor.u16()? as usize;
        cursor.skip(2)?;
        let additional_information = SMBSecurityInformation::from_bits_truncate(cursor.u32()?);
        let file_id = SMBFileId::new(cursor.u64()?, cursor.u64()?);
        let buffer = read_buffer(&cursor, offset, length)?;
        Ok((&[], Self { info_type, file_info_class, additional_information, file_id, buffer }))
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
pub struct SMBSetInfoResponse;

impl SMBByteSize for SMBSetInfoResponse {
    fn smb_byte_size(&self) -> usize {
        SET_INFO_RESPONSE_SIZE as usize
    }
}

impl SMBToBytes for SMBSetInfoResponse {
    fn smb_to_bytes(&self) -> Vec<u8> {
        SET_INFO_RESPONSE_SIZE.to_le_bytes().to_vec()
    }
}

impl SMBFromBytes for SMBSetInfoResponse {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let mut cursor = SMBCursor::new(input);
        cursor.structure_size(SET_INFO_RESPONSE_SIZE)?;
        Ok((cursor.remaining(), Self))
    }
}
