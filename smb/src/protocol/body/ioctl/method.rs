use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

/// Control codes the client issues; anything else travels as `Other`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromPrimitive, IntoPrimitive)]
pub enum SMBIoCtlCode {
    DfsGetReferrals = 0x00060194,
    PipePeek = 0x0011400C,
    PipeWait = 0x00110018,
    PipeTransceive = 0x0011C017,
    SrvCopyChunk = 0x001440F2,
    SrvEnumerateSnapshots = 0x00144064,
    SrvRequestResumeKey = 0x00140078,
    SrvReadHash = 0x001441BB,
    SrvCopyChunkWrite = 0x001480F2,
    LmrRequestResiliency = 0x001401D4,
    QueryNetworkInterfaceInfo = 0x001401FC,
    SetReparsePoint = 0x000900A4,
    DfsGetReferralsEx = 0x000601B0,
    FileLevelTrim = 0x00098208,
    ValidateNegotiateInfo = 0x00140204,
    #[num_enum(catch_all)]
    Other(u32),
}

impl SMBIoCtlCode {
    /// Codes whose effect on the server is not safe to repeat blindly.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            SMBIoCtlCode::SrvCopyChunk
                | SMBIoCtlCode::SrvCopyChunkWrite
                | SMBIoCtlCode::SetReparsePoint
                | SMBIoCtlCode::FileLevelTrim
                | SMBIoCtlCode::PipeTransceive
                | SMBIoCtlCode::Other(_)
        )
    }
}
