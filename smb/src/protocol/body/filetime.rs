use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use smb_core::{SMBByteSize, SMBFromBytes, SMBParseResult, SMBToBytes};

/// 100ns intervals since 1601-01-01.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default, PartialOrd, Ord, Hash)]
pub struct FileTime(u64);

const INTERVALS_PER_SECOND: u64 = 10_000_000;
const SECONDS_BETWEEN_1601_AND_EPOCH: u64 = 11_644_473_600;

impl FileTime {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn from_unix(unix_timestamp: u64) -> Self {
        Self((unix_timestamp + SECONDS_BETWEEN_1601_AND_EPOCH) * INTERVALS_PER_SECOND)
    }

    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::from_unix(secs)
    }

    pub fn to_unix(&self) -> u64 {
        (self.0 / INTERVALS_PER_SECOND).saturating_sub(SECONDS_BETWEEN_1601_AND_EPOCH)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl SMBByteSize for FileTime {
    fn smb_byte_size(&self) -> usize {
        8
    }
}

impl SMBFromBytes for FileTime {
    fn smb_from_bytes(input: &[u8]) -> SMBParseResult<&[u8], Self> where Self: Sized {
        let (remaining, raw) = u64::smb_from_bytes(input)?;
        Ok((remaining, Self(raw)))
    }
}

impl SMBToBytes for FileTime {
    fn smb_to_bytes(&self) -> Vec<u8> {
        self.0.smb_to_bytes()
    }
}
