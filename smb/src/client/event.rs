use crate::protocol::body::oplock_break::{SMBLeaseBreakNotification, SMBOplockBreak};

/// Something a connection's receive task reports outside of any pending request.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    OplockBreak {
        connection_id: u64,
        notification: SMBOplockBreak,
    },
    LeaseBreak {
        connection_id: u64,
        notification: SMBLeaseBreakNotification,
    },
    /// The transport closed or failed; every request still pending on it has failed.
    Disconnected {
        connection_id: u64,
        reason: String,
    },
}

impl ConnectionEvent {
    pub fn connection_id(&self) -> u64 {
        match self {
            Self::OplockBreak { connection_id, .. }
            | Self::LeaseBreak { connection_id, .. }
            | Self::Disconnected { connection_id, .. } => *connection_id,
        }
    }
}
