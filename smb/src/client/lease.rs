//! Server-initiated oplock and lease breaks (MS-SMB2 3.2.5.19).
//!
//! The dispatcher applies a break to every open it covers while holding only
//! that open's guard, then sends the acknowledgment on the connection the break
//! arrived on. Acknowledgments wait for their reply without a deadline: a server
//! can take a long time to finish a break and that must not look like a dead link.

use std::sync::Arc;

use smb_core::error::SMBError;
use smb_core::logging::{debug, info, warn};
use smb_core::SMBResult;

use crate::client::connection::{Connection, OutgoingRequest};
use crate::client::create::ContextVersion;
use crate::client::open::{HandleTable, OpenRef};
use crate::client::session::Session;
use crate::protocol::body::create::{SMBLeaseState, SMBOplockLevel};
use crate::protocol::body::oplock_break::{SMBLeaseBreakAck, SMBLeaseBreakNotification, SMBOplockBreak};
use crate::protocol::body::SMBBody;

/// Acknowledgment owed to the server after a break was applied.
#[derive(Debug, Clone)]
pub enum BreakAck {
    Lease {
        /// Any open the lease covers, for its tree id; `None` for a key no open holds.
        open: Option<OpenRef>,
        ack: SMBLeaseBreakAck,
    },
    Oplock {
        open: OpenRef,
        ack: SMBOplockBreak,
    },
}

/// Whether a v2 break numbered `new` predates the lease's `current` epoch.
/// Epochs wrap, so the comparison is on the signed distance.
fn is_stale_epoch(current: u16, new: u16) -> bool {
    (new.wrapping_sub(current) as i16) < 0
}

/// Lowers the lease state of every open holding the key. Unknown keys are still
/// acknowledged when the server asks, so it is not left waiting for the break timeout.
/// A v2 break older than the lease's epoch was overtaken by a later one and is dropped.
pub fn apply_lease_break(handles: &HandleTable, notification: &SMBLeaseBreakNotification) -> Option<BreakAck> {
    let opens = handles.by_lease_key(&notification.lease_key);
    let stale = opens.iter().any(|open| {
        open.with(|file| {
            file.lease.as_ref().is_some_and(|lease| {
                lease.version == ContextVersion::V2 && is_stale_epoch(lease.epoch, notification.new_epoch)
            })
        })
    });
    if stale {
        debug!(lease_key = ?notification.lease_key, epoch = notification.new_epoch, "stale lease break ignored");
        return None;
    }
    for open in &opens {
        open.with(|file| {
            let Some(lease) = file.lease.as_mut() else {
                return;
            };
            if lease.version == ContextVersion::V2 {
                lease.epoch = notification.new_epoch;
            }
            lease.state = notification.new_lease_state;
            if !lease.state.contains(SMBLeaseState::HANDLE_CACHING) && file.durable.is_some() {
                debug!(file_id = ?file.file_id, "lease lost handle caching");
            }
        });
    }
    info!(
        lease_key = ?notification.lease_key,
        from = ?notification.current_lease_state,
        to = ?notification.new_lease_state,
        opens = opens.len(),
        "lease break"
    );
    if opens.is_empty() {
        warn!(lease_key = ?notification.lease_key, "lease break for a key no open holds");
    }
    notification.ack_required().then(|| BreakAck::Lease {
        open: opens.into_iter().next(),
        ack: SMBLeaseBreakAck::new(notification.lease_key, notification.new_lease_state),
    })
}

/// Lowers the oplock on the open with the notified file id. Breaks from level II
/// need no acknowledgment.
pub fn apply_oplock_break(handles: &HandleTable, notification: &SMBOplockBreak) -> Option<BreakAck> {
    let Some(open) = handles.by_file_id(notification.file_id) else {
        warn!(file_id = ?notification.file_id, "oplock break for an unknown file id");
        return None;
    };
    let previous = open.with(|file| std::mem::replace(&mut file.oplock_level, notification.level));
    info!(file_id = ?notification.file_id, from = ?previous, to = ?notification.level, "oplock break");
    if previous <= SMBOplockLevel::II {
        return None;
    }
    Some(BreakAck::Oplock {
        open,
        ack: SMBOplockBreak { level: notification.level, file_id: notification.file_id },
    })
}

pub async fn acknowledge(connection: &Arc<Connection>, session: &Session, ack: BreakAck) -> SMBResult<()> {
    let (open, body) = match ack {
        BreakAck::Lease { open, ack } => (open, SMBBody::LeaseBreakAck(ack)),
        BreakAck::Oplock { open, ack } => (Some(open), SMBBody::OplockBreak(ack)),
    };
    let tree = open.map(|open| open.with(|file| file.tree.clone()));
    let tree_id = tree.as_ref().and_then(|tree| tree.id()).unwrap_or(0);
    let security = match &tree {
        Some(tree) => tree.security(session),
        None => session.security(false),
    };
    let request = OutgoingRequest::new(body, session.id(), tree_id)
        .secured(security)
        .without_timeout();
    let exchange = connection.exchange(request).await?.check("Break acknowledgment failed")?;
    match exchange.response.body {
        SMBBody::LeaseBreakAck(_) | SMBBody::OplockBreak(_) => Ok(()),
        _ => Err(SMBError::parse_error("Unexpected reply to a break acknowledgment")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use smb_core::nt_status::NTStatus;

    use crate::client::config::SMBClientConfig;
    use crate::client::create::{CreateOutcome, DurableGrant, LeaseGrant, OpenOptions};
    use crate::client::open::OpenFile;
    use crate::client::test_support::pair;
    use crate::client::tree::Tree;
    use crate::protocol::body::create::{SMBCreateAction, SMBFileAttributes, SMBFileId};
    use crate::protocol::body::oplock_break::SMBLeaseBreakFlags;
    use crate::protocol::body::{FileTime, SMBAccessMask};

    use super::*;

    fn open(table: &HandleTable, volatile: u64, oplock_level: SMBOplockLevel, lease: Option<LeaseGrant>) {
        let outcome = CreateOutcome {
            file_id: SMBFileId::new(7, volatile),
            action: SMBCreateAction::Opened,
            oplock_level,
            creation_time: FileTime::default(),
            last_write_time: FileTime::default(),
            end_of_file: 0,
            allocation_size: 0,
            file_attributes: SMBFileAttributes::NORMAL,
            durable: Some(DurableGrant { version: ContextVersion::V2, persistent: false, timeout: 0, create_guid: Uuid::nil() }),
            lease,
            maximal_access: SMBAccessMask::permissive(),
            on_disk_id: None,
            reopen_without_lease: false,
        };
        table.insert(OpenFile::new(Arc::new(Tree::new("data")), OpenOptions::default(), outcome, false));
    }

    fn lease(epoch: u16) -> LeaseGrant {
        LeaseGrant { version: ContextVersion::V2, key: [3; 16], parent_key: None, state: SMBLeaseState::full(), epoch }
    }

    fn notification(ack: bool) -> SMBLeaseBreakNotification {
        SMBLeaseBreakNotification {
            new_epoch: 2,
            flags: if ack { SMBLeaseBreakFlags::ACK_REQUIRED } else { SMBLeaseBreakFlags::empty() },
            lease_key: [3; 16],
            current_lease_state: SMBLeaseState::full(),
            new_lease_state: SMBLeaseState::READ_CACHING,
        }
    }

    /// MS-SMB2 3.2.5.19.2: every open on the lease drops to the new state.
    #[test]
    fn lease_break_lowers_every_open_on_the_key() {
        let table = HandleTable::new();
        open(&table, 1, SMBOplockLevel::Lease, Some(lease(1)));
        open(&table, 2, SMBOplockLevel::Lease, Some(lease(1)));
        let ack = apply_lease_break(&table, &notification(true));
        let Some(BreakAck::Lease { open, ack }) = ack else {
            panic!("expected a lease acknowledgment");
        };
        assert!(open.is_some());
        assert_eq!(ack.lease_state, SMBLeaseState::READ_CACHING);
        for (_, open) in table.all() {
            let lease = open.snapshot().lease.unwrap();
            assert_eq!(lease.state, SMBLeaseState::READ_CACHING);
            assert_eq!(lease.epoch, 2);
        }
    }

    #[test]
    fn unknown_keys_are_acknowledged_and_unrequested_acks_skipped() {
        let table = HandleTable::new();
        assert!(matches!(apply_lease_break(&table, &notification(true)), Some(BreakAck::Lease { open: None, .. })));
        open(&table, 1, SMBOplockLevel::Lease, Some(lease(1)));
        assert!(apply_lease_break(&table, &notification(false)).is_none());
        assert_eq!(table.all()[0].1.snapshot().lease.unwrap().state, SMBLeaseState::READ_CACHING);
    }

    #[test]
    fn break_older_than_the_lease_epoch_changes_nothing() {
        let table = HandleTable::new();
        open(&table, 1, SMBOplockLevel::Lease, Some(lease(5)));
        assert!(apply_lease_break(&table, &notification(true)).is_none());
        let kept = table.all()[0].1.snapshot().lease.unwrap();
        assert_eq!(kept.state, SMBLeaseState::full());
        assert_eq!(kept.epoch, 5);

        // Across the wrap, 2 follows 65535.
        let table = HandleTable::new();
        open(&table, 1, SMBOplockLevel::Lease, Some(lease(u16::MAX)));
        assert!(apply_lease_break(&table, &notification(true)).is_some());
        assert_eq!(table.all()[0].1.snapshot().lease.unwrap().epoch, 2);
    }

    #[test]
    fn oplock_break_from_level_two_needs_no_ack() {
        let table = HandleTable::new();
        open(&table, 1, SMBOplockLevel::Batch, None);
        open(&table, 2, SMBOplockLevel::II, None);
        let batch = SMBOplockBreak { level: SMBOplockLevel::II, file_id: SMBFileId::new(7, 1) };
        assert!(matches!(apply_oplock_break(&table, &batch), Some(BreakAck::Oplock { ack, .. }) if ack.level == SMBOplockLevel::II));
        let level_two = SMBOplockBreak { level: SMBOplockLevel::None, file_id: SMBFileId::new(7, 2) };
        assert!(apply_oplock_break(&table, &level_two).is_none());
        assert_eq!(table.all()[1].1.snapshot().oplock_level, SMBOplockLevel::None);
        let unknown = SMBOplockBreak { level: SMBOplockLevel::None, file_id: SMBFileId::new(7, 9) };
        assert!(apply_oplock_break(&table, &unknown).is_none());
    }

    /// A slow acknowledgment reply is not a timeout.
    #[tokio::test(start_paused = true)]
    async fn acknowledgment_waits_past_the_request_timeout() {
        let config = SMBClientConfig { request_timeout: Duration::from_millis(50), ..SMBClientConfig::default() };
        let (connection, mut peer, _events) = pair(&config);
        let session = Session::new();
        let ack = BreakAck::Lease { open: None, ack: SMBLeaseBreakAck::new([3; 16], SMBLeaseState::READ_CACHING) };
        let server = async {
            let request = peer.next().await;
            let SMBBody::LeaseBreakAck(received) = &request.body else {
                panic!("expected a lease break acknowledgment");
            };
            assert_eq!(received.lease_key, [3; 16]);
            tokio::time::sleep(Duration::from_millis(500)).await;
            let body = SMBBody::LeaseBreakAck(received.clone());
            peer.reply(&request, NTStatus::StatusSuccess, 1, body).await;
        };
        let (result, _) = tokio::join!(acknowledge(&connection, &session, ack), server);
        result.unwrap();
    }
}
