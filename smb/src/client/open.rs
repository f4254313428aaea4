use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::create::{CreateOutcome, DurableGrant, LeaseGrant, OpenOptions, ReclaimState};
use crate::client::tree::Tree;
use crate::protocol::body::create::{SMBFileId, SMBLeaseKey, SMBOplockLevel};
use crate::protocol::body::SMBAccessMask;

/// Client-side name for an open. It survives durable reconnects; the server's file id does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(u64);

impl FileHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct OpenFile {
    pub tree: Arc<Tree>,
    pub options: OpenOptions,
    pub file_id: SMBFileId,
    pub oplock_level: SMBOplockLevel,
    pub durable: Option<DurableGrant>,
    pub lease: Option<LeaseGrant>,
    pub maximal_access: SMBAccessMask,
    pub end_of_file: u64,
    pub is_pipe: bool,
    /// Cleared when the open was lost and could not be reclaimed.
    pub valid: bool,
}

impl OpenFile {
    pub fn new(tree: Arc<Tree>, options: OpenOptions, outcome: CreateOutcome, is_pipe: bool) -> Self {
        Self {
            tree,
            options,
            file_id: outcome.file_id,
            oplock_level: outcome.oplock_level,
            durable: outcome.durable,
            lease: outcome.lease,
            maximal_access: outcome.maximal_access,
            end_of_file: outcome.end_of_file,
            is_pipe,
            valid: true,
        }
    }

    /// What a reconnect needs to get this open back, if the server granted anything that survives.
    pub fn reclaim_state(&self) -> Option<ReclaimState> {
        if self.durable.is_none() && self.lease.is_none() {
            return None;
        }
        Some(ReclaimState {
            file_id: self.file_id,
            durable: self.durable.clone(),
            lease: self.lease.clone(),
        })
    }

    /// Takes a reclaimed open's new volatile id and grants.
    pub fn refresh(&mut self, outcome: CreateOutcome) {
        self.file_id = outcome.file_id;
        self.oplock_level = outcome.oplock_level;
        self.durable = outcome.durable.or(self.durable.take());
        self.lease = outcome.lease;
        self.end_of_file = outcome.end_of_file;
        self.valid = true;
    }
}

fn lock(file: &Mutex<OpenFile>) -> MutexGuard<'_, OpenFile> {
    file.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared handle to one open; its state lives behind a guard scoped to the open.
#[derive(Debug, Clone)]
pub struct OpenRef(Arc<Mutex<OpenFile>>);

impl OpenRef {
    pub fn with<R>(&self, f: impl FnOnce(&mut OpenFile) -> R) -> R {
        f(&mut lock(&self.0))
    }

    pub fn snapshot(&self) -> OpenFile {
        lock(&self.0).clone()
    }

    /// The server's id for the open, or `STATUS_INVALID_HANDLE` once it was lost.
    pub fn file_id(&self) -> SMBResult<SMBFileId> {
        let file = lock(&self.0);
        if !file.valid {
            return Err(SMBError::status_error(NTStatus::InvalidHandle, "Open was lost on reconnect"));
        }
        Ok(file.file_id)
    }
}

#[derive(Debug, Default)]
pub struct HandleTable {
    next_id: AtomicU64,
    files: RwLock<HashMap<FileHandle, OpenRef>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: OpenFile) -> FileHandle {
        let handle = FileHandle(self.next_id.fetch_add(1, Ordering::AcqRel) + 1);
        self.files.write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, OpenRef(Arc::new(Mutex::new(file))));
        handle
    }

    pub fn get(&self, handle: FileHandle) -> SMBResult<OpenRef> {
        self.files.read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
            .ok_or_else(|| SMBError::status_error(NTStatus::InvalidHandle, "Unknown file handle"))
    }

    pub fn remove(&self, handle: FileHandle) -> Option<OpenRef> {
        self.files.write().unwrap_or_else(|e| e.into_inner()).remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<(FileHandle, OpenRef)> {
        let mut all: Vec<_> = self.files.read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(handle, open)| (*handle, open.clone()))
            .collect();
        all.sort_by_key(|(handle, _)| *handle);
        all
    }

    /// Opens sharing a lease key; one lease can cover several opens of the same file.
    pub fn by_lease_key(&self, key: &SMBLeaseKey) -> Vec<OpenRef> {
        self.all()
            .into_iter()
            .map(|(_, open)| open)
            .filter(|open| open.with(|file| file.lease.as_ref().is_some_and(|lease| &lease.key == key)))
            .collect()
    }

    pub fn by_file_id(&self, file_id: SMBFileId) -> Option<OpenRef> {
        self.all()
            .into_iter()
            .map(|(_, open)| open)
            .find(|open| open.with(|file| file.valid && file.file_id == file_id))
    }

    /// Opens on `tree`, for invalidation when the tree goes away.
    pub fn on_tree(&self, tree: &Arc<Tree>) -> Vec<(FileHandle, OpenRef)> {
        self.all()
            .into_iter()
            .filter(|(_, open)| open.with(|file| Arc::ptr_eq(&file.tree, tree)))
            .collect()
    }
}
