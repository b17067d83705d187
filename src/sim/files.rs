use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::kernel::{FileId, OpenFileTable};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    // Requests admitted against this file and not yet completed or cancelled
    pub iorb_count: usize,

    // Close was requested while I/O was outstanding
    pub close_pending: bool,

    pub closed: bool,
    pub close_calls: u32,

    // Decrements refused because the counter was already zero
    pub underflows: u32,
}

pub struct SimFileTable {
    files: DashMap<FileId, OpenFile>,
    next_file_id: AtomicU64,
}

impl Default for SimFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SimFileTable {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            next_file_id: AtomicU64::new(1),
        }
    }

    pub fn open(&self) -> FileId {
        let file = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        self.files.insert(file, OpenFile::default());
        file
    }

    pub fn get(&self, file: FileId) -> Option<OpenFile> {
        self.files.get(&file).map(|entry| *entry)
    }
}

impl OpenFileTable for SimFileTable {
    fn increment_iorb_count(&self, file: FileId) {
        self.files.entry(file).or_default().iorb_count += 1;
    }

    fn decrement_iorb_count(&self, file: FileId) {
        let mut entry = self.files.entry(file).or_default();

        match entry.iorb_count.checked_sub(1) {
            Some(count) => entry.iorb_count = count,
            None => {
                warn!("File {}: I/O counter is already zero", file);
                entry.underflows += 1;
            }
        }
    }

    fn iorb_count(&self, file: FileId) -> usize {
        self.files.get(&file).map(|entry| entry.iorb_count).unwrap_or(0)
    }

    fn close_pending(&self, file: FileId) -> bool {
        self.files.get(&file).map(|entry| entry.close_pending).unwrap_or(false)
    }

    // With I/O outstanding the close is only recorded; the devices core performs
    // it when the last request drains.
    fn close(&self, file: FileId) {
        let mut entry = self.files.entry(file).or_default();
        entry.close_calls += 1;

        if entry.closed {
            warn!("File {} closed twice", file);
            return;
        }

        if entry.iorb_count > 0 {
            debug!("File {}: close deferred, {} requests outstanding", file, entry.iorb_count);
            entry.close_pending = true;
        } else {
            debug!("File {}: closed", file);
            entry.close_pending = false;
            entry.closed = true;
        }
    }
}
