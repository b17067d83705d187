use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use tokio::sync::Notify;

use crate::{
    error::{IoError, IoResult},
    kernel::{BoxFuture, FrameId, FrameTable, PageId, PageTable, TaskId, ThreadId, ThreadStatus, ThreadTable},
};

use super::threads::SimThreadTable;

#[derive(Debug, Default)]
struct PageEntry {
    // Backing frame, `None` when not resident or reclaimed
    frame: Option<FrameId>,

    // Thread whose request currently holds the page
    holder: Option<ThreadId>,

    // Number of times the lock was granted
    grants: u64,
}

pub struct SimPageTable {
    pages: DashMap<PageId, PageEntry>,
    threads: Arc<SimThreadTable>,

    unlocked: Notify,
}

impl SimPageTable {
    pub fn new(threads: Arc<SimThreadTable>) -> Self {
        Self {
            pages: DashMap::new(),
            threads,
            unlocked: Notify::new(),
        }
    }

    pub fn map(&self, page: PageId, frame: FrameId) {
        self.pages.entry(page).or_default().frame = Some(frame);
    }

    // The memory manager took the frame away.
    pub fn reclaim(&self, page: PageId) -> Option<FrameId> {
        self.pages.get_mut(&page).and_then(|mut entry| entry.frame.take())
    }

    pub fn is_locked(&self, page: PageId) -> bool {
        self.holder(page).is_some()
    }

    pub fn holder(&self, page: PageId) -> Option<ThreadId> {
        self.pages.get(&page).and_then(|entry| entry.holder)
    }

    pub fn grants(&self, page: PageId) -> u64 {
        self.pages.get(&page).map(|entry| entry.grants).unwrap_or(0)
    }

    fn try_lock(&self, page: PageId, thread: ThreadId) -> bool {
        let mut entry = self.pages.entry(page).or_default();
        if entry.holder.is_some() {
            return false;
        }

        entry.holder = Some(thread);
        entry.grants += 1;
        true
    }
}

impl PageTable for SimPageTable {
    fn lock(&self, page: PageId, thread: ThreadId) -> BoxFuture<'_, IoResult<()>> {
        Box::pin(async move {
            loop {
                // Registered before the checks so a wakeup between check and await is kept
                let unlocked = self.unlocked.notified();
                let status_changed = self.threads.status_changed();
                tokio::pin!(unlocked);
                tokio::pin!(status_changed);
                unlocked.as_mut().enable();
                status_changed.as_mut().enable();

                if self.try_lock(page, thread) {
                    return Ok(());
                }

                if self.threads.status(thread) == ThreadStatus::Killed {
                    return Err(IoError::ThreadKilled { thread });
                }

                debug!("Thread {} waits for page {}", thread, page);
                tokio::select! {
                    _ = &mut unlocked => {}
                    _ = &mut status_changed => {}
                }
            }
        })
    }

    fn unlock(&self, page: PageId) {
        match self.pages.get_mut(&page) {
            Some(mut entry) if entry.holder.is_some() => entry.holder = None,
            _ => warn!("Unlocking page {} which is not locked", page),
        }

        self.unlocked.notify_waiters();
    }

    fn frame(&self, page: PageId) -> Option<FrameId> {
        self.pages.get(&page).and_then(|entry| entry.frame)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub referenced: bool,
    pub dirty: bool,
    pub reserved: Option<TaskId>,
}

#[derive(Default)]
pub struct SimFrameTable {
    frames: DashMap<FrameId, FrameEntry>,
}

impl SimFrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, frame: FrameId) {
        self.frames.insert(frame, FrameEntry::default());
    }

    pub fn reserve(&self, frame: FrameId, task: TaskId) {
        self.frames.entry(frame).or_default().reserved = Some(task);
    }

    pub fn entry(&self, frame: FrameId) -> Option<FrameEntry> {
        self.frames.get(&frame).map(|entry| *entry)
    }

    pub fn is_dirty(&self, frame: FrameId) -> bool {
        self.entry(frame).map(|entry| entry.dirty).unwrap_or(false)
    }

    pub fn is_referenced(&self, frame: FrameId) -> bool {
        self.entry(frame).map(|entry| entry.referenced).unwrap_or(false)
    }
}

impl FrameTable for SimFrameTable {
    fn set_referenced(&self, frame: FrameId, referenced: bool) {
        self.frames.entry(frame).or_default().referenced = referenced;
    }

    fn set_dirty(&self, frame: FrameId, dirty: bool) {
        self.frames.entry(frame).or_default().dirty = dirty;
    }

    fn reserved_by(&self, frame: FrameId) -> Option<TaskId> {
        self.frames.get(&frame).and_then(|entry| entry.reserved)
    }

    fn set_unreserved(&self, frame: FrameId, task: TaskId) {
        if let Some(mut entry) = self.frames.get_mut(&frame) {
            if entry.reserved == Some(task) {
                entry.reserved = None;
            }
        }
    }
}
