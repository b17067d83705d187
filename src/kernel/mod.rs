// Contracts the devices core consumes from the rest of the simulated kernel.
//
// The core never owns pages, frames, files, threads or tasks. It only holds their
// ids and resolves them through the tables bundled in `Kernel`.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use crate::error::IoResult;

pub type DeviceId = u32;
pub type ThreadId = u32;
pub type TaskId = u32;
pub type PageId = u32;
pub type FrameId = u32;
pub type FileId = u64;
pub type IorbId = u64;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    Waiting,
    // Termination has started. Pending I/O must be dropped, in-flight I/O still completes.
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Live,
    Terminating,
}

pub trait PageTable: Send + Sync {
    /// Locks `page` on behalf of `thread` for the duration of one I/O.
    ///
    /// May suspend (page fault, page held by another request). Resolves to
    /// `IoError::ThreadKilled` if the thread is killed while waiting.
    fn lock(&self, page: PageId, thread: ThreadId) -> BoxFuture<'_, IoResult<()>>;

    fn unlock(&self, page: PageId);

    /// The frame currently backing `page`, if it was not reclaimed.
    fn frame(&self, page: PageId) -> Option<FrameId>;
}

pub trait FrameTable: Send + Sync {
    fn set_referenced(&self, frame: FrameId, referenced: bool);
    fn set_dirty(&self, frame: FrameId, dirty: bool);
    fn reserved_by(&self, frame: FrameId) -> Option<TaskId>;
    fn set_unreserved(&self, frame: FrameId, task: TaskId);
}

pub trait OpenFileTable: Send + Sync {
    fn increment_iorb_count(&self, file: FileId);
    fn decrement_iorb_count(&self, file: FileId);
    fn iorb_count(&self, file: FileId) -> usize;
    fn close_pending(&self, file: FileId) -> bool;
    fn close(&self, file: FileId);
}

pub trait ThreadTable: Send + Sync {
    fn status(&self, thread: ThreadId) -> ThreadStatus;
    fn task(&self, thread: ThreadId) -> Option<TaskId>;
}

pub trait TaskTable: Send + Sync {
    fn status(&self, task: TaskId) -> TaskStatus;
}

pub trait Scheduler: Send + Sync {
    // Picks the next ready thread and runs it.
    fn dispatch(&self);
}

// Service locator handed to every device and to the interrupt handler.
#[derive(Clone)]
pub struct Kernel {
    pub pages: Arc<dyn PageTable>,
    pub frames: Arc<dyn FrameTable>,
    pub files: Arc<dyn OpenFileTable>,
    pub threads: Arc<dyn ThreadTable>,
    pub tasks: Arc<dyn TaskTable>,
    pub scheduler: Arc<dyn Scheduler>,

    // Held across decrement, check and close so two releases of the same file
    // cannot both observe the last reference going away.
    release: Arc<Mutex<()>>,
}

impl Kernel {
    pub fn new(
        pages: Arc<dyn PageTable>,
        frames: Arc<dyn FrameTable>,
        files: Arc<dyn OpenFileTable>,
        threads: Arc<dyn ThreadTable>,
        tasks: Arc<dyn TaskTable>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            pages,
            frames,
            files,
            threads,
            tasks,
            scheduler,
            release: Arc::new(Mutex::new(())),
        }
    }

    pub fn thread_killed(&self, thread: ThreadId) -> bool {
        self.threads.status(thread) == ThreadStatus::Killed
    }

    // The task owning `thread`, when that task is terminating.
    pub fn terminating_task(&self, thread: ThreadId) -> Option<TaskId> {
        self.threads
            .task(thread)
            .filter(|&task| self.tasks.status(task) == TaskStatus::Terminating)
    }

    // Drops one outstanding I/O reference to `file` and performs a deferred close
    // once the last reference is gone. Both cancellation and completion go through here.
    pub fn release_file(&self, file: FileId) {
        let _release = self.release.lock().unwrap_or_else(PoisonError::into_inner);

        self.files.decrement_iorb_count(file);

        if self.files.iorb_count(file) == 0 && self.files.close_pending(file) {
            tracing::debug!("Closing file {} after its last I/O drained", file);
            self.files.close(file);
        }
    }
}
