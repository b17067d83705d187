use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use tracing::{debug, warn};
use tokio::sync::{futures::Notified, Notify};

use crate::kernel::{Scheduler, TaskId, TaskStatus, TaskTable, ThreadId, ThreadStatus, ThreadTable};

struct ThreadEntry {
    status: ThreadStatus,
    task: TaskId,
}

pub struct SimThreadTable {
    threads: DashMap<ThreadId, ThreadEntry>,
    next_thread_id: AtomicU32,

    // Signalled on every status change so suspended page locks can notice a kill
    status_changed: Notify,
}

impl Default for SimThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SimThreadTable {
    pub fn new() -> Self {
        Self {
            threads: DashMap::new(),
            next_thread_id: AtomicU32::new(1),
            status_changed: Notify::new(),
        }
    }

    pub fn create_thread(&self, task: TaskId) -> ThreadId {
        let thread = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        self.threads.insert(thread, ThreadEntry {
            status: ThreadStatus::Ready,
            task,
        });
        thread
    }

    pub fn set_status(&self, thread: ThreadId, status: ThreadStatus) {
        match self.threads.get_mut(&thread) {
            Some(mut entry) => entry.status = status,
            None => warn!("Status change for unknown thread {}", thread),
        }
        self.status_changed.notify_waiters();
    }

    // Marks the thread as being killed. Cancelling its I/O is the caller's next step.
    pub fn kill(&self, thread: ThreadId) {
        debug!("Killing thread {}", thread);
        self.set_status(thread, ThreadStatus::Killed);
    }

    pub fn status_changed(&self) -> Notified<'_> {
        self.status_changed.notified()
    }
}

impl ThreadTable for SimThreadTable {
    // A thread nobody knows about is treated as already gone.
    fn status(&self, thread: ThreadId) -> ThreadStatus {
        self.threads
            .get(&thread)
            .map(|entry| entry.status)
            .unwrap_or(ThreadStatus::Killed)
    }

    fn task(&self, thread: ThreadId) -> Option<TaskId> {
        self.threads.get(&thread).map(|entry| entry.task)
    }
}

pub struct SimTaskTable {
    tasks: DashMap<TaskId, TaskStatus>,
    next_task_id: AtomicU32,
}

impl Default for SimTaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTaskTable {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            next_task_id: AtomicU32::new(1),
        }
    }

    pub fn create_task(&self) -> TaskId {
        let task = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(task, TaskStatus::Live);
        task
    }

    pub fn terminate(&self, task: TaskId) {
        debug!("Terminating task {}", task);
        self.tasks.insert(task, TaskStatus::Terminating);
    }
}

impl TaskTable for SimTaskTable {
    fn status(&self, task: TaskId) -> TaskStatus {
        self.tasks
            .get(&task)
            .map(|status| *status)
            .unwrap_or(TaskStatus::Terminating)
    }
}

// Round robin over a FIFO ready queue.
pub struct SimScheduler {
    threads: Arc<SimThreadTable>,
    ready: SegQueue<ThreadId>,
    running: Mutex<Option<ThreadId>>,
    dispatches: AtomicUsize,
}

impl SimScheduler {
    pub fn new(threads: Arc<SimThreadTable>) -> Self {
        Self {
            threads,
            ready: SegQueue::new(),
            running: Mutex::new(None),
            dispatches: AtomicUsize::new(0),
        }
    }

    pub fn make_ready(&self, thread: ThreadId) {
        self.threads.set_status(thread, ThreadStatus::Ready);
        self.ready.push(thread);
    }

    pub fn running(&self) -> Option<ThreadId> {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::Acquire)
    }
}

impl Scheduler for SimScheduler {
    fn dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::AcqRel);

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        // Killed threads are skipped, they never run again
        let next = std::iter::from_fn(|| self.ready.pop())
            .find(|&thread| self.threads.status(thread) == ThreadStatus::Ready);

        let Some(next) = next else {
            return;
        };

        if let Some(previous) = running.take() {
            if self.threads.status(previous) == ThreadStatus::Running {
                self.threads.set_status(previous, ThreadStatus::Ready);
                self.ready.push(previous);
            }
        }

        self.threads.set_status(next, ThreadStatus::Running);
        *running = Some(next);
        debug!("Dispatched thread {}", next);
    }
}
