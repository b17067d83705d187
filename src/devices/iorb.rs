use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::{Context, Poll, Waker},
};

use crate::kernel::{DeviceId, FileId, IorbId, PageId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    FileRead,
    FileWrite,
    // Swap-in, served by the swap device
    PageIn,
    // Swap-out, served by the swap device
    PageOut,
}

// Enum representing the completion state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoStatus {
    Pending = 0, // Queued or in service
    Done = 1,    // Completion has been reconciled and waiters notified
}

impl IoStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IoStatus::Done,
            _ => IoStatus::Pending,
        }
    }
}

type Wakers = Arc<Mutex<Vec<Waker>>>;

fn lock_wakers(wakers: &Wakers) -> MutexGuard<'_, Vec<Waker>> {
    wakers.lock().unwrap_or_else(PoisonError::into_inner)
}

// Resolves once the interrupt handler has processed the request it was created from.
pub struct IoFuture {
    flag: Arc<AtomicU8>,
    wakers: Wakers,
}

impl Future for IoFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The flag is re-checked under the waker lock so a notification racing
        // with this poll cannot be lost.
        let mut wakers = lock_wakers(&self.wakers);

        match IoStatus::from_u8(self.flag.load(Ordering::Acquire)) {
            IoStatus::Done => Poll::Ready(()),

            IoStatus::Pending => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }

                Poll::Pending
            }
        }
    }
}

static NEXT_IORB_ID: AtomicU64 = AtomicU64::new(1);

const UNSET_CYLINDER: u32 = u32::MAX;

// I/O request block: one read or write of a single block on behalf of a thread.
pub struct Iorb {
    id: IorbId,

    // Thread that issued the request. Not owned.
    thread: ThreadId,

    // Page being read into / written from. Locked while the request is outstanding.
    page: PageId,

    block_number: u32,
    device: DeviceId,
    io_type: IoType,

    // File the block belongs to. Its outstanding-I/O counter covers this request.
    file: FileId,

    // Set by admission.
    cylinder: AtomicU32,

    done_flag: Arc<AtomicU8>,
    wakers: Wakers,
}

impl Iorb {
    pub fn new(
        thread: ThreadId,
        page: PageId,
        block_number: u32,
        device: DeviceId,
        io_type: IoType,
        file: FileId,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_IORB_ID.fetch_add(1, Ordering::Relaxed),
            thread,
            page,
            block_number,
            device,
            io_type,
            file,
            cylinder: AtomicU32::new(UNSET_CYLINDER),
            done_flag: Arc::new(AtomicU8::new(IoStatus::Pending as u8)),
            wakers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn id(&self) -> IorbId {
        self.id
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn block_number(&self) -> u32 {
        self.block_number
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn io_type(&self) -> IoType {
        self.io_type
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn cylinder(&self) -> Option<u32> {
        match self.cylinder.load(Ordering::Acquire) {
            UNSET_CYLINDER => None,
            cylinder => Some(cylinder),
        }
    }

    pub(crate) fn set_cylinder(&self, cylinder: u32) {
        self.cylinder.store(cylinder, Ordering::Release);
    }

    // Creates a future a thread can park on until this request completes.
    pub fn wait(&self) -> IoFuture {
        IoFuture {
            flag: Arc::clone(&self.done_flag),
            wakers: Arc::clone(&self.wakers),
        }
    }

    pub fn is_done(&self) -> bool {
        IoStatus::from_u8(self.done_flag.load(Ordering::Acquire)) == IoStatus::Done
    }

    // Wakes every thread parked on this request. They become runnable, nothing runs them here.
    pub fn notify_threads(&self) {
        self.done_flag.store(IoStatus::Done as u8, Ordering::Release);

        let wakers: Vec<Waker> = lock_wakers(&self.wakers).drain(..).collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

impl fmt::Debug for Iorb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iorb")
            .field("id", &self.id)
            .field("thread", &self.thread)
            .field("page", &self.page)
            .field("block_number", &self.block_number)
            .field("device", &self.device)
            .field("io_type", &self.io_type)
            .field("file", &self.file)
            .field("cylinder", &self.cylinder())
            .finish()
    }
}
