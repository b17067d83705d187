use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashlink::LinkedHashMap;
use tracing::{debug, warn};

use crate::{
    config::{DiskConfig, MmuGeometry},
    error::{IoError, IoResult},
    kernel::{DeviceId, IorbId, Kernel, ThreadId},
};

use super::{geometry::DiskGeometry, iorb::Iorb};

// The simulated controller behind a device. It services the one request it is
// handed and later raises a completion interrupt for it.
pub trait DiskHardware: Send + Sync {
    fn start_io(&self, iorb: Arc<Iorb>);
}

// What admission did with an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    // The device was idle and went straight to work on it
    Started,
    // Appended behind the requests already waiting
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub busy: bool,
    pub in_service: Option<IorbId>,
    pub queued: Vec<IorbId>,
}

struct DeviceState {
    // True iff `in_service` holds a request
    busy: bool,
    in_service: Option<Arc<Iorb>>,

    // Pending requests in arrival order. Keyed by id so cancellation can
    // remove from the middle without disturbing the order of the rest.
    queue: LinkedHashMap<IorbId, Arc<Iorb>>,
}

pub struct Device {
    id: DeviceId,
    number_of_blocks: u32,
    geometry: DiskGeometry,

    kernel: Kernel,
    hardware: Arc<dyn DiskHardware>,

    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(
        config: &DiskConfig,
        mmu: &MmuGeometry,
        kernel: Kernel,
        hardware: Arc<dyn DiskHardware>,
    ) -> IoResult<Self> {
        let geometry = DiskGeometry::new(config, mmu)?;

        Ok(Self {
            id: config.id,
            number_of_blocks: config.number_of_blocks,
            geometry,
            kernel,
            hardware,
            state: Mutex::new(DeviceState {
                busy: false,
                in_service: None,
                queue: LinkedHashMap::new(),
            }),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn number_of_blocks(&self) -> u32 {
        self.number_of_blocks
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = self.state();

        DeviceSnapshot {
            id: self.id,
            busy: state.busy,
            in_service: state.in_service.as_ref().map(|iorb| iorb.id()),
            queued: state.queue.keys().copied().collect(),
        }
    }

    // Accepts one request.
    //
    // Suspends while the page lock is acquired. Fails with `ThreadKilled` when the
    // issuing thread is killed, either while waiting for the page or before the
    // request could be started or queued. In the second case the page stays locked
    // and the file keeps the reference; see `release_abandoned`.
    pub async fn enqueue_iorb(&self, iorb: Arc<Iorb>) -> IoResult<Admission> {
        debug_assert_eq!(iorb.device(), self.id);

        let kernel = &self.kernel;
        let thread = iorb.thread();

        // May fault the page in or wait for another request holding it
        if let Err(err) = kernel.pages.lock(iorb.page(), thread).await {
            warn!("Device {}: lock on page {} failed for {:?}: {}", self.id, iorb.page(), iorb, err);
            return Err(err);
        }

        kernel.files.increment_iorb_count(iorb.file());

        if iorb.block_number() >= self.number_of_blocks {
            warn!(
                "Device {}: block {} is past the end of its {} blocks",
                self.id,
                iorb.block_number(),
                self.number_of_blocks
            );
        }
        iorb.set_cylinder(self.geometry.cylinder(iorb.block_number()));

        // Checked under the device lock so a concurrent cancellation for this
        // thread either sees the request in the queue or the request sees the kill.
        let mut state = self.state();

        if kernel.thread_killed(thread) {
            warn!("Device {}: thread {} is being killed, abandoning {:?}", self.id, thread, iorb);
            return Err(IoError::ThreadKilled { thread });
        }

        if !state.busy {
            self.start_io(&mut state, iorb);
            Ok(Admission::Started)
        } else {
            debug!("Device {}: busy, queueing {:?}", self.id, iorb);
            state.queue.insert(iorb.id(), iorb);
            Ok(Admission::Queued)
        }
    }

    // First come, first served.
    pub fn dequeue_iorb(&self) -> Option<Arc<Iorb>> {
        Self::dequeue_locked(&mut self.state())
    }

    fn dequeue_locked(state: &mut DeviceState) -> Option<Arc<Iorb>> {
        state.queue.pop_front().map(|(_, iorb)| iorb)
    }

    fn start_io(&self, state: &mut DeviceState, iorb: Arc<Iorb>) {
        debug!(
            "Device {}: starting {:?} on cylinder {:?}",
            self.id,
            iorb,
            iorb.cylinder()
        );

        state.busy = true;
        state.in_service = Some(Arc::clone(&iorb));
        self.hardware.start_io(iorb);
    }

    // Drops every queued request issued by `thread`. The request in service is
    // left alone and completes normally.
    pub fn cancel_pending_io(&self, thread: ThreadId) -> usize {
        let cancelled: Vec<Arc<Iorb>> = {
            let mut state = self.state();
            if state.queue.is_empty() {
                return 0;
            }

            let ids: Vec<IorbId> = state
                .queue
                .iter()
                .filter(|(_, iorb)| iorb.thread() == thread)
                .map(|(id, _)| *id)
                .collect();

            ids.iter().filter_map(|id| state.queue.remove(id)).collect()
        };

        for iorb in &cancelled {
            debug!("Device {}: cancelling {:?}", self.id, iorb);
            self.release_abandoned(iorb);
        }

        cancelled.len()
    }

    // Gives back what admission acquired for a request that will never be serviced.
    pub fn release_abandoned(&self, iorb: &Iorb) {
        self.kernel.pages.unlock(iorb.page());
        self.kernel.release_file(iorb.file());
    }

    // Called by the interrupt handler once `completed` has been reconciled.
    // Idles the device and starts the next queued request, if any.
    pub(crate) fn finish_service(&self, completed: &Iorb) -> Option<Arc<Iorb>> {
        let mut state = self.state();

        match &state.in_service {
            Some(current) if current.id() == completed.id() => {}
            other => warn!(
                "Device {}: completion for iorb {} but {:?} is in service",
                self.id,
                completed.id(),
                other.as_ref().map(|iorb| iorb.id())
            ),
        }

        state.busy = false;
        state.in_service = None;

        let next = Self::dequeue_locked(&mut state);
        if let Some(next) = &next {
            self.start_io(&mut state, Arc::clone(next));
        }

        next
    }
}
