use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};
use tokio::{
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::kernel::{Kernel, ThreadId};

use super::{
    device_table::DeviceTable,
    iorb::{IoType, Iorb},
};

// Payload of one device-completion interrupt.
#[derive(Debug, Clone)]
pub struct InterruptEvent {
    pub iorb: Arc<Iorb>,
    pub thread: ThreadId,
}

// Sending half, one clone per simulated controller.
#[derive(Clone)]
pub struct InterruptLine {
    tx: UnboundedSender<InterruptEvent>,
}

impl InterruptLine {
    // Returns false once nobody listens on the vector any more.
    pub fn raise(&self, iorb: Arc<Iorb>) -> bool {
        let thread = iorb.thread();
        self.tx.send(InterruptEvent { iorb, thread }).is_ok()
    }
}

// Receiving half. Exactly one consumer.
pub struct InterruptVector {
    rx: UnboundedReceiver<InterruptEvent>,
}

impl InterruptVector {
    pub async fn next(&mut self) -> Option<InterruptEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<InterruptEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub fn interrupt_vector() -> (InterruptLine, InterruptVector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InterruptLine { tx }, InterruptVector { rx })
}

pub struct DiskInterruptHandler {
    devices: Arc<DeviceTable>,
    kernel: Kernel,

    // One reaction at a time, whoever delivers the event
    reaction: Mutex<()>,
}

impl DiskInterruptHandler {
    pub fn new(devices: Arc<DeviceTable>, kernel: Kernel) -> Self {
        Self {
            devices,
            kernel,
            reaction: Mutex::new(()),
        }
    }

    // Reconciles one completed request with page, frame and file state, wakes its
    // waiters and moves its device on to the next queued request.
    pub fn handle_interrupt(&self, event: InterruptEvent) {
        let _reaction = self.reaction.lock().unwrap_or_else(PoisonError::into_inner);

        let InterruptEvent { iorb, thread } = event;
        let kernel = &self.kernel;
        let frame = kernel.pages.frame(iorb.page());
        let terminating_task = kernel.terminating_task(thread);

        debug!("Interrupt for {:?} issued by thread {}", iorb, thread);

        // Page and file bookkeeping happens before anyone is woken
        kernel.release_file(iorb.file());
        kernel.pages.unlock(iorb.page());

        if !kernel.thread_killed(thread) {
            match frame {
                None => {
                    warn!("Page {} lost its frame before {:?} completed", iorb.page(), iorb);
                }
                Some(frame) => {
                    kernel.frames.set_referenced(frame, true);

                    if terminating_task.is_none() {
                        if self.devices.is_swap_device(iorb.device()) {
                            // Swap-in leaves memory identical to its backing copy
                            kernel.frames.set_dirty(frame, false);
                        } else if iorb.io_type() == IoType::FileRead {
                            kernel.frames.set_dirty(frame, true);
                        }
                    }
                }
            }
        }

        // A terminating task gives up its reservation whatever happened to the thread
        if let (Some(task), Some(frame)) = (terminating_task, frame) {
            if kernel.frames.reserved_by(frame) == Some(task) {
                debug!("Unreserving frame {} held by terminating task {}", frame, task);
                kernel.frames.set_unreserved(frame, task);
            }
        }

        iorb.notify_threads();

        match self.devices.get(iorb.device()) {
            Some(device) => {
                if let Some(next) = device.finish_service(&iorb) {
                    debug!("Device {}: moved on to {:?}", device.id(), next);
                }
            }
            None => warn!("Interrupt names unknown device {}", iorb.device()),
        }

        kernel.scheduler.dispatch();
    }

    // Consumes completions until every interrupt line is gone.
    pub async fn run(self: Arc<Self>, mut vector: InterruptVector) {
        while let Some(event) = vector.next().await {
            self.handle_interrupt(event);
        }

        debug!("Interrupt vector closed");
    }

    pub fn spawn(self: Arc<Self>, vector: InterruptVector) -> JoinHandle<()> {
        tokio::spawn(self.run(vector))
    }
}
