use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, warn};
use tokio::runtime::Handle;

use crate::{
    devices::{DiskHardware, InterruptLine, Iorb},
    kernel::{DeviceId, IorbId},
};

// Disk controller that "services" a request by waiting and then raising the
// completion interrupt. Without a latency the interrupt is raised by hand.
pub struct SimulatedDisk {
    id: DeviceId,
    line: InterruptLine,
    latency: Option<Duration>,

    in_flight: Arc<Mutex<Option<Arc<Iorb>>>>,

    // Every request started, in start order
    started: Mutex<Vec<IorbId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedDisk {
    pub fn new(id: DeviceId, line: InterruptLine, latency: Option<Duration>) -> Self {
        Self {
            id,
            line,
            latency,
            in_flight: Arc::new(Mutex::new(None)),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn in_flight(&self) -> Option<Arc<Iorb>> {
        lock(&self.in_flight).clone()
    }

    pub fn started(&self) -> Vec<IorbId> {
        lock(&self.started).clone()
    }

    // Finishes the request in flight and raises its interrupt.
    pub fn raise_interrupt(&self) -> bool {
        match lock(&self.in_flight).take() {
            Some(iorb) => {
                debug!("Disk {}: done with {:?}", self.id, iorb);
                self.line.raise(iorb)
            }
            None => false,
        }
    }
}

impl DiskHardware for SimulatedDisk {
    fn start_io(&self, iorb: Arc<Iorb>) {
        {
            let mut in_flight = lock(&self.in_flight);
            if let Some(previous) = in_flight.as_ref() {
                warn!("Disk {}: started {:?} while {:?} is in flight", self.id, iorb, previous);
            }
            *in_flight = Some(Arc::clone(&iorb));
        }
        lock(&self.started).push(iorb.id());

        let Some(latency) = self.latency else {
            return;
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("Disk {}: no runtime to time {:?}, raise its interrupt by hand", self.id, iorb);
                return;
            }
        };

        let line = self.line.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let id = self.id;

        runtime.spawn(async move {
            tokio::time::sleep(latency).await;

            let finished = {
                let mut slot = lock(&in_flight);
                match slot.as_ref() {
                    Some(current) if current.id() == iorb.id() => slot.take(),
                    _ => None,
                }
            };

            if let Some(iorb) = finished {
                debug!("Disk {}: done with {:?}", id, iorb);
                let iorb_id = iorb.id();
                if !line.raise(iorb) {
                    warn!("Disk {}: completion of iorb {} lost, interrupt vector is closed", id, iorb_id);
                }
            }
        });
    }
}
