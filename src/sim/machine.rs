use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tokio::task::JoinHandle;

use crate::{
    config::SimConfig,
    devices::{interrupt_vector, Admission, DeviceTable, DiskHardware, DiskInterruptHandler, InterruptVector, Iorb},
    error::IoResult,
    kernel::{DeviceId, Kernel, ThreadId},
};

use super::{
    files::SimFileTable,
    hardware::SimulatedDisk,
    memory::{SimFrameTable, SimPageTable},
    threads::{SimScheduler, SimTaskTable, SimThreadTable},
};

// A complete simulated machine: kernel tables, devices, controllers and the
// interrupt handler, wired from one configuration.
pub struct Machine {
    pub config: SimConfig,

    pub threads: Arc<SimThreadTable>,
    pub tasks: Arc<SimTaskTable>,
    pub pages: Arc<SimPageTable>,
    pub frames: Arc<SimFrameTable>,
    pub files: Arc<SimFileTable>,
    pub scheduler: Arc<SimScheduler>,

    pub kernel: Kernel,
    pub devices: Arc<DeviceTable>,
    pub handler: Arc<DiskInterruptHandler>,

    disks: HashMap<DeviceId, Arc<SimulatedDisk>>,

    // Taken by the handler task once it is started
    vector: Mutex<Option<InterruptVector>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Machine {
    pub fn build(config: SimConfig) -> Result<Self> {
        config.validate().context("invalid simulation config")?;

        let threads = Arc::new(SimThreadTable::new());
        let tasks = Arc::new(SimTaskTable::new());
        let pages = Arc::new(SimPageTable::new(Arc::clone(&threads)));
        let frames = Arc::new(SimFrameTable::new());
        let files = Arc::new(SimFileTable::new());
        let scheduler = Arc::new(SimScheduler::new(Arc::clone(&threads)));

        let kernel = Kernel::new(
            pages.clone(),
            frames.clone(),
            files.clone(),
            threads.clone(),
            tasks.clone(),
            scheduler.clone(),
        );

        let (line, vector) = interrupt_vector();
        let mut disks = HashMap::new();

        let devices = DeviceTable::init(&config, kernel.clone(), |disk| {
            let controller = Arc::new(SimulatedDisk::new(disk.id, line.clone(), config.service_latency));
            disks.insert(disk.id, Arc::clone(&controller));
            controller as Arc<dyn DiskHardware>
        })
        .context("failed to build the device table")?;
        let devices = Arc::new(devices);

        let handler = Arc::new(DiskInterruptHandler::new(Arc::clone(&devices), kernel.clone()));

        info!("Machine ready with {} devices", devices.device_count());

        Ok(Self {
            config,
            threads,
            tasks,
            pages,
            frames,
            files,
            scheduler,
            kernel,
            devices,
            handler,
            disks,
            vector: Mutex::new(Some(vector)),
            handler_task: Mutex::new(None),
        })
    }

    pub fn disk(&self, id: DeviceId) -> Option<Arc<SimulatedDisk>> {
        self.disks.get(&id).cloned()
    }

    pub async fn issue(&self, iorb: Arc<Iorb>) -> IoResult<Admission> {
        self.devices.enqueue_iorb(iorb).await
    }

    // Thread termination as the thread subsystem drives it: mark, then cancel queued I/O.
    pub fn kill_thread(&self, thread: ThreadId) -> usize {
        self.threads.kill(thread);
        self.devices.cancel_pending_io(thread)
    }

    // Hands interrupts to a handler task. From then on they are consumed asynchronously.
    pub fn start_interrupt_handler(&self) -> Result<()> {
        let vector = lock(&self.vector)
            .take()
            .ok_or_else(|| anyhow!("interrupt handler already started"))?;

        let task = Arc::clone(&self.handler).spawn(vector);
        *lock(&self.handler_task) = Some(task);
        Ok(())
    }

    // Runs the handler on every interrupt already raised. Only meaningful before
    // `start_interrupt_handler`.
    pub fn process_interrupts(&self) -> usize {
        let mut slot = lock(&self.vector);
        let Some(vector) = slot.as_mut() else {
            return 0;
        };

        let mut handled = 0;
        while let Some(event) = vector.try_next() {
            self.handler.handle_interrupt(event);
            handled += 1;
        }
        handled
    }

    // Completes whatever `device` is servicing and reacts to the interrupt.
    pub fn complete(&self, device: DeviceId) -> bool {
        let raised = self
            .disk(device)
            .map(|disk| disk.raise_interrupt())
            .unwrap_or(false);

        raised && self.process_interrupts() > 0
    }

    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.handler_task).take() {
            task.abort();
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
