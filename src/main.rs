use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use devices_sim::{
    config::SimConfig,
    devices::{IoType, Iorb},
    kernel::OpenFileTable,
    sim::Machine,
};

const THREADS: u32 = 3;
const REQUESTS_PER_THREAD: u32 = 4;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SimConfig::from_env().context("failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .try_init()
        .map_err(|err| anyhow!("failed to install subscriber: {}", err))?;

    let Some(latency) = config.service_latency else {
        bail!("the demo needs DEVICES_LATENCY_MS > 0 so disks complete on their own");
    };

    let machine = Machine::build(config).context("failed to build machine")?;
    machine.start_interrupt_handler()?;

    let swap = machine.devices.swap_device_id();
    let data_disk = machine
        .devices
        .devices()
        .iter()
        .map(|device| device.id())
        .find(|&id| id != swap)
        .unwrap_or(swap);

    let task = machine.tasks.create_task();
    let mut issued: Vec<Arc<Iorb>> = Vec::new();
    let mut files = Vec::new();

    for t in 0..THREADS {
        let thread = machine.threads.create_thread(task);
        let file = machine.files.open();
        files.push(file);
        machine.scheduler.make_ready(thread);

        for i in 0..REQUESTS_PER_THREAD {
            let page = thread * 100 + i;
            machine.pages.map(page, page);
            machine.frames.insert(page);

            let (device, io_type) = match i % 3 {
                0 => (swap, IoType::PageIn),
                1 => (data_disk, IoType::FileRead),
                _ => (data_disk, IoType::FileWrite),
            };

            let block = (t * REQUESTS_PER_THREAD + i) * 17;
            let iorb = Iorb::new(thread, page, block, device, io_type, file);

            match machine.issue(Arc::clone(&iorb)).await {
                Ok(admission) => {
                    info!("Thread {}: {:?} for block {} on device {}", thread, admission, block, device);
                    issued.push(iorb);
                }
                Err(err) => warn!("Thread {}: request for block {} refused: {}", thread, block, err),
            }
        }
    }

    // First file is closed while its I/O is still outstanding
    machine.files.close(files[0]);

    // Last thread dies with requests still queued
    let mut cancelled = 0;
    if let Some(victim) = issued.last().map(|iorb| iorb.thread()) {
        cancelled = machine.kill_thread(victim);
        info!("Thread {} killed, {} queued requests cancelled", victim, cancelled);
    }

    while machine.devices.snapshots().iter().any(|snapshot| snapshot.busy) {
        tokio::time::sleep(latency).await;
    }

    let completed = issued.iter().filter(|iorb| iorb.is_done()).count();
    info!("{} of {} admitted requests completed", completed, issued.len());

    for device in machine.devices.devices() {
        if let Some(disk) = machine.disk(device.id()) {
            info!("Device {} serviced {:?}", device.id(), disk.started());
        }
    }

    for file in files {
        info!(
            "File {}: {:?}, {} outstanding",
            file,
            machine.files.get(file),
            machine.files.iorb_count(file)
        );
    }

    info!("Scheduler dispatched {} times", machine.scheduler.dispatch_count());

    if completed + cancelled != issued.len() {
        warn!("Some admitted requests neither completed nor were cancelled");
        machine.devices.at_warning();
    }
    machine.shutdown();

    Ok(())
}
