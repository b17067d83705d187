mod device_test;
mod scenario_test;

use std::sync::Arc;

use crate::{
    config::SimConfig,
    devices::{IoType, Iorb},
    kernel::{DeviceId, FileId, PageId, ThreadId},
    sim::Machine,
};

pub const SWAP: DeviceId = 0;
pub const DISK: DeviceId = 1;

// Two disks (0 is swap), 10 blocks per track, 4 platters, interrupts raised by hand.
pub fn manual_machine() -> Machine {
    let config = SimConfig {
        service_latency: None,
        ..SimConfig::default()
    };

    Machine::build(config).unwrap()
}

// A request whose page is resident in a frame with the same number.
pub fn request(
    machine: &Machine,
    thread: ThreadId,
    page: PageId,
    block: u32,
    device: DeviceId,
    io_type: IoType,
    file: FileId,
) -> Arc<Iorb> {
    machine.pages.map(page, page);
    machine.frames.insert(page);
    Iorb::new(thread, page, block, device, io_type, file)
}
