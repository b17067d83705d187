use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::{
    config::{DiskConfig, SimConfig},
    error::{IoError, IoResult},
    kernel::{DeviceId, Kernel, ThreadId},
};

use super::{
    device::{Admission, Device, DeviceSnapshot, DiskHardware},
    iorb::Iorb,
};

// Every configured device, built once when the simulation starts.
pub struct DeviceTable {
    devices: DashMap<DeviceId, Arc<Device>>,
    swap_device_id: DeviceId,
}

impl DeviceTable {
    // `attach` supplies the controller for each configured disk.
    pub fn init<F>(config: &SimConfig, kernel: Kernel, mut attach: F) -> IoResult<Self>
    where
        F: FnMut(&DiskConfig) -> Arc<dyn DiskHardware>,
    {
        let devices = DashMap::with_capacity(config.disks.len());

        for disk in &config.disks {
            let device = Device::new(disk, &config.mmu, kernel.clone(), attach(disk))?;

            let geometry = device.geometry();
            info!(
                "Device {}: {} blocks, {} cylinders, {} platters of {} x {} byte sectors per track{}",
                disk.id,
                disk.number_of_blocks,
                geometry.cylinders(disk.number_of_blocks),
                geometry.platters(),
                geometry.sectors_per_track(),
                geometry.bytes_per_sector(),
                if disk.id == config.swap_device_id { " (swap)" } else { "" }
            );

            devices.insert(disk.id, Arc::new(device));
        }

        if !devices.contains_key(&config.swap_device_id) {
            return Err(IoError::UnknownDevice {
                device: config.swap_device_id,
            });
        }

        Ok(Self {
            devices,
            swap_device_id: config.swap_device_id,
        })
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.get(&id).map(|device| Arc::clone(device.value()))
    }

    pub fn swap_device_id(&self) -> DeviceId {
        self.swap_device_id
    }

    pub fn is_swap_device(&self, id: DeviceId) -> bool {
        id == self.swap_device_id
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // Routes a request to the device it names.
    pub async fn enqueue_iorb(&self, iorb: Arc<Iorb>) -> IoResult<Admission> {
        let device = self.get(iorb.device()).ok_or(IoError::UnknownDevice {
            device: iorb.device(),
        })?;

        device.enqueue_iorb(iorb).await
    }

    // Thread termination: drop the thread's queued requests on every device.
    pub fn cancel_pending_io(&self, thread: ThreadId) -> usize {
        self.devices()
            .iter()
            .map(|device| device.cancel_pending_io(thread))
            .sum()
    }

    // Sorted by id. The DashMap shard guards are released before returning.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self
            .devices
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        devices.sort_by_key(|device| device.id());
        devices
    }

    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.devices()
            .iter()
            .map(|device| device.snapshot())
            .collect()
    }

    pub fn at_error(&self) {
        for snapshot in self.snapshots() {
            error!("{:?}", snapshot);
        }
    }

    pub fn at_warning(&self) {
        for snapshot in self.snapshots() {
            warn!("{:?}", snapshot);
        }
    }
}
