use std::{collections::HashSet, env, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use tracing::level_filters::LevelFilter;

use crate::kernel::DeviceId;

// Defaults for a small two-disk machine. Any of them can be overridden from the environment.
pub const DEFAULT_VIRTUAL_ADDRESS_BITS: u32 = 16;
pub const DEFAULT_PAGE_ADDRESS_BITS: u32 = 7;
pub const DEFAULT_BYTES_PER_SECTOR: u32 = 512;
pub const DEFAULT_SECTORS_PER_TRACK: u32 = 10;
pub const DEFAULT_PLATTERS: u32 = 4;
pub const DEFAULT_NUMBER_OF_BLOCKS: u32 = 4096;
pub const SWAP_DEVICE_ID: DeviceId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuGeometry {
    pub virtual_address_bits: u32,
    pub page_address_bits: u32,
}

impl MmuGeometry {
    // Blocks are exactly one page.
    pub fn bytes_per_block(&self) -> u64 {
        1u64 << (self.virtual_address_bits - self.page_address_bits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskConfig {
    pub id: DeviceId,
    pub number_of_blocks: u32,
    pub platters: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

impl DiskConfig {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            number_of_blocks: DEFAULT_NUMBER_OF_BLOCKS,
            platters: DEFAULT_PLATTERS,
            sectors_per_track: DEFAULT_SECTORS_PER_TRACK,
            bytes_per_sector: DEFAULT_BYTES_PER_SECTOR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub mmu: MmuGeometry,

    // Device that pages memory in and out
    pub swap_device_id: DeviceId,

    pub disks: Vec<DiskConfig>,

    // Time a simulated disk takes to service one request.
    // `None` leaves interrupts to be raised by hand.
    pub service_latency: Option<Duration>,

    pub log_level: LevelFilter,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mmu: MmuGeometry {
                virtual_address_bits: DEFAULT_VIRTUAL_ADDRESS_BITS,
                page_address_bits: DEFAULT_PAGE_ADDRESS_BITS,
            },
            swap_device_id: SWAP_DEVICE_ID,
            disks: vec![DiskConfig::new(SWAP_DEVICE_ID), DiskConfig::new(1)],
            service_latency: Some(Duration::from_millis(2)),
            log_level: LevelFilter::INFO,
        }
    }
}

fn env_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("failed to parse {}={:?}", key, raw))?;
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", key)),
    }
}

impl SimConfig {
    // Reads overrides from `DEVICES_*` environment variables on top of the defaults.
    //
    // Every configured disk shares the same geometry; `DEVICES_DISKS` sets how many
    // disks exist (ids 0..n).
    pub fn from_env() -> Result<Self> {
        let mut config = SimConfig::default();

        if let Some(bits) = env_var("DEVICES_VIRTUAL_ADDRESS_BITS")? {
            config.mmu.virtual_address_bits = bits;
        }
        if let Some(bits) = env_var("DEVICES_PAGE_ADDRESS_BITS")? {
            config.mmu.page_address_bits = bits;
        }
        if let Some(id) = env_var("DEVICES_SWAP_DEVICE")? {
            config.swap_device_id = id;
        }

        let count: u32 = env_var("DEVICES_DISKS")?.unwrap_or(config.disks.len() as u32);
        let mut template = DiskConfig::new(0);
        if let Some(platters) = env_var("DEVICES_PLATTERS")? {
            template.platters = platters;
        }
        if let Some(sectors) = env_var("DEVICES_SECTORS_PER_TRACK")? {
            template.sectors_per_track = sectors;
        }
        if let Some(bytes) = env_var("DEVICES_BYTES_PER_SECTOR")? {
            template.bytes_per_sector = bytes;
        }
        if let Some(blocks) = env_var("DEVICES_NUMBER_OF_BLOCKS")? {
            template.number_of_blocks = blocks;
        }

        config.disks = (0..count)
            .map(|id| DiskConfig {
                id,
                ..template.clone()
            })
            .collect();

        if let Some(millis) = env_var::<u64>("DEVICES_LATENCY_MS")? {
            config.service_latency = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(level) = env_var("DEVICES_LOG")? {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    // Zero-sized geometry is a configuration error, never a runtime division by zero.
    pub fn validate(&self) -> Result<()> {
        let mmu = &self.mmu;
        if mmu.page_address_bits >= mmu.virtual_address_bits {
            bail!(
                "page address bits ({}) must be smaller than virtual address bits ({})",
                mmu.page_address_bits,
                mmu.virtual_address_bits
            );
        }
        if mmu.virtual_address_bits - mmu.page_address_bits >= 32 {
            bail!("block size of 2^{} bytes is too large", mmu.virtual_address_bits - mmu.page_address_bits);
        }

        if self.disks.is_empty() {
            bail!("at least one disk must be configured");
        }

        let mut seen = HashSet::new();
        for disk in &self.disks {
            if !seen.insert(disk.id) {
                bail!("disk {} is configured twice", disk.id);
            }
            if disk.platters == 0 {
                bail!("disk {} has no platters", disk.id);
            }
            if disk.sectors_per_track == 0 || disk.bytes_per_sector == 0 {
                bail!("disk {} has empty tracks", disk.id);
            }

            let bytes_per_track = disk.sectors_per_track as u64 * disk.bytes_per_sector as u64;
            if bytes_per_track < mmu.bytes_per_block() {
                bail!(
                    "disk {} tracks hold {} bytes, less than one {} byte block",
                    disk.id,
                    bytes_per_track,
                    mmu.bytes_per_block()
                );
            }
        }

        if !seen.contains(&self.swap_device_id) {
            bail!("swap device {} is not a configured disk", self.swap_device_id);
        }

        Ok(())
    }
}
