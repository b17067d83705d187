use crate::{
    config::{DiskConfig, MmuGeometry},
    error::{IoError, IoResult},
};

// Static layout of one disk, reduced to what cylinder selection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    platters: u32,
    sectors_per_track: u32,
    bytes_per_sector: u32,
    bytes_per_block: u64,
    blocks_per_track: u32,
}

impl DiskGeometry {
    pub fn new(disk: &DiskConfig, mmu: &MmuGeometry) -> IoResult<Self> {
        if mmu.page_address_bits >= mmu.virtual_address_bits
            || mmu.virtual_address_bits - mmu.page_address_bits >= 32
        {
            return Err(IoError::InvalidGeometry(format!(
                "{} virtual / {} page address bits",
                mmu.virtual_address_bits, mmu.page_address_bits
            )));
        }
        if disk.platters == 0 {
            return Err(IoError::InvalidGeometry(format!("disk {} has no platters", disk.id)));
        }

        let bytes_per_block = mmu.bytes_per_block();
        let bytes_per_track = disk.sectors_per_track as u64 * disk.bytes_per_sector as u64;
        let blocks_per_track = bytes_per_track / bytes_per_block;

        if blocks_per_track == 0 {
            return Err(IoError::InvalidGeometry(format!(
                "disk {} track of {} bytes cannot hold a {} byte block",
                disk.id, bytes_per_track, bytes_per_block
            )));
        }

        Ok(Self {
            platters: disk.platters,
            sectors_per_track: disk.sectors_per_track,
            bytes_per_sector: disk.bytes_per_sector,
            bytes_per_block,
            blocks_per_track: u32::try_from(blocks_per_track).map_err(|_| {
                IoError::InvalidGeometry(format!("disk {} tracks are too large", disk.id))
            })?,
        })
    }

    pub fn platters(&self) -> u32 {
        self.platters
    }

    pub fn sectors_per_track(&self) -> u32 {
        self.sectors_per_track
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    pub fn bytes_per_block(&self) -> u64 {
        self.bytes_per_block
    }

    pub fn blocks_per_track(&self) -> u32 {
        self.blocks_per_track
    }

    // A cylinder spans one track on every platter.
    pub fn blocks_per_cylinder(&self) -> u64 {
        self.blocks_per_track as u64 * self.platters as u64
    }

    pub fn cylinder(&self, block_number: u32) -> u32 {
        (block_number as u64 / self.blocks_per_cylinder()) as u32
    }

    pub fn cylinders(&self, number_of_blocks: u32) -> u32 {
        (number_of_blocks as u64).div_ceil(self.blocks_per_cylinder()) as u32
    }
}

#[cfg(test)]
mod test {
    use super::DiskGeometry;
    use crate::{
        config::{DiskConfig, MmuGeometry},
        error::IoError,
    };

    fn mmu(virtual_address_bits: u32, page_address_bits: u32) -> MmuGeometry {
        MmuGeometry {
            virtual_address_bits,
            page_address_bits,
        }
    }

    #[test]
    fn cylinder_math() {
        // 512 byte blocks, 10 sectors of 512 bytes per track, 4 platters
        let geometry = DiskGeometry::new(&DiskConfig::new(1), &mmu(16, 7)).unwrap();

        assert_eq!(geometry.bytes_per_block(), 512);
        assert_eq!(geometry.sectors_per_track(), 10);
        assert_eq!(geometry.bytes_per_sector(), 512);
        assert_eq!(geometry.blocks_per_track(), 10);
        assert_eq!(geometry.blocks_per_cylinder(), 40);

        assert_eq!(geometry.cylinder(0), 0);
        assert_eq!(geometry.cylinder(25), 0);
        assert_eq!(geometry.cylinder(39), 0);
        assert_eq!(geometry.cylinder(40), 1);
        assert_eq!(geometry.cylinder(41), 1);
        assert_eq!(geometry.cylinder(4095), 102);
        assert_eq!(geometry.cylinders(4096), 103);
    }

    #[test]
    fn partial_blocks_per_track_round_down() {
        // 2048 byte blocks on 5120 byte tracks: two whole blocks per track
        let geometry = DiskGeometry::new(&DiskConfig::new(1), &mmu(16, 5)).unwrap();

        assert_eq!(geometry.blocks_per_track(), 2);
        assert_eq!(geometry.cylinder(7), 0);
        assert_eq!(geometry.cylinder(8), 1);
    }

    #[test]
    fn zero_sized_geometry_is_rejected() {
        let mut disk = DiskConfig::new(3);
        disk.platters = 0;
        assert!(matches!(
            DiskGeometry::new(&disk, &mmu(16, 7)),
            Err(IoError::InvalidGeometry(_))
        ));

        let mut disk = DiskConfig::new(3);
        disk.sectors_per_track = 0;
        assert!(matches!(
            DiskGeometry::new(&disk, &mmu(16, 7)),
            Err(IoError::InvalidGeometry(_))
        ));

        assert!(DiskGeometry::new(&DiskConfig::new(3), &mmu(7, 7)).is_err());
    }
}
