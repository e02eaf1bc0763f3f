//! BIOS Parameter Block parsing and FAT-type derivation (§4.D mount, §6 on-disk format).

use bytemuck::{Pod, Zeroable};

use crate::block::BlockDevice;
use crate::error::DevError;

pub const BPB_SIGNATURE: u16 = 0xAA55;

/// The portion of the boot sector every FAT revision shares (offsets 0-35), followed by
/// the FAT32-only extension this core reads when `fats_z16 == 0`.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawBpbCommon {
    bs_jmpboot: [u8; 3],
    bs_oemname: [u8; 8],
    bpb_byts_per_sec: u16,
    bpb_sec_per_clus: u8,
    bpb_rsvd_sec_cnt: u16,
    bpb_num_fats: u8,
    bpb_root_ent_cnt: u16,
    bpb_tot_sec_16: u16,
    bpb_media: u8,
    bpb_fat_sz_16: u16,
    bpb_sec_per_trk: u16,
    bpb_num_heads: u16,
    bpb_hidd_sec: u32,
    bpb_tot_sec_32: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawBpb32Extension {
    bpb_fat_sz_32: u32,
    bpb_ext_flags: u16,
    bpb_fs_ver: u16,
    bpb_root_clus: u32,
    bpb_fs_info: u16,
    bpb_bk_boot_sec: u16,
    _reserved: [u8; 12],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// A parsed and validated BPB, with every quantity the cluster-chain and directory
/// modules need already derived (§4.D: "FAT type is derived ... total clusters").
#[derive(Clone, Copy, Debug)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub fat_size_sectors: u32,
    pub total_sectors: u32,
    pub root_cluster: u32,
    pub fat_type: FatType,
    pub total_clusters: u32,
}

impl Bpb {
    /// Reads and validates the boot sector at LBA 0 (§6: "signature 0xAA55 at offset
    /// 510; identifier bytes `EB ?? 90` at offset 0").
    pub fn load(device: &dyn BlockDevice) -> Result<Self, DevError> {
        let sector_size = device.logical_sector_size();
        let mut sector = alloc::vec![0u8; sector_size.max(512) as usize];
        device.read_sectors(0, 1, &mut sector)?;

        if sector.len() < 512 {
            return Err(DevError::InvalidArgument);
        }
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != BPB_SIGNATURE {
            return Err(DevError::InvalidArgument);
        }
        if sector[0] != 0xEB || sector[2] != 0x90 {
            return Err(DevError::InvalidArgument);
        }

        let common: RawBpbCommon = *bytemuck::from_bytes(&sector[0..core::mem::size_of::<RawBpbCommon>()]);
        if common.bpb_byts_per_sec == 0 {
            // exFAT uses a zeroed legacy bytes-per-sector field; out of scope (§1 Non-goals).
            return Err(DevError::NotSupported);
        }

        let total_sectors = if common.bpb_tot_sec_16 != 0 {
            u32::from(common.bpb_tot_sec_16)
        } else {
            common.bpb_tot_sec_32
        };

        let (fat_size_sectors, root_cluster) = if common.bpb_fat_sz_16 != 0 {
            (u32::from(common.bpb_fat_sz_16), 0)
        } else {
            let ext_offset = core::mem::size_of::<RawBpbCommon>();
            let ext: RawBpb32Extension =
                *bytemuck::from_bytes(&sector[ext_offset..ext_offset + core::mem::size_of::<RawBpb32Extension>()]);
            (ext.bpb_fat_sz_32, ext.bpb_root_clus)
        };

        let root_dir_sectors =
            (u32::from(common.bpb_root_ent_cnt) * 32).div_ceil(u32::from(common.bpb_byts_per_sec));
        let data_sectors = total_sectors
            - (u32::from(common.bpb_rsvd_sec_cnt) + u32::from(common.bpb_num_fats) * fat_size_sectors + root_dir_sectors);
        let total_clusters = data_sectors / u32::from(common.bpb_sec_per_clus.max(1));

        let fat_type = if total_clusters < 4085 {
            FatType::Fat12
        } else if total_clusters < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        };

        Ok(Self {
            bytes_per_sector: common.bpb_byts_per_sec,
            sectors_per_cluster: common.bpb_sec_per_clus,
            reserved_sector_count: common.bpb_rsvd_sec_cnt,
            num_fats: common.bpb_num_fats,
            root_entry_count: common.bpb_root_ent_cnt,
            fat_size_sectors,
            total_sectors,
            root_cluster,
            fat_type,
            total_clusters,
        })
    }

    #[must_use]
    pub fn bytes_per_cluster(&self) -> u32 {
        u32::from(self.bytes_per_sector) * u32::from(self.sectors_per_cluster)
    }

    /// First sector of the FAT region (immediately after the reserved sectors).
    #[must_use]
    pub fn fat_start_sector(&self) -> u32 {
        u32::from(self.reserved_sector_count)
    }

    /// First sector of the fixed-size root directory region (FAT12/16 only; FAT32's
    /// root directory is an ordinary cluster chain starting at `root_cluster`).
    #[must_use]
    pub fn root_dir_start_sector(&self) -> u32 {
        self.fat_start_sector() + u32::from(self.num_fats) * self.fat_size_sectors
    }

    #[must_use]
    pub fn root_dir_sectors(&self) -> u32 {
        (u32::from(self.root_entry_count) * 32).div_ceil(u32::from(self.bytes_per_sector))
    }

    /// First sector of the data region, where cluster 2 begins (every FAT variant
    /// numbers the first data cluster 2, regardless of root-directory style).
    #[must_use]
    pub fn data_start_sector(&self) -> u32 {
        self.root_dir_start_sector() + self.root_dir_sectors()
    }

    #[must_use]
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_start_sector() + (cluster - 2) * u32::from(self.sectors_per_cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::MemoryBlockDevice;

    fn synthetic_fat16_image() -> MemoryBlockDevice {
        let sector_size = 512u32;
        let total_sectors = 20000u32;
        let device = MemoryBlockDevice::new(u64::from(total_sectors), sector_size);

        let mut sector = alloc::vec![0u8; 512];
        sector[0] = 0xEB;
        sector[2] = 0x90;
        sector[11..13].copy_from_slice(&(sector_size as u16).to_le_bytes());
        sector[13] = 4; // sectors_per_cluster
        sector[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved
        sector[16] = 2; // num_fats
        sector[17..19].copy_from_slice(&512u16.to_le_bytes()); // root_entry_count
        sector[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
        sector[22..24].copy_from_slice(&32u16.to_le_bytes()); // fat_size_16
        sector[510] = 0x55;
        sector[511] = 0xAA;
        device.write_sectors(0, 1, &sector).unwrap();
        device
    }

    #[test]
    fn classifies_fat16_by_cluster_count() {
        let device = synthetic_fat16_image();
        let bpb = Bpb::load(&device).unwrap();
        assert_eq!(bpb.fat_type, FatType::Fat16);
    }

    #[test]
    fn rejects_bad_signature() {
        let device = MemoryBlockDevice::new(32, 512);
        assert_eq!(Bpb::load(&device).unwrap_err(), DevError::InvalidArgument);
    }
}
