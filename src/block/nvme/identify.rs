//! Parsing of `IDENTIFY` CNS=Controller and CNS=Namespace data structures (§4.B step 4
//! and step 6).

use alloc::string::String;
use alloc::vec::Vec;

pub const IDENTIFY_DATA_SIZE: usize = 4096;

/// The fields this crate reads out of the 4KiB Identify Controller structure: model,
/// serial, firmware (ASCII, space-padded — unlike ATA's byte-swapped words, NVMe
/// strings are plain ASCII byte order).
pub struct ControllerIdentity {
    pub serial_number: String,
    pub model_number: String,
    pub firmware_revision: String,
}

#[must_use]
pub fn parse_controller_identity(data: &[u8; IDENTIFY_DATA_SIZE]) -> ControllerIdentity {
    ControllerIdentity {
        serial_number: ascii_field(&data[4..24]),
        model_number: ascii_field(&data[24..64]),
        firmware_revision: ascii_field(&data[64..72]),
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().into()
}

/// Derived from the Identify Namespace structure's `NSZE` and `LBAF[FLBAS]` fields (§4.B
/// step 6: `sector_size = 1 << ((lbaf[flbas&0x0F] >> 16) & 0xFF)`, `sectors = nsze`).
#[derive(Clone, Copy, Debug)]
pub struct NamespaceGeometry {
    pub sectors: u64,
    pub sector_size: u32,
}

#[must_use]
pub fn parse_namespace_geometry(data: &[u8; IDENTIFY_DATA_SIZE]) -> NamespaceGeometry {
    let nsze = u64::from_le_bytes(data[0..8].try_into().unwrap_or_default());
    let flbas = data[26] & 0x0F;
    let lbaf_offset = 128 + usize::from(flbas) * 4;
    let lbaf = u32::from_le_bytes(data[lbaf_offset..lbaf_offset + 4].try_into().unwrap_or_default());
    let lbads = (lbaf >> 16) & 0xFF;
    NamespaceGeometry {
        sectors: nsze,
        sector_size: 1u32 << lbads,
    }
}

/// Parses a CNS=Active Namespace List response: a flat array of 32-bit namespace IDs,
/// terminated by the first zero entry.
#[must_use]
pub fn parse_active_namespace_list(data: &[u8; IDENTIFY_DATA_SIZE]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap_or_default()))
        .take_while(|&nsid| nsid != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespace_geometry_from_lbaf_table() {
        let mut data = [0u8; IDENTIFY_DATA_SIZE];
        data[0..8].copy_from_slice(&1_000_000u64.to_le_bytes());
        data[26] = 0; // FLBAS selects LBAF0
        let lbads = 9u32; // 512-byte sectors
        data[128..132].copy_from_slice(&(lbads << 16).to_le_bytes());

        let geometry = parse_namespace_geometry(&data);
        assert_eq!(geometry.sectors, 1_000_000);
        assert_eq!(geometry.sector_size, 512);
    }

    #[test]
    fn namespace_list_stops_at_first_zero() {
        let mut data = [0u8; IDENTIFY_DATA_SIZE];
        data[0..4].copy_from_slice(&1u32.to_le_bytes());
        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(parse_active_namespace_list(&data), alloc::vec![1, 2]);
    }
}
