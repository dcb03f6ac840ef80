// Boot record codec
// The classic 30-byte boot record at the start of the image. Fields are
// little-endian on disk no matter what the host byte order is, so the
// codec is explicit rather than a struct overlay.

use std::fmt;

use fatarc_core::{FatarcError, Geometry};

/// Bytes of the boot record we read and write.
pub const BOOT_RECORD_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub oem_label: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    pub max_root_entries: u16,
    pub total_sectors: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u16,
}

impl BootSector {
    /// Decodes the boot record from the start of a sector buffer.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, FatarcError> {
        if raw.len() < BOOT_RECORD_SIZE {
            return Err(FatarcError::InvalidInput(format!(
                "Boot record needs {} bytes, got {}",
                BOOT_RECORD_SIZE,
                raw.len()
            )));
        }
        let le16 = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let mut jump = [0u8; 3];
        jump.copy_from_slice(&raw[0..3]);
        let mut oem_label = [0u8; 8];
        oem_label.copy_from_slice(&raw[3..11]);
        Ok(BootSector {
            jump,
            oem_label,
            bytes_per_sector: le16(11),
            sectors_per_cluster: raw[13],
            reserved_sectors: le16(14),
            fat_copies: raw[16],
            max_root_entries: le16(17),
            total_sectors: le16(19),
            media_descriptor: raw[21],
            sectors_per_fat: le16(22),
            sectors_per_track: le16(24),
            heads: le16(26),
            hidden_sectors: le16(28),
        })
    }

    /// Encodes the record into its on-disk form.
    pub fn to_bytes(&self) -> [u8; BOOT_RECORD_SIZE] {
        let mut raw = [0u8; BOOT_RECORD_SIZE];
        raw[0..3].copy_from_slice(&self.jump);
        raw[3..11].copy_from_slice(&self.oem_label);
        raw[11..13].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        raw[13] = self.sectors_per_cluster;
        raw[14..16].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        raw[16] = self.fat_copies;
        raw[17..19].copy_from_slice(&self.max_root_entries.to_le_bytes());
        raw[19..21].copy_from_slice(&self.total_sectors.to_le_bytes());
        raw[21] = self.media_descriptor;
        raw[22..24].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        raw[24..26].copy_from_slice(&self.sectors_per_track.to_le_bytes());
        raw[26..28].copy_from_slice(&self.heads.to_le_bytes());
        raw[28..30].copy_from_slice(&self.hidden_sectors.to_le_bytes());
        raw
    }

    /// Builds the record a freshly formatted image carries. Track and head
    /// counts are not part of the geometry model and are left zero.
    pub fn from_geometry(geometry: &Geometry) -> Self {
        let total_sectors = (geometry.total_bytes() / geometry.bytes_per_sector as u64) as u16;
        BootSector {
            // short jump over the record, then a nop
            jump: [0xEB, 0x1C, 0x90],
            oem_label: *b"fatarc  ",
            bytes_per_sector: geometry.bytes_per_sector as u16,
            sectors_per_cluster: geometry.sectors_per_cluster as u8,
            reserved_sectors: geometry.fat_start_sector as u16,
            fat_copies: geometry.fat_copies,
            max_root_entries: geometry.root_entries as u16,
            total_sectors,
            // matches the first FAT byte
            media_descriptor: 0xFF,
            sectors_per_fat: geometry.sectors_per_fat as u16,
            sectors_per_track: 0,
            heads: 0,
            hidden_sectors: 0,
        }
    }
}

impl fmt::Display for BootSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let oem: String = self
            .oem_label
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(
            f,
            "Jump instruction:     {:02x} {:02x} {:02x}",
            self.jump[0], self.jump[1], self.jump[2]
        )?;
        writeln!(f, "OEM label:            \"{}\"", oem)?;
        writeln!(f, "Bytes per sector:     {}", self.bytes_per_sector)?;
        writeln!(f, "Sectors per cluster:  {}", self.sectors_per_cluster)?;
        writeln!(f, "Reserved sectors:     {}", self.reserved_sectors)?;
        writeln!(f, "FAT copies:           {}", self.fat_copies)?;
        writeln!(f, "Root entries:         {}", self.max_root_entries)?;
        writeln!(f, "Total sectors:        {}", self.total_sectors)?;
        writeln!(f, "Media descriptor:     {:#04x}", self.media_descriptor)?;
        writeln!(f, "Sectors per FAT:      {}", self.sectors_per_fat)?;
        writeln!(f, "Sectors per track:    {}", self.sectors_per_track)?;
        writeln!(f, "Heads:                {}", self.heads)?;
        write!(f, "Hidden sectors:       {}", self.hidden_sectors)
    }
}
