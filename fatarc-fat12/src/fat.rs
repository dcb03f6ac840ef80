// 12-bit file allocation table
// In-memory mirror of one FAT copy, packed two entries per three bytes
// exactly as on disk. Mutations mark the table dirty; the whole table is
// written back to every copy at session flush.

use fatarc_core::{FatarcError, Geometry};
use log::warn;

use crate::image::DiskImage;

/// Free cluster marker.
pub const FAT12_FREE: u16 = 0x000;
/// Bad cluster marker, skipped by allocation forever after.
pub const FAT12_BAD: u16 = 0xFF7;
/// End of cluster chain marker (the canonical value; 0xFF8..=0xFFF all end
/// a chain).
pub const FAT12_EOC: u16 = 0xFF8;

const FAT12_MASK: u16 = 0xFFF;

/// True for values that continue a chain: a cluster number in `2..0xFF7`.
/// Free, reserved, bad and end-of-chain values all stop a walk.
pub fn is_chain_link(value: u16) -> bool {
    (2..FAT12_BAD).contains(&value)
}

/// Reads entry `cluster` out of a packed FAT buffer.
///
/// Entry `i` lives in bytes `i * 3 / 2` and the one after; odd entries take
/// the high twelve bits of that pair, even entries the low twelve.
pub(crate) fn unpack_entry(table: &[u8], cluster: usize) -> u16 {
    let i = cluster * 3 / 2;
    if cluster & 1 == 1 {
        ((table[i] as u16 >> 4) & 0x00F) | ((table[i + 1] as u16) << 4 & 0xFF0)
    } else {
        (table[i] as u16 & 0x0FF) | ((table[i + 1] as u16) << 8 & 0xF00)
    }
}

/// Writes entry `cluster` into a packed FAT buffer, leaving the nibble
/// shared with the neighboring entry untouched.
pub(crate) fn pack_entry(table: &mut [u8], cluster: usize, value: u16) {
    let i = cluster * 3 / 2;
    if cluster & 1 == 1 {
        table[i] = (table[i] & 0x0F) | ((value << 4) as u8 & 0xF0);
        table[i + 1] = (value >> 4) as u8;
    } else {
        table[i] = value as u8;
        table[i + 1] = (table[i + 1] & 0xF0) | ((value >> 8) as u8 & 0x0F);
    }
}

pub struct FatTable {
    geometry: Geometry,
    data: Vec<u8>,
    dirty: bool,
}

impl FatTable {
    /// Reads the FAT from the image, trying each copy in order and keeping
    /// the first that reads fully.
    pub fn read(image: &mut DiskImage) -> Result<FatTable, FatarcError> {
        let geometry = *image.geometry();
        let size = geometry.fat_size_bytes() as usize;
        let mut last_err = None;
        for copy in 0..geometry.fat_copies {
            match image.read_at(geometry.fat_offset(copy), size) {
                Ok(data) => {
                    if copy > 0 {
                        warn!("FAT copy 0 unreadable, using copy {}", copy);
                    }
                    return Ok(FatTable {
                        geometry,
                        data,
                        dirty: false,
                    });
                }
                Err(e) => {
                    warn!("Read error on FAT copy {}: {}", copy, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            FatarcError::Configuration("No FAT copies configured".to_string())
        }))
    }

    /// An all-free table. Chain walks against it stop immediately, which
    /// lets a listing limp along when no FAT copy is readable.
    pub fn zeroed(geometry: Geometry) -> FatTable {
        FatTable {
            data: vec![0u8; geometry.fat_size_bytes() as usize],
            geometry,
            dirty: false,
        }
    }

    /// The table a freshly formatted image carries: media bytes `FF FF FF`
    /// in the two reserved entries, every data cluster free, and `0xFF9`
    /// filler in entries past the cluster count. Starts out dirty so the
    /// next flush writes it.
    pub fn formatted(geometry: Geometry) -> FatTable {
        let mut data = vec![0u8; geometry.fat_size_bytes() as usize];
        data[0] = 0xFF;
        data[1] = 0xFF;
        data[2] = 0xFF;
        let mut cluster = geometry.cluster_count as usize;
        while cluster * 3 / 2 + 1 < data.len() {
            pack_entry(&mut data, cluster, 0xFF9);
            cluster += 1;
        }
        FatTable {
            geometry,
            data,
            dirty: true,
        }
    }

    /// Looks up a FAT entry. Out-of-range clusters return `0xFFF`, an
    /// end-of-chain value, so every walk over a corrupt chain terminates.
    pub fn get(&self, cluster: u16) -> u16 {
        if cluster < 2 || cluster >= self.geometry.cluster_count {
            return FAT12_MASK;
        }
        unpack_entry(&self.data, cluster as usize)
    }

    /// Sets a FAT entry and marks the table dirty. Out-of-range clusters
    /// are ignored.
    pub fn set(&mut self, cluster: u16, value: u16) {
        if cluster < 2 || cluster >= self.geometry.cluster_count {
            return;
        }
        pack_entry(&mut self.data, cluster as usize, value & FAT12_MASK);
        self.dirty = true;
    }

    /// Frees every cluster on the chain starting at `start`. A start value
    /// outside the chain range is a no-op, so freeing an already-empty
    /// chain is harmless. Stops at bad clusters, which stay marked.
    pub fn free_chain(&mut self, start: u16) {
        let mut cluster = start;
        while is_chain_link(cluster) {
            let next = self.get(cluster);
            self.set(cluster, FAT12_FREE);
            cluster = next;
        }
    }

    /// First free cluster, scanning up from 2.
    pub fn find_free(&self) -> Option<u16> {
        (2..self.geometry.cluster_count).find(|&c| self.get(c) == FAT12_FREE)
    }

    /// Number of free clusters.
    pub fn free_clusters(&self) -> u32 {
        (2..self.geometry.cluster_count)
            .filter(|&c| self.get(c) == FAT12_FREE)
            .count() as u32
    }

    /// Free space in bytes.
    pub fn free_bytes(&self) -> u64 {
        self.free_clusters() as u64 * self.geometry.cluster_size() as u64
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the table back to every configured copy. Per-copy write
    /// errors are logged and ignored so one bad copy does not block the
    /// rest; the dirty flag clears regardless.
    pub fn flush(&mut self, image: &mut DiskImage) {
        if !self.dirty {
            return;
        }
        for copy in 0..self.geometry.fat_copies {
            if let Err(e) = image.write_at(self.geometry.fat_offset(copy), &self.data) {
                warn!("Write error on FAT copy {} ignored: {}", copy, e);
            }
        }
        self.dirty = false;
    }
}
