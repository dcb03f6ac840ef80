// Image formatting
// Writes the fixed structures of a fresh filesystem that live outside
// the session's in-memory buffers: the boot record and the marker byte
// formatted disks carry at the start of the second sector. The FAT and
// root directory are reset in memory by the session and written back at
// flush like any other change.

use fatarc_core::FatarcError;
use log::debug;

use crate::boot_sector::BootSector;
use crate::image::DiskImage;

/// Writes a boot sector derived from the image geometry, zero-padding
/// the rest of the first sector, then the 0xFF marker at the start of
/// the second.
pub fn format_image(image: &mut DiskImage) -> Result<(), FatarcError> {
    let geometry = *image.geometry();
    let boot = BootSector::from_geometry(&geometry);
    let mut sector = vec![0u8; geometry.bytes_per_sector as usize];
    let raw = boot.to_bytes();
    sector[..raw.len()].copy_from_slice(&raw);
    image.write_at(0, &sector)?;
    image.write_at(geometry.bytes_per_sector as u64, &[0xFF])?;
    debug!("Boot record rewritten");
    Ok(())
}
