// Disk image access
// Byte- and cluster-addressed I/O on the backing image file

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fatarc_core::{FatarcError, Geometry};
use log::{debug, warn};

/// An open FAT12 disk image. The geometry is fixed at open time and every
/// region accessor derives its offsets from it.
pub struct DiskImage {
    file: File,
    geometry: Geometry,
    path: PathBuf,
}

impl DiskImage {
    /// Opens an existing image file.
    pub fn open(path: &Path, geometry: Geometry, writable: bool) -> Result<Self, FatarcError> {
        geometry.validate()?;
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        debug!(
            "Opened image {} ({} bytes per the geometry)",
            path.display(),
            geometry.total_bytes()
        );
        Ok(DiskImage {
            file,
            geometry,
            path: path.to_path_buf(),
        })
    }

    /// Creates a fresh image file pre-sized to the geometry. An existing
    /// file at the path is truncated.
    pub fn create(path: &Path, geometry: Geometry) -> Result<Self, FatarcError> {
        geometry.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(geometry.total_bytes())?;
        debug!(
            "Created image {} ({} bytes)",
            path.display(),
            geometry.total_bytes()
        );
        Ok(DiskImage {
            file,
            geometry,
            path: path.to_path_buf(),
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads exactly `len` bytes at the given byte offset.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, FatarcError> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes the whole buffer at the given byte offset.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), FatarcError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn cluster_offset(&self, cluster: u16) -> Result<u64, FatarcError> {
        if cluster < 2 || cluster >= self.geometry.cluster_count {
            return Err(FatarcError::InvalidInput(format!(
                "Cluster {} out of range",
                cluster
            )));
        }
        Ok(self.geometry.data_offset()
            + (cluster as u64 - 2) * self.geometry.cluster_size() as u64)
    }

    /// Reads one whole cluster from the data area.
    pub fn read_cluster(&mut self, cluster: u16) -> Result<Vec<u8>, FatarcError> {
        let offset = self.cluster_offset(cluster)?;
        self.read_at(offset, self.geometry.cluster_size() as usize)
    }

    /// Reads a cluster, substituting zeroes when the read fails so a
    /// traversal can continue past unreadable media. The failure is logged.
    pub fn read_cluster_or_zeroes(&mut self, cluster: u16) -> Vec<u8> {
        match self.read_cluster(cluster) {
            Ok(data) => data,
            Err(e) => {
                warn!("Read error on cluster {} ignored: {}", cluster, e);
                vec![0u8; self.geometry.cluster_size() as usize]
            }
        }
    }

    /// Writes one cluster, zero-padding short data to the full cluster size.
    pub fn write_cluster(&mut self, cluster: u16, data: &[u8]) -> Result<(), FatarcError> {
        let size = self.geometry.cluster_size() as usize;
        if data.len() > size {
            return Err(FatarcError::InvalidInput(format!(
                "Data of {} bytes exceeds the {} byte cluster size",
                data.len(),
                size
            )));
        }
        let offset = self.cluster_offset(cluster)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        if data.len() < size {
            let padding = vec![0u8; size - data.len()];
            self.file.write_all(&padding)?;
        }
        Ok(())
    }

    /// Flushes buffered writes to the backing file.
    pub fn flush(&mut self) -> Result<(), FatarcError> {
        self.file.flush()?;
        Ok(())
    }
}
