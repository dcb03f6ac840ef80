// Directory slab handling
// A directory is an ordered run of 32-byte entries: the root lives in a
// fixed region after the FATs, every other directory in a cluster chain.
// Loading renders a directory as a flat entry vector whose length is a
// whole number of clusters (or the fixed root capacity). Storing compacts
// deleted entries out and grows or shrinks the backing chain to fit.

use std::collections::HashSet;

use fatarc_core::FatarcError;
use log::{debug, error, warn};

use crate::dir_entry::{DirEntry, DIR_ENTRY_SIZE};
use crate::fat::{self, FatTable, FAT12_EOC};
use crate::image::DiskImage;

/// Where a loaded directory lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirHandle {
    /// The fixed root directory region.
    Root,
    /// A chained directory whose first cluster is `start`.
    Chain { start: u16 },
}

/// Decodes a raw byte run into directory entries.
pub fn decode_entries(raw: &[u8]) -> Vec<DirEntry> {
    raw.chunks_exact(DIR_ENTRY_SIZE).map(DirEntry::decode).collect()
}

/// Encodes entries back into their on-disk bytes.
pub fn encode_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(entries.len() * DIR_ENTRY_SIZE);
    for entry in entries {
        raw.extend_from_slice(&entry.encode());
    }
    raw
}

/// Loads the fixed root directory region. An unreadable root leaves a
/// session with nothing to stand on, so the error propagates.
pub fn load_root(image: &mut DiskImage) -> Result<Vec<DirEntry>, FatarcError> {
    let geometry = *image.geometry();
    let raw = image.read_at(geometry.root_dir_offset(), geometry.root_dir_bytes() as usize)?;
    Ok(decode_entries(&raw))
}

/// Follows a directory chain and decodes its entries. A cluster read
/// error keeps the prefix loaded so far, and a chain that loops back on
/// itself stops at the first repeat; both are logged, not fatal.
pub fn load_chain(image: &mut DiskImage, fat: &FatTable, start: u16) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let mut cluster = start;
    while fat::is_chain_link(cluster) {
        if !visited.insert(cluster) {
            warn!("Directory chain loops back to cluster {}", cluster);
            break;
        }
        match image.read_cluster(cluster) {
            Ok(raw) => entries.extend(decode_entries(&raw)),
            Err(e) => {
                warn!("Directory read error on cluster {}: {}", cluster, e);
                break;
            }
        }
        cluster = fat.get(cluster);
    }
    debug!(
        "Loaded directory at cluster {}: {} entry slots",
        start,
        entries.len()
    );
    entries
}

/// Live entries in their original order with deleted slots squeezed out.
/// The scan stops at the end-of-directory sentinel.
pub fn compact(entries: &[DirEntry]) -> Vec<DirEntry> {
    let mut live = Vec::new();
    for entry in entries {
        if entry.is_end() {
            break;
        }
        if !entry.is_deleted() {
            live.push(*entry);
        }
    }
    live
}

/// Compacts a root buffer back to its fixed capacity, padding the tail
/// with never-used entries. The caller writes the region at flush time.
pub fn compact_root(entries: &[DirEntry], capacity: usize) -> Vec<DirEntry> {
    let mut live = compact(entries);
    live.truncate(capacity);
    live.resize(capacity, DirEntry::empty());
    live
}

/// Rewrites a chained directory from `entries`, compacting first. The
/// chain grows a cluster at a time when the live entries overflow it and
/// surplus clusters are freed once they are no longer needed. On space
/// exhaustion mid-growth the chain is terminated at the last written
/// cluster before the error is reported, so the tree stays walkable.
pub fn store_chain(
    image: &mut DiskImage,
    fat: &mut FatTable,
    start: u16,
    entries: &[DirEntry],
) -> Result<(), FatarcError> {
    let geometry = *image.geometry();
    let per_cluster = geometry.entries_per_cluster() as usize;
    let live = compact(entries);
    // a directory always keeps at least its first cluster
    let clusters_needed = std::cmp::max(1, (live.len() + per_cluster - 1) / per_cluster);

    let mut cluster = start;
    let mut last = 0u16;
    for i in 0..clusters_needed {
        if !fat::is_chain_link(cluster) {
            // grew past the existing chain
            let fresh = match fat.find_free() {
                Some(c) => c,
                None => {
                    if last != 0 {
                        fat.set(last, FAT12_EOC);
                    }
                    return Err(FatarcError::OutOfSpace {
                        needed: geometry.cluster_size() as u64,
                        free: 0,
                    });
                }
            };
            if last != 0 {
                fat.set(last, fresh);
            }
            fat.set(fresh, FAT12_EOC);
            cluster = fresh;
        }
        let lo = i * per_cluster;
        let hi = usize::min(lo + per_cluster, live.len());
        let mut slab = live[lo..hi].to_vec();
        slab.resize(per_cluster, DirEntry::empty());
        if let Err(e) = image.write_cluster(cluster, &encode_entries(&slab)) {
            error!("Directory write error on cluster {}: {}", cluster, e);
            return Err(e);
        }
        last = cluster;
        cluster = fat.get(cluster);
    }
    if fat::is_chain_link(cluster) {
        // the directory shrank; cut the chain and free the tail
        fat.set(last, FAT12_EOC);
        fat.free_chain(cluster);
    }
    Ok(())
}

/// Index of the first live entry matching `component`. Deleted entries and
/// volume labels never match and the scan stops at the end sentinel.
pub fn find_entry(entries: &[DirEntry], component: &str) -> Option<usize> {
    for (i, entry) in entries.iter().enumerate() {
        if entry.is_end() {
            break;
        }
        if entry.is_deleted() || entry.is_volume_label() {
            continue;
        }
        if entry.matches_name(component) {
            return Some(i);
        }
    }
    None
}

/// Index of the first reusable slot: a deleted or never-used entry.
pub fn find_slot(entries: &[DirEntry]) -> Option<usize> {
    entries
        .iter()
        .position(|entry| entry.is_deleted() || entry.is_end())
}

/// True when only `.`/`..`, deleted and never-used entries remain, which
/// is the condition for deleting the directory itself.
pub fn is_empty_dir(entries: &[DirEntry]) -> bool {
    for entry in entries {
        if entry.is_end() {
            break;
        }
        if entry.is_deleted() || entry.is_dot() {
            continue;
        }
        return false;
    }
    true
}
