// Session controller
// One open image, its in-memory FAT and root directory, and the dirty
// flags that decide what gets written back. Item-level operations report
// per path so a batch keeps going past a bad item; only a structurally
// unreadable image is fatal. Subdirectories are loaded for the duration
// of one operation, the FAT and root live for the whole session.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use fatarc_core::{FatarcError, Geometry};
use log::{debug, info, warn};

use crate::boot_sector::{BootSector, BOOT_RECORD_SIZE};
use crate::dir_entry::{DirEntry, DOTDOT_NAME, DOT_NAME};
use crate::directory::{self, DirHandle};
use crate::fat::{FatTable, FAT12_EOC, FAT12_FREE};
use crate::formatter;
use crate::image::DiskImage;
use crate::timestamps;
use crate::transfer;

type FatarcResult<T> = Result<T, FatarcError>;

/// Per-session tuning.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Rewrite line endings during transfers.
    pub ascii: bool,
    /// Open with an empty FAT when no copy is readable, which still
    /// allows listing the root and the first cluster of each directory.
    pub tolerate_bad_fat: bool,
}

/// One line of a listing walk, in presentation order.
#[derive(Debug, Clone)]
pub enum ListItem {
    /// A live file or directory entry at `path`.
    Entry { path: String, entry: DirEntry },
    /// The walk is about to descend into the directory at `path`.
    Descend { path: String },
}

/// What happened to one requested path.
#[derive(Debug)]
pub enum Outcome {
    Added,
    Updated,
    CreatedDirectory,
    DirectoryExists,
    Extracted,
    Deleted,
    Failed(FatarcError),
}

/// Per-path report from a batch operation.
#[derive(Debug)]
pub struct OpEvent {
    pub path: String,
    pub outcome: Outcome,
}

impl OpEvent {
    fn failed(path: &str, error: FatarcError) -> OpEvent {
        OpEvent {
            path: path.to_string(),
            outcome: Outcome::Failed(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// How a path relates to the active listing filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterMatch {
    /// Inside a filtered subtree, list it.
    Show,
    /// On the way to a filter, keep walking but do not list.
    Descend,
    /// Cannot contain a match, skip the subtree.
    Prune,
}

fn filter_match(path: &str, filters: &[String]) -> FilterMatch {
    if filters.is_empty() {
        return FilterMatch::Show;
    }
    let mut on_the_way = false;
    for filter in filters {
        if path.starts_with(filter.as_str()) {
            return FilterMatch::Show;
        }
        if filter.starts_with(path) {
            on_the_way = true;
        }
    }
    if on_the_way {
        FilterMatch::Descend
    } else {
        FilterMatch::Prune
    }
}

/// Non-empty components of a slash-separated image path.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// An open FAT12 image with its session state.
///
/// Mutating operations update the in-memory FAT and directory buffers and
/// the data area as they go; the FAT copies and the root directory region
/// are written back once, at [`flush`](Fat12Session::flush) or on drop.
pub struct Fat12Session {
    image: DiskImage,
    fat: FatTable,
    root: Vec<DirEntry>,
    root_dirty: bool,
    options: SessionOptions,
}

impl Fat12Session {
    /// Opens an image and reads its FAT and root directory. An unreadable
    /// FAT fails the open unless the options tolerate it; an unreadable
    /// root directory always does.
    pub fn open(
        path: &Path,
        geometry: Geometry,
        writable: bool,
        options: SessionOptions,
    ) -> FatarcResult<Fat12Session> {
        let mut image = DiskImage::open(path, geometry, writable)?;
        let fat = match FatTable::read(&mut image) {
            Ok(fat) => fat,
            Err(e) if options.tolerate_bad_fat => {
                warn!("No readable FAT copy, continuing with an empty table: {}", e);
                FatTable::zeroed(geometry)
            }
            Err(e) => return Err(e),
        };
        let root = directory::load_root(&mut image)?;
        debug!(
            "Session opened on {} ({} bytes free)",
            path.display(),
            fat.free_bytes()
        );
        Ok(Fat12Session {
            image,
            fat,
            root,
            root_dirty: false,
            options,
        })
    }

    pub fn geometry(&self) -> Geometry {
        *self.image.geometry()
    }

    pub fn free_bytes(&self) -> u64 {
        self.fat.free_bytes()
    }

    /// The boot record as currently on disk.
    pub fn boot_sector(&mut self) -> FatarcResult<BootSector> {
        let raw = self.image.read_at(0, BOOT_RECORD_SIZE)?;
        BootSector::from_bytes(&raw)
    }

    /// The last volume label in the root directory, if any.
    pub fn volume_label(&self) -> Option<String> {
        let mut label = None;
        for entry in &self.root {
            if entry.is_end() {
                break;
            }
            if entry.is_live() && entry.is_volume_label() {
                label = Some(entry.display_name());
            }
        }
        label
    }

    /// Writes back whatever is dirty: the root directory region, then the
    /// FAT copies, then the underlying file buffers. A root write error is
    /// reported; FAT copy errors are logged per copy and do not stop the
    /// flush.
    pub fn flush(&mut self) -> FatarcResult<()> {
        if self.root_dirty {
            let raw = directory::encode_entries(&self.root);
            self.image.write_at(self.geometry().root_dir_offset(), &raw)?;
            self.root_dirty = false;
            debug!("Root directory written back");
        }
        self.fat.flush(&mut self.image);
        self.image.flush()?;
        Ok(())
    }

    /// Reinitializes the image in place: boot record, empty FAT with its
    /// reserved and filler entries, empty root directory. Data clusters
    /// are not wiped, only unreferenced.
    pub fn format(&mut self) -> FatarcResult<()> {
        let geometry = self.geometry();
        formatter::format_image(&mut self.image)?;
        self.fat = FatTable::formatted(geometry);
        self.root = vec![DirEntry::format_fill(); geometry.root_entries as usize];
        self.root_dirty = true;
        info!("Formatted {}", self.image.path().display());
        Ok(())
    }

    fn store_dir(&mut self, handle: DirHandle, entries: &[DirEntry]) -> FatarcResult<()> {
        match handle {
            DirHandle::Root => {
                let capacity = self.geometry().root_entries as usize;
                self.root = directory::compact_root(entries, capacity);
                self.root_dirty = true;
                Ok(())
            }
            DirHandle::Chain { start } => {
                directory::store_chain(&mut self.image, &mut self.fat, start, entries)
            }
        }
    }

    /// Resolves all but the last component of `path` through nested
    /// directories. Returns the parent directory and the final name.
    fn resolve_parent(
        &mut self,
        path: &str,
    ) -> FatarcResult<(DirHandle, Vec<DirEntry>, String)> {
        let parts = components(path);
        let Some((last, dirs)) = parts.split_last() else {
            return Err(FatarcError::InvalidInput(format!("Empty path: {:?}", path)));
        };
        for part in &parts {
            if *part == "." || *part == ".." {
                return Err(FatarcError::InvalidInput(format!(
                    "Path {:?} may not contain . or .. components",
                    path
                )));
            }
        }
        let mut handle = DirHandle::Root;
        let mut entries = self.root.clone();
        let mut walked = String::new();
        for part in dirs {
            walked = join_path(&walked, part);
            let i = directory::find_entry(&entries, part)
                .ok_or_else(|| FatarcError::NotFound(walked.clone()))?;
            let entry = entries[i];
            if !entry.is_directory() {
                return Err(FatarcError::PathConflict(format!(
                    "{} is not a directory",
                    walked
                )));
            }
            handle = DirHandle::Chain { start: entry.start };
            entries = directory::load_chain(&mut self.image, &self.fat, entry.start);
        }
        Ok((handle, entries, last.to_string()))
    }

    /// Resolves `path` to an existing entry inside its parent directory.
    fn resolve(&mut self, path: &str) -> FatarcResult<(DirHandle, Vec<DirEntry>, usize)> {
        let (handle, entries, last) = self.resolve_parent(path)?;
        let i = directory::find_entry(&entries, &last)
            .ok_or_else(|| FatarcError::NotFound(path.to_string()))?;
        Ok((handle, entries, i))
    }

    /// Walks the tree depth-first and returns it in presentation order:
    /// for each directory all its own entries first, then a descent into
    /// each subdirectory. Filters match as raw path prefixes in either
    /// direction and prune subtrees that cannot match; while filters are
    /// active, directory entries themselves are not listed.
    pub fn list(&mut self, filters: &[String]) -> Vec<ListItem> {
        let root = self.root.clone();
        let mut items = Vec::new();
        self.walk(&root, "", filters, &mut items);
        items
    }

    fn walk(
        &mut self,
        entries: &[DirEntry],
        prefix: &str,
        filters: &[String],
        out: &mut Vec<ListItem>,
    ) {
        for entry in entries {
            if entry.is_end() {
                break;
            }
            if !entry.is_live() || entry.is_dot() || entry.is_volume_label() {
                continue;
            }
            if entry.is_directory() && !filters.is_empty() {
                continue;
            }
            let path = join_path(prefix, &entry.display_name());
            if filter_match(&path, filters) == FilterMatch::Show {
                out.push(ListItem::Entry {
                    path,
                    entry: *entry,
                });
            }
        }
        for entry in entries {
            if entry.is_end() {
                break;
            }
            if !entry.is_live() || entry.is_dot() || !entry.is_directory() {
                continue;
            }
            let path = join_path(prefix, &entry.display_name());
            if filter_match(&path, filters) == FilterMatch::Prune {
                continue;
            }
            out.push(ListItem::Descend { path: path.clone() });
            let child = directory::load_chain(&mut self.image, &self.fat, entry.start);
            self.walk(&child, &path, filters, out);
        }
    }

    /// Copies a host file or directory tree onto the image at `dest`.
    /// Directories recurse over their children in name order. Every
    /// touched path gets its own event; a failure never stops the rest
    /// of the batch.
    pub fn replace(&mut self, host: &Path, dest: &str) -> Vec<OpEvent> {
        let dest = components(dest).join("/");
        let mut events = Vec::new();
        self.replace_inner(host, &dest, &mut events);
        events
    }

    fn replace_inner(&mut self, host: &Path, dest: &str, events: &mut Vec<OpEvent>) {
        let meta = match fs::metadata(host) {
            Ok(meta) => meta,
            Err(e) => {
                events.push(OpEvent::failed(dest, e.into()));
                return;
            }
        };
        if !meta.is_dir() {
            let outcome = match self.insert_file(host, dest) {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Failed(e),
            };
            events.push(OpEvent {
                path: dest.to_string(),
                outcome,
            });
            return;
        }

        let mtime: DateTime<Local> = match meta.modified() {
            Ok(t) => t.into(),
            Err(_) => Local::now(),
        };
        match self.ensure_directory(dest, &mtime) {
            Ok(outcome) => events.push(OpEvent {
                path: dest.to_string(),
                outcome,
            }),
            Err(e) => {
                events.push(OpEvent::failed(dest, e));
                return;
            }
        }
        let mut children: Vec<PathBuf> = match fs::read_dir(host) {
            Ok(iter) => iter.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(e) => {
                events.push(OpEvent::failed(dest, e.into()));
                return;
            }
        };
        children.sort();
        for child in children {
            let name = match child.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            let child_dest = join_path(dest, &name);
            self.replace_inner(&child, &child_dest, events);
        }
    }

    /// Inserts one host file, updating in place when the name already
    /// exists. The parent directory is stored even when the transfer
    /// fails partway, so the freed old chain and any committed prefix
    /// stay consistent on disk.
    fn insert_file(&mut self, host: &Path, dest: &str) -> FatarcResult<Outcome> {
        let mut file = File::open(host)?;
        let mtime: DateTime<Local> = file.metadata()?.modified()?.into();
        let (handle, mut entries, last) = self.resolve_parent(dest)?;

        let mut outcome = Outcome::Added;
        if let Some(i) = directory::find_entry(&entries, &last) {
            if entries[i].is_directory() {
                return Err(FatarcError::PathConflict(format!(
                    "{} is a directory on the image",
                    dest
                )));
            }
            self.fat.free_chain(entries[i].start);
            entries[i].mark_deleted();
            outcome = Outcome::Updated;
        }

        let result = self.insert_into(handle, &mut entries, &last, &mut file, &mtime);
        self.store_dir(handle, &entries)?;
        result?;
        debug!("Inserted {} from {}", dest, host.display());
        Ok(outcome)
    }

    fn insert_into(
        &mut self,
        handle: DirHandle,
        entries: &mut Vec<DirEntry>,
        name: &str,
        file: &mut File,
        mtime: &DateTime<Local>,
    ) -> FatarcResult<()> {
        let ascii = self.options.ascii;
        // quick gate on the host length, then the exact transfer size
        // with CR expansion, decided before any allocation
        let quick = file.metadata()?.len();
        let free = self.fat.free_bytes();
        if quick > free {
            return Err(FatarcError::OutOfSpace { needed: quick, free });
        }
        let needed = transfer::transfer_size(file, ascii)?;
        if needed > free {
            return Err(FatarcError::OutOfSpace { needed, free });
        }

        let slot = match directory::find_slot(entries) {
            Some(i) => i,
            None => match handle {
                DirHandle::Root => return Err(FatarcError::RootDirectoryFull),
                DirHandle::Chain { .. } => {
                    // growing the directory costs one more cluster
                    let grown = needed + self.geometry().cluster_size() as u64;
                    if grown > free {
                        return Err(FatarcError::OutOfSpace {
                            needed: grown,
                            free,
                        });
                    }
                    entries.push(DirEntry::empty());
                    entries.len() - 1
                }
            },
        };

        let result = if ascii {
            let mut source = transfer::AsciiExpand::new(&mut *file);
            transfer::write_from_host(&mut self.image, &mut self.fat, &mut source)
        } else {
            transfer::write_from_host(&mut self.image, &mut self.fat, file)
        };

        let mut entry = DirEntry::new_file(name, result.size, mtime);
        entry.start = result.start;
        entries[slot] = entry;
        match result.aborted {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Creates the directory at `dest` unless it already exists. A file
    /// in the way is a conflict, never silently replaced.
    fn ensure_directory(
        &mut self,
        dest: &str,
        mtime: &DateTime<Local>,
    ) -> FatarcResult<Outcome> {
        let (handle, mut entries, last) = self.resolve_parent(dest)?;
        if let Some(i) = directory::find_entry(&entries, &last) {
            if entries[i].is_directory() {
                return Ok(Outcome::DirectoryExists);
            }
            return Err(FatarcError::PathConflict(format!(
                "{} exists as a file on the image",
                dest
            )));
        }
        self.make_directory(handle, &mut entries, &last, mtime)?;
        self.store_dir(handle, &entries)?;
        debug!("Created directory {}", dest);
        Ok(Outcome::CreatedDirectory)
    }

    /// Allocates and writes a fresh directory cluster with its `.` and
    /// `..` entries, then places the new entry in the parent buffer. The
    /// cluster is written before the parent is stored so an interruption
    /// leaves a valid, if unreferenced, directory.
    fn make_directory(
        &mut self,
        handle: DirHandle,
        entries: &mut Vec<DirEntry>,
        name: &str,
        mtime: &DateTime<Local>,
    ) -> FatarcResult<()> {
        let geometry = self.geometry();
        let slot = match directory::find_slot(entries) {
            Some(i) => i,
            None => match handle {
                DirHandle::Root => return Err(FatarcError::RootDirectoryFull),
                DirHandle::Chain { .. } => {
                    entries.push(DirEntry::empty());
                    entries.len() - 1
                }
            },
        };

        let cluster = match self.fat.find_free() {
            Some(c) => c,
            None => {
                return Err(FatarcError::OutOfSpace {
                    needed: geometry.cluster_size() as u64,
                    free: 0,
                })
            }
        };
        self.fat.set(cluster, FAT12_EOC);

        let parent_start = match handle {
            DirHandle::Root => 0,
            DirHandle::Chain { start } => start,
        };
        let mut slab = vec![DirEntry::format_fill(); geometry.entries_per_cluster() as usize];
        slab[0] = DirEntry::dot(DOT_NAME, cluster);
        slab[1] = DirEntry::dot(DOTDOT_NAME, parent_start);
        if let Err(e) = self.image.write_cluster(cluster, &directory::encode_entries(&slab)) {
            // the directory never came to exist, give the cluster back
            self.fat.set(cluster, FAT12_FREE);
            return Err(e);
        }

        let mut entry = DirEntry::new_directory(name, mtime);
        entry.start = cluster;
        entries[slot] = entry;
        Ok(())
    }

    /// Deletes one file or empty directory and persists the parent.
    pub fn delete(&mut self, path: &str) -> OpEvent {
        let outcome = match self.delete_inner(path) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e),
        };
        OpEvent {
            path: path.to_string(),
            outcome,
        }
    }

    fn delete_inner(&mut self, path: &str) -> FatarcResult<Outcome> {
        let (handle, mut entries, i) = self.resolve(path)?;
        let entry = entries[i];
        if entry.is_directory() {
            let child = directory::load_chain(&mut self.image, &self.fat, entry.start);
            if !directory::is_empty_dir(&child) {
                return Err(FatarcError::DirectoryNotEmpty(path.to_string()));
            }
        }
        self.fat.free_chain(entry.start);
        entries[i].mark_deleted();
        self.store_dir(handle, &entries)?;
        debug!("Deleted {}", path);
        Ok(Outcome::Deleted)
    }

    /// Extracts one image path below `dest_root` on the host, recursing
    /// over directories. Host directories are created as needed.
    pub fn extract(&mut self, path: &str, dest_root: &Path) -> Vec<OpEvent> {
        let mut events = Vec::new();
        match self.resolve(path) {
            Ok((_, entries, i)) => {
                let entry = entries[i];
                let normalized = components(path).join("/");
                self.extract_entry(&entry, &normalized, dest_root, &mut events);
            }
            Err(e) => events.push(OpEvent::failed(path, e)),
        }
        events
    }

    /// Extracts every entry of the root directory.
    pub fn extract_all(&mut self, dest_root: &Path) -> Vec<OpEvent> {
        let root = self.root.clone();
        let mut events = Vec::new();
        for entry in &root {
            if entry.is_end() {
                break;
            }
            if !entry.is_live() || entry.is_dot() || entry.is_volume_label() {
                continue;
            }
            let path = entry.display_name();
            self.extract_entry(entry, &path, dest_root, &mut events);
        }
        events
    }

    fn extract_entry(
        &mut self,
        entry: &DirEntry,
        path: &str,
        dest_root: &Path,
        events: &mut Vec<OpEvent>,
    ) {
        if entry.is_directory() {
            let host_dir = dest_root.join(path);
            if let Err(e) = fs::create_dir_all(&host_dir) {
                events.push(OpEvent::failed(path, e.into()));
                return;
            }
            events.push(OpEvent {
                path: path.to_string(),
                outcome: Outcome::Extracted,
            });
            let children = directory::load_chain(&mut self.image, &self.fat, entry.start);
            for child in &children {
                if child.is_end() {
                    break;
                }
                if !child.is_live() || child.is_dot() || child.is_volume_label() {
                    continue;
                }
                let child_path = join_path(path, &child.display_name());
                self.extract_entry(child, &child_path, dest_root, events);
            }
            return;
        }
        let outcome = match self.extract_file(entry, path, dest_root) {
            Ok(()) => Outcome::Extracted,
            Err(e) => Outcome::Failed(e),
        };
        events.push(OpEvent {
            path: path.to_string(),
            outcome,
        });
    }

    fn extract_file(
        &mut self,
        entry: &DirEntry,
        path: &str,
        dest_root: &Path,
    ) -> FatarcResult<()> {
        let host_path = dest_root.join(path);
        if let Some(parent) = host_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = File::create(&host_path)?;
        {
            let mut writer = BufWriter::new(&mut file);
            transfer::read_to_host(
                &mut self.image,
                &self.fat,
                entry,
                &mut writer,
                self.options.ascii,
            )?;
            writer.flush()?;
        }
        // carry the recorded timestamp and read-only bit over, best effort
        if let Some(mtime) = timestamps::decode_datetime(entry.date, entry.time) {
            let _ = file.set_modified(SystemTime::from(mtime));
        }
        if entry.is_read_only() {
            if let Ok(meta) = file.metadata() {
                let mut perms = meta.permissions();
                perms.set_readonly(true);
                let _ = file.set_permissions(perms);
            }
        }
        Ok(())
    }
}

impl Drop for Fat12Session {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_drop_empty_segments() {
        assert_eq!(components("a/b/c.txt"), vec!["a", "b", "c.txt"]);
        assert_eq!(components("/a//b/"), vec!["a", "b"]);
        assert!(components("").is_empty());
        assert!(components("///").is_empty());
    }

    #[test]
    fn filters_match_as_prefixes_both_ways() {
        let filters = vec!["sub/inner".to_string()];
        assert_eq!(filter_match("sub/inner", &filters), FilterMatch::Show);
        assert_eq!(
            filter_match("sub/inner/file.txt", &filters),
            FilterMatch::Show
        );
        assert_eq!(filter_match("sub", &filters), FilterMatch::Descend);
        assert_eq!(filter_match("other", &filters), FilterMatch::Prune);
        assert_eq!(filter_match("anything", &[]), FilterMatch::Show);
    }

    #[test]
    fn joined_paths_have_no_leading_slash() {
        assert_eq!(join_path("", "top.txt"), "top.txt");
        assert_eq!(join_path("sub", "inner"), "sub/inner");
    }
}
