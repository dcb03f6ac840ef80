// On-disk directory entries
// The 32-byte FAT directory entry: an 8.3 name, attribute bits, packed
// local timestamps, the chain start and the byte size. Multi-byte fields
// are little-endian on disk regardless of host order, so decode and
// encode normalize explicitly and are exact inverses of each other.

use chrono::{DateTime, Local};

use crate::timestamps;

/// Bytes per directory entry on disk.
pub const DIR_ENTRY_SIZE: usize = 32;
/// First name byte of a deleted entry.
pub const DELETED_MARKER: u8 = 0xE5;
/// First name byte of a never-used entry, ending the directory scan.
pub const END_MARKER: u8 = 0x00;

/// 8.3 name of the `.` self entry.
pub const DOT_NAME: [u8; 11] = *b".          ";
/// 8.3 name of the `..` parent entry.
pub const DOTDOT_NAME: [u8; 11] = *b"..         ";

/// Directory entry attribute bits.
pub struct Attributes;

impl Attributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_LABEL: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Raw 8.3 name: eight base characters then a three character
    /// extension, space-padded, upper case on disk.
    pub name: [u8; 11],
    pub attributes: u8,
    /// Ten reserved bytes, preserved verbatim so rewriting a directory
    /// never changes bytes we do not interpret.
    pub reserved: [u8; 10],
    /// Packed modification time word.
    pub time: u16,
    /// Packed modification date word.
    pub date: u16,
    /// First cluster of the content chain, 0 when no cluster is allocated.
    pub start: u16,
    /// Content size in bytes. Always 0 for directories.
    pub size: u32,
}

impl DirEntry {
    /// A never-used slot, all zero.
    pub const fn empty() -> DirEntry {
        DirEntry {
            name: [0; 11],
            attributes: 0,
            reserved: [0; 10],
            time: 0,
            date: 0,
            start: 0,
            size: 0,
        }
    }

    /// The fill pattern formatting lays down: an end-of-entries name byte,
    /// every other byte the deleted marker.
    pub fn format_fill() -> DirEntry {
        let mut raw = [DELETED_MARKER; DIR_ENTRY_SIZE];
        raw[0] = END_MARKER;
        DirEntry::decode(&raw)
    }

    /// A `.` or `..` entry pointing at `start`. The historical tools wrote
    /// these with zeroed timestamps and only the directory attribute.
    pub fn dot(name: [u8; 11], start: u16) -> DirEntry {
        DirEntry {
            name,
            attributes: Attributes::DIRECTORY,
            start,
            ..DirEntry::empty()
        }
    }

    /// Builds a file entry from a host name and modification time. The
    /// chain start is filled in once content has been written.
    pub fn new_file(host_name: &str, size: u32, mtime: &DateTime<Local>) -> DirEntry {
        let (date, time) = timestamps::encode_datetime(mtime);
        DirEntry {
            name: pack_name(host_name),
            attributes: Attributes::ARCHIVE,
            reserved: [0; 10],
            time,
            date,
            start: 0,
            size,
        }
    }

    /// Builds a directory entry from a host name and modification time.
    pub fn new_directory(host_name: &str, mtime: &DateTime<Local>) -> DirEntry {
        DirEntry {
            attributes: Attributes::ARCHIVE | Attributes::DIRECTORY,
            size: 0,
            ..DirEntry::new_file(host_name, 0, mtime)
        }
    }

    /// Decodes one on-disk entry. The slice must hold at least
    /// `DIR_ENTRY_SIZE` bytes.
    pub fn decode(raw: &[u8]) -> DirEntry {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);
        let mut reserved = [0u8; 10];
        reserved.copy_from_slice(&raw[12..22]);
        DirEntry {
            name,
            attributes: raw[11],
            reserved,
            time: u16::from_le_bytes([raw[22], raw[23]]),
            date: u16::from_le_bytes([raw[24], raw[25]]),
            start: u16::from_le_bytes([raw[26], raw[27]]),
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    /// Encodes the entry into its on-disk form.
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[0..11].copy_from_slice(&self.name);
        raw[11] = self.attributes;
        raw[12..22].copy_from_slice(&self.reserved);
        raw[22..24].copy_from_slice(&self.time.to_le_bytes());
        raw[24..26].copy_from_slice(&self.date.to_le_bytes());
        raw[26..28].copy_from_slice(&self.start.to_le_bytes());
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
        raw
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == END_MARKER
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == DELETED_MARKER
    }

    /// Neither deleted nor never-used.
    pub fn is_live(&self) -> bool {
        !self.is_end() && !self.is_deleted()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & Attributes::DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & Attributes::VOLUME_LABEL != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes & Attributes::READ_ONLY != 0
    }

    /// True for the `.` and `..` entries.
    pub fn is_dot(&self) -> bool {
        self.name[0] == b'.'
    }

    pub fn mark_deleted(&mut self) {
        self.name[0] = DELETED_MARKER;
    }

    /// Host rendering of the 8.3 name: lower case, padding trimmed, base
    /// and extension joined with a dot when an extension exists.
    pub fn display_name(&self) -> String {
        let part = |bytes: &[u8]| -> String {
            let end = bytes
                .iter()
                .rposition(|&b| b != b' ')
                .map_or(0, |i| i + 1);
            bytes[..end]
                .iter()
                .map(|&b| (b as char).to_ascii_lowercase())
                .collect()
        };
        let base = part(&self.name[0..8]);
        let ext = part(&self.name[8..11]);
        if ext.is_empty() {
            base
        } else {
            format!("{}.{}", base, ext)
        }
    }

    /// Case-insensitive match against one path component.
    pub fn matches_name(&self, component: &str) -> bool {
        self.display_name().eq_ignore_ascii_case(component)
    }
}

/// Maps a host filename onto the eleven 8.3 slots, the way the original
/// MSDOS tools did: characters are copied in order and upper-cased, a dot
/// is skipped exactly when the extension slot comes up, and any other dot
/// pads the rest of the current field with spaces. Base names longer than
/// eight characters spill into the extension slots, extension and all,
/// which matches the historical behavior.
pub fn pack_name(host: &str) -> [u8; 11] {
    let bytes = host.as_bytes();
    let mut name = [b' '; 11];
    let mut i = 0;
    for (index, out) in name.iter_mut().enumerate() {
        if index == 8 && bytes.get(i) == Some(&b'.') {
            i += 1;
        }
        match bytes.get(i) {
            Some(&b) if b != b'.' => {
                *out = b.to_ascii_uppercase();
                i += 1;
            }
            _ => {} // leave the space; a dot waits for the extension slot
        }
    }
    name
}
