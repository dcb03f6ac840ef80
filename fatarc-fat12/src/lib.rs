// FAT12 engine organization
pub mod boot_sector;
pub mod dir_entry;
pub mod directory;
pub mod fat;
pub mod formatter;
pub mod image;
pub mod session;
pub mod timestamps;
pub mod transfer;

// Re-export the session-facing surface
pub use boot_sector::{BootSector, BOOT_RECORD_SIZE};
pub use dir_entry::{Attributes, DirEntry};
pub use fat::{FatTable, FAT12_BAD, FAT12_EOC, FAT12_FREE};
pub use image::DiskImage;
pub use session::{Fat12Session, ListItem, OpEvent, Outcome, SessionOptions};
