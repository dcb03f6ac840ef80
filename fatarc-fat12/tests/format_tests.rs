// Wire-level checks on a freshly formatted image
// These pin the exact on-disk bytes for the default floppy layout:
// 256-byte sectors, two 3-sector FATs from sector 2, 128 root entries,
// 260 clusters. Offsets asserted here are interoperability contracts.

use std::fs;

use fatarc_core::disk_type;
use fatarc_fat12::{DiskImage, Fat12Session, SessionOptions};
use tempfile::NamedTempFile;

fn formatted_image() -> NamedTempFile {
    let _ = env_logger::builder().is_test(true).try_init();
    let geometry = disk_type('m').expect("catalog entry missing").geometry;
    let file = NamedTempFile::new().expect("Failed to create temp image");
    DiskImage::create(file.path(), geometry).expect("Failed to size the image");
    let mut session = Fat12Session::open(file.path(), geometry, true, SessionOptions::default())
        .expect("Failed to open image");
    session.format().expect("Format failed");
    session.flush().expect("Flush failed");
    file
}

#[test]
fn boot_record_bytes_are_laid_out_little_endian() {
    let image = formatted_image();
    let raw = fs::read(image.path()).expect("Failed to read image back");

    assert_eq!(raw.len(), 270336, "image size must match the geometry");
    assert_eq!(&raw[0..3], &[0xEB, 0x1C, 0x90], "jump code");
    assert_eq!(&raw[3..11], b"fatarc  ", "OEM label");
    assert_eq!(&raw[11..13], &[0x00, 0x01], "bytes per sector = 256");
    assert_eq!(raw[13], 4, "sectors per cluster");
    assert_eq!(&raw[14..16], &[2, 0], "reserved sectors");
    assert_eq!(raw[16], 2, "FAT copies");
    assert_eq!(&raw[17..19], &[128, 0], "max root entries");
    assert_eq!(&raw[19..21], &[0x20, 0x04], "total sectors = 1056");
    assert_eq!(raw[21], 0xFF, "media descriptor");
    assert_eq!(&raw[22..24], &[3, 0], "sectors per FAT");
    assert_eq!(&raw[24..30], &[0u8; 6], "track/head/hidden all zero");

    // marker byte at the start of the second sector
    assert_eq!(raw[256], 0xFF);
}

#[test]
fn both_fat_copies_carry_media_bytes_and_filler() {
    let image = formatted_image();
    let raw = fs::read(image.path()).expect("Failed to read image back");

    for fat_at in [512usize, 1280] {
        assert_eq!(
            &raw[fat_at..fat_at + 3],
            &[0xFF, 0xFF, 0xFF],
            "media bytes at {}",
            fat_at
        );
        // cluster 2, the first usable one, starts out free
        assert_eq!(raw[fat_at + 3], 0x00);
        // entries past the 260-cluster limit are filled with 0xFF9;
        // entry 260 sits at byte 390, sharing byte 391 with entry 261
        assert_eq!(raw[fat_at + 390], 0xF9, "even filler low byte");
        assert_eq!(raw[fat_at + 391], 0x9F, "shared filler byte");
        assert_eq!(raw[fat_at + 392], 0xFF, "odd filler high byte");
        // the filler runs to the very end of the FAT region
        assert_eq!(raw[fat_at + 767], 0xFF);
    }
}

#[test]
fn root_entries_use_the_never_used_plus_deleted_fill() {
    let image = formatted_image();
    let raw = fs::read(image.path()).expect("Failed to read image back");

    // each 32-byte entry: name[0] = 0x00, remaining 31 bytes 0xE5
    for slot in 0..128 {
        let at = 2048 + slot * 32;
        assert_eq!(raw[at], 0x00, "entry {} end marker", slot);
        assert!(
            raw[at + 1..at + 32].iter().all(|&b| b == 0xE5),
            "entry {} fill bytes",
            slot
        );
    }
}

#[test]
fn reopened_session_reports_the_formatted_state() {
    let image = formatted_image();
    let geometry = disk_type('m').expect("catalog entry missing").geometry;
    let mut session = Fat12Session::open(image.path(), geometry, false, SessionOptions::default())
        .expect("Failed to reopen image");

    assert_eq!(session.free_bytes(), 258 * 1024);
    assert!(session.volume_label().is_none());
    assert!(session.list(&[]).is_empty());

    let boot = session.boot_sector().expect("Failed to read boot record");
    assert_eq!(boot.bytes_per_sector, 256);
    assert_eq!(boot.sectors_per_cluster, 4);
    assert_eq!(boot.reserved_sectors, 2);
    assert_eq!(boot.fat_copies, 2);
    assert_eq!(boot.max_root_entries, 128);
    assert_eq!(boot.total_sectors, 1056);
    assert_eq!(boot.media_descriptor, 0xFF);
    assert_eq!(boot.sectors_per_fat, 3);
}
