// Directory behavior: slot reuse, growth, nesting, deletion, filters
// Geometry: 256-byte clusters (8 entries each), 16 root entries.

use std::fs;
use std::path::Path;

use fatarc_core::{FatarcError, Geometry};
use fatarc_fat12::{DiskImage, Fat12Session, ListItem, Outcome, SessionOptions};
use tempfile::{tempdir, NamedTempFile, TempDir};

fn tiny_geometry() -> Geometry {
    Geometry {
        bytes_per_sector: 256,
        sectors_per_cluster: 1,
        fat_start_sector: 1,
        fat_copies: 1,
        sectors_per_fat: 1,
        root_entries: 16,
        cluster_count: 80,
    }
}

fn fresh_image() -> (NamedTempFile, Geometry) {
    let _ = env_logger::builder().is_test(true).try_init();
    let geometry = tiny_geometry();
    let file = NamedTempFile::new().expect("Failed to create temp image");
    DiskImage::create(file.path(), geometry).expect("Failed to size the image");
    let mut session = open_session(file.path(), geometry);
    session.format().expect("Format failed");
    session.flush().expect("Flush after format failed");
    (file, geometry)
}

fn open_session(path: &Path, geometry: Geometry) -> Fat12Session {
    Fat12Session::open(path, geometry, true, SessionOptions::default())
        .expect("Failed to open image")
}

/// Writes `content` under `name` in `host` and inserts it at `dest`.
fn put(
    session: &mut Fat12Session,
    host: &TempDir,
    name: &str,
    content: &[u8],
    dest: &str,
) -> Outcome {
    let host_path = host.path().join(name);
    fs::write(&host_path, content).expect("Failed to write host file");
    let mut events = session.replace(&host_path, dest);
    assert_eq!(events.len(), 1, "expected a single event for {}", dest);
    events.remove(0).outcome
}

fn listed_paths(session: &mut Fat12Session, filters: &[String]) -> Vec<String> {
    session
        .list(filters)
        .into_iter()
        .filter_map(|item| match item {
            ListItem::Entry { path, .. } => Some(path),
            ListItem::Descend { .. } => None,
        })
        .collect()
}

#[test]
fn update_in_place_keeps_listing_order() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let mut session = open_session(image.path(), geometry);

    for name in ["a.txt", "b.txt", "c.txt"] {
        assert!(matches!(
            put(&mut session, &host, name, b"one", name),
            Outcome::Added
        ));
    }
    assert!(matches!(
        put(&mut session, &host, "b.txt", b"two", "b.txt"),
        Outcome::Updated
    ));
    // the rewritten file stays in its slot, not appended at the end
    assert_eq!(
        listed_paths(&mut session, &[]),
        vec!["a.txt", "b.txt", "c.txt"]
    );
}

#[test]
fn deletion_compacts_and_the_next_insert_fills_the_tail() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let mut session = open_session(image.path(), geometry);

    for name in ["a.txt", "b.txt", "c.txt"] {
        put(&mut session, &host, name, b"x", name);
    }
    let event = session.delete("a.txt");
    assert!(matches!(event.outcome, Outcome::Deleted));
    assert_eq!(listed_paths(&mut session, &[]), vec!["b.txt", "c.txt"]);

    put(&mut session, &host, "d.txt", b"x", "d.txt");
    assert_eq!(
        listed_paths(&mut session, &[]),
        vec!["b.txt", "c.txt", "d.txt"]
    );
}

#[test]
fn root_overflow_fails_but_preserves_existing_entries() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let mut session = open_session(image.path(), geometry);

    for i in 0..16 {
        let name = format!("f{:02}.bin", i);
        assert!(
            matches!(put(&mut session, &host, &name, b".", &name), Outcome::Added),
            "insert {} of 16 should fit",
            i
        );
    }
    let outcome = put(&mut session, &host, "f16.bin", b".", "f16.bin");
    assert!(
        matches!(outcome, Outcome::Failed(FatarcError::RootDirectoryFull)),
        "17th insert should overflow the root, got {:?}",
        outcome
    );
    assert_eq!(listed_paths(&mut session, &[]).len(), 16);
}

#[test]
fn host_directory_tree_is_replicated_and_guarded_on_delete() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let out = tempdir().expect("Failed to create output dir");
    fs::create_dir(host.path().join("docs")).expect("Failed to create host subdir");
    fs::write(host.path().join("docs/readme.txt"), b"hello").expect("Failed to write host file");

    let mut session = open_session(image.path(), geometry);
    let events = session.replace(&host.path().join("docs"), "docs");
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].outcome, Outcome::CreatedDirectory));
    assert_eq!(events[1].path, "docs/readme.txt");
    assert!(matches!(events[1].outcome, Outcome::Added));

    // a directory with a live file refuses deletion
    let event = session.delete("docs");
    assert!(matches!(
        event.outcome,
        Outcome::Failed(FatarcError::DirectoryNotEmpty(_))
    ));
    let events = session.extract("docs/readme.txt", out.path());
    assert!(!events[0].is_failure(), "the guarded file must stay intact");
    let got = fs::read(out.path().join("docs/readme.txt")).expect("Failed to read extraction");
    assert_eq!(got, b"hello");

    // emptied, it goes away
    assert!(matches!(
        session.delete("docs/readme.txt").outcome,
        Outcome::Deleted
    ));
    assert!(matches!(session.delete("docs").outcome, Outcome::Deleted));
    assert!(listed_paths(&mut session, &[]).is_empty());
}

#[test]
fn putting_into_an_existing_image_directory_reports_and_recurses() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    fs::create_dir(host.path().join("d")).expect("Failed to create host subdir");
    fs::write(host.path().join("d/one.txt"), b"1").expect("Failed to write host file");

    let mut session = open_session(image.path(), geometry);
    session.replace(&host.path().join("d"), "d");

    // second put of the same tree updates instead of duplicating
    fs::write(host.path().join("d/two.txt"), b"2").expect("Failed to write host file");
    let events = session.replace(&host.path().join("d"), "d");
    assert!(matches!(events[0].outcome, Outcome::DirectoryExists));
    assert!(matches!(events[1].outcome, Outcome::Updated));
    assert!(matches!(events[2].outcome, Outcome::Added));
    // unfiltered listings show the directory line itself as well
    assert_eq!(
        listed_paths(&mut session, &[]),
        vec!["d", "d/one.txt", "d/two.txt"]
    );
}

#[test]
fn missing_intermediates_are_not_created() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let mut session = open_session(image.path(), geometry);

    let outcome = put(&mut session, &host, "file.txt", b"x", "nosuchdir/file.txt");
    assert!(
        matches!(outcome, Outcome::Failed(FatarcError::NotFound(_))),
        "got {:?}",
        outcome
    );
}

#[test]
fn path_conflicts_and_missing_names_are_reported_per_item() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let out = tempdir().expect("Failed to create output dir");
    let mut session = open_session(image.path(), geometry);

    put(&mut session, &host, "plain.txt", b"x", "plain.txt");

    // a file used as a path component
    let outcome = put(&mut session, &host, "x.txt", b"x", "plain.txt/x.txt");
    assert!(matches!(
        outcome,
        Outcome::Failed(FatarcError::PathConflict(_))
    ));

    let events = session.extract("missing.txt", out.path());
    assert!(matches!(
        events[0].outcome,
        Outcome::Failed(FatarcError::NotFound(_))
    ));
    assert!(matches!(
        session.delete("missing.txt").outcome,
        Outcome::Failed(FatarcError::NotFound(_))
    ));

    // dot segments are rejected outright
    let events = session.extract("./plain.txt", out.path());
    assert!(matches!(
        events[0].outcome,
        Outcome::Failed(FatarcError::InvalidInput(_))
    ));
}

#[test]
fn listing_filters_prune_unrelated_subtrees() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    for dir in ["sub", "sub/inner", "other"] {
        fs::create_dir(host.path().join(dir)).expect("Failed to create host subdir");
    }
    fs::write(host.path().join("sub/inner/file.txt"), b"1").expect("Failed to write host file");
    fs::write(host.path().join("other/file.txt"), b"2").expect("Failed to write host file");

    let mut session = open_session(image.path(), geometry);
    session.replace(&host.path().join("sub"), "sub");
    session.replace(&host.path().join("other"), "other");

    let filters = vec!["sub/inner".to_string()];
    assert_eq!(
        listed_paths(&mut session, &filters),
        vec!["sub/inner/file.txt"]
    );
    for item in session.list(&filters) {
        if let ListItem::Descend { path } = item {
            assert!(
                !path.starts_with("other"),
                "filtered walk descended into {}",
                path
            );
        }
    }
}

#[test]
fn subdirectory_grows_past_one_cluster_when_full() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    fs::create_dir(host.path().join("sub")).expect("Failed to create host subdir");

    let mut session = open_session(image.path(), geometry);
    session.replace(&host.path().join("sub"), "sub");

    // 8 entries per cluster, 2 spent on dot entries: the 7th file forces
    // a second directory cluster
    for i in 0..7 {
        let name = format!("f{}.txt", i);
        let dest = format!("sub/{}", name);
        assert!(
            matches!(
                put(&mut session, &host, &name, b"x", &dest),
                Outcome::Added
            ),
            "insert {} should succeed",
            dest
        );
    }
    session.flush().expect("Flush failed");
    drop(session);

    let mut session = open_session(image.path(), geometry);
    let paths = listed_paths(&mut session, &[]);
    // the directory line plus its seven files
    assert_eq!(paths.len(), 8);
    assert!(paths.contains(&"sub".to_string()));
    assert!(paths.contains(&"sub/f6.txt".to_string()));
}

#[test]
fn shrinking_a_grown_directory_frees_its_surplus_cluster() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    fs::create_dir(host.path().join("sub")).expect("Failed to create host subdir");

    let mut session = open_session(image.path(), geometry);
    session.replace(&host.path().join("sub"), "sub");
    for i in 0..7 {
        let name = format!("f{}.txt", i);
        put(&mut session, &host, &name, b"x", &format!("sub/{}", name));
    }
    let free_grown = session.free_bytes();

    // dropping one file shrinks the directory back to one cluster and
    // frees the file's own cluster with it
    assert!(matches!(
        session.delete("sub/f6.txt").outcome,
        Outcome::Deleted
    ));
    assert_eq!(
        session.free_bytes(),
        free_grown + 2 * geometry.cluster_size() as u64
    );
}

#[test]
fn freed_slot_is_reused_before_the_directory_grows() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    fs::create_dir(host.path().join("sub")).expect("Failed to create host subdir");

    let mut session = open_session(image.path(), geometry);
    session.replace(&host.path().join("sub"), "sub");

    // dot entries plus six files fill the single directory cluster
    for i in 0..6 {
        let name = format!("f{}.txt", i);
        put(&mut session, &host, &name, b"x", &format!("sub/{}", name));
    }
    assert!(matches!(
        session.delete("sub/f0.txt").outcome,
        Outcome::Deleted
    ));
    let free_before = session.free_bytes();

    // the vacated slot absorbs the new entry; only the file content costs
    put(&mut session, &host, "new.txt", b"x", "sub/new.txt");
    assert_eq!(
        session.free_bytes(),
        free_before - geometry.cluster_size() as u64,
        "insert into a freed slot must not grow the directory"
    );
    assert_eq!(
        listed_paths(&mut session, &[]),
        vec![
            "sub",
            "sub/f1.txt",
            "sub/f2.txt",
            "sub/f3.txt",
            "sub/f4.txt",
            "sub/f5.txt",
            "sub/new.txt"
        ]
    );
}

#[test]
fn name_lookup_ignores_case() {
    let (image, geometry) = fresh_image();
    let host = tempdir().expect("Failed to create host dir");
    let out = tempdir().expect("Failed to create output dir");
    let mut session = open_session(image.path(), geometry);

    put(&mut session, &host, "Readme.TXT", b"hi", "Readme.TXT");
    assert_eq!(listed_paths(&mut session, &[]), vec!["readme.txt"]);

    let events = session.extract("README.txt", out.path());
    assert!(!events[0].is_failure(), "lookup should be case-insensitive");

    // and a same-name put in different case is an update, not a second file
    assert!(matches!(
        put(&mut session, &host, "readme.txt", b"again", "README.TXT"),
        Outcome::Updated
    ));
    assert_eq!(listed_paths(&mut session, &[]).len(), 1);
}
