use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use fatarc_core::{disk_type, FatarcError, Geometry, DISK_TYPES};
use fatarc_fat12::{
    timestamps, Attributes, DirEntry, DiskImage, Fat12Session, ListItem, OpEvent, Outcome,
    SessionOptions,
};

#[derive(Parser)]
#[command(name = "fatarc")]
#[command(about = "FAT12 disk image archiver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// How to find the image layout: a catalog key, an explicit parameter
/// list, or a JSON description. Images carry no layout we can trust.
#[derive(Args)]
struct GeometryArgs {
    /// Built-in disk type (see 'fatarc types')
    #[arg(short = 't', long, default_value_t = 'm')]
    disk_type: char,
    /// Custom layout: SECTOR_SIZE,CLUSTER_SECTORS,FAT_START,ROOT_SECTORS,FAT_SECTORS,FAT_COPIES,CLUSTERS
    #[arg(long, value_name = "SPEC", conflicts_with = "disk_type")]
    custom: Option<String>,
    /// JSON file describing the layout
    #[arg(long, value_name = "FILE", conflicts_with_all = ["disk_type", "custom"])]
    geometry_file: Option<PathBuf>,
}

impl GeometryArgs {
    fn resolve(&self) -> anyhow::Result<Geometry> {
        if let Some(path) = &self.geometry_file {
            let raw = fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
            return Ok(Geometry::from_json(&raw)?);
        }
        if let Some(spec) = &self.custom {
            return parse_custom(spec);
        }
        disk_type(self.disk_type).map(|t| t.geometry).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown disk type '{}'. Use 'fatarc types' to see the catalog.",
                self.disk_type
            )
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List files on the image
    List {
        /// Path to the disk image
        image: PathBuf,
        /// Image paths to list (the whole image when empty)
        paths: Vec<String>,
        /// Show attributes, time, date and size
        #[arg(short, long)]
        verbose: bool,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Extract files from the image
    Extract {
        /// Path to the disk image
        image: PathBuf,
        /// Image paths to extract (everything when empty)
        paths: Vec<String>,
        /// Convert \r\n line endings to \n and stop at a ^Z marker
        #[arg(short, long)]
        ascii: bool,
        /// Report each extracted file
        #[arg(short, long)]
        verbose: bool,
        /// Host directory to extract into
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Copy host files and directories onto the image
    Put {
        /// Path to the disk image (offered for creation when missing)
        image: PathBuf,
        /// Host files or directories to copy
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Convert \n line endings to \r\n while writing
        #[arg(short, long)]
        ascii: bool,
        /// Report each copied file
        #[arg(short, long)]
        verbose: bool,
        /// Format the image before copying (erases everything on it)
        #[arg(long)]
        clobber: bool,
        /// Answer yes to any confirmation
        #[arg(short = 'y', long)]
        yes: bool,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Delete files or empty directories from the image
    Delete {
        /// Path to the disk image
        image: PathBuf,
        /// Image paths to delete
        #[arg(required = true)]
        paths: Vec<String>,
        /// Report each deleted file
        #[arg(short, long)]
        verbose: bool,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Write a fresh empty filesystem onto the image
    Format {
        /// Path to the disk image (created when missing)
        image: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// Show the boot record and free space
    Info {
        /// Path to the disk image
        image: PathBuf,
        #[command(flatten)]
        geometry: GeometryArgs,
    },
    /// List the built-in disk types
    Types,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let failed = match cli.command {
        Commands::List {
            image,
            paths,
            verbose,
            geometry,
        } => {
            let geometry = geometry.resolve()?;
            let options = SessionOptions {
                ascii: false,
                tolerate_bad_fat: true,
            };
            let mut session = open_session(&image, geometry, false, options)?;
            if verbose && paths.is_empty() {
                if let Some(label) = session.volume_label() {
                    println!("{}:", label);
                }
            }
            for item in session.list(&paths) {
                match item {
                    ListItem::Entry { path, entry } => {
                        if verbose {
                            print_entry(&path, &entry);
                        } else {
                            println!("{}", path);
                        }
                    }
                    ListItem::Descend { path } => {
                        if verbose {
                            println!("\n{}:", path);
                        }
                    }
                }
            }
            false
        }
        Commands::Extract {
            image,
            paths,
            ascii,
            verbose,
            dest,
            geometry,
        } => {
            let geometry = geometry.resolve()?;
            let options = SessionOptions {
                ascii,
                tolerate_bad_fat: false,
            };
            let mut session = open_session(&image, geometry, false, options)?;
            if paths.is_empty() {
                report(&session.extract_all(&dest), verbose)
            } else {
                let mut failed = false;
                for path in &paths {
                    failed |= report(&session.extract(path, &dest), verbose);
                }
                failed
            }
        }
        Commands::Put {
            image,
            files,
            ascii,
            verbose,
            clobber,
            yes,
            geometry,
        } => {
            let geometry = geometry.resolve()?;
            // a clobber replaces the FAT anyway, so a corrupt one is no
            // reason to refuse the open
            let options = SessionOptions {
                ascii,
                tolerate_bad_fat: clobber,
            };
            let (mut session, created) = open_or_create(&image, geometry, yes, options)?;
            if clobber && !created {
                println!("WARNING: This will ERASE ALL DATA on {}!", image.display());
                if !yes && !confirm()? {
                    return Err(FatarcError::UserCancelled.into());
                }
                session.format()?;
            }
            let mut failed = false;
            for file in &files {
                let dest = file.to_string_lossy();
                failed |= report(&session.replace(file, &dest), verbose);
            }
            session.flush()?;
            failed
        }
        Commands::Delete {
            image,
            paths,
            verbose,
            geometry,
        } => {
            let geometry = geometry.resolve()?;
            let options = SessionOptions {
                ascii: false,
                tolerate_bad_fat: false,
            };
            let mut session = open_session(&image, geometry, true, options)?;
            let events: Vec<OpEvent> = paths.iter().map(|p| session.delete(p)).collect();
            session.flush()?;
            report(&events, verbose)
        }
        Commands::Format {
            image,
            yes,
            geometry,
        } => {
            let geometry = geometry.resolve()?;
            let options = SessionOptions {
                ascii: false,
                tolerate_bad_fat: true,
            };
            let exists = image.exists();
            if exists {
                println!("WARNING: This will ERASE ALL DATA on {}!", image.display());
            } else {
                println!(
                    "Image {} does not exist; it will be created with {} bytes.",
                    image.display(),
                    geometry.total_bytes()
                );
            }
            if !yes && !confirm()? {
                println!("Format cancelled.");
                return Ok(());
            }
            // a file too short for the formatted regions gets recreated at
            // full size, matching the create path
            let resize = match fs::metadata(&image) {
                Ok(meta) => meta.len() < geometry.total_bytes(),
                Err(_) => true,
            };
            if resize {
                DiskImage::create(&image, geometry)?;
            }
            let mut session = open_session(&image, geometry, true, options)?;
            session.format()?;
            session.flush()?;
            println!(
                "Formatted {} ({} bytes).",
                image.display(),
                geometry.total_bytes()
            );
            false
        }
        Commands::Info { image, geometry } => {
            let geometry = geometry.resolve()?;
            let options = SessionOptions {
                ascii: false,
                tolerate_bad_fat: true,
            };
            let mut session = open_session(&image, geometry, false, options)?;
            println!("{}", session.boot_sector()?);
            if let Some(label) = session.volume_label() {
                println!("Volume label:         {}", label);
            }
            println!("Capacity:             {} bytes", geometry.total_bytes());
            println!("Free:                 {} bytes", session.free_bytes());
            false
        }
        Commands::Types => {
            println!("Built-in disk types:\n");
            for t in DISK_TYPES {
                let g = t.geometry;
                println!("  {} - {}", t.key, t.description);
                println!(
                    "      {} byte sectors, {} per cluster, {} data clusters, {} bytes",
                    g.bytes_per_sector,
                    g.sectors_per_cluster,
                    g.data_clusters(),
                    g.total_bytes()
                );
            }
            false
        }
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_custom(spec: &str) -> anyhow::Result<Geometry> {
    let fields = spec
        .split(',')
        .map(|f| f.trim().parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| bad_custom(spec))?;
    let [ssize, csects, fat_start, dsects, fsects, copies, clusters] = fields[..] else {
        return Err(bad_custom(spec));
    };
    Ok(Geometry::from_custom_spec(
        ssize, csects, fat_start, dsects, fsects, copies, clusters,
    )?)
}

fn bad_custom(spec: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "Custom layout takes seven comma-separated numbers (sector size, sectors per \
         cluster, first FAT sector, root directory sectors, sectors per FAT, FAT copies, \
         clusters), got {:?}",
        spec
    )
}

fn open_session(
    image: &Path,
    geometry: Geometry,
    writable: bool,
    options: SessionOptions,
) -> anyhow::Result<Fat12Session> {
    Fat12Session::open(image, geometry, writable, options)
        .map_err(|e| anyhow::anyhow!("{}: {}", image.display(), e))
}

/// Opens a writable session, offering to create and format the image file
/// when it does not exist yet. The flag reports whether it was created.
/// A declined prompt aborts the command with `UserCancelled`.
fn open_or_create(
    image: &Path,
    geometry: Geometry,
    yes: bool,
    options: SessionOptions,
) -> anyhow::Result<(Fat12Session, bool)> {
    if image.exists() {
        return Ok((open_session(image, geometry, true, options)?, false));
    }
    println!(
        "Image {} does not exist; it will be created with {} bytes.",
        image.display(),
        geometry.total_bytes()
    );
    if !yes && !confirm()? {
        return Err(FatarcError::UserCancelled.into());
    }
    DiskImage::create(image, geometry)?;
    let mut session = open_session(image, geometry, true, options)?;
    session.format()?;
    Ok((session, true))
}

fn confirm() -> anyhow::Result<bool> {
    use std::io::{self, BufRead};
    println!("Type 'yes' to continue: ");
    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "yes"))
}

/// One verbose listing line: attribute flags, time, date, size and the
/// name, which sits under the directory header the walk printed.
fn print_entry(path: &str, entry: &DirEntry) {
    let mut flags = String::new();
    for (bit, ch) in [
        (Attributes::DIRECTORY, 'd'),
        (Attributes::READ_ONLY, 'r'),
        (Attributes::HIDDEN, 'h'),
        (Attributes::SYSTEM, 's'),
    ] {
        flags.push(if entry.attributes & bit != 0 { ch } else { '-' });
    }
    let (hour, minute, second) = timestamps::unpack_time(entry.time);
    let (year, month, day) = timestamps::unpack_date(entry.date);
    let size = if entry.is_directory() {
        "        ".to_string()
    } else {
        format!("{:8}", entry.size)
    };
    let name = path.rsplit('/').next().unwrap_or(path);
    println!(
        "{} {:02}:{:02}:{:02} {:02}/{:02}/{:02} {} {}",
        flags, hour, minute, second, day, month, year, size, name
    );
}

/// Prints one line per event and returns whether any of them failed.
/// Successes show only under --verbose, in the classic "x - path" form.
fn report(events: &[OpEvent], verbose: bool) -> bool {
    let mut failed = false;
    for event in events {
        match &event.outcome {
            Outcome::Failed(e) => {
                failed = true;
                eprintln!("{}: {}", event.path, e);
            }
            outcome => {
                if verbose {
                    println!("{} - {}", action_char(outcome), event.path);
                }
            }
        }
    }
    failed
}

fn action_char(outcome: &Outcome) -> char {
    match outcome {
        Outcome::Updated => 'u',
        Outcome::Extracted => 'x',
        Outcome::Deleted => 'd',
        _ => 'r',
    }
}
