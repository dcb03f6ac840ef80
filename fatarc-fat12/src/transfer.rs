// Cluster transfer engine
// Moves file contents between host files and cluster chains, one cluster
// per step. Text mode rewrites line endings in both directions: LF gains
// a CR on the way in, CR is dropped and control-Z terminates on the way
// out. Write errors on the image retire the cluster as bad and move on,
// so a transfer only gives up when the disk is actually full.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use fatarc_core::FatarcError;
use log::{debug, warn};

use crate::dir_entry::DirEntry;
use crate::fat::{self, FatTable, FAT12_BAD, FAT12_EOC};
use crate::image::DiskImage;

const SCAN_CHUNK: usize = 4096;

/// Read adapter that inserts a CR before every LF from the wrapped
/// source. Applied on the way into the image in text mode.
pub struct AsciiExpand<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> AsciiExpand<R> {
    pub fn new(inner: R) -> AsciiExpand<R> {
        AsciiExpand {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; SCAN_CHUNK];
        let count = self.inner.read(&mut chunk)?;
        self.buf.clear();
        self.pos = 0;
        for &byte in &chunk[..count] {
            if byte == b'\n' {
                self.buf.push(b'\r');
            }
            self.buf.push(byte);
        }
        Ok(())
    }
}

impl<R: Read> Read for AsciiExpand<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buf.len() {
            self.refill()?;
            if self.buf.is_empty() {
                return Ok(0);
            }
        }
        let count = usize::min(out.len(), self.buf.len() - self.pos);
        out[..count].copy_from_slice(&self.buf[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

/// Reads until `buf` is full or the source runs dry. A return shorter
/// than the buffer means end of input.
fn fill(source: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Bytes the file will occupy on the image: its length, plus one CR per
/// LF in text mode. Leaves the file positioned back at the start.
pub fn transfer_size(host: &mut File, ascii: bool) -> io::Result<u64> {
    let len = host.metadata()?.len();
    if !ascii {
        return Ok(len);
    }
    let mut extra = 0u64;
    let mut chunk = [0u8; SCAN_CHUNK];
    loop {
        let count = host.read(&mut chunk)?;
        if count == 0 {
            break;
        }
        extra += chunk[..count].iter().filter(|&&b| b == b'\n').count() as u64;
    }
    host.seek(SeekFrom::Start(0))?;
    Ok(len + extra)
}

/// Result of writing a source into the image. When the transfer stops
/// early `aborted` carries the reason and `start`/`size` describe the
/// part that made it to disk, which remains a valid terminated chain.
pub struct WriteOutcome {
    pub start: u16,
    pub size: u32,
    pub aborted: Option<FatarcError>,
}

/// Streams `source` into freshly allocated clusters and links them into
/// a chain. Each cluster is claimed in the FAT before the write so a
/// failed cluster can be retired as bad and replaced without touching
/// the chain built so far. An empty source commits nothing and reports
/// start zero.
pub fn write_from_host(
    image: &mut DiskImage,
    fat: &mut FatTable,
    source: &mut dyn Read,
) -> WriteOutcome {
    let cluster_size = image.geometry().cluster_size() as usize;
    let mut buf = vec![0u8; cluster_size];
    let mut start = 0u16;
    let mut prev = 0u16;
    let mut committed = 0u64;
    let mut aborted = None;

    'transfer: loop {
        let payload = match fill(source, &mut buf) {
            Ok(count) => count,
            Err(e) => {
                aborted = Some(FatarcError::IoError(e));
                break;
            }
        };
        if payload == 0 {
            break;
        }
        let cluster = loop {
            let candidate = match fat.find_free() {
                Some(c) => c,
                None => {
                    aborted = Some(FatarcError::OutOfSpace {
                        needed: payload as u64,
                        free: 0,
                    });
                    break 'transfer;
                }
            };
            // claim first so a retry cannot pick the same cluster
            fat.set(candidate, FAT12_EOC);
            match image.write_cluster(candidate, &buf[..payload]) {
                Ok(()) => break candidate,
                Err(e) => {
                    warn!("Write error on cluster {}, marking it bad: {}", candidate, e);
                    fat.set(candidate, FAT12_BAD);
                }
            }
        };
        if prev == 0 {
            start = cluster;
        } else {
            fat.set(prev, cluster);
        }
        prev = cluster;
        committed += payload as u64;
        if payload < cluster_size {
            break;
        }
    }
    debug!("Transfer in: {} bytes starting at cluster {}", committed, start);
    WriteOutcome {
        start,
        size: committed as u32,
        aborted,
    }
}

/// Streams a chain out to a host writer, bounded by the entry size so
/// the final cluster contributes only its real payload. Unreadable
/// clusters come through as zeroes and a truncated chain simply ends
/// the file early. Returns the bytes written on the host side.
pub fn read_to_host(
    image: &mut DiskImage,
    fat: &FatTable,
    entry: &DirEntry,
    host: &mut dyn Write,
    ascii: bool,
) -> Result<u64, FatarcError> {
    let mut remaining = entry.size as u64;
    let mut cluster = entry.start;
    let mut written = 0u64;
    let mut text = Vec::new();
    while remaining > 0 && fat::is_chain_link(cluster) {
        let raw = image.read_cluster_or_zeroes(cluster);
        let take = usize::min(remaining as usize, raw.len());
        if ascii {
            text.clear();
            let stop = strip_ascii(&raw[..take], &mut text);
            host.write_all(&text)?;
            written += text.len() as u64;
            if stop {
                break;
            }
        } else {
            host.write_all(&raw[..take])?;
            written += take as u64;
        }
        remaining -= take as u64;
        cluster = fat.get(cluster);
    }
    Ok(written)
}

/// Copies a text-mode chunk into `out`, dropping CRs. Returns true on a
/// control-Z, which ends the whole file.
fn strip_ascii(chunk: &[u8], out: &mut Vec<u8>) -> bool {
    for &byte in chunk {
        match byte {
            0x1A => return true,
            b'\r' => {}
            _ => out.push(byte),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn expand_inserts_cr_before_every_lf() {
        let mut reader = AsciiExpand::new(Cursor::new(b"one\ntwo\r\nthree".to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"one\r\ntwo\r\r\nthree");
    }

    #[test]
    fn expand_survives_tiny_destination_buffers() {
        let mut reader = AsciiExpand::new(Cursor::new(b"a\nb\n".to_vec()));
        let mut out = Vec::new();
        let mut one = [0u8; 1];
        loop {
            match reader.read(&mut one).unwrap() {
                0 => break,
                n => out.extend_from_slice(&one[..n]),
            }
        }
        assert_eq!(out, b"a\r\nb\r\n");
    }

    #[test]
    fn strip_drops_cr_and_stops_at_control_z() {
        let mut out = Vec::new();
        assert!(!strip_ascii(b"one\r\ntwo\r\n", &mut out));
        assert_eq!(out, b"one\ntwo\n");

        out.clear();
        assert!(strip_ascii(b"head\x1atail", &mut out));
        assert_eq!(out, b"head");
    }

    #[test]
    fn fill_reads_across_short_reads() {
        // Cursor always satisfies the request, so chain two of them to
        // force a short read in the middle.
        let mut source = Cursor::new(b"abc".to_vec()).chain(Cursor::new(b"defgh".to_vec()));
        let mut buf = [0u8; 6];
        let n = fill(&mut source, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"abcdef");

        let mut rest = [0u8; 6];
        let n = fill(&mut source, &mut rest).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&rest[..2], b"gh");
    }

    #[test]
    fn transfer_size_counts_line_feeds_once() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"alpha\nbeta\ngamma").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(transfer_size(&mut file, false).unwrap(), 16);
        assert_eq!(transfer_size(&mut file, true).unwrap(), 18);
        // the scan leaves the file rewound for the transfer proper
        let mut back = Vec::new();
        file.read_to_end(&mut back).unwrap();
        assert_eq!(back, b"alpha\nbeta\ngamma");
    }
}
