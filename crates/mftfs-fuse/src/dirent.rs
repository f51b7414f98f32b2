//! Directory listing codec.
//!
//! Serializes directory children into `fuse_dirent` records:
//!
//! ```text
//! | ino: u64 | off: u64 | namelen: u32 | type: u32 | name | pad to 8 |
//! ```
//!
//! A record's `off` is the cumulative byte length of the listing up to and
//! including that record, i.e. where the next record starts. The kernel
//! hands the last `off` it consumed back as the resume offset, so the
//! listing needs no per-session iterator: every call re-enumerates the
//! directory and skips records that start before the requested offset.
//!
//! When a call reaches the end of the listing with room to spare, one
//! `.` record naming the directory itself is appended. Its offset lies
//! past the end of the listing, so the next call returns nothing.

use crate::backing::DirChild;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// Fixed header length of one record.
pub const DIRENT_HEADER_LEN: usize = 24;

/// `d_type` of a directory.
pub const DT_DIR: u32 = 4;
/// `d_type` of a regular file.
pub const DT_REG: u32 = 8;

/// Name of the end-of-listing record.
pub const SENTINEL_NAME: &str = ".";

/// Type reported in a listing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

impl EntryType {
    fn to_raw(self) -> u32 {
        match self {
            EntryType::File => DT_REG,
            EntryType::Directory => DT_DIR,
        }
    }

    fn from_raw(raw: u32) -> Self {
        if raw == DT_DIR {
            EntryType::Directory
        } else {
            EntryType::File
        }
    }
}

/// One decoded listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u64,
    /// Resume offset: where the next record starts.
    pub offset: u64,
    pub name: OsString,
    pub kind: EntryType,
}

/// Serialized length of a record whose name is `name_len` bytes.
pub const fn record_len(name_len: usize) -> usize {
    (DIRENT_HEADER_LEN + name_len).next_multiple_of(8)
}

/// Serialize one record at the start of `dst`.
///
/// Returns the number of bytes written, or 0 if the record does not fit.
pub fn write_dirent(dst: &mut [u8], ino: u64, offset: u64, name: &OsStr, kind: EntryType) -> usize {
    let name = name.as_bytes();
    let len = record_len(name.len());
    if len > dst.len() {
        return 0;
    }
    let Ok(namelen) = u32::try_from(name.len()) else {
        return 0;
    };

    let (header, rest) = dst[..len].split_at_mut(DIRENT_HEADER_LEN);
    header[0..8].copy_from_slice(&ino.to_ne_bytes());
    header[8..16].copy_from_slice(&offset.to_ne_bytes());
    header[16..20].copy_from_slice(&namelen.to_ne_bytes());
    header[20..24].copy_from_slice(&kind.to_raw().to_ne_bytes());
    rest[..name.len()].copy_from_slice(name);
    rest[name.len()..].fill(0);
    len
}

/// Decode every complete record in `buf`.
pub fn decode_dirents(buf: &[u8]) -> Vec<Dirent> {
    let mut out = Vec::new();
    let mut pos = 0;
    while buf.len() - pos >= DIRENT_HEADER_LEN {
        let header = &buf[pos..pos + DIRENT_HEADER_LEN];
        let ino = u64::from_ne_bytes(header[0..8].try_into().unwrap_or_default());
        let offset = u64::from_ne_bytes(header[8..16].try_into().unwrap_or_default());
        let namelen = u32::from_ne_bytes(header[16..20].try_into().unwrap_or_default()) as usize;
        let kind = u32::from_ne_bytes(header[20..24].try_into().unwrap_or_default());

        let len = record_len(namelen);
        if namelen == 0 || pos + len > buf.len() {
            break;
        }
        let name = &buf[pos + DIRENT_HEADER_LEN..pos + DIRENT_HEADER_LEN + namelen];
        out.push(Dirent {
            ino,
            offset,
            name: OsString::from_vec(name.to_vec()),
            kind: EntryType::from_raw(kind),
        });
        pos += len;
    }
    out
}

/// Result of one listing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListingPage {
    /// Bytes written into the destination buffer.
    pub bytes_written: usize,
    /// Records written, sentinel included.
    pub entries: usize,
    /// Whether this call appended the end-of-listing record.
    pub sentinel: bool,
}

/// Serialize `children` of directory `dir_ino` starting at `offset`.
///
/// Children before `offset` are skipped but still advance the running
/// offset. Serialization stops at the first record that does not fit.
/// The `.` record closes the stream at offset `total`, so a page that
/// filled up right before it is followed by a page holding only `.`.
/// An empty directory lists nothing.
pub fn fill_listing(dir_ino: u64, children: &[DirChild], offset: u64, dst: &mut [u8]) -> ListingPage {
    let total: u64 = children
        .iter()
        .map(|c| record_len(c.name.len()) as u64)
        .sum();
    let sentinel = OsStr::new(SENTINEL_NAME);
    let sentinel_end = total + record_len(sentinel.len()) as u64;
    let mut page = ListingPage::default();
    if children.is_empty() || offset >= sentinel_end {
        return page;
    }

    let mut start = 0u64;
    for child in children {
        let end = start + record_len(child.name.len()) as u64;
        if start >= offset {
            let kind = if child.is_dir {
                EntryType::Directory
            } else {
                EntryType::File
            };
            let n = write_dirent(&mut dst[page.bytes_written..], child.ino, end, &child.name, kind);
            if n == 0 {
                // Buffer full: the sentinel belongs to a later call
                return page;
            }
            page.bytes_written += n;
            page.entries += 1;
        }
        start = end;
    }

    let n = write_dirent(
        &mut dst[page.bytes_written..],
        dir_ino,
        sentinel_end,
        sentinel,
        EntryType::Directory,
    );
    if n > 0 {
        page.bytes_written += n;
        page.entries += 1;
        page.sentinel = true;
    }
    page
}
