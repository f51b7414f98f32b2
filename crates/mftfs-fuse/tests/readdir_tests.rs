//! Directory listing pagination through the readdir handler.
//!
//! Run: `cargo nextest run -p mftfs-fuse readdir_tests`

mod common;

use common::*;
use mftfs_fuse::dirent::{DIRENT_HEADER_LEN, EntryType, SENTINEL_NAME, decode_dirents, record_len};
use mftfs_fuse::{FsError, ROOT_INODE};
use mftfs_mount::testing::{TempTree, special_filenames, unicode_filename};
use std::collections::BTreeSet;

fn names(buf: &[u8]) -> Vec<String> {
    decode_dirents(buf)
        .into_iter()
        .map(|d| d.name.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_paginated_listing_of_three_children() {
    let fx = Fixture::with_tree(TempTree::new().file("a", b"").file("b", b"").dir("c"));
    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();
    let one = record_len(1);
    assert_eq!(one, 32);

    // First page only has room for one record
    let mut small = vec![0u8; one];
    let page = fx.fs.read_dir(ROOT_INODE, fh, 0, &mut small).unwrap();
    assert_eq!(page.entries, 1);
    assert_eq!(page.bytes_written, one);
    assert!(!page.sentinel);
    let first = decode_dirents(&small);
    assert_eq!(first[0].offset, one as u64);

    // Resume from the first record's offset
    let mut big = vec![0u8; 4096];
    let page = fx.fs.read_dir(ROOT_INODE, fh, first[0].offset, &mut big).unwrap();
    assert_eq!(page.entries, 3);
    assert!(page.sentinel);
    let rest = decode_dirents(&big[..page.bytes_written]);
    assert_eq!(rest[2].name, SENTINEL_NAME);
    assert_eq!(rest[2].ino, ROOT_INODE);
    assert_eq!(rest[2].kind, EntryType::Directory);

    // Order is whatever the backing store returns; the union is exact
    let mut seen: BTreeSet<String> = names(&small).into_iter().collect();
    seen.extend(names(&big[..page.bytes_written]).into_iter().filter(|n| n != SENTINEL_NAME));
    assert_eq!(seen, BTreeSet::from(["a".into(), "b".into(), "c".into()]));

    // Past the sentinel nothing is left
    let mut tail = vec![0u8; 4096];
    let page = fx.fs.read_dir(ROOT_INODE, fh, rest[2].offset, &mut tail).unwrap();
    assert_eq!(page.bytes_written, 0);
    assert_eq!(page.entries, 0);
}

#[test]
fn test_page_ending_at_last_child_defers_sentinel() {
    let fx = Fixture::with_tree(TempTree::new().file("a", b"").file("b", b"").file("c", b""));
    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();

    // Exactly room for the three children
    let mut full = vec![0u8; 3 * record_len(1)];
    let page = fx.fs.read_dir(ROOT_INODE, fh, 0, &mut full).unwrap();
    assert_eq!(page.entries, 3);
    assert!(!page.sentinel);
    let last = decode_dirents(&full).pop().unwrap();

    let mut next = vec![0u8; 4096];
    let page = fx.fs.read_dir(ROOT_INODE, fh, last.offset, &mut next).unwrap();
    assert_eq!(names(&next[..page.bytes_written]), ["."]);
    assert!(page.sentinel);

    let end = decode_dirents(&next[..page.bytes_written])[0].offset;
    let page = fx.fs.read_dir(ROOT_INODE, fh, end, &mut next).unwrap();
    assert_eq!(page.entries, 0);
}

#[test]
fn test_entry_kinds_and_inodes() {
    let fx = Fixture::with_tree(TempTree::new().file("file", b"x").dir("dir"));
    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();

    let mut buf = vec![0u8; 4096];
    let page = fx.fs.read_dir(ROOT_INODE, fh, 0, &mut buf).unwrap();
    for d in decode_dirents(&buf[..page.bytes_written]) {
        match d.name.to_str().unwrap() {
            "file" => {
                assert_eq!(d.kind, EntryType::File);
                assert_eq!(d.ino, fx.ino("file"));
            }
            "dir" => {
                assert_eq!(d.kind, EntryType::Directory);
                assert_eq!(d.ino, fx.ino("dir"));
            }
            "." => assert_eq!(d.ino, ROOT_INODE),
            other => panic!("unexpected entry {other}"),
        }
    }
}

#[test]
fn test_offsets_are_monotonic_and_resumable() {
    let mut tree = TempTree::new();
    for i in 0..20 {
        tree = tree.file(&format!("entry-{i:02}"), b"");
    }
    let fx = Fixture::with_tree(tree);
    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();

    let mut offset = 0;
    let mut collected = Vec::new();
    loop {
        let mut buf = vec![0u8; 100];
        let page = fx.fs.read_dir(ROOT_INODE, fh, offset, &mut buf).unwrap();
        if page.entries == 0 {
            break;
        }
        for d in decode_dirents(&buf[..page.bytes_written]) {
            assert!(d.offset > offset);
            offset = d.offset;
            collected.push(d.name.to_string_lossy().into_owned());
        }
    }

    assert_eq!(collected.last().map(String::as_str), Some(SENTINEL_NAME));
    collected.pop();
    collected.sort();
    assert_eq!(collected, fx.tree.list(""));
}

#[test]
fn test_empty_directory_lists_nothing() {
    let fx = Fixture::with_tree(TempTree::new().dir("empty"));
    let ino = fx.ino("empty");
    let fh = fx.fs.open_dir(ino).unwrap();

    let mut buf = vec![0u8; 256];
    let page = fx.fs.read_dir(ino, fh, 0, &mut buf).unwrap();
    assert_eq!(page.bytes_written, 0);
    assert!(!page.sentinel);
}

#[test]
fn test_buffer_smaller_than_header_writes_nothing() {
    let fx = Fixture::with_tree(TempTree::new().file("a", b""));
    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();

    let mut buf = vec![0u8; DIRENT_HEADER_LEN - 1];
    let page = fx.fs.read_dir(ROOT_INODE, fh, 0, &mut buf).unwrap();
    assert_eq!(page.bytes_written, 0);
}

#[test]
fn test_wrong_handle_is_not_found() {
    let fx = Fixture::with_tree(TempTree::new().dir("d"));
    let d = fx.ino("d");
    let root_fh = fx.fs.open_dir(ROOT_INODE).unwrap();

    let mut buf = vec![0u8; 256];
    assert!(matches!(fx.fs.read_dir(d, root_fh, 0, &mut buf), Err(FsError::NotFound)));
    assert!(matches!(fx.fs.read_dir(ROOT_INODE, 0xdead, 0, &mut buf), Err(FsError::NotFound)));

    fx.fs.release_dir_handle(root_fh);
    assert!(matches!(fx.fs.read_dir(ROOT_INODE, root_fh, 0, &mut buf), Err(FsError::NotFound)));
}

#[test]
fn test_listing_reflects_external_changes() {
    let fx = Fixture::new();
    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();
    std::fs::write(fx.tree.join("late"), b"").unwrap();

    let mut buf = vec![0u8; 256];
    let page = fx.fs.read_dir(ROOT_INODE, fh, 0, &mut buf).unwrap();
    assert_eq!(names(&buf[..page.bytes_written]), ["late", "."]);
}

#[test]
fn test_unusual_names_survive_listing() {
    let fx = Fixture::new();
    let mut expected: Vec<String> = special_filenames();
    expected.push(unicode_filename());
    for n in &expected {
        fx.fs.create_file(ROOT_INODE, name(n), 0o644).unwrap();
    }

    let fh = fx.fs.open_dir(ROOT_INODE).unwrap();
    let mut buf = vec![0u8; 4096];
    let page = fx.fs.read_dir(ROOT_INODE, fh, 0, &mut buf).unwrap();
    assert!(page.sentinel);

    let mut listed = names(&buf[..page.bytes_written]);
    listed.retain(|n| n != SENTINEL_NAME);
    listed.sort();
    expected.sort();
    assert_eq!(listed, expected);
}
