//! Test data generators.

use rand::Rng;

/// Generate random bytes of specified size.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..size).map(|_| rng.random()).collect()
}

/// A file name with multi-byte UTF-8 characters.
///
/// Exercises directory records whose byte length differs from their
/// character count.
pub fn unicode_filename() -> String {
    "résumé_日本語_🎉.txt".to_string()
}

/// Names that have tripped up path handling in other filesystems.
pub fn special_filenames() -> Vec<String> {
    [
        "file with spaces.txt",
        "file\twith\ttabs.txt",
        "émojis_🎉.txt",
        "中文文件.txt",
        "file-with-dashes.txt",
        "file.multiple.dots.txt",
        ".hidden",
        "..double-dot-prefix",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}
