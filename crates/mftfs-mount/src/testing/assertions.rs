//! Custom assertions for driver tests.

/// Assert that two byte slices are equal with helpful error messages.
///
/// On failure, shows sizes and first differing position rather than
/// dumping potentially huge byte arrays.
pub fn assert_bytes_equal(actual: &[u8], expected: &[u8], context: &str) {
    assert!(
        actual.len() == expected.len(),
        "{}: size mismatch - expected {} bytes, got {} bytes",
        context,
        expected.len(),
        actual.len()
    );

    if let Some((i, (a, e))) = actual
        .iter()
        .zip(expected.iter())
        .enumerate()
        .find(|(_, (a, e))| a != e)
    {
        panic!("{context}: content mismatch at byte {i} - expected 0x{e:02x}, got 0x{a:02x}");
    }
}

/// Assert that an I/O result is an error with a specific errno.
pub fn assert_errno<T: std::fmt::Debug>(
    result: std::io::Result<T>,
    expected_errno: i32,
    context: &str,
) {
    match result {
        Ok(value) => {
            panic!("{context}: expected errno {expected_errno} but got success with {value:?}");
        }
        Err(err) => {
            let actual_errno = err.raw_os_error().unwrap_or(0);
            assert!(
                actual_errno == expected_errno,
                "{}: expected errno {} ({}), got errno {} ({})",
                context,
                expected_errno,
                errno_name(expected_errno),
                actual_errno,
                errno_name(actual_errno)
            );
        }
    }
}

/// Assert that an I/O result is Ok and unwrap it.
pub fn assert_io_ok<T>(result: std::io::Result<T>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            let errno = err.raw_os_error().unwrap_or(0);
            panic!(
                "{}: expected success but got error: {} (errno {} = {})",
                context,
                err,
                errno,
                errno_name(errno)
            );
        }
    }
}

/// Get a human-readable name for common errno values.
fn errno_name(errno: i32) -> &'static str {
    match errno {
        libc::ENOENT => "ENOENT",
        libc::EEXIST => "EEXIST",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::ENOTEMPTY => "ENOTEMPTY",
        libc::EACCES => "EACCES",
        libc::EPERM => "EPERM",
        libc::EINVAL => "EINVAL",
        libc::EIO => "EIO",
        libc::ENOSPC => "ENOSPC",
        libc::ENOSYS => "ENOSYS",
        libc::ENOTSUP => "ENOTSUP",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_bytes_equal_success() {
        assert_bytes_equal(&[1, 2, 3], &[1, 2, 3], "test");
    }

    #[test]
    #[should_panic(expected = "size mismatch")]
    fn test_assert_bytes_equal_size_mismatch() {
        assert_bytes_equal(&[1, 2], &[1, 2, 3], "test");
    }

    #[test]
    #[should_panic(expected = "content mismatch at byte 1")]
    fn test_assert_bytes_equal_content_mismatch() {
        assert_bytes_equal(&[1, 9, 3], &[1, 2, 3], "test");
    }

    #[test]
    fn test_assert_errno_matches() {
        let result: std::io::Result<()> = Err(std::io::Error::from_raw_os_error(libc::ENOENT));
        assert_errno(result, libc::ENOENT, "test");
    }

    #[test]
    #[should_panic(expected = "expected errno")]
    fn test_assert_errno_on_success() {
        assert_errno(Ok(1), libc::ENOENT, "test");
    }
}
