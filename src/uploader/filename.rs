//! Client-supplied filename checks.

use std::path::Path;

use crate::server::Error;

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Turn a client-supplied filename into a single safe path component.
///
/// Control characters and surrounding whitespace are dropped. Names that are
/// empty, `.` or `..`, start with a dot, contain a path separator, a drive
/// colon or NUL, or are too long are rejected with `InvalidFilename`.
pub fn sanitize_filename(raw: &str) -> Result<String, Error> {
    let invalid = || Error::InvalidFilename(raw.escape_debug().to_string());

    if raw.contains('\0') {
        return Err(invalid());
    }
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let name = cleaned.trim();

    if name.is_empty() || name == "." || name == ".." || name.starts_with('.') {
        return Err(invalid());
    }
    if name.contains(['/', '\\', ':']) {
        return Err(invalid());
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(invalid());
    }
    Ok(name.to_string())
}

/// The lowercased extension of `name`, if it has one.
pub(crate) fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass() {
        assert_eq!(sanitize_filename("photo.jpg").unwrap(), "photo.jpg");
        assert_eq!(sanitize_filename("  War and Peace.txt ").unwrap(), "War and Peace.txt");
        assert_eq!(sanitize_filename("my\tbook\r\n.txt").unwrap(), "mybook.txt");
        assert_eq!(sanitize_filename("résumé.pdf").unwrap(), "résumé.pdf");
    }

    #[test]
    fn test_unsafe_names_are_rejected() {
        for name in [
            "",
            "   ",
            ".",
            "..",
            ".hidden",
            "../etc/passwd",
            "dir/file.txt",
            "..\\windows\\system.ini",
            "C:boot.ini",
            "nul\0byte.txt",
        ] {
            assert!(
                matches!(sanitize_filename(name), Err(Error::InvalidFilename(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_overlong_name_is_rejected() {
        let name = format!("{}.txt", "a".repeat(MAX_FILENAME_BYTES));
        assert!(sanitize_filename(&name).is_err());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Book.TXT").as_deref(), Some("txt"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
    }
}
