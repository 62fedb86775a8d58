//! Small helpers shared by the frontends

use std::io;
use std::path::Path;

/// Overwrite `path` with `content`, byte for byte. This backs the display
/// surface's "save as" action; the content is whatever the frontend has
/// rendered, written as-is.
pub fn write_text(path: &Path, content: &str) -> io::Result<()> {
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_text_overwrites() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_text(file.path(), "first pass").unwrap();
        write_text(file.path(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "second");
    }
}
