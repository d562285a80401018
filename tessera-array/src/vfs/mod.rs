//! Storage backends arrays are persisted to.
//!
//! Locations are `/`-separated strings. [`LocalFs`] maps them onto the local file system and
//! [`MemFs`] keeps everything in process memory.

use std::fmt::Debug;
use std::io;
use std::ops::Range;

use bytes::Bytes;

mod local;
mod memory;

pub use local::*;
pub use memory::*;

/// A minimal synchronous virtual file system.
///
/// Implementations must be safe to share across threads. Writes replace whole files, and
/// [`Vfs::rename`] must be atomic with respect to concurrent readers of the destination.
pub trait Vfs: Debug + Send + Sync {
    /// Whether `uri` names a directory.
    fn is_dir(&self, uri: &str) -> io::Result<bool>;

    /// Whether `uri` names a regular file.
    fn is_file(&self, uri: &str) -> io::Result<bool>;

    /// Create the directory `uri` together with any missing parents.
    fn create_dir(&self, uri: &str) -> io::Result<()>;

    /// Read a whole file.
    fn read(&self, uri: &str) -> io::Result<Bytes> {
        let size = self.file_size(uri)?;
        self.read_range(uri, 0..size)
    }

    /// Read the bytes of `range` from a file.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] if the file is shorter than the range.
    fn read_range(&self, uri: &str, range: Range<u64>) -> io::Result<Bytes>;

    /// The size of a file in bytes.
    fn file_size(&self, uri: &str) -> io::Result<u64>;

    /// Create or replace a file. The parent directory must exist.
    fn write(&self, uri: &str, data: &[u8]) -> io::Result<()>;

    /// Move a file to a new location, replacing any file already there.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// The names of the direct children of a directory, sorted.
    fn ls(&self, uri: &str) -> io::Result<Vec<String>>;

    /// Delete a file.
    fn remove_file(&self, uri: &str) -> io::Result<()>;
}

/// Join a child name onto a location.
pub fn join(uri: &str, child: &str) -> String {
    format!("{}/{}", uri.trim_end_matches('/'), child)
}

fn out_of_range(uri: &str, range: &Range<u64>, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "range {}..{} is past the end of {} ({} bytes)",
            range.start, range.end, uri, size
        ),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    enum Backend {
        Local(TempDir),
        Memory,
    }

    impl Backend {
        fn open(&self) -> (Arc<dyn Vfs>, String) {
            match self {
                Backend::Local(dir) => (
                    Arc::new(LocalFs),
                    dir.path().to_string_lossy().into_owned(),
                ),
                Backend::Memory => (Arc::new(MemFs::default()), "mem://root".to_string()),
            }
        }
    }

    #[rstest]
    #[case::local(Backend::Local(tempfile::tempdir().unwrap()))]
    #[case::memory(Backend::Memory)]
    fn file_lifecycle(#[case] backend: Backend) {
        let (vfs, root) = backend.open();
        let dir = join(&root, "a/b");
        vfs.create_dir(&dir).unwrap();
        assert!(vfs.is_dir(&dir).unwrap());
        assert!(!vfs.is_file(&dir).unwrap());

        let tmp = join(&dir, ".tmp");
        let file = join(&dir, "data");
        assert!(!vfs.is_file(&file).unwrap());
        vfs.write(&tmp, b"hello world").unwrap();
        vfs.rename(&tmp, &file).unwrap();

        assert!(vfs.is_file(&file).unwrap());
        assert!(!vfs.is_file(&tmp).unwrap());
        assert_eq!(vfs.file_size(&file).unwrap(), 11);
        assert_eq!(vfs.read(&file).unwrap().as_ref(), b"hello world");
        assert_eq!(vfs.read_range(&file, 6..11).unwrap().as_ref(), b"world");
        assert_eq!(
            vfs.read_range(&file, 6..12).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );

        vfs.create_dir(&join(&dir, "c")).unwrap();
        assert_eq!(vfs.ls(&dir).unwrap(), vec!["c".to_string(), "data".to_string()]);

        vfs.remove_file(&file).unwrap();
        assert!(!vfs.is_file(&file).unwrap());
        assert_eq!(
            vfs.read(&file).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[rstest]
    #[case::local(Backend::Local(tempfile::tempdir().unwrap()))]
    #[case::memory(Backend::Memory)]
    fn write_needs_parent(#[case] backend: Backend) {
        let (vfs, root) = backend.open();
        assert!(vfs.write(&join(&root, "missing/file"), b"x").is_err());
    }

    #[test]
    fn join_trims_separators() {
        assert_eq!(join("a/", "b"), "a/b");
        assert_eq!(join("a", "b"), "a/b");
    }
}
