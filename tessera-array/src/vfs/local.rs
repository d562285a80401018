use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use bytes::Bytes;

use super::{Vfs, out_of_range};

/// The local file system. Locations are plain paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl Vfs for LocalFs {
    fn is_dir(&self, uri: &str) -> io::Result<bool> {
        Ok(Path::new(uri).is_dir())
    }

    fn is_file(&self, uri: &str) -> io::Result<bool> {
        Ok(Path::new(uri).is_file())
    }

    fn create_dir(&self, uri: &str) -> io::Result<()> {
        fs::create_dir_all(uri)
    }

    fn read(&self, uri: &str) -> io::Result<Bytes> {
        fs::read(uri).map(Bytes::from)
    }

    fn read_range(&self, uri: &str, range: Range<u64>) -> io::Result<Bytes> {
        let mut file = File::open(uri)?;
        let size = file.metadata()?.len();
        if range.end > size || range.start > range.end {
            return Err(out_of_range(uri, &range, size));
        }
        let len = usize::try_from(range.end - range.start)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut buffer = vec![0u8; len];
        file.seek(SeekFrom::Start(range.start))?;
        file.read_exact(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }

    fn file_size(&self, uri: &str) -> io::Result<u64> {
        Ok(fs::metadata(uri)?.len())
    }

    fn write(&self, uri: &str, data: &[u8]) -> io::Result<()> {
        fs::write(uri, data)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn ls(&self, uri: &str) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(uri)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn remove_file(&self, uri: &str) -> io::Result<()> {
        fs::remove_file(uri)
    }
}
