use std::collections::BTreeMap;
use std::io;
use std::ops::Range;

use bytes::Bytes;
use parking_lot::RwLock;

use super::{Vfs, out_of_range};

#[derive(Debug, Clone)]
enum Entry {
    Dir,
    File(Bytes),
}

/// An in-memory file system, shared by every clone of the context that owns it.
#[derive(Debug, Default)]
pub struct MemFs {
    entries: RwLock<BTreeMap<String, Entry>>,
}

fn normalize(uri: &str) -> &str {
    uri.trim_end_matches('/')
}

fn parent(uri: &str) -> Option<&str> {
    uri.rfind('/').map(|idx| &uri[..idx]).filter(|p| !p.is_empty())
}

fn not_found(uri: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", uri))
}

impl MemFs {
    fn file(&self, uri: &str) -> io::Result<Bytes> {
        match self.entries.read().get(normalize(uri)) {
            Some(Entry::File(data)) => Ok(data.clone()),
            _ => Err(not_found(uri)),
        }
    }

    fn parent_exists(entries: &BTreeMap<String, Entry>, uri: &str) -> bool {
        parent(uri).is_none_or(|p| matches!(entries.get(p), Some(Entry::Dir)))
    }
}

impl Vfs for MemFs {
    fn is_dir(&self, uri: &str) -> io::Result<bool> {
        Ok(matches!(self.entries.read().get(normalize(uri)), Some(Entry::Dir)))
    }

    fn is_file(&self, uri: &str) -> io::Result<bool> {
        Ok(matches!(self.entries.read().get(normalize(uri)), Some(Entry::File(_))))
    }

    fn create_dir(&self, uri: &str) -> io::Result<()> {
        let uri = normalize(uri);
        let mut entries = self.entries.write();
        let mut current = Some(uri);
        while let Some(dir) = current {
            match entries.get(dir) {
                Some(Entry::Dir) => break,
                Some(Entry::File(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} is a file", dir),
                    ));
                }
                None => {
                    entries.insert(dir.to_string(), Entry::Dir);
                }
            }
            current = parent(dir);
        }
        Ok(())
    }

    fn read(&self, uri: &str) -> io::Result<Bytes> {
        self.file(uri)
    }

    fn read_range(&self, uri: &str, range: Range<u64>) -> io::Result<Bytes> {
        let data = self.file(uri)?;
        let size = data.len() as u64;
        if range.end > size || range.start > range.end {
            return Err(out_of_range(uri, &range, size));
        }
        let invalid = |e| io::Error::new(io::ErrorKind::InvalidInput, e);
        let start = usize::try_from(range.start).map_err(invalid)?;
        let end = usize::try_from(range.end).map_err(invalid)?;
        Ok(data.slice(start..end))
    }

    fn file_size(&self, uri: &str) -> io::Result<u64> {
        Ok(self.file(uri)?.len() as u64)
    }

    fn write(&self, uri: &str, data: &[u8]) -> io::Result<()> {
        let uri = normalize(uri);
        let mut entries = self.entries.write();
        if !Self::parent_exists(&entries, uri) {
            return Err(not_found(parent(uri).unwrap_or(uri)));
        }
        if matches!(entries.get(uri), Some(Entry::Dir)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", uri),
            ));
        }
        entries.insert(uri.to_string(), Entry::File(Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let (from, to) = (normalize(from), normalize(to));
        let mut entries = self.entries.write();
        if !Self::parent_exists(&entries, to) {
            return Err(not_found(parent(to).unwrap_or(to)));
        }
        match entries.remove(from) {
            Some(Entry::File(data)) => {
                entries.insert(to.to_string(), Entry::File(data));
                Ok(())
            }
            Some(dir) => {
                entries.insert(from.to_string(), dir);
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot rename directory {}", from),
                ))
            }
            None => Err(not_found(from)),
        }
    }

    fn ls(&self, uri: &str) -> io::Result<Vec<String>> {
        let uri = normalize(uri);
        let entries = self.entries.read();
        if !matches!(entries.get(uri), Some(Entry::Dir)) {
            return Err(not_found(uri));
        }
        let prefix = format!("{}/", uri);
        Ok(entries
            .range(prefix.clone()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(&prefix))
            .map(|k| &k[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn remove_file(&self, uri: &str) -> io::Result<()> {
        let uri = normalize(uri);
        let mut entries = self.entries.write();
        match entries.get(uri) {
            Some(Entry::File(_)) => {
                entries.remove(uri);
                Ok(())
            }
            _ => Err(not_found(uri)),
        }
    }
}
