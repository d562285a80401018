//! Immutable batches of cells, one file per committed write.
//!
//! A fragment file is laid out as
//!
//! ```text
//! | magic | tile 0: coords, attr 0, attr 1, ... | tile 1: ... | footer | postscript | eof |
//! ```
//!
//! The footer is a JSON document describing every tile: its cell count, its minimum
//! bounding rectangle and the location of its segments. The postscript locates the footer, and
//! the 8-byte end-of-file record holds the format version, the postscript length and the magic
//! bytes again. Opening a fragment only reads the tail of the file.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tessera_dtype::PValue;

mod reader;
mod writer;

pub(crate) use reader::*;
pub(crate) use writer::*;

/// The current version of the fragment file format.
pub const FRAGMENT_VERSION: u16 = 1;

/// Name of the directory holding the fragments of an array.
pub const FRAGMENTS_DIR: &str = "__fragments";

mod forever_constant {
    /// The magic bytes opening and closing every fragment file.
    pub const MAGIC_BYTES: [u8; 4] = *b"TSRF";
    /// The size of the end-of-file record in bytes.
    pub const EOF_SIZE: usize = 8;
    /// The maximum length of a postscript in bytes.
    pub const MAX_POSTSCRIPT_SIZE: u16 = u16::MAX - 8;

}

pub use forever_constant::*;

/// The location of a contiguous run of bytes inside a fragment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub offset: u64,
    pub length: u32,
}

impl Segment {
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + u64::from(self.length)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Postscript {
    pub(crate) footer: Segment,
}

/// The per-dimension `[min, max]` of a set of coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mbr(Vec<(PValue, PValue)>);

impl Mbr {
    /// Bounds of a single coordinate tuple.
    pub fn point(tuple: Vec<PValue>) -> Self {
        Self(tuple.into_iter().map(|v| (v, v)).collect())
    }

    /// Grow the bounds to cover `tuple`.
    pub fn expand(&mut self, tuple: &[PValue]) {
        for ((lo, hi), v) in self.0.iter_mut().zip(tuple) {
            if *v < *lo {
                *lo = *v;
            }
            if *v > *hi {
                *hi = *v;
            }
        }
    }

    /// The smallest bounds covering both.
    pub fn union(&self, other: &Mbr) -> Mbr {
        Mbr(self
            .0
            .iter()
            .zip(&other.0)
            .map(|(&(a_lo, a_hi), &(b_lo, b_hi))| {
                (
                    if b_lo < a_lo { b_lo } else { a_lo },
                    if b_hi > a_hi { b_hi } else { a_hi },
                )
            })
            .collect())
    }

    /// One `(min, max)` pair per dimension.
    pub fn ranges(&self) -> &[(PValue, PValue)] {
        &self.0
    }
}

/// Footer entry of one data tile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileMetadata {
    pub(crate) cell_count: u64,
    pub(crate) mbr: Mbr,
    pub(crate) coords: Segment,
    pub(crate) attributes: Vec<Segment>,
}

impl TileMetadata {
    pub fn cell_count(&self) -> u64 {
        self.cell_count
    }

    pub fn mbr(&self) -> &Mbr {
        &self.mbr
    }
}

/// The JSON footer of a fragment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FragmentFooter {
    pub(crate) cell_count: u64,
    pub(crate) mbr: Mbr,
    pub(crate) tiles: Vec<TileMetadata>,
}

/// A committed fragment, as seen by a read snapshot.
#[derive(Debug, Clone)]
pub struct Fragment {
    name: String,
    uri: String,
    timestamp: u64,
    footer: FragmentFooter,
}

impl Fragment {
    pub(crate) fn new(name: String, uri: String, timestamp: u64, footer: FragmentFooter) -> Self {
        Self {
            name,
            uri,
            timestamp,
            footer,
        }
    }

    /// The fragment name, `__<timestamp>_<uuid>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Commit time in milliseconds since the epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn cell_count(&self) -> u64 {
        self.footer.cell_count
    }

    /// Bounds of every cell of the fragment.
    pub fn mbr(&self) -> &Mbr {
        &self.footer.mbr
    }

    pub fn tiles(&self) -> &[TileMetadata] {
        &self.footer.tiles
    }
}

/// A fresh fragment name for a commit at `timestamp`.
pub(crate) fn fragment_name(timestamp: u64) -> String {
    format!("__{}_{}", timestamp, uuid::Uuid::new_v4().simple())
}

/// The commit timestamp encoded in a fragment name, or `None` for foreign files.
pub(crate) fn parse_fragment_name(name: &str) -> Option<u64> {
    let (timestamp, uuid) = name.strip_prefix("__")?.split_once('_')?;
    if uuid.is_empty() {
        return None;
    }
    timestamp.parse().ok()
}
