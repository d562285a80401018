use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tessera_error::{TesseraError, TesseraResult, tessera_bail, tessera_err};

/// Reject writes holding the same coordinates more than once.
pub const CHECK_COORD_DUPS: &str = "sm.check_coord_dups";
/// Silently drop duplicate coordinates of a write, keeping the last written cell.
pub const DEDUP_COORDS: &str = "sm.dedup_coords";
/// Number of cells processed between two cancellation checks.
pub const BATCH_CELLS: &str = "sm.batch_cells";
/// Bytes of tile data a read may hold in memory at once. Larger reads are split into partitions.
pub const MEMORY_BUDGET: &str = "sm.memory_budget";
/// The storage backend of a context, `local` or `memory`.
pub const VFS_BACKEND: &str = "vfs.backend";

/// Which [`Vfs`](crate::Vfs) a context creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VfsBackend {
    /// [`LocalFs`](crate::LocalFs).
    #[default]
    Local,
    /// [`MemFs`](crate::MemFs).
    Memory,
}

impl FromStr for VfsBackend {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(VfsBackend::Local),
            "memory" => Ok(VfsBackend::Memory),
            _ => Err(tessera_err!("unknown vfs backend {}", s)),
        }
    }
}

impl Display for VfsBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VfsBackend::Local => write!(f, "local"),
            VfsBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Engine parameters of a [`Context`](crate::Context).
///
/// Parameters are addressed by dotted string keys, so a configuration can be loaded from a flat
/// JSON object such as `{"sm.dedup_coords": true, "vfs.backend": "memory"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "sm.check_coord_dups")]
    check_coord_dups: bool,
    #[serde(rename = "sm.dedup_coords")]
    dedup_coords: bool,
    #[serde(rename = "sm.batch_cells")]
    batch_cells: u64,
    #[serde(rename = "sm.memory_budget")]
    memory_budget: u64,
    #[serde(rename = "vfs.backend")]
    vfs_backend: VfsBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_coord_dups: true,
            dedup_coords: false,
            batch_cells: 65_536,
            memory_budget: 5 << 30,
            vfs_backend: VfsBackend::Local,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> TesseraResult<T> {
    value
        .parse()
        .map_err(|_| tessera_err!("cannot parse '{}' as the value of {}", value, key))
}

impl Config {
    /// The default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON object of parameters. Missing keys keep their defaults.
    pub fn from_json(json: &[u8]) -> TesseraResult<Self> {
        let config: Config = serde_json::from_slice(json)
            .map_err(|e| tessera_err!("invalid configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read(path).map_err(|e| {
            TesseraError::from(e).with_context(format!("reading {}", path.display()))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> TesseraResult<()> {
        if self.batch_cells == 0 {
            tessera_bail!("{} must be positive", BATCH_CELLS);
        }
        if self.memory_budget == 0 {
            tessera_bail!("{} must be positive", MEMORY_BUDGET);
        }
        Ok(())
    }

    /// Set a parameter from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> TesseraResult<()> {
        let mut updated = self.clone();
        match key {
            CHECK_COORD_DUPS => updated.check_coord_dups = parse(key, value)?,
            DEDUP_COORDS => updated.dedup_coords = parse(key, value)?,
            BATCH_CELLS => updated.batch_cells = parse(key, value)?,
            MEMORY_BUDGET => updated.memory_budget = parse(key, value)?,
            VFS_BACKEND => updated.vfs_backend = value.parse()?,
            _ => tessera_bail!("unknown configuration parameter {}", key),
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// The string form of a parameter.
    pub fn get(&self, key: &str) -> TesseraResult<String> {
        Ok(match key {
            CHECK_COORD_DUPS => self.check_coord_dups.to_string(),
            DEDUP_COORDS => self.dedup_coords.to_string(),
            BATCH_CELLS => self.batch_cells.to_string(),
            MEMORY_BUDGET => self.memory_budget.to_string(),
            VFS_BACKEND => self.vfs_backend.to_string(),
            _ => tessera_bail!("unknown configuration parameter {}", key),
        })
    }

    /// Builder-style [`Config::set`].
    pub fn with(mut self, key: &str, value: &str) -> TesseraResult<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Value of [`CHECK_COORD_DUPS`].
    pub fn check_coord_dups(&self) -> bool {
        self.check_coord_dups
    }

    /// Value of [`DEDUP_COORDS`].
    pub fn dedup_coords(&self) -> bool {
        self.dedup_coords
    }

    /// Value of [`BATCH_CELLS`].
    pub fn batch_cells(&self) -> u64 {
        self.batch_cells
    }

    /// Value of [`MEMORY_BUDGET`].
    pub fn memory_budget(&self) -> u64 {
        self.memory_budget
    }

    /// Value of [`VFS_BACKEND`].
    pub fn vfs_backend(&self) -> VfsBackend {
        self.vfs_backend
    }
}
