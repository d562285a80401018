use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};
use tessera_schema::{ArraySchema, Field};

use crate::context::now_millis;
use crate::estimate::{estimate_max_buffer_size, estimate_max_memory_size, estimate_result_size};
use crate::fragment::{FRAGMENTS_DIR, Fragment, Mbr, list_fragments, open_fragment};
use crate::vfs::join;
use crate::{Context, Subarray};

/// Name of the file holding the persisted schema of an array.
pub const SCHEMA_FILE: &str = "__array_schema.json";

/// Name of the marker file identifying a group.
pub const GROUP_MARKER: &str = "__group";

/// The mode an array handle is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Read => write!(f, "read"),
            Mode::Write => write!(f, "write"),
        }
    }
}

/// The kind of object stored at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Array,
    Group,
}

/// Probe what is stored at `uri`, returning `None` when it is neither an array nor a group.
pub fn object_type(ctx: &Context, uri: &str) -> TesseraResult<Option<ObjectType>> {
    let vfs = ctx.vfs();
    if vfs.is_file(&join(uri, SCHEMA_FILE))? {
        Ok(Some(ObjectType::Array))
    } else if vfs.is_file(&join(uri, GROUP_MARKER))? {
        Ok(Some(ObjectType::Group))
    } else {
        Ok(None)
    }
}

fn ensure_vacant(ctx: &Context, uri: &str) -> TesseraResult<()> {
    if let Some(existing) = object_type(ctx, uri)? {
        let kind = match existing {
            ObjectType::Array => "an array",
            ObjectType::Group => "a group",
        };
        tessera_bail!(AlreadyExists: "{} already holds {}", uri, kind);
    }
    if ctx.vfs().is_file(uri)? {
        tessera_bail!(AlreadyExists: "{} is a file", uri);
    }
    if ctx.vfs().is_dir(uri)? && !ctx.vfs().ls(uri)?.is_empty() {
        tessera_bail!(AlreadyExists: "{} is a non-empty directory", uri);
    }
    Ok(())
}

/// A named container of arrays and other groups.
pub struct Group;

impl Group {
    /// Create an empty group at `uri`.
    pub fn create(ctx: &Context, uri: &str) -> TesseraResult<()> {
        ensure_vacant(ctx, uri)?;
        ctx.vfs().create_dir(uri)?;
        ctx.vfs().write(&join(uri, GROUP_MARKER), &[])?;
        log::debug!("created group {}", uri);
        Ok(())
    }
}

struct OpenState {
    mode: Mode,
    schema: Arc<ArraySchema>,
    fragments: Arc<[Fragment]>,
    timestamp: u64,
}

/// A handle to a persisted array.
///
/// Handles start closed. Opening one for [`Mode::Read`] takes a snapshot of the fragments
/// committed at that point; later writes stay invisible to the handle until [`Array::reopen`].
pub struct Array {
    ctx: Context,
    uri: String,
    state: Option<OpenState>,
}

impl Array {
    /// Persist `schema` as a new, empty array at `uri`.
    pub fn create(ctx: &Context, uri: &str, schema: &ArraySchema) -> TesseraResult<()> {
        schema.validate()?;
        ensure_vacant(ctx, uri)?;

        let vfs = ctx.vfs();
        vfs.create_dir(&join(uri, FRAGMENTS_DIR))?;
        vfs.write(&join(uri, SCHEMA_FILE), &schema.to_json()?)?;
        log::debug!("created array {}: {}", uri, schema);
        Ok(())
    }

    /// A closed handle to the array at `uri`. Performs no IO.
    pub fn new(ctx: &Context, uri: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            uri: uri.into().trim_end_matches('/').to_string(),
            state: None,
        }
    }

    /// Open the handle, seeing every fragment committed so far.
    pub fn open(&mut self, mode: Mode) -> TesseraResult<()> {
        self.open_snapshot(mode, None)
    }

    /// Open the handle for reading, seeing only fragments committed at or before `timestamp`.
    pub fn open_at(&mut self, mode: Mode, timestamp: u64) -> TesseraResult<()> {
        if mode != Mode::Read {
            tessera_bail!(Mode: "only read handles can be opened at a timestamp");
        }
        self.open_snapshot(mode, Some(timestamp))
    }

    fn open_snapshot(&mut self, mode: Mode, at: Option<u64>) -> TesseraResult<()> {
        if let Some(state) = &self.state {
            tessera_bail!(Mode: "{} is already open for {}", self.uri, state.mode);
        }
        let schema_uri = join(&self.uri, SCHEMA_FILE);
        if !self.ctx.vfs().is_file(&schema_uri)? {
            tessera_bail!(NotFound: "no array at {}", self.uri);
        }
        let schema = ArraySchema::from_json(&self.ctx.vfs().read(&schema_uri)?)
            .map_err(|e| e.with_context(format!("loading the schema of {}", self.uri)))?;

        let (fragments, timestamp) = match mode {
            Mode::Read => self.load_fragments(&schema, at)?,
            Mode::Write => (Arc::from(Vec::new()), now_millis()),
        };
        log::debug!(
            "opened {} for {} at {} with {} fragments",
            self.uri,
            mode,
            timestamp,
            fragments.len()
        );
        self.state = Some(OpenState {
            mode,
            schema: Arc::new(schema),
            fragments,
            timestamp,
        });
        Ok(())
    }

    fn load_fragments(
        &self,
        schema: &ArraySchema,
        at: Option<u64>,
    ) -> TesseraResult<(Arc<[Fragment]>, u64)> {
        let vfs = self.ctx.vfs().as_ref();
        let fragments = list_fragments(vfs, &self.uri)?
            .into_iter()
            .filter(|(_, ts)| at.is_none_or(|at| *ts <= at))
            .map(|(name, ts)| open_fragment(vfs, schema, &self.uri, &name, ts))
            .try_collect::<_, Vec<_>, _>()?;
        // Fragment clocks may run ahead of the wall clock.
        let timestamp = at.unwrap_or_else(|| {
            fragments
                .iter()
                .map(Fragment::timestamp)
                .fold(now_millis(), u64::max)
        });
        Ok((Arc::from(fragments), timestamp))
    }

    /// Refresh the fragment snapshot of a read handle.
    pub fn reopen(&mut self) -> TesseraResult<()> {
        let state = self.state()?;
        if state.mode != Mode::Read {
            tessera_bail!(Mode: "only read handles can be reopened");
        }
        let schema = state.schema.clone();
        let (fragments, timestamp) = self.load_fragments(&schema, None)?;
        log::debug!("reopened {} with {} fragments", self.uri, fragments.len());
        if let Some(state) = self.state.as_mut() {
            state.fragments = fragments;
            state.timestamp = timestamp;
        }
        Ok(())
    }

    /// Release the handle. Closing a closed handle does nothing.
    pub fn close(&mut self) {
        if self.state.take().is_some() {
            log::debug!("closed {}", self.uri);
        }
    }

    fn state(&self) -> TesseraResult<&OpenState> {
        self.state
            .as_ref()
            .ok_or_else(|| tessera_err!(ClosedHandle: "array {} is not open", self.uri))
    }

    pub(crate) fn read_state(&self) -> TesseraResult<(&ArraySchema, &[Fragment])> {
        let state = self.state()?;
        if state.mode != Mode::Read {
            tessera_bail!(Mode: "array {} is open for {}, not read", self.uri, state.mode);
        }
        Ok((&state.schema, &state.fragments))
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn mode(&self) -> TesseraResult<Mode> {
        Ok(self.state()?.mode)
    }

    pub fn schema(&self) -> TesseraResult<Arc<ArraySchema>> {
        Ok(self.state()?.schema.clone())
    }

    /// The time the snapshot was taken, in milliseconds since the epoch.
    pub fn timestamp(&self) -> TesseraResult<u64> {
        Ok(self.state()?.timestamp)
    }

    /// The fragments visible to a read handle, oldest first.
    pub fn fragments(&self) -> TesseraResult<&[Fragment]> {
        Ok(self.read_state()?.1)
    }

    pub fn fragment_count(&self) -> TesseraResult<usize> {
        Ok(self.fragments()?.len())
    }

    /// The bounds of every cell visible to a read handle, or `None` if the array is empty.
    pub fn non_empty_domain(&self) -> TesseraResult<Option<Mbr>> {
        Ok(self
            .fragments()?
            .iter()
            .map(|f| f.mbr().clone())
            .reduce(|a, b| a.union(&b)))
    }

    /// An upper bound on the bytes a read of `field` over `subarray` can produce.
    pub fn max_buffer_size(&self, field: &str, subarray: &Subarray) -> TesseraResult<usize> {
        estimate_max_buffer_size(self, field, subarray)
    }

    /// A best-effort guess at the bytes a read of `field` over `subarray` produces.
    pub fn est_result_size(&self, field: &str, subarray: &Subarray) -> TesseraResult<usize> {
        estimate_result_size(self, field, subarray)
    }

    /// The bytes of tile data a single-pass read of `subarray` would hold in memory.
    pub fn max_memory_size(&self, subarray: &Subarray) -> TesseraResult<usize> {
        estimate_max_memory_size(self, subarray)
    }

    pub(crate) fn resolve_field(&self, name: &str) -> TesseraResult<(Arc<ArraySchema>, Field)> {
        let schema = self.schema()?;
        let field = schema.field(name)?;
        Ok((schema, field))
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        self.close();
    }
}
