use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use tessera_error::{TesseraResult, tessera_bail};
use tessera_metrics::TesseraMetrics;

use crate::{Config, LocalFs, MemFs, Vfs, VfsBackend};

/// A session with the storage engine.
///
/// A context carries everything arrays and queries share: the configuration, the storage
/// backend, metrics, per-array writer locks, the cancellation generation and the fragment
/// clock. It is cheap to clone; clones share all state. Independent contexts never observe each
/// other's locks or cancellations.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: Config,
    vfs: Arc<dyn Vfs>,
    metrics: TesseraMetrics,
    writer_locks: DashMap<String, Arc<Mutex<()>>>,
    cancel_generation: AtomicU64,
    clock: Mutex<u64>,
}

impl Context {
    /// A context with the default configuration on the local file system.
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    /// A context whose backend is chosen by [`Config::vfs_backend`].
    pub fn from_config(config: Config) -> Self {
        let vfs: Arc<dyn Vfs> = match config.vfs_backend() {
            VfsBackend::Local => Arc::new(LocalFs),
            VfsBackend::Memory => Arc::new(MemFs::default()),
        };
        Self::with_vfs(config, vfs)
    }

    /// A context over a caller-provided backend.
    pub fn with_vfs(config: Config, vfs: Arc<dyn Vfs>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                vfs,
                metrics: TesseraMetrics::default(),
                writer_locks: DashMap::new(),
                cancel_generation: AtomicU64::new(0),
                clock: Mutex::new(0),
            }),
        }
    }

    /// The configuration the context was created with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The storage backend.
    pub fn vfs(&self) -> &Arc<dyn Vfs> {
        &self.inner.vfs
    }

    /// Metrics reported by operations of this context.
    pub fn metrics(&self) -> &TesseraMetrics {
        &self.inner.metrics
    }

    /// Cancel every query created before this call.
    ///
    /// Submissions in flight stop at their next batch boundary with
    /// [`TesseraError::Cancelled`](tessera_error::TesseraError::Cancelled); nothing they wrote
    /// becomes visible.
    pub fn cancel_tasks(&self) {
        let generation = self.inner.cancel_generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("cancelling tasks up to generation {}", generation);
    }

    pub(crate) fn cancel_generation(&self) -> u64 {
        self.inner.cancel_generation.load(Ordering::SeqCst)
    }

    /// A token that trips once [`Context::cancel_tasks`] is called after this point.
    pub(crate) fn cancel_token(&self) -> CancelToken {
        CancelToken {
            ctx: self.clone(),
            generation: self.cancel_generation(),
        }
    }

    /// The lock serializing writers of the array at `uri`.
    pub(crate) fn writer_lock(&self, uri: &str) -> Arc<Mutex<()>> {
        self.inner
            .writer_locks
            .entry(uri.trim_end_matches('/').to_string())
            .or_default()
            .clone()
    }

    /// Milliseconds since the epoch, strictly increasing across calls on this context and
    /// strictly above `floor`.
    pub(crate) fn next_timestamp(&self, floor: u64) -> u64 {
        let mut last = self.inner.clock.lock();
        let next = now_millis().max(*last + 1).max(floor.saturating_add(1));
        *last = next;
        next
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("vfs", &self.inner.vfs)
            .finish_non_exhaustive()
    }
}

/// Checked by long running operations between batches of cells.
#[derive(Clone)]
pub(crate) struct CancelToken {
    ctx: Context,
    generation: u64,
}

impl CancelToken {
    pub(crate) fn check(&self) -> TesseraResult<()> {
        if self.ctx.cancel_generation() != self.generation {
            tessera_bail!(Cancelled: "task cancelled through its context");
        }
        Ok(())
    }

    /// The number of cells to process between two checks.
    pub(crate) fn batch_cells(&self) -> usize {
        usize::try_from(self.ctx.config().batch_cells()).unwrap_or(usize::MAX)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let ctx = Context::new();
        let mut last = 0;
        for _ in 0..1000 {
            let ts = ctx.next_timestamp(0);
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn timestamps_respect_the_floor() {
        let ctx = Context::new();
        let floor = now_millis() + 60_000;
        assert_eq!(ctx.next_timestamp(floor), floor + 1);
        assert_eq!(ctx.next_timestamp(0), floor + 2);
    }

    #[test]
    fn clones_share_state() {
        let ctx = Context::from_config(Config::new().with("vfs.backend", "memory").unwrap());
        let clone = ctx.clone();
        ctx.vfs().create_dir("mem://shared").unwrap();
        assert!(clone.vfs().is_dir("mem://shared").unwrap());

        assert!(Arc::ptr_eq(&ctx.writer_lock("a/"), &clone.writer_lock("a")));
        assert!(!Arc::ptr_eq(&ctx.writer_lock("a"), &ctx.writer_lock("b")));

        let token = ctx.cancel_token();
        assert!(token.check().is_ok());
        clone.cancel_tasks();
        assert_eq!(ctx.cancel_generation(), 1);
        assert!(token.check().is_err());
        assert!(ctx.cancel_token().check().is_ok());
    }

    #[test]
    fn contexts_are_independent() {
        let a = Context::from_config(Config::new().with("vfs.backend", "memory").unwrap());
        let b = Context::from_config(Config::new().with("vfs.backend", "memory").unwrap());
        a.vfs().create_dir("mem://x").unwrap();
        assert!(!b.vfs().is_dir("mem://x").unwrap());
        a.cancel_tasks();
        assert_eq!(b.cancel_generation(), 0);
    }
}
