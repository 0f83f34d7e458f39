//! Entity manager configuration.

/// When pending changes are written before a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Flush before any query that touches an entity type with pending
    /// changes, and before commit.
    #[default]
    Auto,
    /// Flush only on commit, explicit `flush`, and bulk mutations.
    Commit,
}

/// Configuration for an [`crate::EntityManager`].
#[derive(Debug, Clone)]
pub struct Config {
    /// When pending changes are flushed.
    pub flush_mode: FlushMode,

    /// Number of translated plans kept in the plan cache (0 = no cache).
    pub plan_cache_capacity: usize,

    /// Begin a datastore transaction automatically before the first write.
    pub auto_begin: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Auto,
            plan_cache_capacity: 64,
            auto_begin: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flush mode.
    #[must_use]
    pub const fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Sets the plan cache capacity.
    #[must_use]
    pub const fn plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity;
        self
    }

    /// Sets whether writes begin a transaction automatically.
    #[must_use]
    pub const fn auto_begin(mut self, value: bool) -> Self {
        self.auto_begin = value;
        self
    }
}
