//! §10.3 Configuration. `EngineConfig` aggregates per-execution engine
//! options with the retention caps the State/History/Checkpoint managers
//! use, loading backend defaults from the environment the way
//! [`crate::checkpoint`]'s donor pattern does for its own sqlite db name.

use std::time::Duration;

/// Which [`crate::checkpoint::CheckpointStore`] backend to construct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointBackend {
    InMemory,
    Sqlite { db_path: String },
}

impl CheckpointBackend {
    fn resolve_from_env() -> Self {
        dotenvy::dotenv().ok();
        match std::env::var("THREADENGINE_CHECKPOINT_BACKEND").as_deref() {
            Ok("sqlite") => Self::Sqlite {
                db_path: std::env::var("THREADENGINE_SQLITE_DB_NAME")
                    .unwrap_or_else(|_| "threadengine.db".to_string()),
            },
            _ => Self::InMemory,
        }
    }
}

impl Default for CheckpointBackend {
    fn default() -> Self {
        Self::resolve_from_env()
    }
}

/// Per-`execute` options (§6 engine inputs), plus the retention caps that
/// back the State/History/Checkpoint managers for the lifetime of the
/// engine that owns this config.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub enable_checkpoints: bool,
    pub checkpoint_interval: u64,
    pub max_steps: u64,
    pub timeout: Duration,
    pub node_timeout: Duration,
    pub max_node_retries: u32,
    pub node_retry_delay: Duration,
    pub enable_error_recovery: bool,
    pub record_routing_history: bool,

    pub history_capacity: usize,
    pub checkpoint_per_thread_cap: usize,
    pub checkpoint_global_cap: usize,
    pub checkpoint_backend: CheckpointBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_checkpoints: true,
            checkpoint_interval: 1,
            max_steps: 1_000,
            timeout: Duration::from_millis(300_000),
            node_timeout: Duration::from_millis(30_000),
            max_node_retries: 0,
            node_retry_delay: Duration::from_millis(1_000),
            enable_error_recovery: false,
            record_routing_history: false,

            history_capacity: crate::history::DEFAULT_HISTORY_CAPACITY,
            checkpoint_per_thread_cap: crate::checkpoint::DEFAULT_PER_THREAD_CAP,
            checkpoint_global_cap: crate::checkpoint::DEFAULT_GLOBAL_CAP,
            checkpoint_backend: CheckpointBackend::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder whose explicit overrides take precedence over whatever
/// [`EngineConfig::default`] resolved from the environment (§10.3).
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn enable_checkpoints(mut self, value: bool) -> Self {
        self.config.enable_checkpoints = value;
        self
    }

    #[must_use]
    pub fn checkpoint_interval(mut self, steps: u64) -> Self {
        self.config.checkpoint_interval = steps;
        self
    }

    #[must_use]
    pub fn max_steps(mut self, steps: u64) -> Self {
        self.config.max_steps = steps;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    #[must_use]
    pub fn node_timeout(mut self, timeout: Duration) -> Self {
        self.config.node_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_node_retries(mut self, retries: u32) -> Self {
        self.config.max_node_retries = retries;
        self
    }

    #[must_use]
    pub fn node_retry_delay(mut self, delay: Duration) -> Self {
        self.config.node_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn enable_error_recovery(mut self, value: bool) -> Self {
        self.config.enable_error_recovery = value;
        self
    }

    #[must_use]
    pub fn record_routing_history(mut self, value: bool) -> Self {
        self.config.record_routing_history = value;
        self
    }

    #[must_use]
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    #[must_use]
    pub fn checkpoint_per_thread_cap(mut self, cap: usize) -> Self {
        self.config.checkpoint_per_thread_cap = cap;
        self
    }

    #[must_use]
    pub fn checkpoint_global_cap(mut self, cap: usize) -> Self {
        self.config.checkpoint_global_cap = cap;
        self
    }

    #[must_use]
    pub fn checkpoint_backend(mut self, backend: CheckpointBackend) -> Self {
        self.config.checkpoint_backend = backend;
        self
    }

    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
