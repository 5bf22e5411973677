//! Store options and their validation.
//!
//! `StoreOptions` is populated from a layered source stack — base file,
//! environment-specific file, environment variables, then programmatic
//! overrides, highest precedence last — an `env::var(..)` merge style, with
//! an explicit file layer and a `validate()` pass consolidating every
//! range-constraint violation into one error instead of failing on the
//! first.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dcb_core::StoreError;
use serde::{Deserialize, Serialize};

/// Durability policy for event and ledger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushPolicy {
    /// fsync event files and the ledger before acknowledging an append.
    FlushImmediately,
    /// Rely on the OS page cache; faster, risks losing the uncommitted tail
    /// on an unclean shutdown.
    Buffered,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::FlushImmediately
    }
}

/// Recognized store options, merged from file/env/programmatic layers and
/// validated once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Absolute root directory all store contexts live under.
    pub root_path: PathBuf,
    /// The store contexts (subdirectories of `root_path`) to open.
    pub contexts: Vec<String>,
    /// Whether to fsync before acknowledging an append.
    pub flush_events_immediately: bool,
    /// How long to wait for the cross-process lock before failing.
    pub cross_process_lock_timeout: Duration,
    /// How often the projection daemon polls for new events.
    pub polling_interval: Duration,
    /// How many events the daemon/rebuild read in one batch.
    pub batch_size: usize,
    /// How many projections may rebuild concurrently.
    pub max_concurrent_rebuilds: usize,
    /// Whether newly registered, never-checkpointed projections are
    /// rebuilt automatically.
    pub enable_auto_rebuild: bool,
}

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);
const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(100);
const MAX_POLLING_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MIN_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_BATCH_SIZE: usize = 1000;
const MAX_BATCH_SIZE: usize = 100_000;
const DEFAULT_MAX_CONCURRENT_REBUILDS: usize = 4;
const MAX_MAX_CONCURRENT_REBUILDS: usize = 64;

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            root_path: env::temp_dir().join("dcb-store"),
            contexts: vec!["default".to_string()],
            flush_events_immediately: true,
            cross_process_lock_timeout: DEFAULT_LOCK_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_rebuilds: DEFAULT_MAX_CONCURRENT_REBUILDS,
            enable_auto_rebuild: true,
        }
    }
}

impl StoreOptions {
    /// Loads options starting from defaults, then a base config file, then
    /// an environment-specific config file, then environment variables.
    /// Programmatic overrides are applied by the caller afterward via the
    /// builder-style `with_*` methods, which is the highest-precedence
    /// layer.
    ///
    /// Missing files are not an error: only the layers that exist
    /// contribute. Malformed files that do exist are reported as part of
    /// validation rather than failing the merge, so a single consolidated
    /// error can be raised for everything wrong with the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if a present config file cannot be
    /// parsed as JSON.
    pub fn from_layers(base_file: Option<&std::path::Path>, environment: Option<&str>) -> Result<Self, StoreError> {
        let mut options = Self::default();

        if let Some(path) = base_file {
            options.merge_file(path)?;
        }
        if let (Some(path), Some(env_name)) = (base_file, environment) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
                let env_path = path.with_file_name(format!("{stem}.{env_name}.{ext}"));
                options.merge_file(&env_path)?;
            }
        }
        options.merge_env();
        Ok(options)
    }

    fn merge_file(&mut self, path: &std::path::Path) -> Result<(), StoreError> {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Ok(());
        };
        let overrides: PartialOptions = serde_json::from_str(&contents)
            .map_err(|e| StoreError::validation(format!("config file {} is not valid JSON: {e}", path.display())))?;
        overrides.apply_to(self);
        Ok(())
    }

    fn merge_env(&mut self) {
        if let Ok(value) = env::var("DCB_ROOT_PATH") {
            self.root_path = PathBuf::from(value);
        }
        if let Ok(value) = env::var("DCB_CONTEXTS") {
            self.contexts = value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Ok(value) = parse_env_bool("DCB_FLUSH_EVENTS_IMMEDIATELY") {
            self.flush_events_immediately = value;
        }
        if let Some(value) = parse_env_millis("DCB_CROSS_PROCESS_LOCK_TIMEOUT_MS") {
            self.cross_process_lock_timeout = value;
        }
        if let Some(value) = parse_env_millis("DCB_POLLING_INTERVAL_MS") {
            self.polling_interval = value;
        }
        if let Some(value) = env::var("DCB_BATCH_SIZE").ok().and_then(|s| s.parse().ok()) {
            self.batch_size = value;
        }
        if let Some(value) = env::var("DCB_MAX_CONCURRENT_REBUILDS").ok().and_then(|s| s.parse().ok()) {
            self.max_concurrent_rebuilds = value;
        }
        if let Ok(value) = parse_env_bool("DCB_ENABLE_AUTO_REBUILD") {
            self.enable_auto_rebuild = value;
        }
    }

    /// Validates every recognized option, returning a single consolidated
    /// [`StoreError::Validation`] listing every violation found — never just
    /// the first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if any option is out of range.
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut violations = Vec::new();

        if self.root_path.as_os_str().is_empty() {
            violations.push("root_path must not be empty".to_string());
        } else if self.root_path.to_string_lossy().contains('\0') {
            violations.push("root_path must not contain a NUL byte".to_string());
        } else if !self.root_path.is_absolute() {
            violations.push(format!("root_path must be absolute, got {}", self.root_path.display()));
        }

        if self.contexts.is_empty() {
            violations.push("contexts must contain at least one entry".to_string());
        }
        for context in &self.contexts {
            if context.is_empty() || context.contains('\0') {
                violations.push(format!("context name {context:?} is invalid"));
            }
        }

        if self.cross_process_lock_timeout < MIN_LOCK_TIMEOUT {
            violations.push(format!(
                "cross_process_lock_timeout must be at least {MIN_LOCK_TIMEOUT:?}, got {:?}",
                self.cross_process_lock_timeout
            ));
        }

        if self.polling_interval < MIN_POLLING_INTERVAL || self.polling_interval > MAX_POLLING_INTERVAL {
            violations.push(format!(
                "polling_interval must be between {MIN_POLLING_INTERVAL:?} and {MAX_POLLING_INTERVAL:?}, got {:?}",
                self.polling_interval
            ));
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            violations.push(format!("batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}", self.batch_size));
        }

        if self.max_concurrent_rebuilds == 0 || self.max_concurrent_rebuilds > MAX_MAX_CONCURRENT_REBUILDS {
            violations.push(format!(
                "max_concurrent_rebuilds must be between 1 and {MAX_MAX_CONCURRENT_REBUILDS}, got {}",
                self.max_concurrent_rebuilds
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(violations))
        }
    }

    /// Returns the root directory for one context.
    #[must_use]
    pub fn context_root(&self, context: &str) -> PathBuf {
        self.root_path.join(context)
    }
}

fn parse_env_bool(name: &str) -> Result<bool, ()> {
    env::var(name).ok().and_then(|s| s.parse().ok()).ok_or(())
}

fn parse_env_millis(name: &str) -> Option<Duration> {
    env::var(name).ok().and_then(|s| s.parse().ok()).map(Duration::from_millis)
}

/// A JSON-file-shaped partial override layer: every field optional, applied
/// on top of whatever came before it.
#[derive(Debug, Default, Deserialize)]
struct PartialOptions {
    root_path: Option<PathBuf>,
    contexts: Option<Vec<String>>,
    flush_events_immediately: Option<bool>,
    cross_process_lock_timeout_ms: Option<u64>,
    polling_interval_ms: Option<u64>,
    batch_size: Option<usize>,
    max_concurrent_rebuilds: Option<usize>,
    enable_auto_rebuild: Option<bool>,
}

impl PartialOptions {
    fn apply_to(self, options: &mut StoreOptions) {
        if let Some(v) = self.root_path {
            options.root_path = v;
        }
        if let Some(v) = self.contexts {
            options.contexts = v;
        }
        if let Some(v) = self.flush_events_immediately {
            options.flush_events_immediately = v;
        }
        if let Some(v) = self.cross_process_lock_timeout_ms {
            options.cross_process_lock_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.polling_interval_ms {
            options.polling_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.batch_size {
            options.batch_size = v;
        }
        if let Some(v) = self.max_concurrent_rebuilds {
            options.max_concurrent_rebuilds = v;
        }
        if let Some(v) = self.enable_auto_rebuild {
            options.enable_auto_rebuild = v;
        }
    }
}
