use std::path::Path;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

// ── Scheduler config ──────────────────────────────────────────

/// Tuning knobs for the compilation scheduler, typically parsed from TOML.
///
/// Threshold tables are indexed by the current number of active workers.
/// Lookups past the end of a table use its last entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on worker threads. 0 = logical CPUs minus one.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Queue weight above which worker `k + 1` is woken while `k` are active.
    #[serde(default = "default_activation_thresholds")]
    pub activation_thresholds: Vec<i64>,

    /// Activation thresholds used once worker starvation was detected.
    #[serde(default = "default_starved_activation_thresholds")]
    pub starved_activation_thresholds: Vec<i64>,

    /// Queue weight under which a worker suspends itself, indexed by
    /// active count minus one. Negative entries never suspend.
    #[serde(default = "default_suspension_thresholds")]
    pub suspension_thresholds: Vec<i64>,

    /// Share of one CPU (percent) compilation may use before throttling.
    #[serde(default = "default_cpu_entitlement_percent")]
    pub cpu_entitlement_percent: u32,

    #[serde(default = "default_throttle_min_sleep_ms")]
    pub throttle_min_sleep_ms: u64,

    #[serde(default = "default_throttle_max_sleep_ms")]
    pub throttle_max_sleep_ms: u64,

    /// Bounded wait of an idle worker on the queue condition.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// How often the resource sampler polls telemetry.
    #[serde(default = "default_sampling_interval_ms")]
    pub sampling_interval_ms: u64,

    /// Average worker CPU (percent) under which a non-empty queue counts as starved.
    #[serde(default = "default_starvation_cpu_threshold")]
    pub starvation_cpu_threshold: u32,

    /// Attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum number of live descriptors.
    #[serde(default = "default_descriptor_capacity")]
    pub descriptor_capacity: usize,

    /// Requests at or above this weight count as expensive.
    #[serde(default = "default_expensive_weight")]
    pub expensive_weight: u8,

    #[serde(default = "default_artifact_load_weight")]
    pub artifact_load_weight: u8,

    /// Weight ceiling for low-priority upgrade requests.
    #[serde(default = "default_upgrade_weight_cap")]
    pub upgrade_weight_cap: u8,

    /// Queue length above which first-time warm+ requests are lowered.
    #[serde(default = "default_downgrade_queue_size")]
    pub downgrade_queue_size: usize,

    /// Window after the startup signal during which extra workers stay parked.
    #[serde(default = "default_class_loading_grace_ms")]
    pub class_loading_grace_ms: u64,

    /// Free physical memory floor for starting a compile.
    #[serde(default = "default_low_memory_threshold_mb")]
    pub low_memory_threshold_mb: u64,

    /// Unit name patterns never compiled. `*` matches any run of characters.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Offer successful first-time compiles to the artifact store.
    #[serde(default = "default_store_artifacts")]
    pub store_artifacts: bool,
}

fn default_worker_threads() -> usize { 0 }
fn default_activation_thresholds() -> Vec<i64> { vec![100, 200, 300, 400, 500, 600, 700, 800] }
fn default_starved_activation_thresholds() -> Vec<i64> { vec![200, 400, 600, 800, 1000, 1200, 1400, 1600] }
fn default_suspension_thresholds() -> Vec<i64> { vec![-1, 10, 110, 210, 310, 410, 510, 610] }
fn default_cpu_entitlement_percent() -> u32 { 50 }
fn default_throttle_min_sleep_ms() -> u64 { 1 }
fn default_throttle_max_sleep_ms() -> u64 { 500 }
fn default_idle_wait_ms() -> u64 { 1000 }
fn default_sampling_interval_ms() -> u64 { 100 }
fn default_starvation_cpu_threshold() -> u32 { 25 }
fn default_max_attempts() -> u32 { 3 }
fn default_descriptor_capacity() -> usize { 4096 }
fn default_expensive_weight() -> u8 { 30 }
fn default_artifact_load_weight() -> u8 { 1 }
fn default_upgrade_weight_cap() -> u8 { 6 }
fn default_downgrade_queue_size() -> usize { 64 }
fn default_class_loading_grace_ms() -> u64 { 5000 }
fn default_low_memory_threshold_mb() -> u64 { 32 }
fn default_store_artifacts() -> bool { true }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            activation_thresholds: default_activation_thresholds(),
            starved_activation_thresholds: default_starved_activation_thresholds(),
            suspension_thresholds: default_suspension_thresholds(),
            cpu_entitlement_percent: default_cpu_entitlement_percent(),
            throttle_min_sleep_ms: default_throttle_min_sleep_ms(),
            throttle_max_sleep_ms: default_throttle_max_sleep_ms(),
            idle_wait_ms: default_idle_wait_ms(),
            sampling_interval_ms: default_sampling_interval_ms(),
            starvation_cpu_threshold: default_starvation_cpu_threshold(),
            max_attempts: default_max_attempts(),
            descriptor_capacity: default_descriptor_capacity(),
            expensive_weight: default_expensive_weight(),
            artifact_load_weight: default_artifact_load_weight(),
            upgrade_weight_cap: default_upgrade_weight_cap(),
            downgrade_queue_size: default_downgrade_queue_size(),
            class_loading_grace_ms: default_class_loading_grace_ms(),
            low_memory_threshold_mb: default_low_memory_threshold_mb(),
            exclude: Vec::new(),
            store_artifacts: default_store_artifacts(),
        }
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `TIERCOMP_<KEY>` overrides the field `key`, e.g.
    /// - `TIERCOMP_WORKER_THREADS` → `worker_threads`
    /// - `TIERCOMP_CPU_ENTITLEMENT_PERCENT` → `cpu_entitlement_percent`
    /// - `TIERCOMP_EXCLUDE` → `exclude` (comma separated)
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(env_opt);
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = parse(&lookup, "TIERCOMP_WORKER_THREADS") {
            self.worker_threads = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_CPU_ENTITLEMENT_PERCENT") {
            self.cpu_entitlement_percent = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_THROTTLE_MIN_SLEEP_MS") {
            self.throttle_min_sleep_ms = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_THROTTLE_MAX_SLEEP_MS") {
            self.throttle_max_sleep_ms = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_IDLE_WAIT_MS") {
            self.idle_wait_ms = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_SAMPLING_INTERVAL_MS") {
            self.sampling_interval_ms = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_STARVATION_CPU_THRESHOLD") {
            self.starvation_cpu_threshold = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_MAX_ATTEMPTS") {
            self.max_attempts = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_DESCRIPTOR_CAPACITY") {
            self.descriptor_capacity = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_DOWNGRADE_QUEUE_SIZE") {
            self.downgrade_queue_size = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_CLASS_LOADING_GRACE_MS") {
            self.class_loading_grace_ms = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_LOW_MEMORY_THRESHOLD_MB") {
            self.low_memory_threshold_mb = v;
        }
        if let Some(v) = parse(&lookup, "TIERCOMP_STORE_ARTIFACTS") {
            self.store_artifacts = v;
        }
        if let Some(v) = lookup("TIERCOMP_EXCLUDE") {
            self.exclude = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Validate threshold tables and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_tables()?;
        self.validate_hysteresis()?;
        self.validate_ranges()?;
        self.exclusion_set()?;
        Ok(())
    }

    fn validate_tables(&self) -> Result<(), ConfigError> {
        for (name, table) in [
            ("activation_thresholds", &self.activation_thresholds),
            ("starved_activation_thresholds", &self.starved_activation_thresholds),
            ("suspension_thresholds", &self.suspension_thresholds),
        ] {
            if table.is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
            if table.windows(2).any(|w| w[0] > w[1]) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be non-decreasing, got {table:?}"
                )));
            }
        }
        Ok(())
    }

    /// Suspension must sit below activation at every index, otherwise a
    /// freshly woken worker could immediately suspend itself again.
    fn validate_hysteresis(&self) -> Result<(), ConfigError> {
        for (i, (&suspend, &activate)) in self
            .suspension_thresholds
            .iter()
            .zip(&self.activation_thresholds)
            .enumerate()
        {
            if suspend >= activate {
                return Err(ConfigError::Invalid(format!(
                    "suspension threshold {suspend} at index {i} is not below activation threshold {activate}"
                )));
            }
        }
        Ok(())
    }

    fn validate_ranges(&self) -> Result<(), ConfigError> {
        if self.cpu_entitlement_percent == 0 || self.cpu_entitlement_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "cpu_entitlement_percent must be in 1..=100, got {}",
                self.cpu_entitlement_percent
            )));
        }
        if self.throttle_min_sleep_ms > self.throttle_max_sleep_ms {
            return Err(ConfigError::Invalid(format!(
                "throttle_min_sleep_ms ({}) exceeds throttle_max_sleep_ms ({})",
                self.throttle_min_sleep_ms, self.throttle_max_sleep_ms
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.descriptor_capacity == 0 {
            return Err(ConfigError::Invalid("descriptor_capacity must be at least 1".into()));
        }
        Ok(())
    }

    // ── Derived values ──────────────────────────────────────────────

    /// Usable worker count for a machine with `logical_cpus` CPUs:
    /// one CPU is left to the application, at least one worker always exists.
    pub fn resolved_worker_threads(&self, logical_cpus: usize) -> usize {
        let available = logical_cpus.saturating_sub(1).max(1);
        if self.worker_threads == 0 {
            available
        } else {
            self.worker_threads.min(available)
        }
    }

    fn lookup(table: &[i64], index: usize) -> i64 {
        table
            .get(index)
            .or_else(|| table.last())
            .copied()
            .unwrap_or(i64::MAX)
    }

    pub fn activation_threshold(&self, active: usize) -> i64 {
        Self::lookup(&self.activation_thresholds, active)
    }

    pub fn starved_activation_threshold(&self, active: usize) -> i64 {
        Self::lookup(&self.starved_activation_thresholds, active)
    }

    /// Suspension threshold while `active` workers are active; `None` when
    /// the table says never to suspend at that count.
    pub fn suspension_threshold(&self, active: usize) -> Option<i64> {
        let t = Self::lookup(&self.suspension_thresholds, active.saturating_sub(1));
        (t >= 0).then_some(t)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms.max(1))
    }

    pub fn class_loading_grace(&self) -> Duration {
        Duration::from_millis(self.class_loading_grace_ms)
    }

    pub fn low_memory_threshold_bytes(&self) -> u64 {
        self.low_memory_threshold_mb.saturating_mul(1024 * 1024)
    }

    /// Throttle sleep after a compile that took `last_compile`:
    /// `duration * (100 - entitlement) / entitlement`, clamped to the band.
    pub fn throttle_sleep(&self, last_compile: Duration) -> Duration {
        let ent = u128::from(self.cpu_entitlement_percent.clamp(1, 100));
        let ms = last_compile.as_millis() * (100 - ent) / ent;
        let ms = u64::try_from(ms).unwrap_or(u64::MAX);
        Duration::from_millis(ms.clamp(self.throttle_min_sleep_ms, self.throttle_max_sleep_ms))
    }

    /// Compile the `exclude` patterns. `*` also matches across `/`.
    pub fn exclusion_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("exclude pattern {pattern:?}: {e}")))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("exclude patterns: {e}")))
    }

    pub fn log_summary(&self, usable_workers: usize) {
        tracing::info!("Scheduler config:");
        tracing::info!("  workers:      configured={}, usable={}", self.worker_threads, usable_workers);
        tracing::info!("  activation:   {:?}", self.activation_thresholds);
        tracing::info!("  starved:      {:?}", self.starved_activation_thresholds);
        tracing::info!("  suspension:   {:?}", self.suspension_thresholds);
        tracing::info!(
            "  entitlement:  {}% (throttle {}..{} ms)",
            self.cpu_entitlement_percent, self.throttle_min_sleep_ms, self.throttle_max_sleep_ms
        );
        tracing::info!("  retries:      max_attempts={}", self.max_attempts);
        tracing::info!(
            "  backlog:      downgrade above {} queued, upgrade weight cap {}",
            self.downgrade_queue_size, self.upgrade_weight_cap
        );
        tracing::info!("  memory floor: {} MiB", self.low_memory_threshold_mb);
        tracing::info!("  exclude:      {} pattern(s)", self.exclude.len());
        tracing::info!("  store:        {}", self.store_artifacts);
    }
}
