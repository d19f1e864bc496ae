use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gateway::{Owner, SimulatorConfig};

/// Top-level configuration for the workspace pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub defaults: DefaultProfileConfig,
    pub start: StartConfig,
    pub shutdown: ShutdownConfig,
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file without validating values.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pool.threads >= 1, "pool.threads must be >= 1");
        anyhow::ensure!(
            self.pool.replenish_interval_ms >= 1,
            "pool.replenish_interval_ms must be >= 1"
        );
        if let Some(secs) = self.pool.acquire_timeout_secs {
            anyhow::ensure!(secs >= 1, "pool.acquire_timeout_secs must be >= 1 when set");
        }
        anyhow::ensure!(self.defaults.memory_gb >= 1, "defaults.memory_gb must be >= 1");
        anyhow::ensure!(
            !self.defaults.template.is_empty(),
            "defaults.template must not be empty"
        );
        anyhow::ensure!(
            !self.defaults.name_prefix.is_empty(),
            "defaults.name_prefix must not be empty"
        );
        anyhow::ensure!(
            self.defaults.owner_email.contains('@'),
            "defaults.owner_email is not an e-mail address: {}",
            self.defaults.owner_email
        );
        anyhow::ensure!(
            self.start.poll_interval_secs >= 1,
            "start.poll_interval_secs must be >= 1"
        );
        anyhow::ensure!(self.start.max_polls >= 1, "start.max_polls must be >= 1");
        anyhow::ensure!(
            self.shutdown.delete_timeout_secs >= 1,
            "shutdown.delete_timeout_secs must be >= 1"
        );
        Ok(())
    }
}

/// Pool sizing and replenishment cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrency budget of the test run. Pool capacity is derived from it.
    pub threads: usize,
    /// Delay between replenishment passes.
    pub replenish_interval_ms: u64,
    /// Upper bound on waiting for a pooled workspace. Unset waits until one
    /// arrives or shutdown begins.
    pub acquire_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            replenish_interval_ms: 100,
            acquire_timeout_secs: None,
        }
    }
}

impl PoolConfig {
    /// Number of warm workspaces kept: one per two worker threads, at least one.
    pub fn capacity(&self) -> usize {
        self.threads.saturating_sub(1) / 2 + 1
    }

    pub fn replenish_interval(&self) -> Duration {
        Duration::from_millis(self.replenish_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }
}

/// The (owner, memory, template) combination served from the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultProfileConfig {
    pub owner_name: String,
    pub owner_email: String,
    pub memory_gb: u32,
    pub template: String,
    /// Prefix for generated workspace names.
    pub name_prefix: String,
}

impl Default for DefaultProfileConfig {
    fn default() -> Self {
        Self {
            owner_name: "admin".into(),
            owner_email: "admin@che".into(),
            memory_gb: 2,
            template: "default".into(),
            name_prefix: "workspace".into(),
        }
    }
}

impl DefaultProfileConfig {
    pub fn owner(&self) -> Owner {
        Owner::new(self.owner_name.clone(), self.owner_email.clone())
    }
}

/// Polling used while waiting for a workspace to reach a status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartConfig {
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_polls: 120,
        }
    }
}

impl StartConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Total wait budget: `max_polls` intervals.
    pub fn timeout(&self) -> Duration {
        self.poll_interval() * self.max_polls
    }
}

/// Budgets for the staged shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Wait for the in-flight replenishment pass after cancellation.
    pub graceful_timeout_secs: u64,
    /// Wait after aborting the replenishment task.
    pub forced_timeout_secs: u64,
    /// Bound on each delete issued while draining the pool.
    pub delete_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_secs: 30,
            forced_timeout_secs: 60,
            delete_timeout_secs: 60,
        }
    }
}

impl ShutdownConfig {
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }

    pub fn forced_timeout(&self) -> Duration {
        Duration::from_secs(self.forced_timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.pool.threads, 4);
        assert_eq!(config.pool.replenish_interval_ms, 100);
        assert!(config.pool.acquire_timeout_secs.is_none());
        assert_eq!(config.defaults.memory_gb, 2);
        assert_eq!(config.defaults.template, "default");
        assert_eq!(config.defaults.name_prefix, "workspace");
        assert_eq!(config.start.poll_interval_secs, 5);
        assert_eq!(config.start.max_polls, 120);
        assert_eq!(config.shutdown.graceful_timeout_secs, 30);
        assert_eq!(config.shutdown.forced_timeout_secs, 60);
    }

    #[test]
    fn config_default_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn pool_capacity_from_threads() {
        let capacity = |threads| PoolConfig { threads, ..PoolConfig::default() }.capacity();
        assert_eq!(capacity(1), 1);
        assert_eq!(capacity(2), 1);
        assert_eq!(capacity(3), 2);
        assert_eq!(capacity(4), 2);
        assert_eq!(capacity(5), 3);
        assert_eq!(capacity(10), 5);
    }

    #[test]
    fn start_timeout_is_ten_minutes_by_default() {
        assert_eq!(StartConfig::default().timeout(), Duration::from_secs(600));
    }

    #[test]
    fn config_load_from_toml() {
        let toml_content = r#"
[pool]
threads = 7
acquire_timeout_secs = 90

[defaults]
owner_email = "qa@che"
memory_gb = 3

[shutdown]
graceful_timeout_secs = 5

[simulator]
fail_every = 4
"#;
        let mut tmpfile = tempfile();
        tmpfile.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(tmpfile.path()).unwrap();
        assert_eq!(config.pool.threads, 7);
        assert_eq!(config.pool.capacity(), 4);
        assert_eq!(config.pool.acquire_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.defaults.owner_email, "qa@che");
        assert_eq!(config.defaults.memory_gb, 3);
        // Unset fields use defaults
        assert_eq!(config.defaults.template, "default");
        assert_eq!(config.pool.replenish_interval_ms, 100);
        assert_eq!(config.shutdown.graceful_timeout_secs, 5);
        assert_eq!(config.shutdown.forced_timeout_secs, 60);
        assert_eq!(config.simulator.fail_every, 4);
    }

    #[test]
    fn config_load_rejects_unparseable_file() {
        let mut tmpfile = tempfile();
        tmpfile.write_all(b"[pool\nthreads = ").unwrap();
        let err = Config::load(tmpfile.path()).unwrap_err();
        assert!(err.to_string().contains("parsing config"));
    }

    #[test]
    fn parse_file_keeps_invalid_values_for_inspection() {
        let mut tmpfile = tempfile();
        tmpfile.write_all(b"[pool]\nthreads = 0\n").unwrap();

        assert!(Config::load(tmpfile.path()).is_err());
        let config = Config::parse_file(tmpfile.path()).unwrap();
        assert_eq!(config.pool.threads, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validation_rejects_zero_threads() {
        let mut config = Config::default();
        config.pool.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validation_rejects_empty_template() {
        let mut config = Config::default();
        config.defaults.template.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validation_rejects_bad_owner_email() {
        let mut config = Config::default();
        config.defaults.owner_email = "admin".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validation_rejects_zero_poll_interval() {
        let mut config = Config::default();
        config.start.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.pool.threads, config.pool.threads);
        assert_eq!(deserialized.defaults.owner_email, config.defaults.owner_email);
        assert_eq!(deserialized.start.max_polls, config.start.max_polls);
    }

    /// Helper: create a named temporary file that auto-deletes.
    struct TempFile {
        path: PathBuf,
    }

    impl TempFile {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl std::io::Write for TempFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?
                .write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile() -> TempFile {
        let path = std::env::temp_dir().join(format!("wspool-test-{}.toml", uuid::Uuid::new_v4()));
        TempFile { path }
    }
}
