//! Global configuration model for leanbox.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{CGROUP_V1_PATH, DEFAULT_GROUP_PREFIX, ENV_CGROUP_ROOT, ENV_GROUP_PREFIX};
use crate::error::{LeanboxError, Result};

/// Root configuration for leanbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeanboxConfig {
    /// Mount point of the cgroup v1 controller hierarchies.
    pub cgroup_root: PathBuf,
    /// Group created under every controller; templates live beneath it.
    pub group_prefix: String,
    /// How long to poll the freezer when waiting for a state.
    pub freezer_poll: PollPolicy,
}

impl Default for LeanboxConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(CGROUP_V1_PATH),
            group_prefix: DEFAULT_GROUP_PREFIX.to_owned(),
            freezer_poll: PollPolicy::default(),
        }
    }
}

impl LeanboxConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LeanboxError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `LEANBOX_CGROUP_ROOT` and `LEANBOX_GROUP_PREFIX` overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var(ENV_CGROUP_ROOT) {
            self.cgroup_root = PathBuf::from(root);
        }
        if let Ok(prefix) = std::env::var(ENV_GROUP_PREFIX) {
            self.group_prefix = prefix;
        }
        self
    }

    /// The default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Checks that the prefix is usable as a single directory name.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is empty or contains a path separator.
    pub fn validate(&self) -> Result<()> {
        if self.group_prefix.is_empty() || self.group_prefix.contains('/') {
            return Err(LeanboxError::Config {
                message: format!("invalid group prefix: {:?}", self.group_prefix),
            });
        }
        if self.freezer_poll.attempts == 0 {
            return Err(LeanboxError::Config {
                message: "freezer poll attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Bounded polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Maximum number of reads before giving up.
    pub attempts: u32,
    /// Pause between reads, in microseconds.
    pub interval_us: u64,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let interval_us = interval.as_micros() as u64;
        Self {
            attempts,
            interval_us,
        }
    }

    /// Pause between reads.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 1000,
            interval_us: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_sysfs() {
        let config = LeanboxConfig::default();
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.group_prefix, "leanbox");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("leanbox.json");
        std::fs::write(&path, r#"{ "cgroup_root": "/tmp/cg" }"#).expect("write config");

        let config = LeanboxConfig::load(&path).expect("load");
        assert_eq!(config.cgroup_root, PathBuf::from("/tmp/cg"));
        assert_eq!(config.group_prefix, "leanbox");
        assert_eq!(config.freezer_poll, PollPolicy::default());
    }

    #[test]
    fn load_rejects_nested_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("leanbox.json");
        std::fs::write(&path, r#"{ "group_prefix": "a/b" }"#).expect("write config");
        assert!(LeanboxConfig::load(&path).is_err());
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = LeanboxConfig::load(Path::new("/nonexistent/leanbox.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/leanbox.json"));
    }

    #[test]
    fn poll_policy_interval_roundtrips() {
        let policy = PollPolicy::new(10, Duration::from_millis(2));
        assert_eq!(policy.interval_us, 2000);
        assert_eq!(policy.interval(), Duration::from_millis(2));
    }
}
