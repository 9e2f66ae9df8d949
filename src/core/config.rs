//! Edit session and scheduler configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::scheduler::HostCapability;
use crate::side_effect::SideEffects;

/// Number of buffered writes that triggers an auto-flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024;

/// Recursion bound handed to indirect shape updates.
pub const DEFAULT_NEIGHBOR_RECURSION_LIMIT: u32 = 512;

/// Configuration for edit sessions. Missing fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// Buffered write count at which an auto-flush is scheduled.
    pub flush_threshold: usize,
    /// Recursion limit for shape propagation during neighbor updates.
    pub neighbor_recursion_limit: u32,
    /// Side effects a new session starts with.
    pub side_effects: SideEffects,
    /// Scheduler setup.
    pub scheduler: SchedulerConfig,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            neighbor_recursion_limit: DEFAULT_NEIGHBOR_RECURSION_LIMIT,
            side_effects: SideEffects::defaults(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl EditConfig {
    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(Error::Config("flush_threshold must be at least 1".to_string()));
        }
        self.scheduler.validate()
    }
}

/// Scheduler configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Which threading model the host runs.
    pub host: HostCapability,
    /// Worker threads backing async tasks and timers.
    pub async_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            host: HostCapability::SingleOwnerThread,
            async_workers: 2,
        }
    }
}

impl SchedulerConfig {
    /// Config for a region-partitioned host with the given region shift.
    pub fn region_partitioned(region_shift: u32) -> Self {
        Self {
            host: HostCapability::RegionPartitioned { region_shift },
            ..Self::default()
        }
    }

    /// Reject values no scheduler can run with.
    pub fn validate(&self) -> Result<()> {
        if self.async_workers == 0 {
            return Err(Error::Config("async_workers must be at least 1".to_string()));
        }
        if let HostCapability::RegionPartitioned { region_shift } = self.host {
            if region_shift > 16 {
                return Err(Error::Config(format!(
                    "region_shift {} is out of range (max 16)",
                    region_shift
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EditConfig::default();
        assert_eq!(config.flush_threshold, 1024);
        assert_eq!(config.neighbor_recursion_limit, 512);
        assert_eq!(config.scheduler.host, HostCapability::SingleOwnerThread);
        assert!(config.side_effects.contains(SideEffects::UPDATE));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EditConfig::from_json(r#"{ "flush_threshold": 64 }"#).unwrap();
        assert_eq!(config.flush_threshold, 64);
        assert_eq!(config.neighbor_recursion_limit, 512);
        assert_eq!(config.scheduler.async_workers, 2);
    }

    #[test]
    fn test_region_host_from_json() {
        let json = r#"{
            "scheduler": {
                "host": { "RegionPartitioned": { "region_shift": 2 } },
                "async_workers": 3
            }
        }"#;
        let config = EditConfig::from_json(json).unwrap();
        assert_eq!(
            config.scheduler.host,
            HostCapability::RegionPartitioned { region_shift: 2 }
        );
        assert_eq!(config.scheduler.async_workers, 3);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = EditConfig::from_json(r#"{ "flush_threshold": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = SchedulerConfig::default();
        config.async_workers = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "neighbor_recursion_limit": 16 }}"#).unwrap();

        let config = EditConfig::load(file.path()).unwrap();
        assert_eq!(config.neighbor_recursion_limit, 16);
        assert_eq!(config.flush_threshold, 1024);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EditConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_invalid_json() {
        let err = EditConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
