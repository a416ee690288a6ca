use anyhow::Result;
use figment::{providers::{Env, Format, Serialized, Toml}, Figment};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use validator::Validate;

use crate::profile::Thresholds;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub target: TargetConfig,
    #[validate(nested)]
    pub load: LoadConfig,
    #[validate(nested)]
    pub retry: RetryConfig,
    pub scenario: ScenarioConfig,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TargetConfig {
    #[validate(url)]
    pub base_url: String,
    pub http_timeout_seconds: u64,
}

impl TargetConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds.max(1))
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            http_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoadConfig {
    /// Target concurrent virtual users during the plateau stage.
    #[validate(range(min = 1))]
    pub vus: u32,
    /// Plateau duration at the target concurrency.
    #[validate(range(min = 1))]
    pub duration_seconds: u64,
    pub ramp_up_seconds: u64,
    pub ramp_down_seconds: u64,
    /// Size of the shared synthetic-user pool built at startup.
    #[validate(range(min = 1))]
    pub test_users_count: usize,
}

impl LoadConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn ramp_up(&self) -> Duration {
        Duration::from_secs(self.ramp_up_seconds)
    }

    pub fn ramp_down(&self) -> Duration {
        Duration::from_secs(self.ramp_down_seconds)
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            vus: 5,
            duration_seconds: 60,
            ramp_up_seconds: 30,
            ramp_down_seconds: 30,
            test_users_count: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Attempts per request, transport failures only. 1 means no retry.
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    pub interval_seconds: u64,
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub think_time_min_seconds: u64,
    pub think_time_max_seconds: u64,
    pub create_instances: bool,
    pub create_tasks: bool,
    pub update_entities: bool,
}

impl ScenarioConfig {
    pub fn think_time_range(&self) -> RangeInclusive<u64> {
        // A max below min would make gen_range panic; clamp instead.
        let max = self.think_time_max_seconds.max(self.think_time_min_seconds);
        self.think_time_min_seconds..=max
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            think_time_min_seconds: 1,
            think_time_max_seconds: 5,
            create_instances: false,
            create_tasks: false,
            update_entities: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            load: LoadConfig::default(),
            retry: RetryConfig::default(),
            scenario: ScenarioConfig::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("LOADGEN__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.target.base_url, "http://localhost:8080");
        assert_eq!(cfg.load.vus, 5);
        assert_eq!(cfg.load.duration_seconds, 60);
        assert_eq!(cfg.load.test_users_count, 10);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.interval_seconds, 5);
        assert_eq!(cfg.scenario.think_time_range(), 1..=5);
        assert!(!cfg.scenario.create_instances);
        assert!(!cfg.scenario.create_tasks);
    }

    #[test]
    fn zero_vus_fails_validation() {
        let mut cfg = Config::default();
        cfg.load.vus = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_base_url_fails_validation() {
        let mut cfg = Config::default();
        cfg.target.base_url = "not a url".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_think_time_range_is_clamped() {
        let scenario = ScenarioConfig {
            think_time_min_seconds: 4,
            think_time_max_seconds: 2,
            ..ScenarioConfig::default()
        };
        assert_eq!(scenario.think_time_range(), 4..=4);
    }
}
