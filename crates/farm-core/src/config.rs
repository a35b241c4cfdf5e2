//! farm.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration that cannot produce a sane plan.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("share.min_threads ({min}) exceeds share.max_threads ({max})")]
    ShareThreadBounds { min: u32, max: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    pub prep: PrepConfig,
    pub batch: BatchConfig,
    pub share: ShareConfig,
    pub scripts: ScriptCosts,
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Allowed security above minimum for a prepped target.
    pub security_epsilon: f64,
    /// Minimum money/money_max for a prepped target.
    pub money_ratio: f64,
    /// Extra wait after a prep pass lands before re-measuring.
    pub settle_buffer_ms: u64,
    /// Consecutive correction passes allowed before giving up on a target.
    pub max_passes: u32,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            security_epsilon: 5.0,
            money_ratio: 0.95,
            settle_buffer_ms: 200,
            max_passes: 40,
        }
    }
}

impl PrepConfig {
    pub fn settle_buffer(&self) -> Duration {
        Duration::from_millis(self.settle_buffer_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Fraction of money_max each batch aims to steal.
    pub steal_fraction: f64,
    /// Gap between consecutive landings.
    pub spacing_ms: u64,
    /// Extra grow threads on top of the exact regrowth, as a fraction.
    pub grow_margin: f64,
    /// Wait after the last landing before the next cycle observes the target.
    pub landing_buffer_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            steal_fraction: 0.25,
            spacing_ms: 1000,
            grow_margin: 0.05,
            landing_buffer_ms: 500,
        }
    }
}

impl BatchConfig {
    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }

    pub fn landing_buffer(&self) -> Duration {
        Duration::from_millis(self.landing_buffer_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Share of each node's leftover RAM the secondary workload may take.
    pub ram_percentage: f64,
    pub min_threads: u32,
    pub max_threads: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            ram_percentage: 0.8,
            min_threads: 4,
            max_threads: 10_000,
        }
    }
}

/// RAM per thread of each remote script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptCosts {
    pub hack: f64,
    pub grow: f64,
    pub weaken: f64,
    pub share: f64,
}

impl Default for ScriptCosts {
    fn default() -> Self {
        Self {
            hack: 1.70,
            grow: 1.75,
            weaken: 1.75,
            share: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub cycle_interval_ms: u64,
    /// Number of top-scored targets farmed at once.
    pub max_targets: usize,
    /// RAM kept free on `home` for the orchestrator itself.
    pub home_reserve_ram: f64,
    /// Where cycle counters are persisted; in-memory when unset.
    pub state_path: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 2000,
            max_targets: 3,
            home_reserve_ram: 16.0,
            state_path: None,
        }
    }
}

impl DriverConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

fn check_range(
    field: &'static str,
    range: &'static str,
    value: f64,
    ok: bool,
) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, range, value })
    }
}

impl FarmConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FarmConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings that would make thread math meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.prep;
        check_range(
            "prep.security_epsilon",
            "[0, inf)",
            p.security_epsilon,
            p.security_epsilon >= 0.0,
        )?;
        check_range(
            "prep.money_ratio",
            "(0, 1]",
            p.money_ratio,
            p.money_ratio > 0.0 && p.money_ratio <= 1.0,
        )?;

        let b = &self.batch;
        check_range(
            "batch.steal_fraction",
            "(0, 1)",
            b.steal_fraction,
            b.steal_fraction > 0.0 && b.steal_fraction < 1.0,
        )?;
        check_range(
            "batch.grow_margin",
            "[0, inf)",
            b.grow_margin,
            b.grow_margin >= 0.0,
        )?;
        // Zero spacing would land all four operations at the same instant.
        check_range(
            "batch.spacing_ms",
            "[1, inf)",
            b.spacing_ms as f64,
            b.spacing_ms >= 1,
        )?;

        let s = &self.share;
        check_range(
            "share.ram_percentage",
            "[0, 1]",
            s.ram_percentage,
            (0.0..=1.0).contains(&s.ram_percentage),
        )?;
        if s.min_threads > s.max_threads {
            return Err(ConfigError::ShareThreadBounds {
                min: s.min_threads,
                max: s.max_threads,
            });
        }

        for (field, value) in [
            ("scripts.hack", self.scripts.hack),
            ("scripts.grow", self.scripts.grow),
            ("scripts.weaken", self.scripts.weaken),
            ("scripts.share", self.scripts.share),
        ] {
            check_range(field, "(0, inf)", value, value > 0.0)?;
        }

        let d = &self.driver;
        check_range(
            "driver.home_reserve_ram",
            "[0, inf)",
            d.home_reserve_ram,
            d.home_reserve_ram >= 0.0,
        )?;
        check_range(
            "driver.max_targets",
            "[1, inf)",
            d.max_targets as f64,
            d.max_targets >= 1,
        )?;
        check_range(
            "driver.cycle_interval_ms",
            "[1, inf)",
            d.cycle_interval_ms as f64,
            d.cycle_interval_ms >= 1,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FarmConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_minimal() {
        let config: FarmConfig = toml::from_str("").unwrap();
        assert_eq!(config, FarmConfig::default());
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml_str = r#"
[prep]
security_epsilon = 2.5

[batch]
spacing_ms = 250

[driver]
max_targets = 1
"#;
        let config: FarmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.prep.security_epsilon, 2.5);
        assert_eq!(config.prep.money_ratio, 0.95);
        assert_eq!(config.batch.spacing(), Duration::from_millis(250));
        assert_eq!(config.driver.max_targets, 1);
    }

    #[test]
    fn rejects_steal_fraction_of_one() {
        let mut config = FarmConfig::default();
        config.batch.steal_fraction = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "batch.steal_fraction",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_spacing() {
        let mut config = FarmConfig::default();
        config.batch.spacing_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "batch.spacing_ms",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_script_cost() {
        let mut config = FarmConfig::default();
        config.scripts.weaken = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_targets() {
        let mut config = FarmConfig::default();
        config.driver.max_targets = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "driver.max_targets",
                ..
            })
        ));
    }

    #[test]
    fn rejects_inverted_share_bounds() {
        let mut config = FarmConfig::default();
        config.share.min_threads = 50;
        config.share.max_threads = 10;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ShareThreadBounds { min: 50, max: 10 })
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let config = FarmConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[batch]"));
        let back: FarmConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
