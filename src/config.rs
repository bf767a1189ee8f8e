use anyhow::{Context, Result};
use battsim_lib::{battery::PlantConfig, server::DEFAULT_TICK_INTERVAL};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Optional YAML file overriding the built-in plant constants.
///
/// ```yaml
/// plant:
///   power_rating_kw: 230
///   seconds_for_0_to_100_charge: 3000
///   seconds_for_100_to_0_discharge: 2800
///   initial_state_of_charge: 50.0
/// tick_interval: 1s
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub plant: PlantConfig,
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
}

fn default_tick_interval() -> Duration {
    DEFAULT_TICK_INTERVAL
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            plant: PlantConfig::default(),
            tick_interval: default_tick_interval(),
        }
    }
}

impl SimulatorConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        log::debug!("Loading config file from {path:?}");
        let file = File::open(path)
            .with_context(|| format!("Cannot open config file {}", path.display()))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse config file {}", path.display()))?;
        config
            .plant
            .validate()
            .with_context(|| format!("Invalid plant in {}", path.display()))?;
        Ok(config)
    }
}
