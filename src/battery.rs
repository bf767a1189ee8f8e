//! Continuous-time state of charge model of a grid-scale battery.
//!
//! The model has two inputs: power setpoints written by the controller, which
//! only select the mode and the per-tick rate, and a periodic [`Battery::tick`]
//! which is the only place the charge level moves.

use crate::protocol::{Error, PowerSetpoint, StateOfCharge};
use std::fmt;

/// Fixed characteristics of the simulated plant.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct PlantConfig {
    /// Rated power in kW.
    pub power_rating_kw: u32,
    /// Seconds to go from empty to full at rated power.
    pub seconds_for_0_to_100_charge: u32,
    /// Seconds to go from full to empty at rated power.
    pub seconds_for_100_to_0_discharge: u32,
    /// State of charge in percent when the simulator starts.
    pub initial_state_of_charge: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            power_rating_kw: 230,
            seconds_for_0_to_100_charge: 3000,
            seconds_for_100_to_0_discharge: 2800,
            initial_state_of_charge: 50.0,
        }
    }
}

impl PlantConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.power_rating_kw == 0 {
            return Err(Error::InvalidPlantConfig("power rating must be positive"));
        }
        if self.seconds_for_0_to_100_charge == 0 {
            return Err(Error::InvalidPlantConfig("full charge time must be positive"));
        }
        if self.seconds_for_100_to_0_discharge == 0 {
            return Err(Error::InvalidPlantConfig(
                "full discharge time must be positive",
            ));
        }
        StateOfCharge::try_from(self.initial_state_of_charge)?;
        Ok(())
    }

    /// Percent of capacity gained per tick for each kW of charge power.
    pub fn charge_resolution(&self) -> f64 {
        100.0 / (f64::from(self.power_rating_kw) * f64::from(self.seconds_for_0_to_100_charge))
    }

    /// Percent of capacity lost per tick for each kW of discharge power.
    pub fn discharge_resolution(&self) -> f64 {
        100.0
            / (f64::from(self.power_rating_kw) * f64::from(self.seconds_for_100_to_0_discharge))
    }
}

/// What the battery is currently doing. Charging and discharging are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    Charging,
    Discharging,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::Charging => write!(f, "charging"),
            Mode::Discharging => write!(f, "discharging"),
        }
    }
}

/// Result of a single [`Battery::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Idle, nothing changed.
    Unchanged,
    /// The charge level moved and the battery keeps its mode.
    Moved,
    /// Charging hit 100 %, the battery went idle.
    ReachedFull,
    /// Discharging hit 0 %, the battery went idle.
    ReachedEmpty,
}

/// Point-in-time copy of the battery state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    pub state_of_charge: StateOfCharge,
    pub mode: Mode,
    pub rate: f64,
    pub power_setpoint: PowerSetpoint,
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state of charge {}, {}, setpoint {}",
            self.state_of_charge, self.mode, self.power_setpoint
        )
    }
}

#[derive(Debug, Clone)]
pub struct Battery {
    charge_resolution: f64,
    discharge_resolution: f64,
    state_of_charge: f64,
    mode: Mode,
    rate: f64,
    power_setpoint: PowerSetpoint,
}

impl Default for Battery {
    fn default() -> Self {
        Self::from_valid_config(&PlantConfig::default())
    }
}

impl Battery {
    /// Creates a battery at the configured initial state of charge, idle.
    pub fn new(config: PlantConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::from_valid_config(&config))
    }

    fn from_valid_config(config: &PlantConfig) -> Self {
        Self {
            charge_resolution: config.charge_resolution(),
            discharge_resolution: config.discharge_resolution(),
            state_of_charge: config.initial_state_of_charge,
            mode: Mode::Idle,
            rate: 0.0,
            power_setpoint: PowerSetpoint::IDLE,
        }
    }

    /// Applies a new power setpoint.
    ///
    /// Only the mode and the per-tick rate change; the charge level itself is
    /// left for the next [`tick`](Self::tick). The setpoint is kept verbatim
    /// for read-back.
    pub fn set_power_setpoint(&mut self, setpoint: PowerSetpoint) {
        self.power_setpoint = setpoint;
        let magnitude = f64::from(setpoint.magnitude());
        if setpoint.is_charging() {
            self.mode = Mode::Charging;
            self.rate = magnitude * self.charge_resolution;
        } else if setpoint.is_discharging() {
            self.mode = Mode::Discharging;
            self.rate = magnitude * self.discharge_resolution;
        } else {
            self.mode = Mode::Idle;
        }
    }

    /// Advances the model by one time unit.
    pub fn tick(&mut self) -> TickOutcome {
        match self.mode {
            Mode::Idle => TickOutcome::Unchanged,
            Mode::Charging => {
                let next = self.state_of_charge + self.rate;
                if next <= *StateOfCharge::FULL {
                    self.state_of_charge = next;
                    TickOutcome::Moved
                } else {
                    self.state_of_charge = *StateOfCharge::FULL;
                    self.mode = Mode::Idle;
                    TickOutcome::ReachedFull
                }
            }
            Mode::Discharging => {
                let next = self.state_of_charge - self.rate;
                if next >= *StateOfCharge::EMPTY {
                    self.state_of_charge = next;
                    TickOutcome::Moved
                } else {
                    self.state_of_charge = *StateOfCharge::EMPTY;
                    self.mode = Mode::Idle;
                    TickOutcome::ReachedEmpty
                }
            }
        }
    }

    pub fn state_of_charge(&self) -> StateOfCharge {
        // Clamped on every tick, so the value is always in range.
        StateOfCharge::try_from(self.state_of_charge).unwrap_or(StateOfCharge::EMPTY)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Percent per tick; meaningless while idle.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn power_setpoint(&self) -> PowerSetpoint {
        self.power_setpoint
    }

    pub fn snapshot(&self) -> BatteryStatus {
        BatteryStatus {
            state_of_charge: self.state_of_charge(),
            mode: self.mode,
            rate: self.rate,
            power_setpoint: self.power_setpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const EPSILON: f64 = 1e-9;

    fn battery_at(initial_state_of_charge: f64) -> Battery {
        Battery::new(PlantConfig {
            initial_state_of_charge,
            ..PlantConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn starts_idle_at_default_level() {
        let battery = Battery::default();
        assert_eq!(*battery.state_of_charge(), 50.0);
        assert_eq!(battery.mode(), Mode::Idle);
        assert_eq!(battery.power_setpoint(), PowerSetpoint::IDLE);
    }

    #[test]
    fn resolutions_follow_plant_constants() {
        let config = PlantConfig::default();
        assert!((config.charge_resolution() - 100.0 / (230.0 * 3000.0)).abs() < EPSILON);
        assert!((config.discharge_resolution() - 100.0 / (230.0 * 2800.0)).abs() < EPSILON);
    }

    #[test]
    fn invalid_plant_config() {
        assert_matches!(
            Battery::new(PlantConfig {
                power_rating_kw: 0,
                ..PlantConfig::default()
            }),
            Err(Error::InvalidPlantConfig(..))
        );
        assert_matches!(
            Battery::new(PlantConfig {
                seconds_for_100_to_0_discharge: 0,
                ..PlantConfig::default()
            }),
            Err(Error::InvalidPlantConfig(..))
        );
        assert_matches!(
            Battery::new(PlantConfig {
                initial_state_of_charge: 120.0,
                ..PlantConfig::default()
            }),
            Err(Error::StateOfChargeOutOfRange(..))
        );
    }

    #[test]
    fn negative_setpoints_charge() {
        let resolution = PlantConfig::default().charge_resolution();
        let mut battery = Battery::default();
        for raw in [i16::MIN, -32767, -230, -1] {
            battery.set_power_setpoint(PowerSetpoint::from(raw));
            assert_eq!(battery.mode(), Mode::Charging);
            let expected = f64::from(raw.unsigned_abs()) * resolution;
            assert!((battery.rate() - expected).abs() < EPSILON, "setpoint {raw}");
        }
    }

    #[test]
    fn positive_setpoints_discharge() {
        let resolution = PlantConfig::default().discharge_resolution();
        let mut battery = Battery::default();
        for raw in [1, 230, i16::MAX] {
            battery.set_power_setpoint(PowerSetpoint::from(raw));
            assert_eq!(battery.mode(), Mode::Discharging);
            assert!((battery.rate() - f64::from(raw) * resolution).abs() < EPSILON);
        }
    }

    #[test]
    fn zero_setpoint_idles() {
        let mut battery = Battery::default();
        battery.set_power_setpoint(PowerSetpoint::from(-100));
        battery.set_power_setpoint(PowerSetpoint::IDLE);
        assert_eq!(battery.mode(), Mode::Idle);
        assert_eq!(battery.tick(), TickOutcome::Unchanged);
        assert_eq!(*battery.state_of_charge(), 50.0);
    }

    #[test]
    fn setpoint_does_not_move_charge_level() {
        let mut battery = Battery::default();
        battery.set_power_setpoint(PowerSetpoint::from(i16::MIN));
        assert_eq!(*battery.state_of_charge(), 50.0);
        battery.set_power_setpoint(PowerSetpoint::from(i16::MAX));
        assert_eq!(*battery.state_of_charge(), 50.0);
    }

    #[test]
    fn charging_at_rated_power_fills_a_quarter() {
        let mut battery = Battery::default();
        battery.set_power_setpoint(PowerSetpoint::from(-230));
        for _ in 0..750 {
            assert_eq!(battery.tick(), TickOutcome::Moved);
        }
        assert!((*battery.state_of_charge() - 75.0).abs() < 1e-6);
        assert_eq!(battery.mode(), Mode::Charging);
    }

    #[test]
    fn full_charge_from_empty_clamps_at_100() {
        let mut battery = battery_at(0.0);
        battery.set_power_setpoint(PowerSetpoint::from(-230));
        for _ in 0..2999 {
            battery.tick();
        }
        assert!(*battery.state_of_charge() < 100.0);
        assert!(*battery.state_of_charge() > 99.9);

        // Float accumulation decides whether tick 3000 or 3001 hits the bound.
        let mut outcome = battery.tick();
        if outcome == TickOutcome::Moved {
            outcome = battery.tick();
        }
        assert_eq!(outcome, TickOutcome::ReachedFull);
        assert_eq!(*battery.state_of_charge(), 100.0);
        assert_eq!(battery.mode(), Mode::Idle);
    }

    #[test]
    fn ticks_at_full_are_idempotent() {
        let mut battery = battery_at(99.99);
        battery.set_power_setpoint(PowerSetpoint::from(-230));
        assert_eq!(battery.tick(), TickOutcome::ReachedFull);
        for _ in 0..100 {
            assert_eq!(battery.tick(), TickOutcome::Unchanged);
            assert_eq!(*battery.state_of_charge(), 100.0);
            assert_eq!(battery.mode(), Mode::Idle);
        }
        // The setpoint read-back is untouched by the clamp.
        assert_eq!(*battery.power_setpoint(), -230);
    }

    #[test]
    fn discharge_clamps_at_empty() {
        let mut battery = battery_at(0.01);
        battery.set_power_setpoint(PowerSetpoint::from(230));
        assert_eq!(battery.tick(), TickOutcome::ReachedEmpty);
        assert_eq!(*battery.state_of_charge(), 0.0);
        assert_eq!(battery.mode(), Mode::Idle);
        assert_eq!(battery.tick(), TickOutcome::Unchanged);
    }

    #[test]
    fn full_discharge_takes_rated_time() {
        let mut battery = battery_at(100.0);
        battery.set_power_setpoint(PowerSetpoint::from(230));
        let mut ticks = 0;
        while battery.tick() != TickOutcome::ReachedEmpty {
            ticks += 1;
            assert!(ticks <= 2801, "battery never emptied");
        }
        assert!((2799..=2801).contains(&ticks));
    }

    #[test]
    fn snapshot_reports_current_state() {
        let mut battery = Battery::default();
        battery.set_power_setpoint(PowerSetpoint::from(115));
        let status = battery.snapshot();
        assert_eq!(status.mode, Mode::Discharging);
        assert_eq!(*status.power_setpoint, 115);
        assert_eq!(
            status.to_string(),
            "state of charge 50.0 %, discharging, setpoint 115 kW"
        );
    }
}
