//! Synchronous `tokio-modbus` client for a running battery simulator.
//!
//! This is the controller side of the test harness: it commands power
//! setpoints and reads the resulting state of charge, converting between the
//! raw register words and the types of [`crate::protocol`].
//!
//! ## Example
//!
//! ```no_run
//! use battsim_lib::{protocol::PowerSetpoint, tokio_sync_client::BatteryClient};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = tokio_modbus::client::sync::tcp::connect("127.0.0.1:1502".parse()?)?;
//!     let mut client = BatteryClient::new(ctx);
//!
//!     client.set_power_to_deliver(PowerSetpoint::from(-230))?;
//!     println!("State of charge: {}", client.read_state_of_charge()?);
//!     Ok(())
//! }
//! ```

use crate::protocol::{self as proto, Register};
use crate::tokio_common::{map_tokio_result, single_register, Result};
use std::time::Duration;
use tokio_modbus::prelude::{SyncReader, SyncWriter};

/// Synchronous client for a simulated battery.
///
/// All methods block the current thread until the simulator answers or the
/// timeout expires.
pub struct BatteryClient {
    ctx: tokio_modbus::client::sync::Context,
}

impl BatteryClient {
    pub fn new(ctx: tokio_modbus::client::sync::Context) -> Self {
        Self { ctx }
    }

    /// Sets the timeout for Modbus communication.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.ctx.set_timeout(timeout);
    }

    fn read_register(&mut self, register: Register) -> Result<u16> {
        let words = map_tokio_result(self.ctx.read_holding_registers(register.address(), 1))?;
        Ok(single_register(&words)?)
    }

    fn write_register(&mut self, register: Register, word: u16) -> Result<()> {
        map_tokio_result(self.ctx.write_single_register(register.address(), word))
    }

    /// Reads the state of charge, with a resolution of 0.1 %.
    pub fn read_state_of_charge(&mut self) -> Result<proto::StateOfCharge> {
        let word = self.read_register(Register::StateOfCharge)?;
        Ok(proto::StateOfCharge::decode_from_holding_register(word))
    }

    /// Reads back the last commanded power setpoint.
    pub fn read_power_to_deliver(&mut self) -> Result<proto::PowerSetpoint> {
        let word = self.read_register(Register::PowerToDeliver)?;
        Ok(proto::PowerSetpoint::decode_from_holding_register(word))
    }

    /// Commands a new power setpoint. Negative charges, positive discharges,
    /// zero stops the battery.
    pub fn set_power_to_deliver(&mut self, setpoint: proto::PowerSetpoint) -> Result<()> {
        self.write_register(Register::PowerToDeliver, setpoint.encode_for_write_register())
    }

    /// Switches the simulator's verbose trace on or off.
    pub fn set_debug_trace(&mut self, enabled: bool) -> Result<()> {
        self.write_register(Register::DebugTrace, u16::from(enabled))
    }
}
