//! Register numbering, Modbus codes and value types of the simulated battery.
//!
//! Everything in this module is shared between the simulator side (which
//! answers requests) and the client side (which issues them), so both agree on
//! how a register word maps onto a physical quantity.

use std::fmt;
use std::ops::Deref;

/// TCP port the simulator listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 1502;

/// Modbus function code for *Read Holding Registers*.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Modbus function code for *Write Single Register*.
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Bit set on the function code of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Errors raised while converting between register words and typed values.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Register address {0} is not mapped")]
    UnknownRegister(u16),
    #[error("State of charge {0} % is outside of 0..=100 %")]
    StateOfChargeOutOfRange(f64),
    #[error("Expected exactly one register in the response, got {0}")]
    UnexpectedRegisterCount(usize),
    #[error("Invalid plant configuration: {0}")]
    InvalidPlantConfig(&'static str),
}

/// The logical registers exposed by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Register {
    /// Internal flag enabling verbose tracing, only writable.
    DebugTrace = 0,
    /// Signed power setpoint in kW, readable and writable.
    PowerToDeliver = 1,
    /// State of charge in tenths of a percent, read-only.
    StateOfCharge = 2,
}

impl Register {
    pub const COUNT: usize = 3;
    pub const ALL: [Register; Self::COUNT] = [
        Register::DebugTrace,
        Register::PowerToDeliver,
        Register::StateOfCharge,
    ];

    /// The wire address of this register.
    pub const fn address(self) -> u16 {
        self as u16
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u16> for Register {
    type Error = Error;

    fn try_from(address: u16) -> Result<Self, Self::Error> {
        match address {
            0 => Ok(Register::DebugTrace),
            1 => Ok(Register::PowerToDeliver),
            2 => Ok(Register::StateOfCharge),
            _ => Err(Error::UnknownRegister(address)),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::DebugTrace => "DebugTrace",
            Register::PowerToDeliver => "PowerToDeliver",
            Register::StateOfCharge => "StateOfCharge",
        };
        write!(f, "{name}({})", self.address())
    }
}

/// Modbus exception codes produced by the simulator.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    #[error("Illegal function")]
    IllegalFunction = 0x01,
    #[error("Illegal data address")]
    IllegalDataAddress = 0x02,
    #[error("Illegal data value")]
    IllegalDataValue = 0x03,
}

impl Exception {
    /// The one-byte exception code as it appears on the wire.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Commanded power in kW.
///
/// Negative values charge the battery (power flows in), positive values
/// discharge it and zero leaves it idle. On the wire the value travels as the
/// two's-complement register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerSetpoint(i16);

impl PowerSetpoint {
    pub const IDLE: PowerSetpoint = PowerSetpoint(0);

    /// Reinterprets a raw register word as a signed setpoint.
    pub const fn decode_from_holding_register(word: u16) -> Self {
        Self(word as i16)
    }

    /// The raw register word, verbatim two's-complement.
    pub const fn encode_for_write_register(self) -> u16 {
        self.0 as u16
    }

    /// Absolute commanded power in kW.
    pub const fn magnitude(self) -> u16 {
        self.0.unsigned_abs()
    }

    pub const fn is_charging(self) -> bool {
        self.0 < 0
    }

    pub const fn is_discharging(self) -> bool {
        self.0 > 0
    }
}

impl From<i16> for PowerSetpoint {
    fn from(kilowatts: i16) -> Self {
        Self(kilowatts)
    }
}

impl Deref for PowerSetpoint {
    type Target = i16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for PowerSetpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kW", self.0)
    }
}

/// Battery state of charge in percent, always within `0.0..=100.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct StateOfCharge(f64);

impl StateOfCharge {
    pub const EMPTY: StateOfCharge = StateOfCharge(0.0);
    pub const FULL: StateOfCharge = StateOfCharge(100.0);

    /// Encodes with one decimal place of precision, e.g. `50.0 %` becomes `500`.
    pub fn encode_for_holding_register(self) -> u16 {
        (self.0 * 10.0).round() as u16
    }

    pub fn decode_from_holding_register(word: u16) -> Self {
        Self(f64::from(word) / 10.0)
    }

    pub const fn percent(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for StateOfCharge {
    type Error = Error;

    fn try_from(percent: f64) -> Result<Self, Self::Error> {
        if (Self::EMPTY.0..=Self::FULL.0).contains(&percent) {
            Ok(Self(percent))
        } else {
            Err(Error::StateOfChargeOutOfRange(percent))
        }
    }
}

impl Deref for StateOfCharge {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for StateOfCharge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} %", self.0)
    }
}
