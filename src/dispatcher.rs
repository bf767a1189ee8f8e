//! Routes decoded requests onto the battery and the register map.
//!
//! Every successful operation stores its result in the [`RegisterMap`] before
//! returning. Read replies are built from the map, write replies echo the
//! request.

use crate::battery::{Battery, TickOutcome};
use crate::frame::{self, DecodeError, FunctionCode, Request, Response};
use crate::protocol::{Exception, PowerSetpoint, Register};
use crate::register_map::RegisterMap;
use log::{info, trace};

/// `Ok(())` once the register map holds the result.
pub type Outcome = Result<(), Exception>;

macro_rules! debug_trace {
    ($self:expr, $($arg:tt)+) => {
        if $self.debug_trace {
            info!($($arg)+);
        } else {
            trace!($($arg)+);
        }
    };
}

/// The simulator's whole mutable state: the battery, the registers and the
/// debug trace flag.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    battery: Battery,
    registers: RegisterMap,
    debug_trace: bool,
}

impl Dispatcher {
    pub fn new(battery: Battery) -> Self {
        Self {
            battery,
            registers: RegisterMap::new(),
            debug_trace: false,
        }
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    pub fn debug_trace(&self) -> bool {
        self.debug_trace
    }

    /// Advances the battery by one time unit.
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.battery.tick();
        match outcome {
            TickOutcome::ReachedFull | TickOutcome::ReachedEmpty => {
                info!("Battery {outcome:?}: {}", self.battery.snapshot());
            }
            TickOutcome::Moved => {
                debug_trace!(self, "tick: {}", self.battery.snapshot());
            }
            TickOutcome::Unchanged => {}
        }
        outcome
    }

    pub fn handle_write(&mut self, address: u16, value: u16) -> Outcome {
        match Register::try_from(address) {
            Ok(Register::DebugTrace) => {
                self.enable_debug_trace(value);
                Ok(())
            }
            Ok(Register::PowerToDeliver) => {
                self.write_power_to_deliver(value);
                Ok(())
            }
            _ => {
                debug_trace!(self, "write to unmapped address {address}");
                Err(Exception::IllegalDataAddress)
            }
        }
    }

    /// `value` carries the request's second field and is not interpreted.
    pub fn handle_read(&mut self, address: u16, value: u16) -> Outcome {
        match Register::try_from(address) {
            Ok(Register::StateOfCharge) => {
                let soc = self.battery.state_of_charge();
                debug_trace!(self, "read state of charge: {soc}");
                self.registers
                    .store(Register::StateOfCharge, soc.encode_for_holding_register());
                Ok(())
            }
            Ok(Register::PowerToDeliver) => {
                let setpoint = self.battery.power_setpoint();
                debug_trace!(self, "read power to deliver: {setpoint}");
                self.registers
                    .store(Register::PowerToDeliver, setpoint.encode_for_write_register());
                Ok(())
            }
            _ => {
                debug_trace!(self, "read from unmapped address {address} (data {value:#06x})");
                Err(Exception::IllegalDataAddress)
            }
        }
    }

    fn enable_debug_trace(&mut self, value: u16) {
        self.debug_trace = value & 0x0001 != 0;
        info!(
            "Debug trace {}",
            if self.debug_trace { "enabled" } else { "disabled" }
        );
        self.registers
            .store(Register::DebugTrace, u16::from(self.debug_trace));
    }

    fn write_power_to_deliver(&mut self, value: u16) {
        let setpoint = PowerSetpoint::decode_from_holding_register(value);
        self.battery.set_power_setpoint(setpoint);
        self.registers.store(Register::PowerToDeliver, value);
        debug_trace!(
            self,
            "write power to deliver {setpoint}: {} at {:.6} %/tick",
            self.battery.mode(),
            self.battery.rate()
        );
    }

    /// Runs one request and builds the response.
    ///
    /// Reads must ask for exactly one register.
    pub fn dispatch(&mut self, request: &Request) -> Result<Response, Exception> {
        match request.function {
            FunctionCode::ReadHoldingRegisters => {
                if request.value != 1 {
                    debug_trace!(
                        self,
                        "read of {} registers at {}",
                        request.value,
                        request.address
                    );
                    return Err(Exception::IllegalDataValue);
                }
                self.handle_read(request.address, request.value)?;
                let word = self
                    .registers
                    .load_raw(request.address)
                    .ok_or(Exception::IllegalDataAddress)?;
                Ok(Response::ReadHoldingRegisters(word))
            }
            FunctionCode::WriteSingleRegister => {
                self.handle_write(request.address, request.value)?;
                Ok(Response::WriteSingleRegister {
                    address: request.address,
                    value: request.value,
                })
            }
        }
    }

    /// Decodes `frame`, dispatches it and returns the reply bytes.
    ///
    /// Protocol errors are answered with an exception frame; only frames too
    /// broken to address a reply to come back as `Err`.
    pub fn process(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let decoded = frame::decode(frame)?;
        let reply = match decoded.request.and_then(|request| self.dispatch(&request)) {
            Ok(response) => frame::encode_response(&decoded.header, &response),
            Err(exception) => {
                debug_trace!(
                    self,
                    "function {:#04x}: exception {exception}",
                    decoded.function_code
                );
                frame::encode_exception(&decoded.header, decoded.function_code, exception)
            }
        };
        Ok(reply)
    }
}
