use battsim_lib::protocol as proto;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

fn parse_power_setpoint(s: &str) -> Result<proto::PowerSetpoint, String> {
    let kilowatts = clap_num::number_range(s, i16::MIN, i16::MAX)
        .map_err(|e| format!("Invalid power setpoint: {e}"))?;
    Ok(proto::PowerSetpoint::from(kilowatts))
}

fn parse_unit_id(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid unit id format: {e}"))
}

fn parse_port(s: &str) -> Result<u16, String> {
    clap_num::number_range(s, 1, u16::MAX)
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> Self {
        switch == Switch::On
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliMode {
    /// Run the battery simulator as a Modbus TCP server.
    Serve {
        /// Local address to listen on.
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// TCP port to listen on for incoming requests.
        #[arg(short, long, default_value_t = proto::DEFAULT_PORT, value_parser = parse_port)]
        port: u16,

        /// YAML file with plant constants and tick interval.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Period of the battery model, overrides the config file.
        /// Examples: "1s", "100ms".
        #[arg(long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
        tick_interval: Option<Duration>,
    },
    /// Control a running simulator via Modbus TCP.
    Tcp {
        /// The host and port of the simulator.
        /// Example: "127.0.0.1:1502".
        #[clap(verbatim_doc_comment)]
        address: String,

        /// Modbus unit id, decimal or hexadecimal.
        #[arg(short, long, default_value = "0xFF", value_parser = parse_unit_id)]
        unit_id: u8,

        /// Command to send to the simulator.
        #[command(subcommand)]
        command: CliCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read and display the state of charge.
    ReadStateOfCharge,

    /// Read and display the last commanded power setpoint.
    ReadPower,

    /// Command a power setpoint in kW.
    /// Negative values charge the battery, positive values discharge it,
    /// 0 stops it. Example: "-230" charges at rated power.
    #[clap(verbatim_doc_comment)]
    SetPower {
        #[arg(allow_hyphen_values = true, value_parser = parse_power_setpoint)]
        kilowatts: proto::PowerSetpoint,
    },

    /// Switch the simulator's debug trace on or off.
    DebugTrace {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Read and display state of charge and power setpoint.
    ReadAll,

    /// Continuously poll and print the state of charge.
    Monitor {
        /// Interval between polls (e.g., "2s", "500ms").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "2sec")]
        poll_interval: Duration,
    },
}

const fn about_text() -> &'static str {
    "Battery simulator - emulate a grid-scale battery over Modbus TCP, or drive one."
}

#[derive(Parser, Debug)]
#[command(name = "battsim", author, version, about = about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub mode: CliMode,

    /// Modbus I/O timeout for client commands.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,
}
