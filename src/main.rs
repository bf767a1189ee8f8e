//! Battery simulator CLI
//!
//! Runs a simulated grid-scale battery behind a Modbus TCP server, or acts as
//! the controller of a running simulator.
//!
//! This tool allows users to:
//! - Serve the simulator with configurable port, plant constants and tick period.
//! - Read the state of charge and the commanded power setpoint.
//! - Command charge/discharge power setpoints.
//! - Switch the simulator's debug trace on and off.
//! - Monitor the state of charge continuously.

use anyhow::{Context, Result};
use battsim_lib::{
    battery::Battery,
    dispatcher::Dispatcher,
    server::Server,
    tokio_sync_client::BatteryClient,
};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::{panic, time::Duration};
use tokio_util::sync::CancellationToken;

mod commandline;
mod config;

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

macro_rules! print_state_of_charge {
    ($client:expr) => {
        let soc = $client
            .read_state_of_charge()
            .with_context(|| "Cannot read state of charge")?;
        println!("State of charge: {}", soc);
    };
}

macro_rules! print_power {
    ($client:expr) => {
        let setpoint = $client
            .read_power_to_deliver()
            .with_context(|| "Cannot read power to deliver")?;
        println!("Power to deliver: {}", setpoint);
    };
}

fn handle_serve(
    bind: IpAddr,
    port: u16,
    config_file: Option<PathBuf>,
    tick_interval: Option<Duration>,
) -> Result<()> {
    let config = config::SimulatorConfig::load(config_file.as_deref())?;
    let tick_interval = tick_interval.unwrap_or(config.tick_interval);
    let battery = Battery::new(config.plant).context("Invalid plant configuration")?;
    debug!("Plant: {:?}", config.plant);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start tokio runtime")?;

    runtime.block_on(async move {
        let addr = SocketAddr::new(bind, port);
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(battery)));
        let server = Server::bind(addr, dispatcher, tick_interval)
            .await
            .with_context(|| format!("Cannot listen on {addr}"))?;
        println!(
            "Starting battery simulator - listening on {}",
            server.local_addr().unwrap_or(addr)
        );

        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(err) => error!("Cannot listen for Ctrl-C: {err}"),
            }
            signal_token.cancel();
        });

        server.run(shutdown).await.context("Simulator failed")
    })
}

fn create_client(address: &str, unit_id: u8, timeout: Duration) -> Result<BatteryClient> {
    let socket_addr: SocketAddr = address
        .parse()
        .with_context(|| format!("Invalid TCP address format: '{address}'"))?;
    info!("Attempting to connect via TCP to {socket_addr}...");
    let ctx =
        tokio_modbus::client::sync::tcp::connect_slave(socket_addr, tokio_modbus::Slave(unit_id))
            .with_context(|| format!("Failed to connect to battery simulator at {socket_addr}"))?;
    let mut client = BatteryClient::new(ctx);
    client.set_timeout(timeout);
    Ok(client)
}

fn handle_command(client: &mut BatteryClient, command: &commandline::CliCommands) -> Result<()> {
    match command {
        commandline::CliCommands::ReadStateOfCharge => {
            info!("Executing: Read State of Charge");
            print_state_of_charge!(client);
        }
        commandline::CliCommands::ReadPower => {
            info!("Executing: Read Power to Deliver");
            print_power!(client);
        }
        commandline::CliCommands::SetPower { kilowatts } => {
            info!("Executing: Set Power to Deliver to {kilowatts}");
            client
                .set_power_to_deliver(*kilowatts)
                .with_context(|| format!("Failed to set power to deliver to {kilowatts}"))?;
            println!("Power to deliver set to {kilowatts} successfully.");
        }
        commandline::CliCommands::DebugTrace { state } => {
            info!("Executing: Debug Trace {state:?}");
            client
                .set_debug_trace((*state).into())
                .with_context(|| "Failed to switch debug trace")?;
            println!("Debug trace switched {state:?}.");
        }
        commandline::CliCommands::ReadAll => {
            info!("Executing: Read All Values");
            print_state_of_charge!(client);
            print_power!(client);
        }
        commandline::CliCommands::Monitor { poll_interval } => {
            info!("Starting monitor: interval={poll_interval:?}");
            loop {
                debug!("Monitor: Reading state of charge...");
                print_state_of_charge!(client);
                std::thread::sleep(*poll_interval);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    info!(
        "Battery simulator CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    match args.mode {
        commandline::CliMode::Serve {
            bind,
            port,
            config,
            tick_interval,
        } => handle_serve(bind, port, config, tick_interval),
        commandline::CliMode::Tcp {
            address,
            unit_id,
            command,
        } => {
            let mut client = create_client(&address, unit_id, args.timeout)?;
            handle_command(&mut client, &command)
        }
    }
}
