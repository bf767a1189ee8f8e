//! A Modbus-TCP simulator of a grid-scale battery, for exercising external
//! controllers without the real plant.
//!
//! The simulator exposes two registers: `PowerToDeliver`, a signed power
//! setpoint in kW (negative charges, positive discharges), and
//! `StateOfCharge`, the charge level in tenths of a percent. A background
//! ticker moves the charge level once per second according to the last
//! setpoint, stopping at 0 % and 100 %.
//!
//! ## Layout
//!
//! - [`protocol`]: register numbering, Modbus codes and value types.
//! - [`battery`]: the state of charge model.
//! - [`register_map`]: storage the replies are built from.
//! - [`frame`]: MBAP/PDU decoding and reply encoding.
//! - [`dispatcher`]: maps requests onto the battery, the single owner of all
//!   simulator state.
//! - `server`: the tokio TCP transport and ticker (feature `server`).
//! - `tokio_sync_client`: a blocking controller client (feature `tokio-tcp-sync`).
//!
//! ## Quick Start
//!
//! The core runs without any transport, one frame in, one reply out:
//!
//! ```
//! use battsim_lib::dispatcher::Dispatcher;
//!
//! let mut dispatcher = Dispatcher::default();
//! // Write Single Register: PowerToDeliver (1) = -230 kW
//! let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0xFF, 0x1A];
//! let reply = dispatcher.process(&request).unwrap();
//! assert_eq!(reply, request);
//!
//! dispatcher.tick();
//! assert!(*dispatcher.battery().state_of_charge() > 50.0);
//! ```

pub mod battery;
pub mod dispatcher;
pub mod frame;
pub mod protocol;
pub mod register_map;

#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
#[cfg(feature = "server")]
pub mod server;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_sync_client;
