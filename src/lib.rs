//! Driver for the ORTEC digiBASE-RH multichannel analyzer.
//!
//! A [`DeviceContext`] finds attached units and opens them into a
//! [`Detector`], which owns the USB interface, mirrors the device's status
//! record and holds the last spectra read. Everything above the
//! [`Transport`] trait is independent of libusb, so the same session code
//! runs against the in-process [`SimulatedDigibase`].

pub mod acquisition;
pub mod byte_order;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod firmware;
pub mod handshake;
pub mod list_mode;
pub mod persistence;
pub mod protocol;
pub mod simulator;
pub mod spectrum;
pub mod status;
pub mod templates;
pub mod transport;
pub mod tui;
pub mod utils;
pub mod writer;

pub use byte_order::ByteOrder;
pub use config::Conf;
pub use context::DeviceContext;
pub use detector::Detector;
pub use error::{DriverError, Result};
pub use firmware::{FirmwareImage, FirmwareSource};
pub use list_mode::Pulse;
pub use simulator::SimulatedDigibase;
pub use status::{Control, StatusRecord};
pub use templates::InitProfile;
pub use transport::{Pipe, Transport, UsbTransport};
pub use utils::{parse_duration, CountRate};
pub use writer::{OutputFormat, SpectrumWriter};
