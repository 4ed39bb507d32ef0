//! USB discovery and session bookkeeping.

use log::{debug, info, warn};
use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::byte_order::ByteOrder;
use crate::detector::Detector;
use crate::error::{DriverError, Result, TransportError};
use crate::firmware::FirmwareSource;
use crate::templates::InitProfile;
use crate::transport::UsbTransport;

pub const VENDOR_ID: u16 = 0x0a2d;
pub const PRODUCT_ID: u16 = 0x001f;

/// Owns the libusb context shared by every open session. The context is
/// created by the first `open` and dropped again by the last `close`.
#[derive(Default)]
pub struct DeviceContext {
    usb: Option<Context>,
    open_sessions: usize,
    profile: InitProfile,
}

impl DeviceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a different firmware revision.
    pub fn with_profile(profile: InitProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions
    }

    /// Serial numbers of every attached digiBASE.
    pub fn list_serials(&self) -> Result<Vec<u32>> {
        let scan = |usb: &Context| -> Result<Vec<u32>> {
            let mut serials = Vec::new();
            for device in candidates(usb)? {
                let serial = device
                    .open()
                    .map_err(|e| DriverError::from(TransportError::from(e)))
                    .and_then(|handle| read_serial(&device, &handle));
                serials.extend(accept(serial, None, device.address()));
            }
            Ok(serials)
        };
        match &self.usb {
            Some(usb) => scan(usb),
            None => scan(&Context::new().map_err(TransportError::from)?),
        }
    }

    /// Opens the first digiBASE, or the one with `serial`, and brings it up.
    pub fn open(
        &mut self,
        serial: Option<u32>,
        firmware: &FirmwareSource,
    ) -> Result<Detector<UsbTransport>> {
        if self.usb.is_none() {
            debug!("Creating USB context");
            self.usb = Some(Context::new().map_err(TransportError::from)?);
        }
        let opened = match &self.usb {
            Some(usb) => self.open_with(usb, serial, firmware),
            None => Err(DriverError::NotFound(serial)),
        };
        match opened {
            Ok(detector) => {
                self.open_sessions += 1;
                Ok(detector)
            }
            Err(e) => {
                if self.open_sessions == 0 {
                    self.usb = None;
                }
                Err(e)
            }
        }
    }

    fn open_with(
        &self,
        usb: &Context,
        wanted: Option<u32>,
        firmware: &FirmwareSource,
    ) -> Result<Detector<UsbTransport>> {
        for device in candidates(usb)? {
            let handle = match device.open() {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Skipping digiBASE at bus {} address {}: {e}", device.bus_number(), device.address());
                    continue;
                }
            };
            let Some(serial) = accept(read_serial(&device, &handle), wanted, device.address()) else {
                continue;
            };
            info!("Found digiBASE {serial}");
            let transport = UsbTransport::claim(handle)?;
            return Detector::initialize(transport, serial, &self.profile, firmware, ByteOrder::host());
        }
        Err(DriverError::NotFound(wanted))
    }

    /// Releases `detector`. The USB context goes away with the last session.
    pub fn close(&mut self, detector: Detector<UsbTransport>) -> Result<()> {
        let released = detector.close();
        self.open_sessions = self.open_sessions.saturating_sub(1);
        if self.open_sessions == 0 {
            debug!("Last session closed, dropping USB context");
            self.usb = None;
        }
        released
    }
}

fn candidates(usb: &Context) -> Result<Vec<Device<Context>>> {
    let devices = usb.devices().map_err(TransportError::from)?;
    Ok(devices
        .iter()
        .filter(|d| {
            d.device_descriptor()
                .map(|desc| desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID)
                .unwrap_or(false)
        })
        .collect())
}

/// The serial of a scanned unit if it is the one asked for. Units whose
/// serial cannot be read are skipped.
fn accept(serial: Result<u32>, wanted: Option<u32>, address: u8) -> Option<u32> {
    match serial {
        Ok(serial) if wanted.is_none() || wanted == Some(serial) => Some(serial),
        Ok(_) => None,
        Err(e) => {
            warn!("Skipping digiBASE at address {address}: {e}");
            None
        }
    }
}

fn read_serial(device: &Device<Context>, handle: &DeviceHandle<Context>) -> Result<u32> {
    let desc = device.device_descriptor().map_err(TransportError::from)?;
    let text = handle
        .read_serial_number_string_ascii(&desc)
        .map_err(TransportError::from)?;
    parse_serial(&text)
}

/// The serial number descriptor holds a decimal number.
pub fn parse_serial(text: &str) -> Result<u32> {
    text.trim()
        .parse()
        .map_err(|_| DriverError::BadSerial(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("12345", Some(12345))]
    #[case(" 0042\0", None)]
    #[case("17 ", Some(17))]
    #[case("DB-1", None)]
    #[case("", None)]
    fn serial_descriptor(#[case] text: &str, #[case] expect: Option<u32>) {
        assert_eq!(expect, parse_serial(text).ok());
    }

    #[rstest]
    #[case(Ok(17), None, Some(17))]
    #[case(Ok(17), Some(17), Some(17))]
    #[case(Ok(17), Some(18), None)]
    #[case(Err(DriverError::BadSerial("DB-1".into())), None, None)]
    #[case(Err(DriverError::Transport(TransportError::Timeout)), Some(17), None)]
    fn scan_skips_unreadable_units(
        #[case] serial: Result<u32>,
        #[case] wanted: Option<u32>,
        #[case] expect: Option<u32>,
    ) {
        assert_eq!(expect, accept(serial, wanted, 3));
    }

    #[test]
    fn fresh_context_has_no_sessions() {
        let ctx = DeviceContext::new();
        assert_eq!(0, ctx.open_sessions());
        assert!(ctx.usb.is_none());
    }
}
