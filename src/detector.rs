//! A configured digiBASE session.
//!
//! Settings are changed on a copy of the cached status record, which only
//! replaces the cache once it passed validation and is then written to the
//! device. If that write fails the cache holds the new settings but the
//! device may not; [`Detector::refresh_status`] resynchronizes.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::byte_order::ByteOrder;
use crate::error::{DriverError, Result, ValidationError};
use crate::firmware::FirmwareSource;
use crate::handshake::Handshake;
use crate::list_mode::{ListModeDecoder, Pulse};
use crate::persistence;
use crate::protocol;
use crate::spectrum::Spectra;
use crate::status::{Control, Counters, StatusRecord, Window, CHANNELS, MAX_HV};
use crate::templates::InitProfile;
use crate::transport::{Transport, UsbTransport};

pub struct Detector<T: Transport = UsbTransport> {
    transport: T,
    serial: u32,
    host: ByteOrder,
    status: StatusRecord,
    spectra: Spectra,
    list: ListModeDecoder,
}

impl<T: Transport> Detector<T> {
    /// Runs the handshake over `transport` and seeds the cached status with
    /// one last read.
    pub fn initialize(
        mut transport: T,
        serial: u32,
        profile: &InitProfile,
        firmware: &FirmwareSource,
        host: ByteOrder,
    ) -> Result<Self> {
        let written = Handshake::new(&mut transport, profile, firmware, host).run()?;
        let status = match protocol::read_status(&mut transport, host) {
            Ok(record) => record,
            Err(e) => {
                warn!("Keeping handshake configuration, status read failed: {e}");
                written
            }
        };
        info!(
            "Opened digiBASE {serial}, HV target {:.2} V ({})",
            status.hv_volts(),
            if status.is_hv_on() { "on" } else { "off" }
        );
        Ok(Self {
            transport,
            serial,
            host,
            status,
            spectra: Spectra::new(),
            list: ListModeDecoder::new(),
        })
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The cached status record.
    pub fn status(&self) -> &StatusRecord {
        &self.status
    }

    pub fn spectra(&self) -> &Spectra {
        &self.spectra
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Releases the USB interface. Closing through
    /// [`DeviceContext::close`](crate::context::DeviceContext::close) also
    /// keeps the context's session count right.
    pub fn close(mut self) -> Result<()> {
        info!("Closing digiBASE {}", self.serial);
        self.transport.release()?;
        Ok(())
    }

    /// Writes the cached record to the device.
    pub fn write_status(&mut self) -> Result<()> {
        protocol::write_status(&mut self.transport, &self.status, self.host)?;
        Ok(())
    }

    /// Replaces the cache with the device's record. A record that fails the
    /// sanity check is discarded and the cache kept.
    pub fn refresh_status(&mut self) -> Result<()> {
        match protocol::read_status(&mut self.transport, self.host) {
            Ok(record) => {
                self.status = record;
                Ok(())
            }
            Err(e @ DriverError::Sanity(_)) => {
                warn!("Ignoring status from digiBASE {}: {e}", self.serial);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn apply<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StatusRecord) -> Result<(), ValidationError>,
    {
        let mut next = self.status;
        change(&mut next)?;
        self.status = next;
        self.write_status()
    }

    fn set_control(&mut self, bits: Control, on: bool) -> Result<()> {
        self.apply(|s| {
            s.control.set(bits, on);
            Ok(())
        })
    }

    pub fn start(&mut self) -> Result<()> {
        debug!("Starting acquisition");
        self.set_control(Control::RUNNING, true)
    }

    pub fn stop(&mut self) -> Result<()> {
        debug!("Stopping acquisition");
        self.set_control(Control::RUNNING, false)
    }

    pub fn hv_on(&mut self) -> Result<()> {
        let volts = self.status.hv_volts();
        if volts > MAX_HV {
            return Err(ValidationError::HighVoltage(volts).into());
        }
        info!("HV on, {volts:.2} V");
        self.set_control(Control::HIGH_VOLTAGE, true)
    }

    pub fn hv_off(&mut self) -> Result<()> {
        info!("HV off");
        self.set_control(Control::HIGH_VOLTAGE, false)
    }

    pub fn gain_stab_on(&mut self) -> Result<()> {
        self.set_control(Control::GAIN_STAB, true)
    }

    pub fn gain_stab_off(&mut self) -> Result<()> {
        self.set_control(Control::GAIN_STAB, false)
    }

    pub fn zero_stab_on(&mut self) -> Result<()> {
        self.set_control(Control::ZERO_STAB, true)
    }

    pub fn zero_stab_off(&mut self) -> Result<()> {
        self.set_control(Control::ZERO_STAB, false)
    }

    pub fn set_hv(&mut self, volts: f32) -> Result<()> {
        self.apply(|s| s.set_hv(volts))
    }

    pub fn set_pulse_width(&mut self, us: f32) -> Result<()> {
        self.apply(|s| s.set_pulse_width(us))
    }

    pub fn set_fine_gain(&mut self, gain: f64) -> Result<()> {
        self.apply(|s| s.set_fine_gain(gain))
    }

    pub fn set_live_preset(&mut self, seconds: f64) -> Result<()> {
        self.apply(|s| s.set_live_preset(seconds))
    }

    pub fn set_real_preset(&mut self, seconds: f64) -> Result<()> {
        self.apply(|s| s.set_real_preset(seconds))
    }

    pub fn live_preset_off(&mut self) -> Result<()> {
        self.set_control(Control::LIVE_PRESET, false)
    }

    pub fn real_preset_off(&mut self) -> Result<()> {
        self.set_control(Control::REAL_PRESET, false)
    }

    pub fn clear_presets(&mut self) -> Result<()> {
        self.apply(|s| {
            s.clear_presets();
            Ok(())
        })
    }

    /// Pulses the clear bit of the counter byte, zeroing live and real time.
    pub fn clear_counters(&mut self) -> Result<()> {
        self.status.counters.insert(Counters::CLEAR);
        self.write_status()?;
        self.status.counters.remove(Counters::CLEAR);
        self.write_status()
    }

    /// Presets, counters and spectrum.
    pub fn clear_all(&mut self) -> Result<()> {
        self.clear_presets()?;
        self.clear_counters()?;
        self.clear_spectrum()
    }

    /// The gain stabilizer of an initialized device keeps the window it was
    /// given by the handshake; this only changes what is written from now on.
    pub fn set_gain_stab_channels(&mut self, center: u16, width: u16) -> Result<()> {
        self.apply(|s| {
            s.gain_stab = Window::centered(center, width)?;
            Ok(())
        })
    }

    pub fn set_zero_stab_channels(&mut self, center: u16, width: u16) -> Result<()> {
        self.apply(|s| {
            s.zero_stab = Window::centered(center, width)?;
            Ok(())
        })
    }

    /// Leaves PHA mode. The transient arm bit is written once, counters are
    /// cleared, and the arm bit is dropped again.
    pub fn set_list_mode(&mut self) -> Result<()> {
        info!("Switching to list mode");
        self.status.control.remove(Control::RUNNING | Control::PHA_MODE);
        self.status.control.insert(Control::LIST_ARM);
        self.write_status()?;
        self.clear_counters()?;
        self.status.control.remove(Control::LIST_ARM);
        self.write_status()?;
        self.list.reset();
        Ok(())
    }

    pub fn set_pha_mode(&mut self) -> Result<()> {
        info!("Switching to PHA mode");
        self.status.control.insert(Control::PHA_MODE);
        self.write_status()?;
        self.clear_spectrum()
    }

    pub fn acquire_spectrum(&mut self) -> Result<()> {
        self.spectra.acquire(&mut self.transport, self.host)
    }

    /// Zeroes the histogram on the device. The cached spectra are left as they
    /// are; the next read sees the zeros.
    pub fn clear_spectrum(&mut self) -> Result<()> {
        protocol::clear_spectrum(&mut self.transport)?;
        Ok(())
    }

    pub fn cumulative(&self) -> &[i32; CHANNELS] {
        self.spectra.cumulative()
    }

    pub fn differential(&self) -> &[i32; CHANNELS] {
        self.spectra.differential()
    }

    pub fn roi_sum(&self, low: usize, high: usize) -> Result<i64> {
        Ok(self.spectra.roi_sum(low, high)?)
    }

    pub fn total_counts(&self) -> i64 {
        self.spectra.total_counts()
    }

    /// Reads up to `max_pulses` list-mode events. Without `out` only the
    /// number of pulses is returned.
    pub fn read_list_mode(
        &mut self,
        max_pulses: usize,
        out: Option<&mut Vec<Pulse>>,
    ) -> Result<usize> {
        self.list
            .read(&mut self.transport, self.host, max_pulses, out)
    }

    /// Writes the sanitized status to `<dir>/<serial>/status.txt`.
    pub fn save_status(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(persistence::save(dir, self.serial, &self.status)?)
    }

    /// Reads the file written by [`Detector::save_status`] and pushes it. A file
    /// that does not parse leaves the session untouched.
    pub fn load_status(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let loaded = persistence::load(dir, self.serial, &self.status)?;
        self.status = loaded;
        self.write_status()
    }
}

#[cfg(test)]
impl<T: Transport> Detector<T> {
    pub(crate) fn assemble(transport: T, status: StatusRecord) -> Self {
        Self {
            transport,
            serial: 4321,
            host: ByteOrder::Little,
            status,
            spectra: Spectra::new(),
            list: ListModeDecoder::new(),
        }
    }
}
