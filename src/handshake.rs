//! Brings a digiBASE from power-on to a configured, ready device.
//!
//! ```text
//! Probing -> AwaitingUninitResponse -> FirmwareUpload -> ConfigurationReplay -> Confirming -> Ready
//!    \-> AlreadyAwake -----------------------------------------------------------^
//! ```
//!
//! Every transition is one call to [`Handshake::advance`]. Any error ends the
//! handshake; the caller has to start over with a fresh transport.

use log::{debug, info};

use crate::byte_order::ByteOrder;
use crate::error::{DriverError, ProtocolError, Result};
use crate::firmware::FirmwareSource;
use crate::protocol;
use crate::status::{Counters, StatusRecord};
use crate::templates::{InitProfile, ReplayStep, AWAKE, CHECK_OK, UNINITIALIZED};
use crate::transport::{Pipe, Transport};

/// Status reads attempted on a device that is already awake.
pub const WAKE_READS: usize = 3;

/// Where the confirmation step takes its base record from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// After a configuration replay, the profile's records are pushed and
    /// only silent acknowledgements are accepted.
    Replayed,
    /// After waking, the status just read from the device is the base.
    Woken(StatusRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probing,
    AwaitingUninitResponse,
    FirmwareUpload,
    ConfigurationReplay,
    AlreadyAwake,
    Confirming(Confirmation),
    /// Holds the last record pushed to the device.
    Ready(StatusRecord),
}

impl Phase {
    pub fn describe(&self) -> &'static str {
        match self {
            Phase::Probing => "probing",
            Phase::AwaitingUninitResponse => "requesting firmware upload",
            Phase::FirmwareUpload => "uploading firmware",
            Phase::ConfigurationReplay => "replaying configuration",
            Phase::AlreadyAwake => "waking",
            Phase::Confirming(_) => "confirming",
            Phase::Ready(_) => "ready",
        }
    }
}

pub struct Handshake<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    profile: &'a InitProfile,
    firmware: &'a FirmwareSource,
    host: ByteOrder,
}

impl<'a, T: Transport + ?Sized> Handshake<'a, T> {
    pub fn new(
        transport: &'a mut T,
        profile: &'a InitProfile,
        firmware: &'a FirmwareSource,
        host: ByteOrder,
    ) -> Self {
        Self {
            transport,
            profile,
            firmware,
            host,
        }
    }

    /// Runs every transition and returns the last record written.
    pub fn run(mut self) -> Result<StatusRecord> {
        let mut phase = Phase::Probing;
        loop {
            phase = match phase {
                Phase::Ready(record) => {
                    info!("digiBASE handshake complete ({})", self.profile.revision);
                    return Ok(record);
                }
                other => self.advance(other)?,
            };
        }
    }

    /// Performs one transition.
    pub fn advance(&mut self, phase: Phase) -> Result<Phase> {
        debug!("Handshake: {}", phase.describe());
        let next = match phase {
            Phase::Probing => self.probe(),
            Phase::AwaitingUninitResponse => self.request_upload(),
            Phase::FirmwareUpload => self.upload_firmware(),
            Phase::ConfigurationReplay => self.replay_configuration(),
            Phase::AlreadyAwake => self.wake(),
            Phase::Confirming(c) => self.confirm(c),
            Phase::Ready(r) => Ok(Phase::Ready(r)),
        };
        next.map_err(|source| DriverError::Handshake {
            phase: phase.describe(),
            source: Box::new(source),
        })
    }

    fn probe(&mut self) -> Result<Phase> {
        protocol::send(self.transport, Pipe::Init, &self.profile.start, "start")?;
        match protocol::init_response(self.transport, "start")? {
            UNINITIALIZED => {
                info!("digiBASE is uninitialized, uploading firmware");
                Ok(Phase::AwaitingUninitResponse)
            }
            AWAKE => {
                info!("digiBASE is already initialized");
                Ok(Phase::AlreadyAwake)
            }
            got => Err(ProtocolError::UnexpectedCode {
                step: "start",
                expected: UNINITIALIZED,
                got,
            }
            .into()),
        }
    }

    fn request_upload(&mut self) -> Result<Phase> {
        protocol::send(self.transport, Pipe::Init, &self.profile.start2, "start2")?;
        protocol::expect_init(self.transport, 0, "start2")?;
        Ok(Phase::FirmwareUpload)
    }

    fn upload_firmware(&mut self) -> Result<Phase> {
        let image = self.firmware.image()?;
        for (n, frame) in image.frames(self.profile)?.iter().enumerate() {
            debug!("Firmware segment {} ({} bytes)", n + 1, frame.len());
            protocol::send(self.transport, Pipe::Init, frame, "firmware segment")?;
            protocol::expect_init(self.transport, 0, "firmware segment")?;
        }
        protocol::send(self.transport, Pipe::Init, &self.profile.start, "restart")?;
        protocol::expect_init(self.transport, 0, "restart")?;
        protocol::send(self.transport, Pipe::Init, &self.profile.start3, "start3")?;
        protocol::expect_init(self.transport, 0, "start3")?;
        Ok(Phase::ConfigurationReplay)
    }

    fn replay_configuration(&mut self) -> Result<Phase> {
        for step in self.profile.replay() {
            match step {
                ReplayStep::Record(record) => {
                    let frame = record.encode_frame(self.host);
                    protocol::send(self.transport, Pipe::Data, &frame, "configuration")?;
                }
                ReplayStep::Opcode(op) => {
                    protocol::send(self.transport, Pipe::Data, &[op], "configuration")?;
                }
            }
            protocol::expect_empty(self.transport, "configuration")?;
        }
        protocol::clear_spectrum(self.transport)?;
        Ok(Phase::Confirming(Confirmation::Replayed))
    }

    fn wake(&mut self) -> Result<Phase> {
        let mut base = None;
        for attempt in 1..=WAKE_READS {
            match protocol::read_status(self.transport, self.host) {
                Ok(record) => base = Some(record),
                Err(e) if protocol::is_transient(&e) => {
                    debug!("Status read {attempt}/{WAKE_READS} discarded: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        let base = base.ok_or(ProtocolError::NoStatusFrame(WAKE_READS))?;
        Ok(Phase::Confirming(Confirmation::Woken(base)))
    }

    fn confirm(&mut self, confirmation: Confirmation) -> Result<Phase> {
        protocol::send(self.transport, Pipe::Init, &self.profile.check, "check")?;
        protocol::expect_init(self.transport, CHECK_OK, "check")?;

        let writes = match confirmation {
            Confirmation::Replayed => self.profile.finale(),
            Confirmation::Woken(base) => {
                let mut cleared = base;
                cleared.counters = Counters::empty();
                let mut enabled = cleared;
                enabled.counters.insert(Counters::ENABLE);
                [cleared, enabled]
            }
        };
        for record in &writes {
            match confirmation {
                Confirmation::Replayed => {
                    let frame = record.encode_frame(self.host);
                    protocol::send(self.transport, Pipe::Data, &frame, "confirmation")?;
                    protocol::expect_empty(self.transport, "confirmation")?;
                }
                Confirmation::Woken(_) => {
                    protocol::write_status(self.transport, record, self.host)?;
                }
            }
        }
        Ok(Phase::Ready(writes[1]))
    }
}
