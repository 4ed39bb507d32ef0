//! Constant configuration pushed to a freshly powered digiBASE.
//!
//! The gain stabilization settings written here stick: once the device is
//! initialized they cannot be changed again without a different profile.

use crate::status::{Control, Counters, StatusRecord, Window, CHANNEL_FIELD};

pub const STATUS_REQUEST: u8 = 0x01;
pub const START: u8 = 0x06;
pub const START2: u8 = 0x04;
pub const START3: u8 = 0x11;
pub const SPECTRUM_REQUEST: u8 = 0x80;
pub const CHECK: u8 = 0x12;
pub const FIRMWARE_SEGMENT: u8 = 0x05;
pub const CLEAR_SPECTRUM: u8 = 0x02;

/// Init response code of a powered but unconfigured device.
pub const UNINITIALIZED: u8 = 4;
/// Init response code of a device that already runs firmware.
pub const AWAKE: u8 = 0;
/// Answer expected after a check command.
pub const CHECK_OK: u8 = 3;

/// Four byte command written on the init pipe.
pub const fn init_command(op: u8, flags: u8) -> [u8; 4] {
    [op, 0, flags, 0]
}

/// A piece of the firmware image and where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSegment {
    pub offset: usize,
    pub len: usize,
}

/// One write of the configuration replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
    Record(StatusRecord),
    Opcode(u8),
}

/// Everything the handshake needs to know about one firmware revision.
///
/// The gain stabilizer takes its enable bit and window from the replayed
/// records only. Once a device is initialized, later writes do not change
/// them; a different profile is needed for that.
#[derive(Debug, Clone, PartialEq)]
pub struct InitProfile {
    pub revision: &'static str,
    pub firmware_file: &'static str,
    pub segments: [FirmwareSegment; 2],
    pub start: [u8; 4],
    pub start2: [u8; 4],
    pub start3: [u8; 4],
    pub segment_header: [u8; 4],
    pub check: [u8; 4],
    pub primary: StatusRecord,
    pub variant: StatusRecord,
}

impl InitProfile {
    /// digiBASE-RH with the `digiBaseRH.rbf` image.
    pub fn digibase_rh() -> Self {
        Self {
            revision: "digiBASE-RH",
            firmware_file: "digiBaseRH.rbf",
            segments: [
                FirmwareSegment {
                    offset: 0,
                    len: 61_424,
                },
                FirmwareSegment {
                    offset: 61_424,
                    len: 14_039,
                },
            ],
            start: init_command(START, 0x02),
            start2: init_command(START2, 0x02),
            start3: init_command(START3, 0x02),
            segment_header: init_command(FIRMWARE_SEGMENT, 0x02),
            check: init_command(CHECK, 0x06),
            primary: primary_record(),
            variant: variant_record(),
        }
    }

    /// Smallest image that covers every segment.
    pub fn firmware_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.offset + s.len)
            .max()
            .unwrap_or(0)
    }

    /// The seven writes that configure a freshly loaded device.
    pub fn replay(&self) -> [ReplayStep; 7] {
        let mut clearing = self.variant;
        clearing.counters.insert(Counters::CLEAR);
        [
            ReplayStep::Record(self.primary),
            ReplayStep::Record(self.variant),
            ReplayStep::Record(self.variant),
            ReplayStep::Opcode(START2),
            ReplayStep::Record(clearing),
            ReplayStep::Record(self.variant),
            ReplayStep::Record(self.variant),
        ]
    }

    /// The two writes that follow the check command.
    pub fn finale(&self) -> [StatusRecord; 2] {
        let mut enabled = self.variant;
        enabled.counters.insert(Counters::ENABLE);
        [self.variant, enabled]
    }
}

impl Default for InitProfile {
    fn default() -> Self {
        Self::digibase_rh()
    }
}

fn primary_record() -> StatusRecord {
    StatusRecord {
        control: Control::from_bits_retain(0xb3),
        fine_gain: 0xa0_0000,
        spare_64: 0x8000,
        counters: Counters::from_bits_retain(0x10),
        ..variant_record()
    }
}

fn variant_record() -> StatusRecord {
    StatusRecord {
        control: Control::PHA_MODE | Control::GAIN_STAB | Control::ZERO_STAB,
        pulse_width: 0x0c,
        actual_hv: [0x20, 0x00],
        isc: 0x30,
        aio: 0x20,
        spare_07: 0x03,
        actual_fine_gain: 0x0a,
        fine_gain: 0x20_0000,
        lld: 0x2800,
        channels: CHANNEL_FIELD,
        hv_target: 640,
        gain_stab: Window::new(250, 300, 350),
        zero_stab: Window::new(108, 133, 158),
        memory_size: 0x40,
        spare_77: 0x0c,
        spare_78: 0x0024,
        ..StatusRecord::default()
    }
}
