use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single bulk transfer. Never retried by the driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("USB transfer timed out")]
    Timeout,
    #[error("digiBASE is no longer attached")]
    DeviceAbsent,
    #[error("endpoint stalled")]
    Stalled,
    #[error("received {received} bytes but only {capacity} were expected")]
    Overflow { received: usize, capacity: usize },
    #[error("USB error: {0}")]
    Usb(String),
}

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::NoDevice => TransportError::DeviceAbsent,
            rusb::Error::Pipe => TransportError::Stalled,
            other => TransportError::Usb(other.to_string()),
        }
    }
}

/// The device answered, but not the way the protocol requires.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("{step}: unexpected response {response:02x?}")]
    UnexpectedResponse {
        step: &'static str,
        response: Vec<u8>,
    },
    #[error("{step}: expected confirmation code {expected}, got {got}")]
    UnexpectedCode {
        step: &'static str,
        expected: u8,
        got: u8,
    },
    #[error("{step}: wrote {written} of {expected} bytes")]
    ShortWrite {
        step: &'static str,
        written: usize,
        expected: usize,
    },
    #[error("short spectrum transfer ({received} of {expected} bytes)")]
    ShortSpectrum { received: usize, expected: usize },
    #[error("no complete status frame after {0} attempts")]
    NoStatusFrame(usize),
}

/// A status record read back from the device that does not look plausible.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SanityError {
    #[error("incomplete status frame ({0} bytes)")]
    IncompleteFrame(usize),
    #[error("channel count field is {0}, expected 1023")]
    ChannelCount(u16),
    #[error("high voltage target {0} V is outside the allowed range")]
    HighVoltage(f32),
}

/// A caller supplied setting that was rejected before touching the device.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    #[error("high voltage target {0} V is outside [50, 1200] V")]
    HighVoltage(f32),
    #[error("pulse width {0} us is outside [0.75, 2.0] us")]
    PulseWidth(f32),
    #[error("fine gain {0} is outside [0.4, 1.2)")]
    FineGain(f32),
    #[error("time preset {0} s must be a non-negative number of seconds")]
    Preset(f64),
    #[error("invalid channel range [{low}, {high})")]
    Region { low: usize, high: usize },
    #[error("invalid stabilization window (center {center}, width {width})")]
    StabilizationWindow { center: u16, width: u16 },
    #[error("stabilization window [{lower} {center} {upper}] is out of order or range")]
    WindowBounds { lower: u16, center: u16, upper: u16 },
    #[error("list-mode read of {0} pulses")]
    PulseCount(usize),
}

/// Problems saving or loading the text form of a status record.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PersistenceError {
    #[error("refusing to save a corrupt status record: {0}")]
    Sanity(#[from] SanityError),
    #[error("line {line} is {len} bytes long, the limit is 64")]
    LineTooLong { line: usize, len: usize },
    #[error("status text ends before line {0}")]
    MissingLine(usize),
    #[error("line {line}: cannot parse `{text}`")]
    Field { line: usize, text: String },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("cannot read firmware image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware image is {len} bytes, at least {needed} are required")]
    TooShort { len: usize, needed: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty time")]
    Empty,
    #[error("`{0}` is not a non-negative number")]
    Number(String),
    #[error("unknown time unit `{0}`, expected one of ms, s, m, h, d, y")]
    Unit(String),
}

/// Everything a driver operation can fail with.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("stale status: {0}")]
    Sanity(#[from] SanityError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
    #[error("handshake failed while {phase}: {source}")]
    Handshake {
        phase: &'static str,
        #[source]
        source: Box<DriverError>,
    },
    #[error("no matching digiBASE found (serial {0:?})")]
    NotFound(Option<u32>),
    #[error("serial number descriptor `{0}` is not numeric")]
    BadSerial(String),
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
