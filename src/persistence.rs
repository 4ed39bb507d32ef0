//! Human editable text form of a status record.
//!
//! Lines are identified by position, not by their label. Only the settings a
//! user would want to restore are read back: preset and stabilizer enables,
//! HV target, pulse width, fine gain, presets and stabilization windows.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::PersistenceError;
use crate::status::{seconds_to_ticks, Control, StatusRecord, Window};

pub const STATUS_FILE: &str = "status.txt";
/// Longest line accepted when loading.
pub const MAX_LINE: usize = 64;

const RTP_LINE: usize = 4;
const LTP_LINE: usize = 5;
const GAIN_STAB_LINE: usize = 6;
const ZERO_STAB_LINE: usize = 7;
const HV_LINE: usize = 10;
const PW_LINE: usize = 11;
const FINE_GAIN_LINE: usize = 12;
const LIVE_PRESET_LINE: usize = 13;
const REAL_PRESET_LINE: usize = 15;
const GAIN_WINDOW_LINE: usize = 17;
const ZERO_WINDOW_LINE: usize = 18;

/// Printable status of one device.
pub struct StatusReport<'a> {
    pub serial: u32,
    pub record: &'a StatusRecord,
}

fn yes_no(on: bool) -> &'static str {
    if on {
        "Yes"
    } else {
        "No"
    }
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.record;
        let c = s.control;
        writeln!(f, "======== MCB STATUS ({}) =======", self.serial)?;
        writeln!(f, "Running    : {}", yes_no(c.contains(Control::RUNNING)))?;
        writeln!(
            f,
            "Mode       : {}",
            if c.contains(Control::PHA_MODE) { "PHA" } else { "List" }
        )?;
        writeln!(f, "HV on      : {}", yes_no(c.contains(Control::HIGH_VOLTAGE)))?;
        writeln!(f, "RTP on     : {}", yes_no(c.contains(Control::REAL_PRESET)))?;
        writeln!(f, "LTP on     : {}", yes_no(c.contains(Control::LIVE_PRESET)))?;
        writeln!(f, "Gain stab. : {}", yes_no(c.contains(Control::GAIN_STAB)))?;
        writeln!(f, "Zero stab. : {}", yes_no(c.contains(Control::ZERO_STAB)))?;
        writeln!(f)?;
        writeln!(f, "MCB Chans. : {}", s.channels as usize + 1)?;
        writeln!(f, "HV Target  : {:.2} V", s.hv_volts())?;
        writeln!(f, "Pulse width: {:.2} us", s.pulse_width_us())?;
        writeln!(
            f,
            "Fine Gain  : {:.7} (set: {:.7})",
            s.actual_fine_gain_value(),
            s.fine_gain_value()
        )?;
        writeln!(f, "Live Time Preset  : {:.2} s", s.live_preset_s())?;
        writeln!(f, "Live Time         : {:.2} s", s.live_time_s())?;
        writeln!(f, "Real Time Preset  : {:.2} s", s.real_preset_s())?;
        writeln!(f, "Real Time         : {:.2} s", s.real_time_s())?;
        let (g, z) = (s.gain_stab, s.zero_stab);
        writeln!(f, "Gain Stab. chans  : [{} {} {}]", g.lower, g.center, g.upper)?;
        writeln!(f, "Zero Stab. chans  : [{} {} {}]", z.lower, z.center, z.upper)?;
        writeln!(f, "============================")
    }
}

/// Text of the sanitized record. Fails if the record looks corrupt.
pub fn render(serial: u32, record: &StatusRecord) -> Result<String, PersistenceError> {
    record.check_sanity()?;
    let sanitized = record.sanitized();
    Ok(StatusReport {
        serial,
        record: &sanitized,
    }
    .to_string())
}

/// Applies `text` to a sanitized copy of `base`. Nothing is returned unless
/// every line read parses.
pub fn parse(text: &str, base: &StatusRecord) -> Result<StatusRecord, PersistenceError> {
    let lines: Vec<&str> = text.lines().collect();
    for (n, line) in lines.iter().enumerate() {
        if line.len() > MAX_LINE {
            return Err(PersistenceError::LineTooLong {
                line: n + 1,
                len: line.len(),
            });
        }
    }
    let field = |n: usize| Field::at(&lines, n);

    let mut next = base.sanitized();
    next.control
        .set(Control::REAL_PRESET, field(RTP_LINE)?.flag()?);
    next.control
        .set(Control::LIVE_PRESET, field(LTP_LINE)?.flag()?);
    next.control
        .set(Control::GAIN_STAB, field(GAIN_STAB_LINE)?.flag()?);
    next.control
        .set(Control::ZERO_STAB, field(ZERO_STAB_LINE)?.flag()?);

    let hv = field(HV_LINE)?;
    next.set_hv(hv.number("V")? as f32)
        .map_err(|_| hv.error())?;
    let pw = field(PW_LINE)?;
    next.set_pulse_width(pw.number("us")? as f32)
        .map_err(|_| pw.error())?;
    let gain = field(FINE_GAIN_LINE)?;
    next.set_fine_gain(gain.set_gain()?)
        .map_err(|_| gain.error())?;
    next.live_preset = field(LIVE_PRESET_LINE)?.preset()?;
    next.real_preset = field(REAL_PRESET_LINE)?.preset()?;
    next.gain_stab = field(GAIN_WINDOW_LINE)?.window()?;
    next.zero_stab = field(ZERO_WINDOW_LINE)?.window()?;
    Ok(next)
}

struct Field<'a> {
    line: usize,
    text: &'a str,
}

impl<'a> Field<'a> {
    fn at(lines: &[&'a str], n: usize) -> Result<Self, PersistenceError> {
        let text = *lines
            .get(n)
            .ok_or(PersistenceError::MissingLine(n + 1))?;
        Ok(Self { line: n + 1, text })
    }

    fn error(&self) -> PersistenceError {
        PersistenceError::Field {
            line: self.line,
            text: self.text.to_string(),
        }
    }

    fn value(&self) -> Result<&str, PersistenceError> {
        self.text
            .split_once(':')
            .map(|(_, v)| v.trim())
            .ok_or_else(|| self.error())
    }

    fn flag(&self) -> Result<bool, PersistenceError> {
        match self.value()? {
            "Yes" => Ok(true),
            "No" => Ok(false),
            _ => Err(self.error()),
        }
    }

    fn number(&self, unit: &str) -> Result<f64, PersistenceError> {
        let v = self.value()?;
        v.strip_suffix(unit)
            .unwrap_or(v)
            .trim()
            .parse::<f64>()
            .map_err(|_| self.error())
    }

    fn preset(&self) -> Result<u32, PersistenceError> {
        let seconds = self.number("s")?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(self.error());
        }
        Ok(seconds_to_ticks(seconds))
    }

    /// `<actual> (set: <target>)`, only the target is used.
    fn set_gain(&self) -> Result<f64, PersistenceError> {
        let v = self.value()?;
        let (_, set) = v.split_once("(set:").ok_or_else(|| self.error())?;
        set.trim()
            .strip_suffix(')')
            .ok_or_else(|| self.error())?
            .trim()
            .parse::<f64>()
            .map_err(|_| self.error())
    }

    fn window(&self) -> Result<Window, PersistenceError> {
        let v = self.value()?;
        let inner = v
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .ok_or_else(|| self.error())?;
        let chans = inner
            .split_whitespace()
            .map(|c| c.parse::<u16>().map_err(|_| self.error()))
            .collect::<Result<Vec<_>, _>>()?;
        match chans.as_slice() {
            &[lower, center, upper] => {
                Window::checked(lower, center, upper).map_err(|_| self.error())
            }
            _ => Err(self.error()),
        }
    }
}

/// `<dir>/<serial>/status.txt`
pub fn status_path(dir: impl AsRef<Path>, serial: u32) -> PathBuf {
    dir.as_ref().join(serial.to_string()).join(STATUS_FILE)
}

/// Writes the text form, creating the per-device directory.
pub fn save(
    dir: impl AsRef<Path>,
    serial: u32,
    record: &StatusRecord,
) -> Result<PathBuf, PersistenceError> {
    let text = render(serial, record)?;
    let path = status_path(dir, serial);
    let io = |source| PersistenceError::Io {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(&path, text).map_err(io)?;
    info!("Saved status of {serial} to {}", path.display());
    Ok(path)
}

/// Reads a file written by [`save`] onto a copy of `base`.
pub fn load(
    dir: impl AsRef<Path>,
    serial: u32,
    base: &StatusRecord,
) -> Result<StatusRecord, PersistenceError> {
    let path = status_path(dir, serial);
    let text = fs::read_to_string(&path).map_err(|source| PersistenceError::Io {
        path: path.clone(),
        source,
    })?;
    debug!("Loading status from {}", path.display());
    parse(&text, base)
}
