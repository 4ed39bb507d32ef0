//! The 80-byte status record shared with the digiBASE.
//!
//! The record is the device's whole configuration plus a few telemetry fields.
//! Fields keep their raw device codes; scaled views (volts, microseconds,
//! seconds, gain ratio) go through the functions at the bottom of this module.

use bitflags::bitflags;

use crate::byte_order::{to_device, to_host, ByteOrder, SwapBytes};
use crate::error::{SanityError, ValidationError};

/// Size of the record on the wire.
pub const STATUS_LEN: usize = 80;
/// Size of a status write: a zero framing byte followed by the record.
pub const STATUS_FRAME_LEN: usize = STATUS_LEN + 1;

/// Number of spectrum channels.
pub const CHANNELS: usize = 1024;
/// Value the device keeps in the channel-count field (channels - 1).
pub const CHANNEL_FIELD: u16 = (CHANNELS - 1) as u16;

pub const HV_FACTOR: f32 = 1.25;
pub const MIN_HV: f32 = 50.0;
pub const MAX_HV: f32 = 1200.0;

pub const MIN_PULSE_WIDTH: f32 = 0.75;
pub const MAX_PULSE_WIDTH: f32 = 2.0;
const PULSE_WIDTH_STEP: f32 = 0.0625;
const PULSE_WIDTH_BASE_CODE: u8 = 12;

pub const MIN_FINE_GAIN: f64 = 0.4;
pub const MAX_FINE_GAIN: f64 = 1.2;
/// 2^22 counts per unit of gain.
pub const GAIN_FACTOR: f64 = 4_194_304.0;
/// Bit the device expects on a fine gain it should apply.
pub const GAIN_SET_FLAG: u32 = 0x80_0000;
const GAIN_MASK: u32 = GAIN_SET_FLAG - 1;

/// Seconds per live/real time tick.
pub const TICK_SECONDS: f64 = 0.02;

bitflags! {
    /// The control byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Control: u8 {
        const PHA_MODE     = 0x01;
        const RUNNING      = 0x02;
        const LIVE_PRESET  = 0x04;
        const REAL_PRESET  = 0x08;
        const GAIN_STAB    = 0x10;
        const ZERO_STAB    = 0x20;
        const HIGH_VOLTAGE = 0x40;
        /// Held only for the first write of a switch to list mode.
        const LIST_ARM     = 0x80;
    }
}

bitflags! {
    /// The counter control byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Counters: u8 {
        /// Live and real time are zeroed while this is set.
        const CLEAR  = 0x01;
        /// Set by the last write of every handshake.
        const ENABLE = 0x04;
    }
}

/// A stabilization window in channels, stored upper first on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub upper: u16,
    pub center: u16,
    pub lower: u16,
}

impl Window {
    pub const fn new(lower: u16, center: u16, upper: u16) -> Self {
        Self {
            upper,
            center,
            lower,
        }
    }

    /// Window of `width` channels around `center`.
    pub fn centered(center: u16, width: u16) -> Result<Self, ValidationError> {
        let half = width / 2;
        let invalid = ValidationError::StabilizationWindow { center, width };
        if center == 0 || center > CHANNEL_FIELD || width == 0 || width > CHANNEL_FIELD {
            return Err(invalid);
        }
        if half > center {
            return Err(invalid);
        }
        Self::checked(center - half, center, center + half).map_err(|_| invalid)
    }

    /// Window from explicit channels, ordered and inside the spectrum.
    pub fn checked(lower: u16, center: u16, upper: u16) -> Result<Self, ValidationError> {
        if center == 0 || lower > center || center > upper || upper > CHANNEL_FIELD {
            return Err(ValidationError::WindowBounds {
                lower,
                center,
                upper,
            });
        }
        Ok(Self::new(lower, center, upper))
    }
}

impl SwapBytes for Window {
    fn swap_bytes(self) -> Self {
        Self {
            upper: self.upper.swap_bytes(),
            center: self.center.swap_bytes(),
            lower: self.lower.swap_bytes(),
        }
    }
}

/// Host-order copy of the device status. Unknown bytes are carried verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRecord {
    pub control: Control,
    pub ready: u8,
    pub pulse_width: u8,
    /// Actual high voltage, low byte then high byte.
    pub actual_hv: [u8; 2],
    pub isc: u8,
    pub aio: u8,
    pub spare_07: u8,
    pub timer: u32,
    pub actual_fine_gain: u32,
    pub fine_gain: u32,
    pub lld: u16,
    pub spare_22: u16,
    pub live_preset: u32,
    pub live_time: u32,
    pub real_preset: u32,
    pub real_time: u32,
    pub channels: u16,
    pub hv_target: u16,
    pub spare_44: [u32; 3],
    pub gain_stab: Window,
    pub spare_62: u16,
    pub spare_64: u16,
    pub zero_stab: Window,
    pub memory_size: u8,
    pub spare_73: [u8; 3],
    pub counters: Counters,
    pub spare_77: u8,
    pub spare_78: u16,
}

impl SwapBytes for StatusRecord {
    fn swap_bytes(self) -> Self {
        Self {
            timer: self.timer.swap_bytes(),
            actual_fine_gain: self.actual_fine_gain.swap_bytes(),
            fine_gain: self.fine_gain.swap_bytes(),
            lld: self.lld.swap_bytes(),
            spare_22: self.spare_22.swap_bytes(),
            live_preset: self.live_preset.swap_bytes(),
            live_time: self.live_time.swap_bytes(),
            real_preset: self.real_preset.swap_bytes(),
            real_time: self.real_time.swap_bytes(),
            channels: self.channels.swap_bytes(),
            hv_target: self.hv_target.swap_bytes(),
            spare_44: self.spare_44.map(u32::swap_bytes),
            gain_stab: SwapBytes::swap_bytes(self.gain_stab),
            spare_62: self.spare_62.swap_bytes(),
            spare_64: self.spare_64.swap_bytes(),
            zero_stab: SwapBytes::swap_bytes(self.zero_stab),
            spare_78: self.spare_78.swap_bytes(),
            ..self
        }
    }
}

struct FieldWriter<'a> {
    buf: &'a mut [u8; STATUS_LEN],
    pos: usize,
    order: ByteOrder,
}

impl FieldWriter<'_> {
    fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&self.order.store_u16(v));
        self.pos += 2;
    }

    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&self.order.store_u32(v));
        self.pos += 4;
    }
}

struct FieldReader<'a> {
    buf: &'a [u8; STATUS_LEN],
    pos: usize,
    order: ByteOrder,
}

impl FieldReader<'_> {
    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = self.order.load_u16([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let b = &self.buf[self.pos..self.pos + 4];
        let v = self.order.load_u32([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        v
    }
}

impl StatusRecord {
    /// Lays the record out as the device expects it, as seen from a `host`
    /// ordered machine.
    pub fn encode(&self, host: ByteOrder) -> [u8; STATUS_LEN] {
        let r = to_device(*self, host);
        let mut buf = [0u8; STATUS_LEN];
        let mut w = FieldWriter {
            buf: &mut buf,
            pos: 0,
            order: host,
        };
        w.u8(r.control.bits());
        w.u8(r.ready);
        w.u8(r.pulse_width);
        w.u8(r.actual_hv[0]);
        w.u8(r.actual_hv[1]);
        w.u8(r.isc);
        w.u8(r.aio);
        w.u8(r.spare_07);
        w.u32(r.timer);
        w.u32(r.actual_fine_gain);
        w.u32(r.fine_gain);
        w.u16(r.lld);
        w.u16(r.spare_22);
        w.u32(r.live_preset);
        w.u32(r.live_time);
        w.u32(r.real_preset);
        w.u32(r.real_time);
        w.u16(r.channels);
        w.u16(r.hv_target);
        for v in r.spare_44 {
            w.u32(v);
        }
        w.u16(r.gain_stab.upper);
        w.u16(r.gain_stab.center);
        w.u16(r.gain_stab.lower);
        w.u16(r.spare_62);
        w.u16(r.spare_64);
        w.u16(r.zero_stab.upper);
        w.u16(r.zero_stab.center);
        w.u16(r.zero_stab.lower);
        w.u8(r.memory_size);
        for v in r.spare_73 {
            w.u8(v);
        }
        w.u8(r.counters.bits());
        w.u8(r.spare_77);
        w.u16(r.spare_78);
        debug_assert_eq!(STATUS_LEN, w.pos);
        buf
    }

    /// The 81-byte status write.
    pub fn encode_frame(&self, host: ByteOrder) -> [u8; STATUS_FRAME_LEN] {
        let mut frame = [0u8; STATUS_FRAME_LEN];
        frame[1..].copy_from_slice(&self.encode(host));
        frame
    }

    /// Reads a status response. Anything but exactly 80 bytes is an incomplete frame.
    pub fn decode(bytes: &[u8], host: ByteOrder) -> Result<Self, SanityError> {
        let buf: &[u8; STATUS_LEN] = bytes
            .try_into()
            .map_err(|_| SanityError::IncompleteFrame(bytes.len()))?;
        let mut r = FieldReader {
            buf,
            pos: 0,
            order: host,
        };
        let record = StatusRecord {
            control: Control::from_bits_retain(r.u8()),
            ready: r.u8(),
            pulse_width: r.u8(),
            actual_hv: [r.u8(), r.u8()],
            isc: r.u8(),
            aio: r.u8(),
            spare_07: r.u8(),
            timer: r.u32(),
            actual_fine_gain: r.u32(),
            fine_gain: r.u32(),
            lld: r.u16(),
            spare_22: r.u16(),
            live_preset: r.u32(),
            live_time: r.u32(),
            real_preset: r.u32(),
            real_time: r.u32(),
            channels: r.u16(),
            hv_target: r.u16(),
            spare_44: [r.u32(), r.u32(), r.u32()],
            gain_stab: Window {
                upper: r.u16(),
                center: r.u16(),
                lower: r.u16(),
            },
            spare_62: r.u16(),
            spare_64: r.u16(),
            zero_stab: Window {
                upper: r.u16(),
                center: r.u16(),
                lower: r.u16(),
            },
            memory_size: r.u8(),
            spare_73: [r.u8(), r.u8(), r.u8()],
            counters: Counters::from_bits_retain(r.u8()),
            spare_77: r.u8(),
            spare_78: r.u16(),
        };
        Ok(to_host(record, host))
    }

    /// Rejects records whose channel count or HV target cannot be right.
    pub fn check_sanity(&self) -> Result<(), SanityError> {
        if self.channels != CHANNEL_FIELD {
            return Err(SanityError::ChannelCount(self.channels));
        }
        let hv = self.hv_volts();
        if !(MIN_HV..=MAX_HV).contains(&hv) {
            return Err(SanityError::HighVoltage(hv));
        }
        Ok(())
    }

    /// Copy that is safe to restore on a device later: stopped, HV off,
    /// PHA mode, elapsed times zeroed.
    pub fn sanitized(&self) -> Self {
        let mut s = *self;
        s.control.remove(Control::RUNNING | Control::HIGH_VOLTAGE);
        s.control.insert(Control::PHA_MODE);
        s.live_time = 0;
        s.real_time = 0;
        s
    }

    pub fn is_running(&self) -> bool {
        self.control.contains(Control::RUNNING)
    }

    pub fn is_pha_mode(&self) -> bool {
        self.control.contains(Control::PHA_MODE)
    }

    pub fn is_hv_on(&self) -> bool {
        self.control.contains(Control::HIGH_VOLTAGE)
    }

    pub fn hv_volts(&self) -> f32 {
        decode_hv(self.hv_target)
    }

    pub fn pulse_width_us(&self) -> f32 {
        decode_pulse_width(self.pulse_width)
    }

    pub fn fine_gain_value(&self) -> f64 {
        decode_fine_gain(self.fine_gain)
    }

    pub fn actual_fine_gain_value(&self) -> f64 {
        decode_fine_gain(self.actual_fine_gain)
    }

    pub fn live_preset_s(&self) -> f64 {
        ticks_to_seconds(self.live_preset)
    }

    pub fn live_time_s(&self) -> f64 {
        ticks_to_seconds(self.live_time)
    }

    pub fn real_preset_s(&self) -> f64 {
        ticks_to_seconds(self.real_preset)
    }

    pub fn real_time_s(&self) -> f64 {
        ticks_to_seconds(self.real_time)
    }

    /// Countdown timer in 1/16 s units.
    pub fn timer_ticks(&self) -> u32 {
        ((self.timer & 0xff_0000) >> 8) + ((self.timer & 0xff00) >> 8)
    }

    pub fn timer_seconds(&self) -> u32 {
        self.timer_ticks() >> 4
    }

    pub fn set_hv(&mut self, volts: f32) -> Result<(), ValidationError> {
        if !(MIN_HV..=MAX_HV).contains(&volts) {
            return Err(ValidationError::HighVoltage(volts));
        }
        self.hv_target = encode_hv(volts);
        Ok(())
    }

    pub fn set_pulse_width(&mut self, us: f32) -> Result<(), ValidationError> {
        if !(MIN_PULSE_WIDTH..=MAX_PULSE_WIDTH).contains(&us) {
            return Err(ValidationError::PulseWidth(us));
        }
        self.pulse_width = encode_pulse_width(us);
        Ok(())
    }

    pub fn set_fine_gain(&mut self, gain: f64) -> Result<(), ValidationError> {
        if !(MIN_FINE_GAIN..MAX_FINE_GAIN).contains(&gain) {
            return Err(ValidationError::FineGain(gain as f32));
        }
        self.fine_gain = encode_fine_gain(gain);
        Ok(())
    }

    /// Sets the live time preset and enables it.
    pub fn set_live_preset(&mut self, seconds: f64) -> Result<(), ValidationError> {
        self.live_preset = checked_ticks(seconds)?;
        self.control.insert(Control::LIVE_PRESET);
        Ok(())
    }

    /// Sets the real time preset and enables it.
    pub fn set_real_preset(&mut self, seconds: f64) -> Result<(), ValidationError> {
        self.real_preset = checked_ticks(seconds)?;
        self.control.insert(Control::REAL_PRESET);
        Ok(())
    }

    pub fn clear_presets(&mut self) {
        self.live_preset = 0;
        self.real_preset = 0;
        self.control
            .remove(Control::LIVE_PRESET | Control::REAL_PRESET);
    }
}

fn checked_ticks(seconds: f64) -> Result<u32, ValidationError> {
    if !seconds.is_finite() || seconds < 0.0 || seconds / TICK_SECONDS > u32::MAX as f64 {
        return Err(ValidationError::Preset(seconds));
    }
    Ok(seconds_to_ticks(seconds))
}

pub fn encode_hv(volts: f32) -> u16 {
    (volts / HV_FACTOR).round() as u16
}

pub fn decode_hv(code: u16) -> f32 {
    code as f32 * HV_FACTOR
}

pub fn encode_pulse_width(us: f32) -> u8 {
    let steps = ((us - MIN_PULSE_WIDTH) / PULSE_WIDTH_STEP).round() as i32;
    (steps + PULSE_WIDTH_BASE_CODE as i32).clamp(0, u8::MAX as i32) as u8
}

pub fn decode_pulse_width(code: u8) -> f32 {
    MIN_PULSE_WIDTH + PULSE_WIDTH_STEP * (code as f32 - PULSE_WIDTH_BASE_CODE as f32)
}

/// 22-bit fixed point gain with the set flag in bit 23.
pub fn encode_fine_gain(gain: f64) -> u32 {
    GAIN_SET_FLAG | ((gain * GAIN_FACTOR).round() as u32 & GAIN_MASK)
}

pub fn decode_fine_gain(code: u32) -> f64 {
    (code & GAIN_MASK) as f64 / GAIN_FACTOR
}

pub fn seconds_to_ticks(seconds: f64) -> u32 {
    (seconds / TICK_SECONDS).round() as u32
}

pub fn ticks_to_seconds(ticks: u32) -> f64 {
    ticks as f64 * TICK_SECONDS
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_record() -> StatusRecord {
        StatusRecord {
            control: Control::PHA_MODE | Control::GAIN_STAB | Control::REAL_PRESET,
            ready: 0x08,
            pulse_width: 0x0c,
            actual_hv: [0x7f, 0x02],
            isc: 0x30,
            aio: 0x20,
            spare_07: 0x03,
            timer: 0x0012_3400,
            actual_fine_gain: 0x20_0010,
            fine_gain: encode_fine_gain(0.75),
            lld: 0x2800,
            spare_22: 0xbeef,
            live_preset: 500,
            live_time: 1234,
            real_preset: 1500,
            real_time: 4321,
            channels: CHANNEL_FIELD,
            hv_target: 640,
            spare_44: [0x0102_0304, 0, 0xffff_0000],
            gain_stab: Window::new(250, 300, 350),
            spare_62: 7,
            spare_64: 0x8000,
            zero_stab: Window::new(108, 133, 158),
            memory_size: 0x40,
            spare_73: [1, 2, 3],
            counters: Counters::ENABLE,
            spare_77: 0x0c,
            spare_78: 0x0024,
        }
    }

    #[test]
    fn layout_offsets() {
        let bytes = sample_record().encode(ByteOrder::Little);
        assert_eq!(0x01 | 0x10 | 0x08, bytes[0]);
        assert_eq!(0x0c, bytes[2]);
        assert_eq!([0x00, 0x34, 0x12, 0x00], bytes[8..12]);
        assert_eq!([0x00, 0x28], bytes[20..22]);
        assert_eq!([0xf4, 0x01, 0x00, 0x00], bytes[24..28]);
        assert_eq!([0xff, 0x03], bytes[40..42]);
        assert_eq!([0x80, 0x02], bytes[42..44]);
        assert_eq!(350, u16::from_le_bytes([bytes[56], bytes[57]]));
        assert_eq!(250, u16::from_le_bytes([bytes[60], bytes[61]]));
        assert_eq!(158, u16::from_le_bytes([bytes[66], bytes[67]]));
        assert_eq!(108, u16::from_le_bytes([bytes[70], bytes[71]]));
        assert_eq!(0x40, bytes[72]);
        assert_eq!(0x04, bytes[76]);
        assert_eq!([0x24, 0x00], bytes[78..80]);
    }

    #[test]
    fn frame_has_leading_zero() {
        let rec = sample_record();
        let frame = rec.encode_frame(ByteOrder::Little);
        assert_eq!(0, frame[0]);
        assert_eq!(rec.encode(ByteOrder::Little), frame[1..]);
    }

    #[rstest::rstest]
    #[test]
    #[case(ByteOrder::Little)]
    #[case(ByteOrder::Big)]
    fn round_trip_on_either_host(#[case] host: ByteOrder) {
        let rec = sample_record();
        let wire = rec.encode(host);
        assert_eq!(rec.encode(ByteOrder::Little), wire);
        assert_eq!(Ok(rec), StatusRecord::decode(&wire, host));
    }

    #[test]
    fn short_frame_is_incomplete() {
        assert_eq!(
            Err(SanityError::IncompleteFrame(16)),
            StatusRecord::decode(&[0; 16], ByteOrder::Little)
        );
    }

    #[rstest::rstest]
    #[test]
    #[case::ok(CHANNEL_FIELD, 640, Ok(()))]
    #[case::channels(512, 640, Err(SanityError::ChannelCount(512)))]
    #[case::hv_low(CHANNEL_FIELD, 10, Err(SanityError::HighVoltage(12.5)))]
    #[case::hv_high(CHANNEL_FIELD, 1000, Err(SanityError::HighVoltage(1250.0)))]
    fn sanity(#[case] channels: u16, #[case] hvt: u16, #[case] expect: Result<(), SanityError>) {
        let rec = StatusRecord {
            channels,
            hv_target: hvt,
            ..sample_record()
        };
        assert_eq!(expect, rec.check_sanity());
    }

    #[test]
    fn sanitized_forces_safe_state() {
        let mut rec = sample_record();
        rec.control = Control::RUNNING | Control::HIGH_VOLTAGE | Control::LIVE_PRESET;
        let s = rec.sanitized();
        assert_eq!(
            Control::PHA_MODE | Control::LIVE_PRESET,
            s.control
        );
        assert_eq!(0, s.live_time);
        assert_eq!(0, s.real_time);
        assert_eq!(rec.live_preset, s.live_preset);
        assert_eq!(rec.gain_stab, s.gain_stab);
    }

    #[test]
    fn hv_scaling() {
        assert_eq!(640, encode_hv(800.0));
        assert_eq!(0x0280, encode_hv(800.0));
        assert_eq!(800.0, decode_hv(encode_hv(800.0)));
    }

    #[test]
    fn pulse_width_round_trip() {
        for code in 12..=32u8 {
            let us = decode_pulse_width(code);
            assert_eq!(code, encode_pulse_width(us));
        }
        let mut us = MIN_PULSE_WIDTH;
        while us <= MAX_PULSE_WIDTH {
            assert!((decode_pulse_width(encode_pulse_width(us)) - us).abs() <= PULSE_WIDTH_STEP);
            us += 0.01;
        }
    }

    #[test]
    fn fine_gain_round_trip() {
        let step = 1.0 / GAIN_FACTOR;
        let mut g = 0.401;
        while g < MAX_FINE_GAIN {
            assert!((decode_fine_gain(encode_fine_gain(g)) - g).abs() <= step);
            g += 0.0137;
        }
        assert_eq!(10_485_760, encode_fine_gain(0.5));
        assert_eq!(0.5, decode_fine_gain(0x20_0000));
    }

    #[test]
    fn ticks() {
        assert_eq!(15, seconds_to_ticks(0.3));
        assert_eq!(500, seconds_to_ticks(10.0));
        assert!((ticks_to_seconds(500) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn timer_accessor() {
        let rec = StatusRecord {
            timer: 0x00ab_cd00,
            ..Default::default()
        };
        assert_eq!(0xab00 + 0xcd, rec.timer_ticks());
        assert_eq!((0xab00 + 0xcd) >> 4, rec.timer_seconds());
    }

    #[rstest::rstest]
    #[test]
    #[case(49.0, false)]
    #[case(50.0, true)]
    #[case(800.0, true)]
    #[case(1200.0, true)]
    #[case(1201.0, false)]
    fn set_hv_range(#[case] volts: f32, #[case] ok: bool) {
        let mut rec = sample_record();
        let before = rec;
        assert_eq!(ok, rec.set_hv(volts).is_ok());
        if !ok {
            assert_eq!(before, rec);
        }
    }

    #[rstest::rstest]
    #[test]
    #[case(0.7, false)]
    #[case(0.75, true)]
    #[case(2.0, true)]
    #[case(2.1, false)]
    fn set_pulse_width_range(#[case] us: f32, #[case] ok: bool) {
        let mut rec = sample_record();
        assert_eq!(ok, rec.set_pulse_width(us).is_ok());
    }

    #[rstest::rstest]
    #[test]
    #[case(0.39, false)]
    #[case(0.4, true)]
    #[case(1.1999, true)]
    #[case(1.2, false)]
    fn set_fine_gain_range(#[case] gain: f64, #[case] ok: bool) {
        let mut rec = sample_record();
        assert_eq!(ok, rec.set_fine_gain(gain).is_ok());
    }

    #[test]
    fn presets_toggle_enable_bits() {
        let mut rec = StatusRecord::default();
        rec.set_live_preset(10.0).unwrap();
        rec.set_real_preset(20.0).unwrap();
        assert!(rec
            .control
            .contains(Control::LIVE_PRESET | Control::REAL_PRESET));
        assert_eq!(500, rec.live_preset);
        assert_eq!(1000, rec.real_preset);
        assert_eq!(
            Err(ValidationError::Preset(-1.0)),
            rec.set_live_preset(-1.0)
        );

        rec.clear_presets();
        assert_eq!(0, rec.live_preset);
        assert_eq!(0, rec.real_preset);
        assert!(!rec.control.intersects(Control::LIVE_PRESET | Control::REAL_PRESET));
    }

    #[rstest::rstest]
    #[test]
    #[case(Ok(Window::new(250, 300, 350)), 300, 100)]
    #[case(Err(ValidationError::StabilizationWindow { center: 0, width: 10 }), 0, 10)]
    #[case(Err(ValidationError::StabilizationWindow { center: 100, width: 0 }), 100, 0)]
    #[case(Err(ValidationError::StabilizationWindow { center: 10, width: 40 }), 10, 40)]
    #[case(Err(ValidationError::StabilizationWindow { center: 1020, width: 10 }), 1020, 10)]
    fn centered_window(
        #[case] expect: Result<Window, ValidationError>,
        #[case] center: u16,
        #[case] width: u16,
    ) {
        assert_eq!(expect, Window::centered(center, width));
    }

    #[rstest::rstest]
    #[case(20, 30, 40, true)]
    #[case(30, 30, 30, true)]
    #[case(40, 30, 50, false)]
    #[case(20, 50, 40, false)]
    #[case(0, 0, 10, false)]
    #[case(1000, 1010, 1024, false)]
    fn explicit_window(
        #[case] lower: u16,
        #[case] center: u16,
        #[case] upper: u16,
        #[case] ok: bool,
    ) {
        assert_eq!(ok, Window::checked(lower, center, upper).is_ok());
    }
}
