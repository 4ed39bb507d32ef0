//! An in-process digiBASE.
//!
//! Answers the handshake, status, spectrum and list-mode traffic the way the
//! hardware does, fills its histogram with random counts around a photopeak
//! while running, and keeps a transcript of every transfer.

use std::collections::VecDeque;
use std::time::Duration;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::byte_order::{encode_words, ByteOrder};
use crate::error::TransportError;
use crate::list_mode::{AMPLITUDE_SHIFT, ROLLOVER};
use crate::status::{
    Control, Counters, StatusRecord, CHANNELS, STATUS_FRAME_LEN, STATUS_LEN,
};
use crate::templates::{
    InitProfile, CHECK, CHECK_OK, CLEAR_SPECTRUM, FIRMWARE_SEGMENT, SPECTRUM_REQUEST, START,
    START2, START3, STATUS_REQUEST,
};
use crate::transport::{Pipe, Transport};

/// Events added per spectrum request while running.
const EVENTS_PER_READ: usize = 400;
/// Ticks of live and real time that pass per spectrum request.
const TICKS_PER_READ: u32 = 5;
/// Pulses produced per list-mode read.
const PULSES_PER_READ: usize = 24;
/// Microseconds between list-mode timestamp words.
const LIST_PERIOD_US: u32 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Freshly powered, waiting for firmware.
    Uninitialized,
    /// Start-2 received, segments are being uploaded.
    Loading,
    Awake,
}

/// One USB transfer as seen by the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Write(Pipe, Vec<u8>),
    Read(Pipe, usize),
}

pub struct SimulatedDigibase {
    state: PowerState,
    status: StatusRecord,
    counts: Box<[i32; CHANNELS]>,
    init_out: VecDeque<Vec<u8>>,
    data_out: VecDeque<Vec<u8>>,
    firmware_received: usize,
    incomplete_frames: usize,
    photopeak: u16,
    list_clock: u32,
    rng: StdRng,
    transcript: Vec<Transfer>,
}

impl SimulatedDigibase {
    /// A device that needs a firmware upload.
    pub fn uninitialized(seed: u64) -> Self {
        Self {
            state: PowerState::Uninitialized,
            status: StatusRecord::default(),
            counts: Box::new([0; CHANNELS]),
            init_out: VecDeque::new(),
            data_out: VecDeque::new(),
            firmware_received: 0,
            incomplete_frames: 0,
            photopeak: 662,
            list_clock: 0,
            rng: StdRng::seed_from_u64(seed),
            transcript: Vec::new(),
        }
    }

    /// A device left running firmware by an earlier session.
    pub fn awake(seed: u64) -> Self {
        let [_, configured] = InitProfile::default().finale();
        Self {
            state: PowerState::Awake,
            status: configured,
            ..Self::uninitialized(seed)
        }
    }

    /// The next `n` status requests are answered with a truncated frame.
    pub fn with_incomplete_status_frames(mut self, n: usize) -> Self {
        self.incomplete_frames = n;
        self
    }

    pub fn with_photopeak(mut self, channel: u16) -> Self {
        self.photopeak = channel.min(CHANNELS as u16 - 1);
        self
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// The record the device currently holds.
    pub fn status(&self) -> &StatusRecord {
        &self.status
    }

    pub fn firmware_received(&self) -> usize {
        self.firmware_received
    }

    pub fn transcript(&self) -> &[Transfer] {
        &self.transcript
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(Pipe, &[u8])> {
        self.transcript
            .iter()
            .filter_map(|t| match t {
                Transfer::Write(pipe, bytes) => Some((*pipe, bytes.as_slice())),
                Transfer::Read(..) => None,
            })
            .collect()
    }

    fn on_init(&mut self, bytes: &[u8]) {
        let op = bytes.first().copied().unwrap_or(0);
        let answer = match (op, self.state) {
            (START, PowerState::Uninitialized) => vec![4, 0x80],
            (START2, _) => {
                self.state = PowerState::Loading;
                self.firmware_received = 0;
                vec![0, 0]
            }
            (FIRMWARE_SEGMENT, PowerState::Loading) => {
                self.firmware_received += bytes.len().saturating_sub(4);
                vec![0, 0]
            }
            (START, _) => vec![0, 0],
            (START3, PowerState::Loading) => {
                self.state = PowerState::Awake;
                vec![0, 0]
            }
            (CHECK, PowerState::Awake) => vec![0, 0, 0, 0, 0, CHECK_OK],
            _ => vec![1, 0],
        };
        self.init_out.push_back(answer);
    }

    fn on_data(&mut self, bytes: &[u8]) {
        match bytes {
            [STATUS_REQUEST] => {
                let frame = if self.incomplete_frames > 0 {
                    self.incomplete_frames -= 1;
                    vec![0; STATUS_LEN / 4]
                } else {
                    self.status.encode(ByteOrder::DEVICE).to_vec()
                };
                self.data_out.push_back(frame);
            }
            [SPECTRUM_REQUEST] => {
                let answer = if self.status.is_pha_mode() {
                    self.histogram()
                } else {
                    self.list_words()
                };
                self.data_out.push_back(answer);
            }
            [0, record @ ..] if bytes.len() == STATUS_FRAME_LEN => {
                if let Ok(record) = StatusRecord::decode(record, ByteOrder::DEVICE) {
                    self.apply(record);
                }
            }
            [CLEAR_SPECTRUM, ..] if bytes.len() == CHANNELS * 4 + 1 => {
                self.counts.fill(0);
            }
            // other opcodes are taken silently
            _ => {}
        }
    }

    fn apply(&mut self, record: StatusRecord) {
        let (live, real) = (self.status.live_time, self.status.real_time);
        self.status = record;
        if record.counters.contains(Counters::CLEAR) {
            self.status.live_time = 0;
            self.status.real_time = 0;
        } else {
            self.status.live_time = live;
            self.status.real_time = real;
        }
    }

    fn tick(&mut self) {
        let s = &mut self.status;
        s.live_time = s.live_time.saturating_add(TICKS_PER_READ);
        s.real_time = s.real_time.saturating_add(TICKS_PER_READ);
        let live_done = s.control.contains(Control::LIVE_PRESET) && s.live_time >= s.live_preset;
        let real_done = s.control.contains(Control::REAL_PRESET) && s.real_time >= s.real_preset;
        if live_done || real_done {
            debug!("Simulated preset reached");
            s.control.remove(Control::RUNNING);
        }
    }

    fn random_channel(&mut self) -> usize {
        if self.rng.random_bool(0.6) {
            let spread: i32 = (0..4).map(|_| self.rng.random_range(-12..=12)).sum();
            (self.photopeak as i32 + spread).clamp(0, CHANNELS as i32 - 1) as usize
        } else {
            self.rng.random_range(0..CHANNELS)
        }
    }

    fn histogram(&mut self) -> Vec<u8> {
        if self.status.is_running() {
            for _ in 0..EVENTS_PER_READ {
                let ch = self.random_channel();
                self.counts[ch] += 1;
            }
            self.tick();
        }
        let words: Vec<u32> = self.counts.iter().map(|&c| c as u32).collect();
        encode_words(&words, ByteOrder::DEVICE)
    }

    fn list_words(&mut self) -> Vec<u8> {
        if !self.status.is_running() {
            return Vec::new();
        }
        let mut words = vec![0x8000_0000 | (self.list_clock & 0x7fff_ffff)];
        let mut offset = 0;
        for _ in 0..PULSES_PER_READ {
            offset += self.rng.random_range(1..(LIST_PERIOD_US / PULSES_PER_READ as u32));
            let amplitude = self.random_channel() as u32;
            let field = if self.rng.random_bool(0.1) {
                offset + ROLLOVER
            } else {
                offset
            };
            words.push((amplitude << AMPLITUDE_SHIFT) | field);
        }
        words.push(0);
        self.list_clock = self.list_clock.wrapping_add(LIST_PERIOD_US);
        self.tick();
        encode_words(&words, ByteOrder::DEVICE)
    }
}

impl Transport for SimulatedDigibase {
    fn write(
        &mut self,
        pipe: Pipe,
        bytes: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.transcript.push(Transfer::Write(pipe, bytes.to_vec()));
        match pipe {
            Pipe::Init => self.on_init(bytes),
            Pipe::Data => self.on_data(bytes),
        }
        Ok(bytes.len())
    }

    fn read_into(
        &mut self,
        pipe: Pipe,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        let queue = match pipe {
            Pipe::Init => &mut self.init_out,
            Pipe::Data => &mut self.data_out,
        };
        let answer = queue.pop_front().ok_or(TransportError::Timeout)?;
        if answer.len() > buf.len() {
            return Err(TransportError::Overflow {
                received: answer.len(),
                capacity: buf.len(),
            });
        }
        buf[..answer.len()].copy_from_slice(&answer);
        self.transcript.push(Transfer::Read(pipe, answer.len()));
        Ok(answer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::error::{DriverError, ProtocolError};
    use crate::handshake::tests::firmware;
    use crate::list_mode::DEFAULT_PULSES;

    fn open(sim: SimulatedDigibase) -> crate::error::Result<Detector<SimulatedDigibase>> {
        Detector::initialize(sim, 1234, &InitProfile::default(), &firmware(), ByteOrder::host())
    }

    fn shape(writes: &[(Pipe, &[u8])]) -> Vec<(Pipe, u8, usize)> {
        writes
            .iter()
            .map(|(p, b)| (*p, b[0], b.len()))
            .collect()
    }

    #[test]
    fn awake_device_handshake() {
        let det = open(SimulatedDigibase::awake(1)).unwrap();
        let sim = det.transport();
        assert_eq!(
            vec![
                (Pipe::Init, START, 4),
                (Pipe::Data, STATUS_REQUEST, 1),
                (Pipe::Data, STATUS_REQUEST, 1),
                (Pipe::Data, STATUS_REQUEST, 1),
                (Pipe::Init, CHECK, 4),
                (Pipe::Data, 0, 81),
                (Pipe::Data, 0, 81),
                (Pipe::Data, STATUS_REQUEST, 1),
            ],
            shape(&sim.writes())
        );
        let toggles: Vec<_> = sim.writes()[5..7]
            .iter()
            .map(|(_, b)| b[77])
            .collect();
        assert_eq!(vec![0x00, 0x04], toggles);
        assert_eq!(sim.status(), det.status());
    }

    #[test]
    fn awake_device_with_stale_frames() {
        let det = open(SimulatedDigibase::awake(2).with_incomplete_status_frames(2)).unwrap();
        assert!(det.status().counters.contains(Counters::ENABLE));
    }

    #[test]
    fn awake_device_without_status_fails() {
        let err = open(SimulatedDigibase::awake(3).with_incomplete_status_frames(3))
            .err()
            .unwrap();
        let DriverError::Handshake { source, .. } = err else {
            panic!("expected handshake failure");
        };
        assert!(matches!(
            *source,
            DriverError::Protocol(ProtocolError::NoStatusFrame(3))
        ));
    }

    #[test]
    fn uninitialized_device_handshake() {
        let det = open(SimulatedDigibase::uninitialized(4)).unwrap();
        let sim = det.transport();
        assert_eq!(PowerState::Awake, sim.state());
        assert_eq!(InitProfile::default().firmware_len(), sim.firmware_received());
        assert_eq!(
            vec![
                (Pipe::Init, START, 4),
                (Pipe::Init, START2, 4),
                (Pipe::Init, FIRMWARE_SEGMENT, 4 + 61_424),
                (Pipe::Init, FIRMWARE_SEGMENT, 4 + 14_039),
                (Pipe::Init, START, 4),
                (Pipe::Init, START3, 4),
                (Pipe::Data, 0, 81),
                (Pipe::Data, 0, 81),
                (Pipe::Data, 0, 81),
                (Pipe::Data, START2, 1),
                (Pipe::Data, 0, 81),
                (Pipe::Data, 0, 81),
                (Pipe::Data, 0, 81),
                (Pipe::Data, CLEAR_SPECTRUM, 4097),
                (Pipe::Init, CHECK, 4),
                (Pipe::Data, 0, 81),
                (Pipe::Data, 0, 81),
                (Pipe::Data, STATUS_REQUEST, 1),
            ],
            shape(&sim.writes())
        );
        assert_eq!(InitProfile::default().finale()[1], *det.status());
    }

    #[test]
    fn pha_acquisition() {
        let mut det = open(SimulatedDigibase::awake(5).with_photopeak(300)).unwrap();
        det.clear_all().unwrap();
        det.start().unwrap();
        det.acquire_spectrum().unwrap();
        assert!(det.differential().iter().all(|&d| d == 0));
        let first = det.total_counts();
        assert_eq!(EVENTS_PER_READ as i64, first);
        det.acquire_spectrum().unwrap();
        assert_eq!(2 * first, det.total_counts());
        assert_eq!(first, det.differential().iter().map(|&d| d as i64).sum::<i64>());
        assert!(det.roi_sum(250, 350).unwrap() > det.roi_sum(0, 100).unwrap());

        det.stop().unwrap();
        det.refresh_status().unwrap();
        assert!(!det.status().is_running());
        assert_eq!(2 * TICKS_PER_READ, det.status().live_time);
    }

    #[test]
    fn real_time_preset_stops_device() {
        let mut det = open(SimulatedDigibase::awake(6)).unwrap();
        det.clear_counters().unwrap();
        det.set_real_preset(0.1).unwrap();
        det.start().unwrap();
        det.acquire_spectrum().unwrap();
        det.refresh_status().unwrap();
        assert!(!det.status().is_running());
    }

    #[test]
    fn list_mode_acquisition() {
        let mut det = open(SimulatedDigibase::awake(7)).unwrap();
        det.set_list_mode().unwrap();
        assert!(!det.transport().status().is_pha_mode());
        det.start().unwrap();
        let mut pulses = Vec::new();
        for _ in 0..3 {
            let n = det.read_list_mode(DEFAULT_PULSES, Some(&mut pulses)).unwrap();
            assert_eq!(PULSES_PER_READ, n);
        }
        assert_eq!(3 * PULSES_PER_READ, pulses.len());
        assert!(pulses.iter().all(|p| p.time.is_some()));
        assert!(pulses.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(PULSES_PER_READ, det.read_list_mode(DEFAULT_PULSES, None).unwrap());

        det.stop().unwrap();
        det.set_pha_mode().unwrap();
        assert!(det.transport().status().is_pha_mode());
    }

    #[test]
    fn status_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut det = open(SimulatedDigibase::awake(8)).unwrap();
        det.set_hv(950.0).unwrap();
        det.set_fine_gain(0.9).unwrap();
        let path = det.save_status(dir.path()).unwrap();
        assert!(path.ends_with("1234/status.txt"));

        det.set_hv(700.0).unwrap();
        det.load_status(dir.path()).unwrap();
        assert_eq!(950.0, det.status().hv_volts());
        assert_eq!(det.status(), det.transport().status());
    }
}
