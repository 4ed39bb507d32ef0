//! Timed PHA and list-mode measurement loops.
//!
//! Both loops check the cancellation flag between cycles and stop the
//! device on the way out, including when a cycle fails.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{tick, Receiver};
use log::{debug, info, warn};
use time::OffsetDateTime;

use crate::detector::Detector;
use crate::list_mode::{Pulse, DEFAULT_PULSES};
use crate::status::StatusRecord;
use crate::transport::Transport;
use crate::writer::{Cycle, PulseFields, SpectrumWriter};

pub const DEFAULT_LIST_INTERVAL: Duration = Duration::from_millis(50);
/// PHA cycles faster than this are refused by the command line tool.
pub const MIN_PHA_INTERVAL: Duration = Duration::from_millis(50);
pub const MAX_LIST_INTERVAL: Duration = Duration::from_secs(1);

/// Number of whole intervals that fit into `duration`.
pub fn cycles_for(duration: Duration, interval: Duration) -> usize {
    if interval.is_zero() {
        return 0;
    }
    (duration.as_nanos() / interval.as_nanos()) as usize
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaSettings {
    pub interval: Duration,
    pub cycles: usize,
    /// Emit the change since the previous read instead of the running total.
    pub differential: bool,
    /// Print the device status after every n-th cycle.
    pub status_every: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListSettings {
    pub interval: Duration,
    pub cycles: usize,
    pub max_pulses: usize,
    pub fields: PulseFields,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_LIST_INTERVAL,
            cycles: 0,
            max_pulses: DEFAULT_PULSES,
            fields: PulseFields {
                count: true,
                ..PulseFields::default()
            },
        }
    }
}

/// What one PHA cycle measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleStats {
    pub index: usize,
    pub cycles: usize,
    /// Counts added since the previous cycle.
    pub new_counts: i64,
    pub rate: f64,
    pub status: StatusRecord,
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

struct Pacer(Option<Receiver<std::time::Instant>>);

impl Pacer {
    fn new(interval: Duration) -> Self {
        Pacer((!interval.is_zero()).then(|| tick(interval)))
    }

    fn wait(&self) {
        if let Some(ticker) = &self.0 {
            let _ = ticker.recv();
        }
    }
}

/// Clears the device, starts it and reads `settings.cycles` spectra.
/// Returns the number of completed cycles.
pub fn run_pha<T, W>(
    det: &mut Detector<T>,
    settings: &PhaSettings,
    out: &mut SpectrumWriter<W>,
    cancel: &AtomicBool,
    mut observe: impl FnMut(&CycleStats),
) -> Result<usize>
where
    T: Transport,
    W: Write,
{
    det.clear_all().context("clearing digiBASE before PHA run")?;
    if !det.status().is_running() {
        det.start().context("starting digiBASE")?;
    }
    info!(
        "PHA run: {} cycles of {} ms",
        settings.cycles,
        settings.interval.as_millis()
    );
    let done = pha_cycles(det, settings, out, cancel, &mut observe);
    let flushed = out.finish();
    let stopped = det.stop().context("stopping digiBASE");
    let done = done?;
    stopped?;
    flushed?;
    Ok(done)
}

fn pha_cycles<T: Transport, W: Write>(
    det: &mut Detector<T>,
    settings: &PhaSettings,
    out: &mut SpectrumWriter<W>,
    cancel: &AtomicBool,
    observe: &mut impl FnMut(&CycleStats),
) -> Result<usize> {
    let pacer = Pacer::new(settings.interval);
    let secs = settings.interval.as_secs_f64();
    let mut last_total = 0;
    for index in 0..settings.cycles {
        if cancel.load(Ordering::SeqCst) {
            info!("PHA run cancelled after {index} cycles");
            return Ok(index);
        }
        let started = now();
        pacer.wait();
        det.acquire_spectrum()
            .with_context(|| format!("reading spectrum in cycle {}", index + 1))?;
        let finished = now();

        let total = det.total_counts();
        let new_counts = total - last_total;
        last_total = total;
        let rate = if secs > 0.0 { new_counts as f64 / secs } else { 0.0 };
        debug!("Cycle {}: {new_counts} new counts", index + 1);

        let counts = if settings.differential {
            det.differential()
        } else {
            det.cumulative()
        };
        out.write_cycle(&Cycle {
            index,
            started,
            finished,
            interval: settings.interval,
            counts,
            rate,
        })?;

        if settings
            .status_every
            .is_some_and(|n| n > 0 && (index + 1) % n == 0)
        {
            det.refresh_status()
                .context("reading status during PHA run")?;
            out.write_status(det.serial(), det.status())?;
        }
        observe(&CycleStats {
            index,
            cycles: settings.cycles,
            new_counts,
            rate,
            status: *det.status(),
        });
    }
    Ok(settings.cycles)
}

/// Switches to list mode, starts, and reads pulses every interval. The device
/// is stopped and returned to PHA mode afterwards. Returns the number of
/// pulses read.
pub fn run_list_mode<T, W>(
    det: &mut Detector<T>,
    settings: &ListSettings,
    out: &mut SpectrumWriter<W>,
    cancel: &AtomicBool,
) -> Result<usize>
where
    T: Transport,
    W: Write,
{
    det.set_list_mode().context("switching to list mode")?;
    let read = det
        .start()
        .context("starting digiBASE")
        .and_then(|_| list_cycles(det, settings, out, cancel));
    let stopped = det.stop().context("stopping digiBASE");
    if let Err(e) = det.set_pha_mode() {
        warn!("Could not return digiBASE {} to PHA mode: {e}", det.serial());
    }
    let read = read?;
    stopped?;
    Ok(read)
}

fn list_cycles<T: Transport, W: Write>(
    det: &mut Detector<T>,
    settings: &ListSettings,
    out: &mut SpectrumWriter<W>,
    cancel: &AtomicBool,
) -> Result<usize> {
    info!(
        "List mode run: {} reads every {} ms",
        settings.cycles,
        settings.interval.as_millis()
    );
    let pacer = Pacer::new(settings.interval);
    let keep = settings.fields.amplitude || settings.fields.time;
    let mut pulses: Vec<Pulse> = Vec::with_capacity(if keep { settings.max_pulses } else { 0 });
    let mut total = 0;
    for index in 0..settings.cycles {
        if cancel.load(Ordering::SeqCst) {
            info!("List mode run cancelled after {index} reads");
            break;
        }
        pacer.wait();
        pulses.clear();
        let n = det
            .read_list_mode(settings.max_pulses, keep.then_some(&mut pulses))
            .with_context(|| format!("reading list-mode data in cycle {}", index + 1))?;
        out.write_pulses(n, &pulses, settings.fields)?;
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order::ByteOrder;
    use crate::handshake::tests::firmware;
    use crate::simulator::SimulatedDigibase;
    use crate::status::CHANNELS;
    use crate::templates::InitProfile;
    use crate::writer::OutputFormat;
    use rstest::rstest;

    fn open(seed: u64) -> Detector<SimulatedDigibase> {
        Detector::initialize(
            SimulatedDigibase::awake(seed),
            1234,
            &InitProfile::default(),
            &firmware(),
            ByteOrder::host(),
        )
        .unwrap()
    }

    fn pha(cycles: usize) -> PhaSettings {
        PhaSettings {
            interval: Duration::ZERO,
            cycles,
            differential: false,
            status_every: None,
        }
    }

    #[rstest]
    #[case(Duration::from_secs(10), Duration::from_secs(1), 10)]
    #[case(Duration::from_millis(1500), Duration::from_secs(1), 1)]
    #[case(Duration::from_secs(1), Duration::from_millis(50), 20)]
    #[case(Duration::from_secs(1), Duration::ZERO, 0)]
    fn cycle_count(#[case] duration: Duration, #[case] interval: Duration, #[case] expect: usize) {
        assert_eq!(expect, cycles_for(duration, interval));
    }

    #[test]
    fn pha_run_writes_every_cycle() {
        let mut det = open(11);
        let mut out = SpectrumWriter::new(Vec::new(), OutputFormat::Text, true);
        let mut seen = Vec::new();
        let n = run_pha(&mut det, &pha(3), &mut out, &AtomicBool::new(false), |s| {
            seen.push(s.new_counts)
        })
        .unwrap();
        assert_eq!(3, n);
        assert_eq!(vec![400, 400, 400], seen);

        let text = String::from_utf8(out.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(3, lines.len());
        let last: i64 = lines[2]
            .split(' ')
            .map(|c| c.parse::<i64>().unwrap())
            .sum();
        assert_eq!(1200, last);
        assert_eq!(CHANNELS, lines[0].split(' ').count());
        assert!(!det.transport().status().is_running());
    }

    #[test]
    fn differential_pha_run_with_status() {
        let mut det = open(12);
        let settings = PhaSettings {
            differential: true,
            status_every: Some(2),
            ..pha(2)
        };
        let mut out = SpectrumWriter::new(Vec::new(), OutputFormat::Text, true);
        run_pha(&mut det, &settings, &mut out, &AtomicBool::new(false), |_| {}).unwrap();

        let text = String::from_utf8(out.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(2 + 20, lines.len());
        assert!(lines[0].split(' ').all(|c| c == "0"));
        let second: i64 = lines[1].split(' ').map(|c| c.parse::<i64>().unwrap()).sum();
        assert_eq!(400, second);
        assert_eq!("======== MCB STATUS (1234) =======", lines[2]);
    }

    #[test]
    fn cancelled_pha_run_still_stops() {
        let mut det = open(13);
        let mut out = SpectrumWriter::new(Vec::new(), OutputFormat::Rate, true);
        let n = run_pha(&mut det, &pha(5), &mut out, &AtomicBool::new(true), |_| {}).unwrap();
        assert_eq!(0, n);
        assert!(out.into_inner().is_empty());
        assert!(!det.transport().status().is_running());
    }

    #[test]
    fn list_mode_run_prints_counts() {
        let mut det = open(14);
        let settings = ListSettings {
            interval: Duration::ZERO,
            cycles: 2,
            ..ListSettings::default()
        };
        let mut out = SpectrumWriter::new(Vec::new(), OutputFormat::Text, true);
        let total = run_list_mode(&mut det, &settings, &mut out, &AtomicBool::new(false)).unwrap();
        assert_eq!(48, total);
        assert_eq!(b"24\n24\n".to_vec(), out.into_inner());

        let sim = det.transport().status();
        assert!(sim.is_pha_mode());
        assert!(!sim.is_running());
    }

    #[test]
    fn list_mode_run_prints_pulses() {
        let mut det = open(15);
        let settings = ListSettings {
            interval: Duration::ZERO,
            cycles: 1,
            max_pulses: DEFAULT_PULSES,
            fields: PulseFields {
                count: false,
                amplitude: true,
                time: true,
            },
        };
        let mut out = SpectrumWriter::new(Vec::new(), OutputFormat::Text, true);
        run_list_mode(&mut det, &settings, &mut out, &AtomicBool::new(false)).unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(24, text.lines().count());
        assert!(text.lines().all(|l| l.split('\t').count() == 2));
    }
}
