use std::fs::File;
use std::io::{stdout, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use digibase::acquisition::{
    cycles_for, run_list_mode, run_pha, ListSettings, PhaSettings, DEFAULT_LIST_INTERVAL,
    MAX_LIST_INTERVAL, MIN_PHA_INTERVAL,
};
use digibase::config::LogSettings;
use digibase::list_mode::DEFAULT_PULSES;
use digibase::persistence::StatusReport;
use digibase::tui::LiveView;
use digibase::writer::PulseFields;
use digibase::{
    parse_duration, ByteOrder, Conf, Detector, DeviceContext, FirmwareSource, InitProfile,
    OutputFormat, SimulatedDigibase, SpectrumWriter, Transport,
};
use log::{info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Serial number reported by the simulated device unless one is configured.
const SIMULATED_SERIAL: u32 = 9999;

#[derive(Parser, Debug)]
#[command(name = "dbaserh")]
#[command(author, version, about = "Control and read out ORTEC digiBASE-RH detectors", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "dbaserh.toml")]
    config: PathBuf,

    /// Open the digiBASE with this serial number instead of the first one
    #[arg(short, long)]
    serial: Option<u32>,

    /// Firmware image uploaded to uninitialized devices
    #[arg(long)]
    firmware: Option<PathBuf>,

    /// Talk to a simulated digiBASE
    #[arg(long)]
    simulate: bool,

    /// Write data to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Only print data
    #[arg(short, long)]
    quiet: bool,

    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial numbers of attached digiBASEs
    List,
    /// Print the device status
    Status,
    /// Print the serial number
    Serial,
    /// Switch a device function on or off
    Control {
        #[arg(value_enum)]
        function: Function,
        #[arg(value_enum)]
        state: Switch,
    },
    /// Change a setting
    Set {
        #[command(subcommand)]
        setting: Setting,
    },
    /// Clear spectrum, presets, counters or all three
    Clear {
        #[arg(value_enum, default_value = "all")]
        what: ClearTarget,
    },
    /// Print the current spectrum
    Spectrum {
        /// Print the change since the previous read
        #[arg(short = 'D', long)]
        differential: bool,
    },
    /// Print the counts of channels LOW..HIGH and their sum
    Roi { low: usize, high: usize },
    /// Timed pulse height analysis
    Pha {
        /// Total measurement time, `inf` runs until interrupted
        #[arg(short, long)]
        time: Option<String>,
        /// Time between spectrum reads
        #[arg(short, long)]
        interval: Option<String>,
        #[arg(short = 'D', long)]
        differential: bool,
        /// Print the status after every n-th spectrum
        #[arg(short = 'n', long)]
        status_every: Option<usize>,
        /// Show a live status panel, data goes to --output
        #[arg(long)]
        tui: bool,
        /// Also archive spectra into this HDF5 file
        #[cfg(feature = "hdf5")]
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// Timed list-mode acquisition
    ListMode {
        #[arg(short, long)]
        time: Option<String>,
        #[arg(short, long)]
        interval: Option<String>,
        /// Print the number of pulses per read
        #[arg(short, long)]
        counts: bool,
        /// Print pulse amplitudes
        #[arg(short, long)]
        amplitudes: bool,
        /// Print pulse times
        #[arg(long)]
        times: bool,
    },
    /// Save the status to <status_dir>/<serial>/status.txt
    Save,
    /// Load and apply a saved status
    Load,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Function {
    Run,
    Hv,
    GainStab,
    ZeroStab,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Switch {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClearTarget {
    All,
    Spectrum,
    Presets,
    Counters,
}

#[derive(Subcommand, Debug)]
enum Setting {
    /// High voltage target in volts
    Hv { volts: f32 },
    /// Fine gain
    FineGain { gain: f64 },
    /// Shaping pulse width in microseconds
    PulseWidth { us: f32 },
    /// Live time preset, e.g. `300`, `5m` or `off`
    LivePreset { time: String },
    /// Real time preset, e.g. `300`, `5m` or `off`
    RealPreset { time: String },
    /// Gain stabilization window
    GainStab { center: u16, width: u16 },
    /// Zero stabilization window
    ZeroStab { center: u16, width: u16 },
}

type Output = Box<dyn Write + Send>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut conf = Conf::load(Some(cli.config.as_path()))
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    if cli.serial.is_some() {
        conf.device.serial = cli.serial;
    }
    if let Some(firmware) = &cli.firmware {
        conf.device.firmware = firmware.clone();
    }
    if let Some(format) = cli.format {
        conf.run.format = format;
    }
    conf.device.simulate |= cli.simulate;
    conf.run.quiet |= cli.quiet;
    if let Some(level) = &cli.log_level {
        conf.logging.level = level.clone();
    }
    init_logging(&conf.logging, conf.run.quiet)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("setting Ctrl-C handler")?;

    let profile = InitProfile::default();
    let mut firmware_path = conf.device.firmware.clone();
    if firmware_path.is_dir() {
        firmware_path.push(profile.firmware_file);
    }
    let firmware = FirmwareSource::from(firmware_path);
    if conf.device.simulate {
        if let Command::List = cli.command {
            println!("{}", conf.device.serial.unwrap_or(SIMULATED_SERIAL));
            return Ok(());
        }
        let det = Detector::initialize(
            SimulatedDigibase::awake(conf.device.seed),
            conf.device.serial.unwrap_or(SIMULATED_SERIAL),
            &profile,
            &firmware,
            ByteOrder::host(),
        )
        .context("opening simulated digiBASE")?;
        let det = execute(det, &cli, &conf, &cancel)?;
        det.close()?;
        return Ok(());
    }

    let mut ctx = DeviceContext::with_profile(profile);
    if let Command::List = cli.command {
        for (i, serial) in ctx.list_serials()?.iter().enumerate() {
            println!("[{}]:\t{serial}", i + 1);
        }
        return Ok(());
    }
    let det = ctx
        .open(conf.device.serial, &firmware)
        .context("opening digiBASE")?;
    let det = execute(det, &cli, &conf, &cancel)?;
    ctx.close(det)?;
    Ok(())
}

fn init_logging(settings: &LogSettings, quiet: bool) -> Result<()> {
    let level = LevelFilter::from_str(&settings.level)
        .with_context(|| format!("unknown log level `{}`", settings.level))?;
    let term_level = if quiet { level.min(LevelFilter::Warn) } else { level };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = &settings.file {
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, LogConfig::default(), file));
    }
    CombinedLogger::init(loggers).context("installing logger")?;
    Ok(())
}

fn output(cli: &Cli) -> Result<Output> {
    Ok(match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(stdout()),
    })
}

fn seconds(text: &str) -> Result<f64> {
    Ok(parse_duration(text)
        .with_context(|| format!("bad time `{text}`"))?
        .as_secs_f64())
}

/// `None` for a run without end.
fn run_time(arg: Option<&str>, configured: Duration) -> Result<Option<Duration>> {
    match arg {
        Some("inf") | Some("-1") => Ok(None),
        Some(text) => Ok(Some(
            parse_duration(text).with_context(|| format!("bad time `{text}`"))?,
        )),
        None => Ok(Some(configured)),
    }
}

fn cycles(time: Option<Duration>, interval: Duration) -> Result<usize> {
    let n = match time {
        Some(time) => cycles_for(time, interval),
        None => usize::MAX,
    };
    if n == 0 {
        bail!("measurement time must be at least one interval, use --time");
    }
    Ok(n)
}

fn execute<T>(mut det: Detector<T>, cli: &Cli, conf: &Conf, cancel: &AtomicBool) -> Result<Detector<T>>
where
    T: Transport + Send + 'static,
{
    let quiet = conf.run.quiet;
    let status_dir = &conf.device.status_dir;
    match &cli.command {
        Command::List => {}
        Command::Status => {
            det.refresh_status().context("reading status")?;
            let mut out = SpectrumWriter::new(output(cli)?, conf.run.format, quiet);
            out.write_status(det.serial(), det.status())?;
        }
        Command::Serial => {
            writeln!(output(cli)?, "Serial# : {}", det.serial())?;
        }
        Command::Control { function, state } => {
            let on = *state == Switch::On;
            match (function, on) {
                (Function::Run, true) => det.start(),
                (Function::Run, false) => det.stop(),
                (Function::Hv, true) => det.hv_on(),
                (Function::Hv, false) => det.hv_off(),
                (Function::GainStab, true) => det.gain_stab_on(),
                (Function::GainStab, false) => det.gain_stab_off(),
                (Function::ZeroStab, true) => det.zero_stab_on(),
                (Function::ZeroStab, false) => det.zero_stab_off(),
            }
            .with_context(|| format!("switching {function:?} {state:?}"))?;
            info!("{function:?} switched {state:?}");
        }
        Command::Set { setting } => {
            match setting {
                Setting::Hv { volts } => det.set_hv(*volts),
                Setting::FineGain { gain } => det.set_fine_gain(*gain),
                Setting::PulseWidth { us } => det.set_pulse_width(*us),
                Setting::LivePreset { time } if time == "off" => det.live_preset_off(),
                Setting::LivePreset { time } => det.set_live_preset(seconds(time)?),
                Setting::RealPreset { time } if time == "off" => det.real_preset_off(),
                Setting::RealPreset { time } => det.set_real_preset(seconds(time)?),
                Setting::GainStab { center, width } => det.set_gain_stab_channels(*center, *width),
                Setting::ZeroStab { center, width } => det.set_zero_stab_channels(*center, *width),
            }
            .with_context(|| format!("applying {setting:?}"))?;
            info!("Applied {setting:?}");
        }
        Command::Clear { what } => {
            match what {
                ClearTarget::All => det.clear_all(),
                ClearTarget::Spectrum => det.clear_spectrum(),
                ClearTarget::Presets => det.clear_presets(),
                ClearTarget::Counters => det.clear_counters(),
            }
            .with_context(|| format!("clearing {what:?}"))?;
            info!("Cleared {what:?}");
        }
        Command::Spectrum { differential } => {
            det.acquire_spectrum().context("reading spectrum")?;
            let mut out = SpectrumWriter::new(output(cli)?, conf.run.format, quiet);
            let counts = if *differential || conf.run.differential {
                det.differential()
            } else {
                det.cumulative()
            };
            out.write_counts(counts)?;
            out.finish()?;
        }
        Command::Roi { low, high } => {
            det.acquire_spectrum().context("reading spectrum")?;
            let sum = det.roi_sum(*low, *high)?;
            let mut out = output(cli)?;
            if !quiet {
                writeln!(out, "Channels {low}:{high}:")?;
                for (ch, c) in det.cumulative()[*low..*high].iter().enumerate() {
                    writeln!(out, "{}\t{c}", low + ch)?;
                }
            }
            writeln!(out, "\nROI[{low}:{high}]: {sum}")?;
            out.flush()?;
        }
        Command::Pha {
            time,
            interval,
            differential,
            status_every,
            tui,
            #[cfg(feature = "hdf5")]
            archive,
        } => {
            let interval = match interval {
                Some(text) => parse_duration(text).with_context(|| format!("bad interval `{text}`"))?,
                None => conf.run.interval,
            };
            if interval <= MIN_PHA_INTERVAL {
                bail!("PHA interval must be longer than {} ms", MIN_PHA_INTERVAL.as_millis());
            }
            let settings = PhaSettings {
                interval,
                cycles: cycles(run_time(time.as_deref(), conf.run.duration)?, interval)?,
                differential: *differential || conf.run.differential,
                status_every: status_every.or(conf.run.status_every),
            };
            let writer = SpectrumWriter::new(output(cli)?, conf.run.format, quiet);
            #[cfg(feature = "hdf5")]
            let writer = match archive {
                Some(path) => writer.with_archive(digibase::writer::SpectrumArchive::create(
                    &path.to_string_lossy(),
                    det.serial(),
                    settings.cycles.min(1 << 20),
                    64,
                )?),
                None => writer,
            };
            if *tui {
                if cli.output.is_none() {
                    bail!("--tui needs --output for the spectra");
                }
                let mut terminal = ratatui::init();
                let mut view = LiveView::new(det.serial(), settings);
                let result = view.run(&mut terminal, det, writer, cancel);
                ratatui::restore();
                let (returned, done) = result?;
                info!("PHA run finished after {done} cycles");
                return Ok(returned);
            }
            let mut writer = writer;
            let done = run_pha(&mut det, &settings, &mut writer, cancel, |_| {})?;
            info!("PHA run finished after {done} cycles");
        }
        Command::ListMode {
            time,
            interval,
            counts,
            amplitudes,
            times,
        } => {
            let interval = match interval {
                Some(text) => parse_duration(text).with_context(|| format!("bad interval `{text}`"))?,
                None => DEFAULT_LIST_INTERVAL,
            };
            if interval.is_zero() || interval > MAX_LIST_INTERVAL {
                bail!("list-mode interval must be in (0, {}] ms", MAX_LIST_INTERVAL.as_millis());
            }
            let fields = PulseFields {
                count: *counts || !(*amplitudes || *times),
                amplitude: *amplitudes,
                time: *times,
            };
            let settings = ListSettings {
                interval,
                cycles: cycles(run_time(time.as_deref(), conf.run.duration)?, interval)?,
                max_pulses: DEFAULT_PULSES,
                fields,
            };
            let mut out = SpectrumWriter::new(output(cli)?, conf.run.format, quiet);
            let pulses = run_list_mode(&mut det, &settings, &mut out, cancel)?;
            info!("List mode run finished, {pulses} pulses");
        }
        Command::Save => {
            let path = det.save_status(status_dir).context("saving status")?;
            info!("Status saved to {}", path.display());
        }
        Command::Load => {
            det.load_status(status_dir).context("loading status")?;
            info!("Status loaded");
            if !quiet {
                print!("{}", StatusReport { serial: det.serial(), record: det.status() });
            }
        }
    }
    Ok(det)
}
