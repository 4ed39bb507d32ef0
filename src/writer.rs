use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::byte_order::ByteOrder;
use crate::list_mode::Pulse;
use crate::persistence::StatusReport;
use crate::status::StatusRecord;

/// How spectra are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One line of space separated counts per spectrum
    #[default]
    Text,
    /// Raw little-endian i32 counts
    Binary,
    /// Counts per second only
    Rate,
}

/// Which of a list-mode pulse's fields are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseFields {
    pub count: bool,
    pub amplitude: bool,
    pub time: bool,
}

/// One PHA cycle ready for output.
pub struct Cycle<'a> {
    pub index: usize,
    pub started: OffsetDateTime,
    pub finished: OffsetDateTime,
    pub interval: Duration,
    pub counts: &'a [i32],
    /// Counts per second over the cycle.
    pub rate: f64,
}

/// Writes spectra, status and pulses to any output.
pub struct SpectrumWriter<W: Write> {
    out: W,
    format: OutputFormat,
    quiet: bool,
    #[cfg(feature = "hdf5")]
    archive: Option<SpectrumArchive>,
}

impl<W: Write> SpectrumWriter<W> {
    pub fn new(out: W, format: OutputFormat, quiet: bool) -> Self {
        Self {
            out,
            format,
            quiet,
            #[cfg(feature = "hdf5")]
            archive: None,
        }
    }

    /// Every cycle's counts are also appended to `archive`.
    #[cfg(feature = "hdf5")]
    pub fn with_archive(mut self, archive: SpectrumArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_cycle(&mut self, cycle: &Cycle) -> Result<()> {
        if !self.quiet && self.format != OutputFormat::Binary {
            writeln!(
                self.out,
                "# cycle {} start {} end {} counting {:.2} s",
                cycle.index + 1,
                cycle.started.format(&Rfc3339)?,
                cycle.finished.format(&Rfc3339)?,
                cycle.interval.as_secs_f64()
            )?;
        }
        match self.format {
            OutputFormat::Rate => {
                let prefix = if self.quiet { "" } else { "CPS: " };
                writeln!(self.out, "{prefix}{:.0}", cycle.rate)?;
            }
            _ => self.write_counts(cycle.counts)?,
        }
        #[cfg(feature = "hdf5")]
        if let Some(archive) = &mut self.archive {
            archive.append(cycle.finished.unix_timestamp(), cycle.counts)?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Flushes the output and any buffered archive rows.
    pub fn finish(&mut self) -> Result<()> {
        #[cfg(feature = "hdf5")]
        if let Some(archive) = &mut self.archive {
            archive.flush()?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// A single spectrum, in text or binary form.
    pub fn write_counts(&mut self, counts: &[i32]) -> Result<()> {
        match self.format {
            OutputFormat::Binary => {
                for c in counts {
                    self.out.write_all(&c.to_le_bytes())?;
                }
            }
            _ => {
                let line = counts
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(self.out, "{line}")?;
            }
        }
        Ok(())
    }

    /// Text status, or the 80 byte wire record in binary mode.
    pub fn write_status(&mut self, serial: u32, record: &StatusRecord) -> Result<()> {
        match self.format {
            OutputFormat::Binary => self
                .out
                .write_all(&record.encode(ByteOrder::host()))
                .context("writing binary status")?,
            _ => write!(self.out, "{}", StatusReport { serial, record })?,
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn write_pulses(&mut self, count: usize, pulses: &[Pulse], fields: PulseFields) -> Result<()> {
        if fields.count {
            writeln!(self.out, "{count}")?;
        }
        for p in pulses {
            let time = p.time.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
            match (fields.amplitude, fields.time) {
                (true, true) => writeln!(self.out, "{}\t{}", p.amplitude, time)?,
                (true, false) => writeln!(self.out, "{}", p.amplitude)?,
                (false, true) => writeln!(self.out, "{time}")?,
                (false, false) => {}
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(feature = "hdf5")]
pub use archive::SpectrumArchive;

#[cfg(feature = "hdf5")]
mod archive {
    use anyhow::{anyhow, Result};
    use hdf5::{Dataset, File};
    use ndarray::{s, Array1, Array2};

    use crate::status::CHANNELS;

    /// Appends spectra and their end times to an HDF5 file, buffered.
    pub struct SpectrumArchive {
        pub file: File,
        timestamps: Dataset,
        spectra: Dataset,
        current: usize,
        max_cycles: usize,
        buffer_count: usize,
        ts_buffer: Array1<i64>,
        spectrum_buffer: Array2<i32>,
    }

    impl SpectrumArchive {
        pub fn create(filename: &str, serial: u32, max_cycles: usize, buffer_capacity: usize) -> Result<Self> {
            let file = File::create(filename)?;
            let group = file.create_group(&format!("digibase{serial}"))?;
            let timestamps = group
                .new_dataset::<i64>()
                .shape(max_cycles)
                .chunk(buffer_capacity)
                .create("timestamps")?;
            let spectra = group
                .new_dataset::<i32>()
                .shape((max_cycles, CHANNELS))
                .chunk((buffer_capacity, CHANNELS))
                .create("spectra")?;
            Ok(Self {
                file,
                timestamps,
                spectra,
                current: 0,
                max_cycles,
                buffer_count: 0,
                ts_buffer: Array1::zeros(buffer_capacity),
                spectrum_buffer: Array2::zeros((buffer_capacity, CHANNELS)),
            })
        }

        /// `timestamp` is in unix seconds.
        pub fn append(&mut self, timestamp: i64, counts: &[i32]) -> Result<()> {
            if counts.len() != CHANNELS {
                return Err(anyhow!("spectrum has {} channels, expected {CHANNELS}", counts.len()));
            }
            if self.current + self.buffer_count >= self.max_cycles {
                return Err(anyhow!("archive is full ({} spectra)", self.max_cycles));
            }
            self.ts_buffer[self.buffer_count] = timestamp;
            self.spectrum_buffer
                .slice_mut(s![self.buffer_count, ..])
                .assign(&ndarray::ArrayView1::from(counts));
            self.buffer_count += 1;
            if self.buffer_count == self.ts_buffer.len() {
                self.flush()?;
            }
            Ok(())
        }

        pub fn flush(&mut self) -> Result<()> {
            if self.buffer_count == 0 {
                return Ok(());
            }
            let range = self.current..self.current + self.buffer_count;
            let ts = self.ts_buffer.slice(s![0..self.buffer_count]).to_owned();
            self.timestamps.write_slice(&ts, range.clone())?;
            let spectra = self
                .spectrum_buffer
                .slice(s![0..self.buffer_count, ..])
                .to_owned();
            self.spectra.write_slice(&spectra, (range, ..))?;
            self.current += self.buffer_count;
            self.buffer_count = 0;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::tests::sample_record;
    use time::macros::datetime;

    fn cycle(counts: &[i32]) -> Cycle<'_> {
        Cycle {
            index: 0,
            started: datetime!(2024-05-01 12:00:00 UTC),
            finished: datetime!(2024-05-01 12:00:01 UTC),
            interval: Duration::from_secs(1),
            counts,
            rate: 41.6,
        }
    }

    #[test]
    fn text_cycle() {
        let mut w = SpectrumWriter::new(Vec::new(), OutputFormat::Text, false);
        w.write_cycle(&cycle(&[1, 0, -3])).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(
            "# cycle 1 start 2024-05-01T12:00:00Z end 2024-05-01T12:00:01Z counting 1.00 s\n1 0 -3\n",
            text
        );
    }

    #[test]
    fn binary_cycle_is_raw_counts() {
        let mut w = SpectrumWriter::new(Vec::new(), OutputFormat::Binary, false);
        w.write_cycle(&cycle(&[1, 256])).unwrap();
        assert_eq!(vec![1, 0, 0, 0, 0, 1, 0, 0], w.into_inner());
    }

    #[test]
    fn quiet_rate() {
        let mut w = SpectrumWriter::new(Vec::new(), OutputFormat::Rate, true);
        w.write_cycle(&cycle(&[])).unwrap();
        assert_eq!(b"42\n".to_vec(), w.into_inner());
    }

    #[test]
    fn pulses() {
        let pulses = [
            Pulse { amplitude: 7, time: Some(100) },
            Pulse { amplitude: 9, time: None },
        ];
        let mut w = SpectrumWriter::new(Vec::new(), OutputFormat::Text, true);
        let fields = PulseFields { count: true, amplitude: true, time: true };
        w.write_pulses(2, &pulses, fields).unwrap();
        assert_eq!(b"2\n7\t100\n9\t-\n".to_vec(), w.into_inner());
    }

    #[test]
    fn binary_status_is_wire_record() {
        let mut w = SpectrumWriter::new(Vec::new(), OutputFormat::Binary, false);
        w.write_status(1, &sample_record()).unwrap();
        assert_eq!(80, w.into_inner().len());
    }
}
