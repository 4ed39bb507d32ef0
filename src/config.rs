use std::path::{Path, PathBuf};
use std::time::Duration;

use confique::Config;
use serde::{Deserialize, Deserializer};

use crate::utils::parse_duration;
use crate::writer::OutputFormat;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub device: DeviceSettings,
    #[config(nested)]
    pub run: RunSettings,
    #[config(nested)]
    pub logging: LogSettings,
}

#[derive(Config, Debug, Clone)]
pub struct DeviceSettings {
    /// Open only the digiBASE with this serial number.
    #[config(env = "DIGIBASE_SERIAL")]
    pub serial: Option<u32>,
    #[config(env = "DIGIBASE_FIRMWARE", default = "digiBaseRH.rbf")]
    pub firmware: PathBuf,
    /// Saved status files go to `<status_dir>/<serial>/status.txt`.
    #[config(default = ".")]
    pub status_dir: PathBuf,
    /// Talk to an in-process simulated device instead of USB.
    #[config(default = false)]
    pub simulate: bool,
    #[config(default = 1)]
    pub seed: u64,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    #[config(default = "1s", deserialize_with = duration)]
    pub interval: Duration,
    #[config(default = "0s", deserialize_with = duration)]
    pub duration: Duration,
    #[config(default = "text")]
    pub format: OutputFormat,
    #[config(default = false)]
    pub differential: bool,
    pub status_every: Option<usize>,
    #[config(default = false)]
    pub quiet: bool,
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    #[config(env = "DIGIBASE_LOG", default = "info")]
    pub level: String,
    pub file: Option<PathBuf>,
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

impl Conf {
    /// Environment first, then the TOML file if there is one.
    pub fn load(path: Option<&Path>) -> Result<Self, confique::Error> {
        let mut builder = Conf::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        builder.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let conf = Conf::load(None).unwrap();
        assert_eq!(Duration::from_secs(1), conf.run.interval);
        assert_eq!(OutputFormat::Text, conf.run.format);
        assert!(!conf.device.simulate);
    }

    #[test]
    fn toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[device]
serial = 4321
simulate = true

[run]
interval = "250ms"
duration = "1m"
format = "rate"
status_every = 10
"#
        )
        .unwrap();
        let conf = Conf::load(Some(file.path())).unwrap();
        assert_eq!(Some(4321), conf.device.serial);
        assert!(conf.device.simulate);
        assert_eq!(Duration::from_millis(250), conf.run.interval);
        assert_eq!(Duration::from_secs(60), conf.run.duration);
        assert_eq!(OutputFormat::Rate, conf.run.format);
        assert_eq!(Some(10), conf.run.status_every);
    }

    #[test]
    fn bad_time_in_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[run]\ninterval = \"soon\"").unwrap();
        assert!(Conf::load(Some(file.path())).is_err());
    }
}
