//! Configuration of the materialize process.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt, io};
use chrono::FixedOffset;
use log::{error, LevelFilter};
use serde::de;
use serde::{Deserialize, Deserializer};
use url::Url;
use crate::change::Source;
use crate::commons::ext_serde;
use crate::constants::*;
use crate::exactly_once::SourcePolicy;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn storage_uri() -> Url {
        env::var(MATERIALIZE_ENV_STORAGE_URI).ok()
            .and_then(|uri| Url::parse(&uri).ok())
            .or_else(|| Url::parse("local://./data").ok())
            .unwrap_or_else(|| {
                eprintln!("Cannot create default storage URI");
                ::std::process::exit(1);
            })
    }

    fn flush_interval_secs() -> u64 {
        DFLT_FLUSH_INTERVAL_SECS
    }

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap_or_else(|| {
            eprintln!("Cannot create UTC offset");
            ::std::process::exit(1);
        })
    }

    fn channel_capacity() -> usize {
        DFLT_CHANNEL_CAPACITY
    }

    fn log_level() -> LevelFilter {
        match env::var(MATERIALIZE_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        MATERIALIZE_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }
}


//------------ Config --------------------------------------------------------

/// The configuration of the process.
///
/// Read from a TOML file. Every key has a default, so an empty file is a
/// valid configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Where snapshots, totals and postings are stored.
    #[serde(default = "ConfigDefaults::storage_uri")]
    pub storage_uri: Url,

    #[serde(default = "ConfigDefaults::flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// The offset day buckets are computed in.
    #[serde(
        default = "ConfigDefaults::utc_offset",
        deserialize_with = "ext_serde::de_utc_offset"
    )]
    pub utc_offset: FixedOffset,

    #[serde(default = "ConfigDefaults::channel_capacity")]
    pub channel_capacity: usize,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    pub log_file: Option<PathBuf>,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    /// Settings per source, keyed by `schema.table`.
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

/// The settings of a single source.
#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    pub policy: SourcePolicy,
}

impl Config {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Returns the configured policies by source.
    pub fn policies(&self) -> Result<Vec<(Source, SourcePolicy)>, ConfigError> {
        self.sources.iter().map(|(name, source)| {
            let name = Source::from_str(name).map_err(|err| {
                ConfigError::Other(format!("Invalid source '{name}': {err}"))
            })?;
            Ok((name, source.policy))
        }).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_uri: ConfigDefaults::storage_uri(),
            flush_interval_secs: ConfigDefaults::flush_interval_secs(),
            utc_offset: ConfigDefaults::utc_offset(),
            channel_capacity: ConfigDefaults::channel_capacity(),
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: None,
            syslog_facility: ConfigDefaults::syslog_facility(),
            sources: HashMap::new(),
        }
    }
}

/// # Loading and Checking
impl Config {
    /// Reads and verifies the config file.
    ///
    /// If the default config file doesn’t exist, the defaults are used.
    pub fn create(config_file: &str) -> Result<Self, ConfigError> {
        let config = match Self::read_config(config_file) {
            Ok(config) => config,
            Err(ConfigError::IoError(ref err))
                if err.kind() == io::ErrorKind::NotFound
                    && config_file == MATERIALIZE_DEFAULT_CONFIG_FILE =>
            {
                Config::default()
            }
            Err(err) => {
                return Err(ConfigError::Other(format!(
                    "Error parsing config file: {config_file}, error: {err}"
                )))
            }
        };
        config.verify().map_err(|err| {
            ConfigError::Other(format!(
                "Error parsing config file: {config_file}, error: {err}"
            ))
        })?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::other(
                "flush_interval_secs must be at least 1"
            ))
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::other(
                "channel_capacity must be at least 1"
            ))
        }
        if self.log_type == LogType::File && self.log_file.is_none() {
            return Err(ConfigError::other(
                "log_file is required with log_type \"file\""
            ))
        }
        self.policies()?;
        Ok(())
    }

    pub fn read_config(file: &str) -> Result<Self, ConfigError> {
        let mut v = String::new();
        let mut f = File::open(file)?;
        f.read_to_string(&mut v)?;

        let c: Config = toml::from_str(&v)?;
        Ok(c)
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => match self.log_file.as_ref() {
                Some(path) => self.file_logger(path),
                None => Err(ConfigError::other("log_file is not set")),
            },
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init stderr logging: {e}"))
            })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}", path.display(), err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init file logging: {e}"))
            })
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = syslog::Facility::from_str(&self.syslog_facility)
            .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("materialize"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {e}"))
                }),
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {err}");
                Err(ConfigError::Other(msg))
            }
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is only supported on Unix systems"))
    }

    /// Creates and returns a fern logger with log level tweaks.
    fn fern_logger(&self) -> fern::Dispatch {
        // Suppress overly noisy logging.
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                }
                else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("mio", framework_level)
            .level_for("tokio", framework_level)
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                string
            ))),
        }
    }
}


//============ Tests =========================================================
