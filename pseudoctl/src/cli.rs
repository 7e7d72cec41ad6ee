use std::fs::File;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pseudodev::config::{ConfigError, CursorMode, DeviceConfig};

use crate::step::{parse_whence, Step, StepError};

#[derive(Parser, Debug)]
#[command(name = "pseudoctl")]
#[command(about = "Open an in-process pseudo device and issue calls on it", long_about = None)]
pub struct Cli {
    /// Device capacity in bytes (overrides PSEUDO_CAPACITY)
    #[arg(long, short = 'c')]
    pub capacity: Option<usize>,

    /// JSON device config, e.g. {"capacity": 4096}
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Give each handle its own cursor instead of one per device
    #[arg(long)]
    pub per_handle: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read COUNT bytes from the current position
    Read { count: usize },

    /// Write TEXT at the current position
    Write { text: String },

    /// Move the cursor
    Seek {
        #[arg(allow_hyphen_values = true)]
        offset: i64,

        /// set, cur or end
        #[arg(long, default_value = "set", value_parser = parse_whence_arg)]
        whence: pseudodev::Whence,
    },

    /// Add DELTA to every byte with PSEUDO_INC
    Inc {
        #[arg(allow_hyphen_values = true)]
        delta: i8,
    },

    /// Run several steps on one handle, e.g. `seek:100 read:16 inc:5 read:16`
    Run {
        #[arg(required = true, allow_hyphen_values = true)]
        steps: Vec<String>,
    },
}

fn parse_whence_arg(s: &str) -> Result<pseudodev::Whence, String> {
    parse_whence(s).ok_or_else(|| format!("invalid whence {s:?} (expected set, cur or end)"))
}

impl Cli {
    /// Device config: `--config` file, else `--capacity`, else the environment
    ///
    /// # Errors
    ///
    /// Returns an error if no source yields a valid config.
    pub fn device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let config = if let Some(path) = &self.config {
            DeviceConfig::from_json_reader(File::open(path)?)?
        } else if let Some(capacity) = self.capacity {
            let config = DeviceConfig::new(capacity);
            config.validate()?;
            config
        } else {
            DeviceConfig::from_env()?
        };

        Ok(if self.per_handle {
            config.with_cursor_mode(CursorMode::PerHandle)
        } else {
            config
        })
    }
}

impl Command {
    /// Steps this command stands for
    ///
    /// # Errors
    ///
    /// Returns an error if a `run` step does not parse.
    pub fn steps(&self) -> Result<Vec<Step>, StepError> {
        Ok(match self {
            Self::Read { count } => vec![Step::Read(*count)],
            Self::Write { text } => vec![Step::Write(text.as_bytes().to_vec())],
            Self::Seek { offset, whence } => vec![Step::Seek {
                offset: *offset,
                whence: *whence,
            }],
            Self::Inc { delta } => vec![Step::Inc(*delta)],
            Self::Run { steps } => steps
                .iter()
                .map(|s| s.parse::<Step>())
                .collect::<Result<_, _>>()?,
        })
    }
}
