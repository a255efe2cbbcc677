use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::simulation::geometry::Point;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    /// Path to a YAML config file. Defaults are used when omitted.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub fleet: Fleet,
    #[serde(default)]
    pub provider: Provider,
}

impl Config {
    /// Loads a config from YAML. Relative paths inside the config (e.g. the
    /// gazetteer file) are resolved against the config file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Provider::Gazetteer { file, .. } = &mut config.provider {
            *file = resolve_path(path.parent(), file);
        }
        Ok(config)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Output {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Write operational logs to `<output_dir>/fleet_sim.log` in addition to
    /// the console.
    #[serde(default = "default_true")]
    pub log_file: bool,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            output_dir: default_output_dir(),
            log_file: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Fleet {
    /// Where newly added vehicles start out.
    #[serde(default = "default_seed_position")]
    pub seed_position: Point,
    /// Time between status reports while idle or in transit.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Length of one simulation tick; one waypoint is consumed per tick.
    #[serde(default = "default_pace_millis")]
    pub pace_millis: u64,
}

impl Fleet {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_millis)
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Fleet {
            seed_position: default_seed_position(),
            report_interval_secs: default_report_interval_secs(),
            pace_millis: default_pace_millis(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provider {
    /// Deterministic offline provider backed by an address table.
    Gazetteer {
        file: PathBuf,
        #[serde(default = "default_waypoint_spacing")]
        waypoint_spacing: f64,
    },
    /// Live Mapbox APIs; requires the `http` feature and an access token.
    Mapbox {
        #[serde(default = "default_token_env")]
        token_env: String,
        #[serde(default)]
        bbox: Option<String>,
    },
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Gazetteer {
            file: PathBuf::from("gazetteer.yml"),
            waypoint_spacing: default_waypoint_spacing(),
        }
    }
}

fn resolve_path(context: Option<&Path>, file_path: &Path) -> PathBuf {
    if file_path.is_absolute() || file_path.starts_with("./") {
        return file_path.to_path_buf();
    }
    match context {
        Some(dir) => dir.join(file_path),
        None => file_path.to_path_buf(),
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

fn default_seed_position() -> Point {
    // St. Edward's University, Austin.
    Point::new(-97.753438, 30.229688)
}

fn default_report_interval_secs() -> u64 {
    8
}

fn default_pace_millis() -> u64 {
    1000
}

fn default_waypoint_spacing() -> f64 {
    0.01
}

fn default_token_env() -> String {
    String::from("MAPBOX_TOKEN")
}
