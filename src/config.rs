//! Job configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::grid::Footprint;
use crate::types::Dimensions;

/// Logical input name -> files delivered under that name, in order
pub type InputFiles = BTreeMap<String, Vec<PathBuf>>;

/// Logical output name -> file written for it
pub type OutputFiles = BTreeMap<String, PathBuf>;

/// Where block callbacks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One block at a time on the calling thread
    #[default]
    Serial,
    /// A local pool of worker threads; `None` uses one per CPU
    Pool { workers: Option<usize> },
    /// Independent participants coordinated by message passing
    Distributed,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "serial" => Ok(Backend::Serial),
            "pool" => Ok(Backend::Pool { workers: None }),
            "distributed" | "mpi" => Ok(Backend::Distributed),
            other => match other.strip_prefix("pool:") {
                Some(n) => {
                    let workers = n.parse::<usize>().map_err(|_| {
                        Error::configuration(format!("invalid worker count in backend {:?}", s))
                    })?;
                    Ok(Backend::Pool {
                        workers: Some(workers),
                    })
                }
                None => Err(Error::configuration(format!("unknown backend {:?}", s))),
            },
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Serial => write!(f, "serial"),
            Backend::Pool { workers: None } => write!(f, "pool"),
            Backend::Pool { workers: Some(n) } => write!(f, "pool:{}", n),
            Backend::Distributed => write!(f, "distributed"),
        }
    }
}

/// What happens when one block fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop dispatching and report the first error
    #[default]
    FailFast,
    /// Process every block, then report the first error
    Continue,
}

impl FromStr for ErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "failfast" => Ok(ErrorPolicy::FailFast),
            "continue" => Ok(ErrorPolicy::Continue),
            _ => Err(Error::configuration(format!("unknown error policy {:?}", s))),
        }
    }
}

/// Settings of one block job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub window_xsize: usize,
    pub window_ysize: usize,
    /// Pixels added around every window
    pub overlap: usize,
    pub footprint: Footprint,
    /// Input supplying resolution and projection, counted across all names
    /// in sorted order
    pub reference_input: usize,
    pub backend: Backend,
    pub error_policy: ErrorPolicy,
    /// No-data value written into newly created outputs
    pub output_no_data: Option<f64>,
    /// How long rank 0 waits for any other participant
    pub participant_timeout_secs: Option<u64>,
    /// How long participants keep retrying the coordinator
    pub connect_timeout_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            window_xsize: 256,
            window_ysize: 256,
            overlap: 0,
            footprint: Footprint::default(),
            reference_input: 0,
            backend: Backend::default(),
            error_policy: ErrorPolicy::default(),
            output_no_data: None,
            participant_timeout_secs: None,
            connect_timeout_secs: 30,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::configuration(format!("invalid value {:?} for {}", value, name)))
}

impl JobConfig {
    /// Defaults overlaid with `RASTERBLOCK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Defaults overlaid with variables from `lookup`
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RASTERBLOCK_WINDOW_XSIZE") {
            config.window_xsize = parse_var("RASTERBLOCK_WINDOW_XSIZE", &v)?;
        }
        if let Some(v) = lookup("RASTERBLOCK_WINDOW_YSIZE") {
            config.window_ysize = parse_var("RASTERBLOCK_WINDOW_YSIZE", &v)?;
        }
        if let Some(v) = lookup("RASTERBLOCK_OVERLAP") {
            config.overlap = parse_var("RASTERBLOCK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("RASTERBLOCK_FOOTPRINT") {
            config.footprint = Footprint::from_name(&v)
                .ok_or_else(|| Error::configuration(format!("unknown footprint {:?}", v)))?;
        }
        if let Some(v) = lookup("RASTERBLOCK_REFERENCE_INPUT") {
            config.reference_input = parse_var("RASTERBLOCK_REFERENCE_INPUT", &v)?;
        }
        if let Some(v) = lookup("RASTERBLOCK_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup("RASTERBLOCK_ERROR_POLICY") {
            config.error_policy = v.parse()?;
        }
        if let Some(v) = lookup("RASTERBLOCK_OUTPUT_NODATA") {
            config.output_no_data = Some(parse_var("RASTERBLOCK_OUTPUT_NODATA", &v)?);
        }
        if let Some(v) = lookup("RASTERBLOCK_PARTICIPANT_TIMEOUT") {
            config.participant_timeout_secs = Some(parse_var("RASTERBLOCK_PARTICIPANT_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("RASTERBLOCK_CONNECT_TIMEOUT") {
            config.connect_timeout_secs = parse_var("RASTERBLOCK_CONNECT_TIMEOUT", &v)?;
        }

        Ok(config)
    }

    /// Checks window and overlap constraints
    pub fn validate(&self) -> Result<()> {
        if self.window_xsize == 0 || self.window_ysize == 0 {
            return Err(Error::configuration(format!(
                "window size must be positive, got {}x{}",
                self.window_xsize, self.window_ysize
            )));
        }
        if self.overlap >= self.window_xsize.min(self.window_ysize) {
            return Err(Error::configuration(format!(
                "overlap {} must be smaller than the window size {}x{}",
                self.overlap, self.window_xsize, self.window_ysize
            )));
        }
        if let Backend::Pool { workers: Some(0) } = self.backend {
            return Err(Error::configuration("a worker pool needs at least one worker"));
        }
        Ok(())
    }

    /// Nominal window size
    pub fn window_size(&self) -> Dimensions {
        Dimensions::new(self.window_xsize, self.window_ysize)
    }

    pub fn with_window(mut self, xsize: usize, ysize: usize) -> Self {
        self.window_xsize = xsize;
        self.window_ysize = ysize;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_footprint(mut self, footprint: Footprint) -> Self {
        self.footprint = footprint;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn participant_timeout(&self) -> Option<Duration> {
        self.participant_timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
