//! Driver parameters.
//!
//! Load-time values come from the command line; the runtime-writable subset
//! can be changed while the daemon runs through `params.json` in the run
//! directory. Writers never validate: the driver clamps lazily on its next
//! poll.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// No matter what the user asks for, the active trip is capped here.
pub const MAX_FANON: u32 = 80000;

/// Longest allowed time between two temperature checks, in seconds.
pub const MAX_INTERVAL: u32 = 15;

/// Capacity of the identity override strings, as in the firmware field buffers.
pub const FORCE_STRING_MAX: usize = 15;

pub const PARAMS_FILE: &str = "params.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Start with the driver in control of the fan
    pub kernelmode: bool,
    /// Poll period in seconds
    pub interval: u32,
    /// Active trip temperature
    pub fanon: u32,
    /// Lower bound of the active trip's hysteresis band
    pub fanoff: u32,
    /// Extra diagnostic output
    pub verbose: u32,
    /// Log every fan write and the averaged temperature
    pub debug: bool,
    /// Print the supported hardware table instead of starting
    pub list_supported: bool,
    pub force_bios: String,
    pub force_product: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            kernelmode: true,
            interval: 1,
            fanon: 30,
            fanoff: 53000,
            verbose: 0,
            debug: false,
            list_supported: false,
            force_bios: String::new(),
            force_product: String::new(),
        }
    }
}

/// The runtime-writable subset of [`Params`]; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fanon: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fanoff: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_supported: Option<bool>,
}

impl RuntimeParams {
    pub fn apply(&self, params: &mut Params) {
        if let Some(interval) = self.interval {
            params.interval = interval;
        }
        if let Some(fanon) = self.fanon {
            params.fanon = fanon;
        }
        if let Some(fanoff) = self.fanoff {
            params.fanoff = fanoff;
        }
        if let Some(verbose) = self.verbose {
            params.verbose = verbose;
        }
        if let Some(debug) = self.debug {
            params.debug = debug;
        }
        if let Some(list_supported) = self.list_supported {
            params.list_supported = list_supported;
        }
    }

    /// Overlay `other` onto `self`, keeping fields `other` leaves unset.
    pub fn merge(&mut self, other: &RuntimeParams) {
        self.interval = other.interval.or(self.interval);
        self.fanon = other.fanon.or(self.fanon);
        self.fanoff = other.fanoff.or(self.fanoff);
        self.verbose = other.verbose.or(self.verbose);
        self.debug = other.debug.or(self.debug);
        self.list_supported = other.list_supported.or(self.list_supported);
    }
}

/// Process-wide parameter record shared between the driver and its writers.
#[derive(Debug, Clone, Default)]
pub struct SharedParams {
    inner: Arc<RwLock<Params>>,
}

impl SharedParams {
    pub fn new(params: Params) -> Self {
        Self {
            inner: Arc::new(RwLock::new(params)),
        }
    }

    /// Latest values.
    pub fn snapshot(&self) -> Params {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look at the latest values without cloning them.
    pub fn read<R>(&self, f: impl FnOnce(&Params) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Params) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Read a runtime params file. A missing file is an empty update.
pub fn read_runtime_params(path: &Path) -> anyhow::Result<RuntimeParams> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(RuntimeParams::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(RuntimeParams::default()),
        Err(error) => Err(error.into()),
    }
}

/// Merge `update` into the params file at `path`, creating it if needed.
pub fn write_runtime_params(path: &Path, update: &RuntimeParams) -> anyhow::Result<RuntimeParams> {
    let mut current = read_runtime_params(path)?;
    current.merge(update);

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(&current)?)?;
    fs::rename(&tmp, path)?;
    Ok(current)
}

/// Drop a params file left by an earlier run.
pub fn clear_runtime_params(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != std::io::ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}

/// Poll `path` for changes and merge them into `shared`.
///
/// Only writes after the watcher starts are applied.
pub fn spawn_watcher(shared: SharedParams, path: PathBuf) {
    let mut last_mtime = modified(&path);
    thread::spawn(move || {
        loop {
            let mtime = modified(&path);

            if mtime.is_some() && mtime != last_mtime {
                match read_runtime_params(&path) {
                    Ok(update) => {
                        shared.update(|params| update.apply(params));
                        info!("parameters reloaded from {}", path.display());
                    }
                    Err(error) => warn!("ignoring {}: {}", path.display(), error),
                }
                last_mtime = mtime;
            }

            thread::sleep(Duration::from_millis(1000));
        }
    });
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// clap value parser for the identity override strings.
pub fn parse_force_string(value: &str) -> Result<String, String> {
    if value.len() > FORCE_STRING_MAX {
        Err(format!(
            "at most {} bytes allowed, got {}",
            FORCE_STRING_MAX,
            value.len()
        ))
    } else {
        Ok(value.to_string())
    }
}
