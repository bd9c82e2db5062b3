//! Configuration loading and validation.
//!
//! The config file is a JSON document with human-readable keys (the on-disk
//! format predates this crate and is kept compatible). Out-of-range numeric
//! options fall back to their defaults with a warning; a missing queue folder
//! or an empty interface list is fatal.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_THREADS: u32 = 16;
pub const DEFAULT_SLEEP_TIME_MS: u64 = 10;
pub const DEFAULT_MAX_FILE_SIZE_KB: u64 = 1024;

/// Which request/reply dialect an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceType {
    #[serde(rename = "API1")]
    Api1,
    #[serde(rename = "API2")]
    Api2,
}

/// One configured endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInterface {
    pub url: String,
    pub model: String,
    #[serde(rename = "interface type")]
    pub interface_type: InterfaceType,
}

/// Raw on-disk representation. All fields optional so that range checking
/// and defaulting happen in one place, in [`Config::from_raw`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(rename = "file format identifier")]
    file_format_identifier: Option<u64>,
    description: Option<String>,
    author: Option<String>,
    #[serde(rename = "queue folder")]
    queue_folder: Option<String>,
    #[serde(rename = "max threads")]
    max_threads: Option<i64>,
    #[serde(rename = "engine sleep time in run loop in ms")]
    sleep_time_ms: Option<i64>,
    verbose: Option<bool>,
    #[serde(rename = "api interfaces")]
    api_interfaces: Option<Vec<ApiInterface>>,
    #[serde(rename = "api index")]
    api_index: Option<i64>,
    #[serde(rename = "max file size kB")]
    max_file_size_kb: Option<i64>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue_folder: PathBuf,
    pub max_threads: u32,
    pub sleep_time_ms: u64,
    pub verbose: bool,
    pub api_interfaces: Vec<ApiInterface>,
    pub api_index: usize,
    pub max_file_size_kb: u64,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!("failed to parse {}: {e}", path.display()))
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        if let Some(format) = raw.file_format_identifier {
            tracing::info!(format, "config file format identifier");
        }
        if let Some(description) = &raw.description {
            tracing::info!(description, "config description");
        }
        if let Some(author) = &raw.author {
            tracing::info!(author, "config author");
        }

        let queue_folder = raw
            .queue_folder
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Error::config("'queue folder' is required"))?;

        let api_interfaces = raw
            .api_interfaces
            .filter(|list| !list.is_empty())
            .ok_or_else(|| Error::config("'api interfaces' must list at least one endpoint"))?;

        let max_threads = in_range_or_default(
            "max threads",
            raw.max_threads,
            1,
            256,
            i64::from(DEFAULT_MAX_THREADS),
        ) as u32;

        let sleep_time_ms = in_range_or_default(
            "engine sleep time in run loop in ms",
            raw.sleep_time_ms,
            1,
            256,
            DEFAULT_SLEEP_TIME_MS as i64,
        ) as u64;

        let max_file_size_kb = in_range_or_default(
            "max file size kB",
            raw.max_file_size_kb,
            1,
            i64::MAX,
            DEFAULT_MAX_FILE_SIZE_KB as i64,
        ) as u64;

        let api_index = in_range_or_default(
            "api index",
            raw.api_index,
            0,
            api_interfaces.len() as i64 - 1,
            0,
        ) as usize;

        Ok(Self {
            queue_folder,
            max_threads,
            sleep_time_ms,
            verbose: raw.verbose.unwrap_or(false),
            api_interfaces,
            api_index,
            max_file_size_kb,
        })
    }

    /// The endpoint selected by `api index`.
    pub fn api(&self) -> &ApiInterface {
        &self.api_interfaces[self.api_index]
    }
}

fn in_range_or_default(key: &str, value: Option<i64>, min: i64, max: i64, default: i64) -> i64 {
    match value {
        Some(v) if (min..=max).contains(&v) => v,
        Some(v) => {
            tracing::warn!(key, value = v, default, "config value out of range; using default");
            default
        }
        None => default,
    }
}
