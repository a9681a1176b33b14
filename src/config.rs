// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Values are overlaid in increasing order of precedence: built-in
//! defaults, the JSON file named by `GCLOUD_PROFILER_CONFIG`, environment
//! variables (`GCLOUD_PROJECT`, `GAE_SERVICE`, `GAE_VERSION`,
//! `GCLOUD_PROFILER_LOGLEVEL`), and finally the [`Config`] the embedder
//! passes in. Whatever is still missing after that is looked up on the
//! metadata server; `project_id` and the service name are required once
//! all layers have been applied.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::backend::api::DEFAULT_API_ENDPOINT;
use crate::backend::{Deployment, ProfileType};
use crate::metadata::GceMetadata;

pub(crate) const DEFAULT_TIME_INTERVAL_MICROS: i64 = 1000;
pub(crate) const DEFAULT_HEAP_INTERVAL_BYTES: u64 = 512 * 1024;
pub(crate) const DEFAULT_HEAP_MAX_STACK_DEPTH: u32 = 32;
pub(crate) const DEFAULT_MIN_PROFILING_INTERVAL_MILLIS: u64 = 60_000;
pub(crate) const DEFAULT_BACKOFF_MILLIS: u64 = 1000;
const DEFAULT_LOG_LEVEL: u8 = 2;

/// An error that makes profiling impossible, surfaced at startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file named by `GCLOUD_PROFILER_CONFIG` could not be read.
    #[error("reading config file {path}: {source}")]
    ReadFile {
        /// The offending path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON for this schema.
    #[error("parsing config file {path}: {source}")]
    ParseFile {
        /// The offending path.
        path: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// No project id was configured and none could be discovered.
    #[error("project id is not set and could not be discovered")]
    MissingProjectId,
    /// No service name was configured.
    #[error("service name is not set (serviceContext.service or GAE_SERVICE)")]
    MissingService,
    /// The service name does not match the shape the control plane
    /// accepts.
    #[error("invalid service name {0:?}")]
    InvalidServiceName(String),
}

/// Identity of the service being profiled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceContext {
    /// Deployment target. Required (here or via `GAE_SERVICE`).
    pub service: Option<String>,
    /// Deployment version, attached as a label.
    pub version: Option<String>,
}

/// User-facing configuration. Every field is optional; unset fields fall
/// through to lower-precedence layers and finally the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Cloud project for the deployment.
    pub project_id: Option<String>,
    /// Service name and version.
    pub service_context: ServiceContext,
    /// Zone label; auto-discovered from metadata when unset.
    pub zone: Option<String>,
    /// Instance label; auto-discovered from metadata when unset.
    pub instance: Option<String>,
    /// Suppress WALL profiles and skip wall sampler setup.
    pub disable_time: Option<bool>,
    /// Suppress HEAP profiles and skip heap sampler setup.
    pub disable_heap: Option<bool>,
    /// Wall-clock sampling period in microseconds. Default 1000.
    pub time_interval_micros: Option<i64>,
    /// Bytes between heap samples. Default 512 KiB.
    pub heap_interval_bytes: Option<u64>,
    /// Maximum heap sampling stack depth. Default 32.
    pub heap_max_stack_depth: Option<u32>,
    /// Lower bound between profiles, milliseconds. Default 60 000.
    pub min_profiling_interval_millis: Option<u64>,
    /// Delay after a retriable poll failure when the server suggests
    /// none, milliseconds. Default 1000.
    pub backoff_millis: Option<u64>,
    /// Agent verbosity, 0 (off) through 5 (trace).
    pub log_level: Option<u8>,
    /// Control-plane base URL; defaults to the production endpoint.
    pub api_endpoint: Option<String>,
}

impl Config {
    /// Overlay `higher` on top of `self`: fields set in `higher` win.
    fn overlay(self, higher: Config) -> Config {
        Config {
            project_id: higher.project_id.or(self.project_id),
            service_context: ServiceContext {
                service: higher.service_context.service.or(self.service_context.service),
                version: higher.service_context.version.or(self.service_context.version),
            },
            zone: higher.zone.or(self.zone),
            instance: higher.instance.or(self.instance),
            disable_time: higher.disable_time.or(self.disable_time),
            disable_heap: higher.disable_heap.or(self.disable_heap),
            time_interval_micros: higher.time_interval_micros.or(self.time_interval_micros),
            heap_interval_bytes: higher.heap_interval_bytes.or(self.heap_interval_bytes),
            heap_max_stack_depth: higher.heap_max_stack_depth.or(self.heap_max_stack_depth),
            min_profiling_interval_millis: higher
                .min_profiling_interval_millis
                .or(self.min_profiling_interval_millis),
            backoff_millis: higher.backoff_millis.or(self.backoff_millis),
            log_level: higher.log_level.or(self.log_level),
            api_endpoint: higher.api_endpoint.or(self.api_endpoint),
        }
    }

    fn from_file(path: &str) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::ParseFile {
            path: path.to_owned(),
            source,
        })
    }

    fn from_env_vars(vars: &HashMap<String, String>) -> Config {
        Config {
            project_id: vars.get("GCLOUD_PROJECT").cloned(),
            service_context: ServiceContext {
                service: vars.get("GAE_SERVICE").cloned(),
                version: vars.get("GAE_VERSION").cloned(),
            },
            log_level: vars
                .get("GCLOUD_PROFILER_LOGLEVEL")
                .and_then(|level| level.parse().ok()),
            ..Config::default()
        }
    }

    /// Apply the environment layers underneath `self` (the explicit,
    /// highest-precedence layer).
    pub fn with_environment(self) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.with_environment_from(&vars)
    }

    fn with_environment_from(self, vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = vars.get("GCLOUD_PROFILER_CONFIG") {
            config = config.overlay(Config::from_file(path)?);
        }
        config = config.overlay(Config::from_env_vars(vars));
        Ok(config.overlay(self))
    }

    /// Fill remaining holes from discovered metadata, apply defaults, and
    /// validate the required fields.
    pub(crate) fn resolve(self, metadata: &GceMetadata) -> Result<ResolvedConfig, ConfigError> {
        let service = self
            .service_context
            .service
            .ok_or(ConfigError::MissingService)?;
        validate_service_name(&service)?;
        let project_id = self
            .project_id
            .or_else(|| metadata.project_id.clone())
            .ok_or(ConfigError::MissingProjectId)?;
        Ok(ResolvedConfig {
            project_id,
            service,
            version: self.service_context.version,
            zone: self.zone.or_else(|| metadata.zone.clone()),
            instance: self.instance.or_else(|| metadata.instance.clone()),
            disable_time: self.disable_time.unwrap_or(false),
            disable_heap: self.disable_heap.unwrap_or(false),
            time_interval_micros: self
                .time_interval_micros
                .unwrap_or(DEFAULT_TIME_INTERVAL_MICROS),
            heap_interval_bytes: self
                .heap_interval_bytes
                .unwrap_or(DEFAULT_HEAP_INTERVAL_BYTES),
            heap_max_stack_depth: self
                .heap_max_stack_depth
                .unwrap_or(DEFAULT_HEAP_MAX_STACK_DEPTH),
            min_profiling_interval: Duration::from_millis(
                self.min_profiling_interval_millis
                    .unwrap_or(DEFAULT_MIN_PROFILING_INTERVAL_MILLIS),
            ),
            backoff: Duration::from_millis(self.backoff_millis.unwrap_or(DEFAULT_BACKOFF_MILLIS)),
            log_level: self.log_level.unwrap_or(DEFAULT_LOG_LEVEL),
            api_endpoint: self
                .api_endpoint
                .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_owned()),
        })
    }
}

/// Configuration with every default applied and required fields present.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedConfig {
    pub(crate) project_id: String,
    pub(crate) service: String,
    pub(crate) version: Option<String>,
    pub(crate) zone: Option<String>,
    pub(crate) instance: Option<String>,
    pub(crate) disable_time: bool,
    pub(crate) disable_heap: bool,
    pub(crate) time_interval_micros: i64,
    pub(crate) heap_interval_bytes: u64,
    pub(crate) heap_max_stack_depth: u32,
    pub(crate) min_profiling_interval: Duration,
    pub(crate) backoff: Duration,
    pub(crate) log_level: u8,
    pub(crate) api_endpoint: String,
}

impl ResolvedConfig {
    pub(crate) fn deployment(&self) -> Deployment {
        let mut labels = BTreeMap::new();
        if let Some(zone) = &self.zone {
            labels.insert("zone".to_owned(), zone.clone());
        }
        if let Some(instance) = &self.instance {
            labels.insert("instance".to_owned(), instance.clone());
        }
        if let Some(version) = &self.version {
            labels.insert("version".to_owned(), version.clone());
        }
        Deployment {
            project_id: self.project_id.clone(),
            target: self.service.clone(),
            labels,
        }
    }

    pub(crate) fn enabled_profile_types(&self) -> Vec<ProfileType> {
        let mut types = Vec::new();
        if !self.disable_time {
            types.push(ProfileType::Wall);
        }
        if !self.disable_heap {
            types.push(ProfileType::Heap);
        }
        types
    }
}

/// The control plane accepts `^[a-z]([-a-z0-9_.]{0,253}[a-z0-9])?$`.
fn validate_service_name(service: &str) -> Result<(), ConfigError> {
    let bytes = service.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= 255
        && bytes[0].is_ascii_lowercase()
        && (bytes.len() == 1 || bytes[bytes.len() - 1].is_ascii_lowercase()
            || bytes[bytes.len() - 1].is_ascii_digit())
        && bytes
            .iter()
            .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidServiceName(service.to_owned()))
    }
}

/// Map the numeric `logLevel` option onto a `tracing` level filter:
/// 0 silences the agent, 1 is errors only, 5 is trace.
pub fn log_level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
