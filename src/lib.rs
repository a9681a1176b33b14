// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! ## Cloud Profiler Rust agent
//! An in-process agent that continuously profiles an application and uploads the
//! results to the [Cloud Profiler] API, where they are aggregated into fleet-wide
//! flame graphs.
//!
//! [Cloud Profiler]: https://cloud.google.com/profiler
//!
//! ### How it works
//!
//! The agent runs as a single background task. Each turn of its loop issues a
//! long-hanging `CreateProfile` call — the server holds the request open until it
//! wants a profile from this instance — then collects the requested kind for the
//! requested duration, serializes the call tree into the [pprof] wire format
//! (gzip-compressed, base64-encoded), and uploads it. The server's polling is the
//! only pacing: at most one profile is ever in flight.
//!
//! [pprof]: https://github.com/google/pprof/blob/main/proto/profile.proto
//!
//! Two profile kinds are supported: WALL (CPU time sampled by wall clock) and
//! HEAP (sampling allocation profiles). The stack-sampling itself is not done by
//! this crate: the embedding runtime provides its native hooks behind the
//! [`sampler::Sampler`] trait, and the agent drives them.
//!
//! ### Usage
//!
//! Provide a sampler and whatever configuration is not discoverable, then spawn:
//!
//! ```no_run
//! use cloud_profiler_agent::config::{Config, ServiceContext};
//! use cloud_profiler_agent::profiler::ProfilerBuilder;
//! use cloud_profiler_agent::sampler::{Allocation, SampleNode, Sampler, SamplerError, WallProfile};
//!
//! struct RuntimeHooks;
//!
//! impl Sampler for RuntimeHooks {
//!     fn set_sampling_interval(&self, _interval_micros: i64) -> Result<(), SamplerError> {
//!         todo!("bind to the runtime's profiler")
//!     }
//!     fn start_wall(&self, _name: &str, _record_samples: bool) -> Result<(), SamplerError> {
//!         todo!()
//!     }
//!     fn stop_wall(&self, _name: &str) -> Result<WallProfile, SamplerError> {
//!         todo!()
//!     }
//!     fn start_heap(&self, _interval_bytes: u64, _max_stack_depth: u32) -> Result<(), SamplerError> {
//!         todo!()
//!     }
//!     fn heap_profile(&self) -> Result<SampleNode<Vec<Allocation>>, SamplerError> {
//!         todo!()
//!     }
//!     fn stop_heap(&self) -> Result<(), SamplerError> {
//!         todo!()
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     project_id: Some("my-project".into()),
//!     service_context: ServiceContext {
//!         service: Some("checkout".into()),
//!         version: Some("1.4.2".into()),
//!     },
//!     ..Config::default()
//! };
//!
//! let _agent = ProfilerBuilder::default()
//!     .with_config(config)
//!     .with_sampler(RuntimeHooks)
//!     .build()
//!     .spawn()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! `project_id` and `serviceContext.service` are required; on GCE the project,
//! zone, and instance name are discovered from the metadata server when unset.
//! Configuration can also come from the `GCLOUD_PROFILER_CONFIG` JSON file and
//! from environment variables — see [`config`] for the full surface and
//! precedence rules.
//!
//! ### Failure behavior
//!
//! Steady-state failures never escape the loop: retriable poll errors back off
//! and retry (honoring the server's backoff hint when it sends one), collection
//! and upload failures are logged at debug level and the profile is dropped.
//! Only startup validation and a non-retriable control-plane rejection (for
//! example, bad credentials) end the agent. Diagnostics go through [`tracing`];
//! the `logLevel` option maps onto a level filter via
//! [`config::log_level_filter`].

pub mod backend;
pub mod config;
pub mod metadata;
pub mod pprof;
pub mod profiler;
pub mod sampler;
