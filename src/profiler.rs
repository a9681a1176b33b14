// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The agent loop: poll the control plane, collect the requested profile,
//! upload the result, repeat.
//!
//! One iteration is one profile. The long-hanging poll is the only
//! backpressure mechanism: the server decides when this instance should
//! profile next, and the loop never holds more than one profile in
//! flight.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tokio::time::Instant;

use crate::backend::api::ApiClient;
use crate::backend::{
    parse_duration, BackendError, Deployment, ProfileRequest, ProfileType, ProfilerBackend,
};
use crate::config::{Config, ConfigError, ResolvedConfig};
use crate::metadata::{load_gce_metadata, GceMetadata};
use crate::pprof;
use crate::sampler::{Sampler, SamplerError, WallProfile};

/// Collection window used when the server request carries no usable
/// duration.
const DEFAULT_WALL_DURATION: Duration = Duration::from_secs(10);

// The native samplers are process-global, so at most one agent may drive
// them.
static AGENT_ACTIVE: AtomicBool = AtomicBool::new(false);

/// An error that prevents the agent from starting.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StartError {
    /// Configuration was invalid or incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP backend client could not be constructed.
    #[error("constructing backend client: {0}")]
    Backend(#[from] BackendError),
    /// Another agent is already active in this process.
    #[error("a profiling agent is already active in this process")]
    AlreadyRunning,
    /// The heap sampler refused to start.
    #[error("starting heap sampler: {0}")]
    HeapSampler(#[source] SamplerError),
    /// The wall sampling interval could not be applied.
    #[error("setting wall sampling interval: {0}")]
    WallSampler(#[source] SamplerError),
}

// Why one iteration produced nothing to upload.
#[derive(Error, Debug)]
enum CollectError {
    #[error("wall profiling is disabled by configuration")]
    TimeDisabled,
    #[error("heap profiling is disabled by configuration")]
    HeapDisabled,
    #[error("server requested a profile type this agent does not support")]
    UnknownProfileType,
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error("encoding profile: {0}")]
    Encode(#[from] std::io::Error),
}

/// Builds a [`Profiler`], panicking in `build` if the sampler was not
/// provided.
#[derive(Default)]
pub struct ProfilerBuilder {
    config: Config,
    sampler: Option<Box<dyn Sampler>>,
    backend: Option<Box<dyn ProfilerBackend>>,
}

impl ProfilerBuilder {
    /// Explicit configuration, the highest-precedence layer (see
    /// [`Config`]).
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The host runtime's sampling hooks. Required.
    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Replace the HTTP control-plane client, mainly for tests and
    /// nonstandard deployments.
    pub fn with_backend(mut self, backend: impl ProfilerBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Turn this builder into a profiler!
    pub fn build(self) -> Profiler {
        Profiler {
            config: self.config,
            sampler: self.sampler.expect("sampler is required"),
            backend: self.backend,
        }
    }
}

// no control messages currently
enum Control {}

/// A handle to a running agent.
///
/// Dropping this handle requests a stop; call [`RunningProfiler::detach`]
/// to let the agent run for the rest of the process lifetime.
#[must_use = "dropping this stops the agent, call .detach() to detach"]
pub struct RunningProfiler {
    stop_channel: tokio::sync::oneshot::Sender<Control>,
    join_handle: tokio::task::JoinHandle<()>,
}

impl RunningProfiler {
    /// Request a stop and wait until the loop exits. Sampler resources
    /// are released before this returns, so it is safe to spawn a new
    /// agent (with a different configuration) afterwards.
    pub async fn stop(self) {
        drop(self.stop_channel);
        let _ = self.join_handle.await;
    }

    fn detach_inner(self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn(async move {
            // park the stop channel in the spawned task so it is dropped
            // only when the task is aborted
            let _stop_channel = self.stop_channel;
            self.join_handle.await.ok();
        })
    }

    /// Detach the agent so dropping the handle no longer stops it.
    pub fn detach(self) {
        self.detach_inner();
    }
}

/// The profiling agent.
///
/// Spawning resolves configuration (consulting the metadata server for
/// anything unset), starts the enabled samplers, and launches the loop as
/// a tokio task. The task never keeps the process alive on its own and
/// runs until the process exits, a non-retriable control-plane rejection,
/// or an explicit stop through [`RunningProfiler`].
pub struct Profiler {
    config: Config,
    sampler: Box<dyn Sampler>,
    backend: Option<Box<dyn ProfilerBackend>>,
}

impl Profiler {
    /// Start the agent and detach it, returning the loop's
    /// [`tokio::task::JoinHandle`] for crash observation.
    ///
    /// Fails if configuration is invalid ([`ConfigError`]) or the
    /// samplers cannot be initialized. Must be called within a tokio
    /// runtime.
    pub async fn spawn(self) -> Result<tokio::task::JoinHandle<()>, StartError> {
        self.spawn_controllable()
            .await
            .map(RunningProfiler::detach_inner)
    }

    /// Like [`Profiler::spawn`], but returns a [`RunningProfiler`] that
    /// can stop the agent. Stopping releases the process-wide agent slot,
    /// which allows spawning a reconfigured agent afterwards.
    pub async fn spawn_controllable(self) -> Result<RunningProfiler, StartError> {
        if AGENT_ACTIVE.swap(true, Ordering::SeqCst) {
            tracing::warn!("refusing to start a second profiling agent in this process");
            return Err(StartError::AlreadyRunning);
        }
        match self.spawn_inner().await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                AGENT_ACTIVE.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn spawn_inner(self) -> Result<RunningProfiler, StartError> {
        let Profiler {
            config,
            sampler,
            backend,
        } = self;

        let config = config.with_environment()?;
        let needs_metadata =
            config.project_id.is_none() || config.zone.is_none() || config.instance.is_none();
        let metadata = if needs_metadata {
            load_gce_metadata().await
        } else {
            GceMetadata::default()
        };
        let config = config.resolve(&metadata)?;
        tracing::info!(
            project_id = %config.project_id,
            service = %config.service,
            log_level = config.log_level,
            "profiling agent configured"
        );

        let backend = match backend {
            Some(backend) => backend,
            None => Box::new(ApiClient::new(config.api_endpoint.clone(), None)?)
                as Box<dyn ProfilerBackend>,
        };

        let mut state = AgentState::new(config, sampler, backend)?;
        let (stop_channel, mut stop_rx) = tokio::sync::oneshot::channel();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = &mut stop_rx => {
                        tracing::info!("agent stop requested");
                        break;
                    }
                    flow = state.iteration() => {
                        if flow.is_break() {
                            break;
                        }
                    }
                }
            }
            state.shutdown();
            AGENT_ACTIVE.store(false, Ordering::SeqCst);
            tracing::info!("profiling agent finished");
        });

        Ok(RunningProfiler {
            stop_channel,
            join_handle,
        })
    }
}

struct AgentState {
    config: ResolvedConfig,
    sampler: Box<dyn Sampler>,
    backend: Box<dyn ProfilerBackend>,
    deployment: Deployment,
    profile_types: Vec<ProfileType>,
    heap_started_nanos: Option<i64>,
}

impl AgentState {
    fn new(
        config: ResolvedConfig,
        sampler: Box<dyn Sampler>,
        backend: Box<dyn ProfilerBackend>,
    ) -> Result<Self, StartError> {
        if !config.disable_time {
            sampler
                .set_sampling_interval(config.time_interval_micros)
                .map_err(StartError::WallSampler)?;
        }
        // heap sampling runs continuously from startup; a heap request
        // snapshots whatever has accumulated
        let mut heap_started_nanos = None;
        if !config.disable_heap {
            sampler
                .start_heap(config.heap_interval_bytes, config.heap_max_stack_depth)
                .map_err(StartError::HeapSampler)?;
            heap_started_nanos = Some(now_nanos());
        }
        let deployment = config.deployment();
        let profile_types = config.enabled_profile_types();
        Ok(AgentState {
            config,
            sampler,
            backend,
            deployment,
            profile_types,
            heap_started_nanos,
        })
    }

    /// One POLL → COLLECT → UPLOAD pass. Breaks only when polling hit a
    /// non-retriable rejection.
    async fn iteration(&mut self) -> ControlFlow<()> {
        let started = Instant::now();

        let request = match self.poll().await {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(%err, "control plane rejected the profile poll, stopping agent");
                return ControlFlow::Break(());
            }
        };
        tracing::debug!(
            name = %request.name,
            profile_type = %request.profile_type,
            "profile requested"
        );

        match self.collect(&request).await {
            Ok(profile_bytes) => {
                let mut request = request;
                request.profile_bytes = Some(profile_bytes);
                if let Err(err) = self.backend.upload_profile(&request).await {
                    // the profile is dropped; the server will ask again
                    tracing::debug!(%err, name = %request.name, "profile upload failed");
                }
            }
            Err(err) => {
                tracing::debug!(%err, "profile collection failed, skipping upload");
            }
        }

        // the long-hanging poll is the real pacing; this floor only kicks
        // in against a server that answers immediately
        let elapsed = started.elapsed();
        if elapsed < self.config.min_profiling_interval {
            tokio::time::sleep(self.config.min_profiling_interval - elapsed).await;
        }
        ControlFlow::Continue(())
    }

    /// POLL until the server hands out a profile, with a constant delay
    /// between retriable failures. The server's own backoff hint wins
    /// over the configured delay when present.
    async fn poll(&mut self) -> Result<ProfileRequest, BackendError> {
        loop {
            match self
                .backend
                .create_profile(&self.deployment, &self.profile_types)
                .await
            {
                Ok(request) => return Ok(request),
                Err(err) if err.is_retriable() => {
                    let backoff = err.server_backoff().unwrap_or(self.config.backoff);
                    tracing::debug!(%err, ?backoff, "profile poll failed, backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// COLLECT: dispatch on the requested kind and produce the transport
    /// encoding (gzip, then base64) of the pprof bytes.
    async fn collect(&mut self, request: &ProfileRequest) -> Result<String, CollectError> {
        let profile = match request.profile_type {
            ProfileType::Wall => self.collect_wall(request).await?,
            ProfileType::Heap => self.collect_heap()?,
            ProfileType::Unspecified => return Err(CollectError::UnknownProfileType),
        };
        Ok(BASE64.encode(profile.encode_gzip()?))
    }

    async fn collect_wall(&mut self, request: &ProfileRequest) -> Result<pprof::Profile, CollectError> {
        if self.config.disable_time {
            return Err(CollectError::TimeDisabled);
        }
        let duration = request
            .duration
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_WALL_DURATION);
        // session names must be unique among concurrent sessions; with one
        // agent per process a wall-clock timestamp is enough
        let name = format!("profile-{}", now_nanos());
        self.sampler.start_wall(&name, false)?;
        let session = WallSession {
            sampler: &*self.sampler,
            name: &name,
            armed: true,
        };
        tokio::time::sleep(duration).await;
        let wall = session.finish()?;
        Ok(pprof::wall_profile(&wall, self.config.time_interval_micros))
    }

    fn collect_heap(&mut self) -> Result<pprof::Profile, CollectError> {
        if self.config.disable_heap {
            return Err(CollectError::HeapDisabled);
        }
        let tree = self.sampler.heap_profile()?;
        let now = now_nanos();
        let duration_nanos = self
            .heap_started_nanos
            .map(|started| now - started)
            .unwrap_or(0);
        Ok(pprof::heap_profile(
            &tree,
            self.config.heap_interval_bytes as i64,
            now,
            duration_nanos,
        ))
    }

    /// Best-effort release of native sampler resources.
    fn shutdown(&mut self) {
        if self.heap_started_nanos.take().is_some() {
            if let Err(err) = self.sampler.stop_heap() {
                tracing::warn!(%err, "unable to stop heap sampler during shutdown");
            }
        }
    }
}

/// Keeps a wall session from leaking when collection is cancelled or
/// fails: dropping an unfinished session issues a best-effort stop so the
/// runtime's profiler is released.
struct WallSession<'a> {
    sampler: &'a dyn Sampler,
    name: &'a str,
    armed: bool,
}

impl WallSession<'_> {
    fn finish(mut self) -> Result<WallProfile, SamplerError> {
        self.armed = false;
        self.sampler.stop_wall(self.name)
    }
}

impl Drop for WallSession<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.sampler.stop_wall(self.name) {
                tracing::warn!(%err, "unable to stop wall session during drop glue");
            }
        }
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
