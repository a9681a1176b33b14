// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The contract between the agent and the host runtime's native sampling
//! hooks.
//!
//! The agent never unwinds stacks itself. The runtime embedding the agent
//! implements [`Sampler`] over whatever native profiling machinery it has,
//! and the agent drives it: start, wait, stop, serialize the returned
//! tree.

use thiserror::Error;

/// One call-site as reported by the sampler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    /// Function name; may be empty for anonymous frames.
    pub name: String,
    /// Source file or script identifier the function came from.
    pub script_name: String,
    /// Stable numeric id of the script. Distinguishes same-named
    /// functions defined in different sources.
    pub script_id: i64,
    /// Line number of the call site.
    pub line: i64,
    /// Column number; zero when the runtime does not report one.
    pub column: i64,
}

/// A node of the rooted call tree a sampling session produces.
///
/// `P` is the per-node measurement: an `i64` hit count for wall profiles,
/// a list of [`Allocation`] records for heap profiles. Children are
/// ordered, but the order carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleNode<P> {
    /// The call-site this node represents.
    pub frame: Frame,
    /// The measurement recorded at this node.
    pub payload: P,
    /// Deeper frames observed below this call-site.
    pub children: Vec<SampleNode<P>>,
}

/// One allocation record observed at a heap-profile node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// How many allocations of this size were sampled.
    pub count: i64,
    /// Size of each allocation in bytes.
    pub size_bytes: i64,
}

/// The result of a finished wall-clock sampling session.
#[derive(Debug, Clone, PartialEq)]
pub struct WallProfile {
    /// When sampling started, nanoseconds since the epoch.
    pub start_time_nanos: i64,
    /// When sampling stopped, nanoseconds since the epoch.
    pub end_time_nanos: i64,
    /// The sampled call tree; payloads are hit counts.
    pub root: SampleNode<i64>,
}

/// An error surfaced by the native sampling hooks.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SamplerError {
    /// A wall session with this name is already running.
    #[error("a wall sampling session named {0:?} is already active")]
    WallSessionActive(String),
    /// No wall session with this name is running.
    #[error("no wall sampling session named {0:?} is active")]
    UnknownWallSession(String),
    /// The heap profiler has not been started.
    #[error("heap sampling is not running")]
    HeapNotStarted,
    /// Any other failure inside the runtime's hooks.
    #[error("sampler runtime error: {0}")]
    Runtime(String),
}

/// Native sampling hooks of the host runtime.
///
/// At most one wall session is active at a time, keyed by name; the heap
/// profiler is a process-wide singleton. Every call is synchronous from
/// the agent's point of view, even if the runtime samples on its own
/// thread.
pub trait Sampler: Send + Sync {
    /// Set the wall-clock sampling period.
    fn set_sampling_interval(&self, interval_micros: i64) -> Result<(), SamplerError>;

    /// Begin a wall session. `record_samples` asks the runtime to retain
    /// individual sample timestamps; the agent passes `false` since only
    /// aggregated hit counts are serialized.
    fn start_wall(&self, name: &str, record_samples: bool) -> Result<(), SamplerError>;

    /// Finish the named wall session and return its call tree.
    fn stop_wall(&self, name: &str) -> Result<WallProfile, SamplerError>;

    /// Start the sampling heap profiler.
    fn start_heap(&self, interval_bytes: u64, max_stack_depth: u32) -> Result<(), SamplerError>;

    /// Snapshot the current allocation tree. Heap sampling keeps running.
    fn heap_profile(&self) -> Result<SampleNode<Vec<Allocation>>, SamplerError>;

    /// Stop the sampling heap profiler and release its native resources.
    fn stop_heap(&self) -> Result<(), SamplerError>;
}
