// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! pprof serialization: call trees in, gzip-compressed `Profile` wire
//! bytes out.
//!
//! The pipeline is deliberately boring: [`builder`] walks the tree the
//! sampler returned and interns frames into flat string/function/location
//! tables, [`profile`] holds the resulting message and emits the tag-
//! length-value bytes of the pprof schema. Everything is built fresh per
//! profile; no state survives a collection.

pub mod builder;
pub mod profile;
pub mod wire;

mod interner;

#[cfg(test)]
pub(crate) mod decode;

pub use builder::{heap_profile, wall_profile};
pub use profile::Profile;
