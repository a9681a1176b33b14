// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flattening of sampler call trees into pprof profiles.
//!
//! The traversal is the same for every profile kind; what differs is how a
//! node's payload turns into sample values, which callers supply as a
//! closure.

use crate::pprof::profile::{Profile, Sample};
use crate::sampler::{Allocation, SampleNode, WallProfile};

/// Depth-first walk over the tree, interning each frame and handing the
/// emit hook the leaf-first location path. The root node is synthetic and
/// contributes no frame; iteration starts from its children with empty
/// paths.
fn build_profile<P, F>(mut profile: Profile, root: &SampleNode<P>, mut emit: F) -> Profile
where
    F: FnMut(&SampleNode<P>, &[u64], &mut Vec<Sample>),
{
    for child in &root.children {
        visit(child, &[], &mut profile, &mut emit);
    }
    profile
}

fn visit<P, F>(node: &SampleNode<P>, stack: &[u64], profile: &mut Profile, emit: &mut F)
where
    F: FnMut(&SampleNode<P>, &[u64], &mut Vec<Sample>),
{
    let location_id = profile.interner.location_id(&node.frame);
    // leaf-first: this node's frame goes in front of the inherited path
    let mut path = Vec::with_capacity(stack.len() + 1);
    path.push(location_id);
    path.extend_from_slice(stack);
    emit(node, &path, &mut profile.samples);
    for child in &node.children {
        visit(child, &path, profile, emit);
    }
}

/// Build a pprof profile from a finished wall-clock sampling session.
///
/// Every node with a non-zero hit count contributes one sample whose
/// values are the hit count and the wall time it represents, `hits *
/// interval_micros`.
pub fn wall_profile(wall: &WallProfile, interval_micros: i64) -> Profile {
    let mut profile = Profile::new(
        wall.start_time_nanos,
        wall.end_time_nanos - wall.start_time_nanos,
    );
    profile.add_sample_type("samples", "count");
    profile.add_sample_type("time", "microseconds");
    profile.set_period("time", "microseconds", interval_micros);
    build_profile(profile, &wall.root, |node, path, samples| {
        if node.payload > 0 {
            samples.push(Sample {
                location_ids: path.to_vec(),
                values: vec![node.payload, node.payload * interval_micros],
            });
        }
    })
}

/// Build a pprof profile from a snapshot of the sampling heap profiler.
///
/// Every allocation record contributes one sample: the observed count and
/// the bytes those allocations account for, `count * size_bytes`.
pub fn heap_profile(
    root: &SampleNode<Vec<Allocation>>,
    interval_bytes: i64,
    time_nanos: i64,
    duration_nanos: i64,
) -> Profile {
    let mut profile = Profile::new(time_nanos, duration_nanos);
    profile.add_sample_type("samples", "count");
    profile.add_sample_type("space", "bytes");
    profile.set_period("space", "bytes", interval_bytes);
    build_profile(profile, root, |node, path, samples| {
        for alloc in &node.payload {
            samples.push(Sample {
                location_ids: path.to_vec(),
                values: vec![alloc.count, alloc.count * alloc.size_bytes],
            });
        }
    })
}
