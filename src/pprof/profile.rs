// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The pprof `Profile` message model and its wire encoding.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::pprof::interner::Interner;
use crate::pprof::wire::{
    encode_int64, encode_int64_opt, encode_int64s, encode_message, encode_repeated_message,
    encode_strings, encode_uint64_opt, encode_uint64s, WireMessage,
};

/// A `(type, unit)` pair of string-table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ValueType {
    pub(crate) type_idx: i64,
    pub(crate) unit_idx: i64,
}

impl WireMessage for ValueType {
    fn encode(&self, buf: &mut Vec<u8>) {
        encode_int64_opt(1, self.type_idx, buf);
        encode_int64_opt(2, self.unit_idx, buf);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    pub(crate) function_id: u64,
    pub(crate) line: i64,
}

impl WireMessage for Line {
    fn encode(&self, buf: &mut Vec<u8>) {
        encode_uint64_opt(1, self.function_id, buf);
        encode_int64_opt(2, self.line, buf);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Function {
    pub(crate) id: u64,
    pub(crate) name_idx: i64,
    pub(crate) system_name_idx: i64,
    pub(crate) filename_idx: i64,
    pub(crate) start_line: i64,
}

impl WireMessage for Function {
    fn encode(&self, buf: &mut Vec<u8>) {
        encode_uint64_opt(1, self.id, buf);
        encode_int64_opt(2, self.name_idx, buf);
        encode_int64_opt(3, self.system_name_idx, buf);
        encode_int64_opt(4, self.filename_idx, buf);
        encode_int64_opt(5, self.start_line, buf);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) id: u64,
    pub(crate) lines: Vec<Line>,
}

impl WireMessage for Location {
    fn encode(&self, buf: &mut Vec<u8>) {
        encode_uint64_opt(1, self.id, buf);
        // mapping_id (2) and address (3) stay zero: runtime frames have no
        // memory mapping. is_folded (5) stays false.
        encode_repeated_message(4, &self.lines, buf);
    }
}

/// One stack with its measured values. `location_ids` is ordered
/// leaf-first; `values` aligns with the profile's `sample_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sample {
    pub(crate) location_ids: Vec<u64>,
    pub(crate) values: Vec<i64>,
}

impl WireMessage for Sample {
    fn encode(&self, buf: &mut Vec<u8>) {
        encode_uint64s(1, &self.location_ids, buf);
        encode_int64s(2, &self.values, buf);
    }
}

/// A pprof profile being assembled for a single collection.
///
/// The entity tables live in the profile's own [`Interner`]; nothing is
/// shared or reused across collections, which is what keeps the id
/// invariants trivial.
#[derive(Debug)]
pub struct Profile {
    pub(crate) sample_type: Vec<ValueType>,
    pub(crate) samples: Vec<Sample>,
    pub(crate) interner: Interner,
    pub(crate) time_nanos: i64,
    pub(crate) duration_nanos: i64,
    pub(crate) period_type: ValueType,
    pub(crate) period: i64,
    pub(crate) default_sample_type_idx: i64,
}

impl Profile {
    pub(crate) fn new(time_nanos: i64, duration_nanos: i64) -> Self {
        Profile {
            sample_type: Vec::new(),
            samples: Vec::new(),
            interner: Interner::new(),
            time_nanos,
            duration_nanos,
            period_type: ValueType::default(),
            period: 0,
            default_sample_type_idx: 0,
        }
    }

    pub(crate) fn add_sample_type(&mut self, kind: &str, unit: &str) {
        let type_idx = self.interner.string_id(kind);
        let unit_idx = self.interner.string_id(unit);
        self.sample_type.push(ValueType { type_idx, unit_idx });
    }

    pub(crate) fn set_period(&mut self, kind: &str, unit: &str, period: i64) {
        self.period_type = ValueType {
            type_idx: self.interner.string_id(kind),
            unit_idx: self.interner.string_id(unit),
        };
        self.period = period;
    }

    /// Encode the profile into pprof wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1024);
        encode_repeated_message(1, &self.sample_type, &mut buf);
        encode_repeated_message(2, &self.samples, &mut buf);
        // field 3 (mapping) is never populated for runtime profiles
        encode_repeated_message(4, self.interner.locations(), &mut buf);
        encode_repeated_message(5, self.interner.functions(), &mut buf);
        encode_strings(6, self.interner.strings(), &mut buf);
        encode_int64_opt(9, self.time_nanos, &mut buf);
        encode_int64_opt(10, self.duration_nanos, &mut buf);
        if self.period_type != ValueType::default() {
            encode_message(11, &self.period_type, &mut buf);
        }
        encode_int64_opt(12, self.period, &mut buf);
        encode_int64(14, self.default_sample_type_idx, &mut buf);
        buf
    }

    /// Encode and gzip-compress, ready for the base64 transport step.
    pub fn encode_gzip(&self) -> io::Result<Vec<u8>> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&self.encode())?;
        gz.finish()
    }
}
