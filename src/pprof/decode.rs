// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A small reference decoder for the pprof subset this crate emits, used
//! by tests to check the encoder against an independent reading of the
//! wire bytes.

#![allow(clippy::type_complexity)]

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Varint(u64),
    Bytes(Vec<u8>),
}

fn read_varint(data: &[u8], pos: &mut usize) -> u64 {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = data[*pos];
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return result;
        }
        shift += 7;
    }
}

fn read_fields(data: &[u8]) -> Vec<(u32, Value)> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let tag = read_varint(data, &mut pos);
        let field = (tag >> 3) as u32;
        match tag & 0x7 {
            0 => fields.push((field, Value::Varint(read_varint(data, &mut pos)))),
            2 => {
                let len = read_varint(data, &mut pos) as usize;
                fields.push((field, Value::Bytes(data[pos..pos + len].to_vec())));
                pos += len;
            }
            wire_type => panic!("unexpected wire type {wire_type}"),
        }
    }
    fields
}

fn packed_u64(value: &Value) -> Vec<u64> {
    match value {
        // a single unpacked element is also legal on the wire
        Value::Varint(v) => vec![*v],
        Value::Bytes(data) => {
            let mut pos = 0;
            let mut out = Vec::new();
            while pos < data.len() {
                out.push(read_varint(data, &mut pos));
            }
            out
        }
    }
}

fn packed_i64(value: &Value) -> Vec<i64> {
    packed_u64(value).into_iter().map(|v| v as i64).collect()
}

fn varint_field(fields: &[(u32, Value)], field: u32) -> u64 {
    fields
        .iter()
        .find_map(|(f, v)| match v {
            Value::Varint(v) if *f == field => Some(*v),
            _ => None,
        })
        .unwrap_or(0)
}

fn bytes_field<'a>(fields: &'a [(u32, Value)], field: u32) -> Option<&'a [u8]> {
    fields.iter().find_map(|(f, v)| match v {
        Value::Bytes(data) if *f == field => Some(data.as_slice()),
        _ => None,
    })
}

fn value_type(data: &[u8]) -> (i64, i64) {
    let fields = read_fields(data);
    (
        varint_field(&fields, 1) as i64,
        varint_field(&fields, 2) as i64,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedFunction {
    pub(crate) id: u64,
    pub(crate) name_idx: i64,
    pub(crate) system_name_idx: i64,
    pub(crate) filename_idx: i64,
    pub(crate) start_line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedLocation {
    pub(crate) id: u64,
    /// `(function_id, line)` pairs.
    pub(crate) lines: Vec<(u64, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct DecodedProfile {
    pub(crate) sample_type: Vec<(i64, i64)>,
    /// `(location_ids, values)` per sample.
    pub(crate) samples: Vec<(Vec<u64>, Vec<i64>)>,
    pub(crate) locations: Vec<DecodedLocation>,
    pub(crate) functions: Vec<DecodedFunction>,
    pub(crate) strings: Vec<String>,
    pub(crate) time_nanos: i64,
    pub(crate) duration_nanos: i64,
    pub(crate) period_type: (i64, i64),
    pub(crate) period: i64,
    pub(crate) default_sample_type_idx: i64,
}

pub(crate) fn decode_profile(data: &[u8]) -> DecodedProfile {
    let mut profile = DecodedProfile::default();
    for (field, value) in read_fields(data) {
        match (field, &value) {
            (1, Value::Bytes(data)) => profile.sample_type.push(value_type(data)),
            (2, Value::Bytes(data)) => {
                let fields = read_fields(data);
                let location_ids = bytes_field(&fields, 1)
                    .map(|data| packed_u64(&Value::Bytes(data.to_vec())))
                    .unwrap_or_default();
                let values = bytes_field(&fields, 2)
                    .map(|data| packed_i64(&Value::Bytes(data.to_vec())))
                    .unwrap_or_default();
                profile.samples.push((location_ids, values));
            }
            (4, Value::Bytes(data)) => {
                let fields = read_fields(data);
                let lines = fields
                    .iter()
                    .filter_map(|(f, v)| match v {
                        Value::Bytes(line) if *f == 4 => {
                            let line_fields = read_fields(line);
                            Some((
                                varint_field(&line_fields, 1),
                                varint_field(&line_fields, 2) as i64,
                            ))
                        }
                        _ => None,
                    })
                    .collect();
                profile.locations.push(DecodedLocation {
                    id: varint_field(&fields, 1),
                    lines,
                });
            }
            (5, Value::Bytes(data)) => {
                let fields = read_fields(data);
                profile.functions.push(DecodedFunction {
                    id: varint_field(&fields, 1),
                    name_idx: varint_field(&fields, 2) as i64,
                    system_name_idx: varint_field(&fields, 3) as i64,
                    filename_idx: varint_field(&fields, 4) as i64,
                    start_line: varint_field(&fields, 5) as i64,
                });
            }
            (6, Value::Bytes(data)) => {
                profile.strings.push(String::from_utf8(data.clone()).unwrap())
            }
            (9, Value::Varint(v)) => profile.time_nanos = *v as i64,
            (10, Value::Varint(v)) => profile.duration_nanos = *v as i64,
            (11, Value::Bytes(data)) => profile.period_type = value_type(data),
            (12, Value::Varint(v)) => profile.period = *v as i64,
            (14, Value::Varint(v)) => profile.default_sample_type_idx = *v as i64,
            (field, value) => panic!("unexpected profile field {field}: {value:?}"),
        }
    }
    profile
}
