// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Intern tables mapping call-tree frames onto the flat pprof entity
//! tables with stable identifiers.

use std::collections::HashMap;

use crate::pprof::profile::{Function, Line, Location};
use crate::sampler::Frame;

/// Two modules can each define a function with the same name; the script
/// id keeps them from folding into one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FunctionKey {
    script_id: i64,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LocationKey {
    script_id: i64,
    line: i64,
    column: i64,
    name: String,
}

/// The three pprof intern tables: strings, functions, locations.
///
/// String indices start at 0, which is reserved for `""` and seeded at
/// construction. Function and location ids are their position in the
/// table plus one; id 0 is never handed out. A fresh `Interner` is built
/// per profile so ids never leak across collections.
#[derive(Debug)]
pub(crate) struct Interner {
    strings: Vec<String>,
    string_index: HashMap<String, i64>,
    functions: Vec<Function>,
    function_index: HashMap<FunctionKey, u64>,
    locations: Vec<Location>,
    location_index: HashMap<LocationKey, u64>,
}

impl Interner {
    pub(crate) fn new() -> Self {
        let mut interner = Interner {
            strings: Vec::new(),
            string_index: HashMap::new(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            locations: Vec::new(),
            location_index: HashMap::new(),
        };
        interner.string_id("");
        interner
    }

    /// Index of `s` in the string table, appending it if absent.
    pub(crate) fn string_id(&mut self, s: &str) -> i64 {
        if let Some(&id) = self.string_index.get(s) {
            return id;
        }
        let id = self.strings.len() as i64;
        self.string_index.insert(s.to_owned(), id);
        self.strings.push(s.to_owned());
        id
    }

    /// Function id for `frame`, keyed by `(script_id, name)`.
    pub(crate) fn function_id(&mut self, frame: &Frame) -> u64 {
        let key = FunctionKey {
            script_id: frame.script_id,
            name: frame.name.clone(),
        };
        if let Some(&id) = self.function_index.get(&key) {
            return id;
        }
        let name_idx = self.string_id(&frame.name);
        let filename_idx = self.string_id(&frame.script_name);
        let id = self.functions.len() as u64 + 1;
        self.functions.push(Function {
            id,
            name_idx,
            system_name_idx: name_idx,
            filename_idx,
            start_line: frame.line,
        });
        self.function_index.insert(key, id);
        id
    }

    /// Location id for `frame`, keyed by `(script_id, line, column, name)`.
    /// A new location carries exactly one `Line` referencing the frame's
    /// function.
    pub(crate) fn location_id(&mut self, frame: &Frame) -> u64 {
        let key = LocationKey {
            script_id: frame.script_id,
            line: frame.line,
            column: frame.column,
            name: frame.name.clone(),
        };
        if let Some(&id) = self.location_index.get(&key) {
            return id;
        }
        let function_id = self.function_id(frame);
        let id = self.locations.len() as u64 + 1;
        self.locations.push(Location {
            id,
            lines: vec![Line {
                function_id,
                line: frame.line,
            }],
        });
        self.location_index.insert(key, id);
        id
    }

    pub(crate) fn strings(&self) -> &[String] {
        &self.strings
    }

    pub(crate) fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub(crate) fn locations(&self) -> &[Location] {
        &self.locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, script_id: i64, line: i64, column: i64) -> Frame {
        Frame {
            name: name.to_owned(),
            script_name: format!("script-{script_id}.js"),
            script_id,
            line,
            column,
        }
    }

    #[test]
    fn test_string_table_seeded_with_empty() {
        let mut interner = Interner::new();
        assert_eq!(interner.strings(), [""]);
        assert_eq!(interner.string_id(""), 0);
        assert_eq!(interner.strings().len(), 1);
    }

    #[test]
    fn test_string_intern_idempotent() {
        let mut interner = Interner::new();
        let a = interner.string_id("samples");
        let b = interner.string_id("samples");
        assert_eq!(a, b);
        assert_eq!(a, 1);
        assert_eq!(interner.strings().len(), 2);
    }

    #[test]
    fn test_function_intern_idempotent() {
        let mut interner = Interner::new();
        let f = frame("f", 1, 10, 0);
        let a = interner.function_id(&f);
        let b = interner.function_id(&f);
        assert_eq!(a, b);
        assert_eq!(a, 1);
        assert_eq!(interner.functions().len(), 1);

        let function = &interner.functions()[0];
        assert_eq!(function.name_idx, function.system_name_idx);
        assert_eq!(function.start_line, 10);
    }

    #[test]
    fn test_same_name_different_script_is_distinct() {
        let mut interner = Interner::new();
        let a = interner.function_id(&frame("handler", 1, 5, 0));
        let b = interner.function_id(&frame("handler", 2, 5, 0));
        assert_ne!(a, b);
        assert_eq!(interner.functions().len(), 2);
    }

    #[test]
    fn test_location_intern_idempotent() {
        let mut interner = Interner::new();
        let f = frame("f", 1, 10, 3);
        let a = interner.location_id(&f);
        let b = interner.location_id(&f);
        assert_eq!(a, b);
        assert_eq!(a, 1);
        assert_eq!(interner.locations().len(), 1);
        assert_eq!(interner.functions().len(), 1);
    }

    #[test]
    fn test_location_distinguishes_column() {
        let mut interner = Interner::new();
        let a = interner.location_id(&frame("f", 1, 10, 3));
        let b = interner.location_id(&frame("f", 1, 10, 7));
        assert_ne!(a, b);
        // both call sites still fold onto the one function
        assert_eq!(interner.functions().len(), 1);
        assert_eq!(interner.locations()[0].lines[0].function_id, 1);
        assert_eq!(interner.locations()[1].lines[0].function_id, 1);
    }

    #[test]
    fn test_ids_are_position_plus_one() {
        let mut interner = Interner::new();
        for i in 0..5 {
            let id = interner.location_id(&frame("f", 1, 10 + i, 0));
            assert_eq!(id, i as u64 + 1);
        }
        for (i, location) in interner.locations().iter().enumerate() {
            assert_eq!(location.id, i as u64 + 1);
        }
        for (i, function) in interner.functions().iter().enumerate() {
            assert_eq!(function.id, i as u64 + 1);
        }
    }
}
