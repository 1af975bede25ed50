// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An in-memory pprof profile graph, with validation and the protobuf codec.
//!
//! Entries reference each other by id, as in the wire format. Strings are
//! stored inline and only interned into a string table when encoding.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::Write,
};

use prost::Message;
use thiserror::Error;

mod proto;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GraphError {
    #[error("invalid profile: {0}")]
    Invalid(String),
    #[error("error writing profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("error decoding profile: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueType {
    pub r#type: String,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub id: u64,
    pub has_functions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Function {
    pub id: u64,
    pub name: String,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub id: u64,
    pub mapping_id: u64,
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Leaf first.
    pub location_ids: Vec<u64>,
    pub values: Vec<i64>,
    pub labels: BTreeMap<String, Vec<String>>,
    pub num_labels: BTreeMap<String, Vec<i64>>,
    /// Units of `num_labels`, by key. When present, there must be one unit
    /// per numeric value.
    pub num_units: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub sample_types: Vec<ValueType>,
    pub samples: Vec<Sample>,
    pub mappings: Vec<Mapping>,
    pub locations: Vec<Location>,
    pub functions: Vec<Function>,
    pub comments: Vec<String>,
}

fn unique_ids(kind: &str, ids: impl Iterator<Item = u64>) -> Result<HashSet<u64>, GraphError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id == 0 {
            return Err(GraphError::Invalid(format!("found {kind} with reserved id 0")));
        }
        if !seen.insert(id) {
            return Err(GraphError::Invalid(format!("multiple {kind}s with same id: {id}")));
        }
    }
    Ok(seen)
}

impl Graph {
    /// Checks that the graph is internally consistent: ids are non-zero and
    /// unique, and every reference points at an existing entry.
    pub fn check_valid(&self) -> Result<(), GraphError> {
        if self.sample_types.is_empty() {
            return Err(GraphError::Invalid("missing sample type information".into()));
        }
        let mappings = unique_ids("mapping", self.mappings.iter().map(|m| m.id))?;
        let functions = unique_ids("function", self.functions.iter().map(|f| f.id))?;
        let locations = unique_ids("location", self.locations.iter().map(|l| l.id))?;

        for location in &self.locations {
            if location.mapping_id != 0 && !mappings.contains(&location.mapping_id) {
                return Err(GraphError::Invalid(format!(
                    "location {} references missing mapping {}",
                    location.id, location.mapping_id
                )));
            }
            for line in &location.lines {
                if !functions.contains(&line.function_id) {
                    return Err(GraphError::Invalid(format!(
                        "location {} references missing function {}",
                        location.id, line.function_id
                    )));
                }
            }
        }

        for (i, sample) in self.samples.iter().enumerate() {
            if sample.values.len() != self.sample_types.len() {
                return Err(GraphError::Invalid(format!(
                    "mismatch: sample has {} values vs. {} types",
                    sample.values.len(),
                    self.sample_types.len()
                )));
            }
            if let Some(id) = sample
                .location_ids
                .iter()
                .find(|&id| !locations.contains(id))
            {
                return Err(GraphError::Invalid(format!(
                    "sample {i} references missing location {id}"
                )));
            }
            for (key, units) in &sample.num_units {
                let values = sample.num_labels.get(key).map_or(0, Vec::len);
                if units.len() != values {
                    return Err(GraphError::Invalid(format!(
                        "mismatch: label {key:?} has {values} values vs. {} units",
                        units.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serializes the graph as an (uncompressed) pprof protobuf.
    pub fn encode(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    pub fn write_to(&self, w: &mut dyn Write) -> Result<(), GraphError> {
        w.write_all(&self.encode())?;
        Ok(())
    }

    fn to_proto(&self) -> proto::Profile {
        let mut strings = StringTable::default();

        let sample_type = self
            .sample_types
            .iter()
            .map(|vt| proto::ValueType {
                r#type: strings.intern(&vt.r#type),
                unit: strings.intern(&vt.unit),
            })
            .collect();

        let sample = self
            .samples
            .iter()
            .map(|s| {
                let mut label = vec![];
                for (key, values) in &s.labels {
                    for value in values {
                        label.push(proto::Label {
                            key: strings.intern(key),
                            str: strings.intern(value),
                            ..Default::default()
                        });
                    }
                }
                for (key, values) in &s.num_labels {
                    let units = s.num_units.get(key);
                    for (i, value) in values.iter().enumerate() {
                        let num_unit = units
                            .and_then(|u| u.get(i))
                            .map_or(0, |u| strings.intern(u));
                        label.push(proto::Label {
                            key: strings.intern(key),
                            num: *value,
                            num_unit,
                            ..Default::default()
                        });
                    }
                }
                proto::Sample {
                    location_id: s.location_ids.clone(),
                    value: s.values.clone(),
                    label,
                }
            })
            .collect();

        let mapping = self
            .mappings
            .iter()
            .map(|m| proto::Mapping {
                id: m.id,
                has_functions: m.has_functions,
                ..Default::default()
            })
            .collect();

        let location = self
            .locations
            .iter()
            .map(|l| proto::Location {
                id: l.id,
                mapping_id: l.mapping_id,
                address: 0,
                line: l
                    .lines
                    .iter()
                    .map(|line| proto::Line {
                        function_id: line.function_id,
                        line: line.line,
                    })
                    .collect(),
            })
            .collect();

        let function = self
            .functions
            .iter()
            .map(|f| {
                let name = strings.intern(&f.name);
                proto::Function {
                    id: f.id,
                    name,
                    system_name: name,
                    filename: strings.intern(&f.filename),
                    start_line: 0,
                }
            })
            .collect();

        let comment = self.comments.iter().map(|c| strings.intern(c)).collect();

        proto::Profile {
            sample_type,
            sample,
            mapping,
            location,
            function,
            string_table: strings.into_vec(),
            time_nanos: 0,
            duration_nanos: 0,
            comment,
        }
    }

    /// Reads back a profile produced by [`encode`](Self::encode).
    ///
    /// A label carrying neither a number nor a unit is read as a string
    /// label, so a unitless numeric label of `0` comes back as `""`.
    pub fn decode(buf: &[u8]) -> Result<Graph, GraphError> {
        let profile = proto::Profile::decode(buf)?;
        let table = &profile.string_table;
        let string = |idx: i64| -> Result<String, GraphError> {
            usize::try_from(idx)
                .ok()
                .and_then(|idx| table.get(idx))
                .cloned()
                .ok_or_else(|| GraphError::Invalid(format!("string index {idx} out of range")))
        };

        let sample_types: Vec<ValueType> = profile
            .sample_type
            .iter()
            .map(|vt| {
                Ok(ValueType {
                    r#type: string(vt.r#type)?,
                    unit: string(vt.unit)?,
                })
            })
            .collect::<Result<_, GraphError>>()?;

        let mut samples = Vec::with_capacity(profile.sample.len());
        for s in &profile.sample {
            let mut sample = Sample {
                location_ids: s.location_id.clone(),
                values: s.value.clone(),
                ..Default::default()
            };
            for label in &s.label {
                let key = string(label.key)?;
                // a zero, unitless number is indistinguishable from "" on the wire
                if label.num == 0 && label.num_unit == 0 {
                    sample.labels.entry(key).or_default().push(string(label.str)?);
                } else {
                    if label.num_unit != 0 {
                        sample
                            .num_units
                            .entry(key.clone())
                            .or_default()
                            .push(string(label.num_unit)?);
                    }
                    sample.num_labels.entry(key).or_default().push(label.num);
                }
            }
            samples.push(sample);
        }

        let mappings = profile
            .mapping
            .iter()
            .map(|m| Mapping {
                id: m.id,
                has_functions: m.has_functions,
            })
            .collect();

        let locations = profile
            .location
            .iter()
            .map(|l| Location {
                id: l.id,
                mapping_id: l.mapping_id,
                lines: l
                    .line
                    .iter()
                    .map(|line| Line {
                        function_id: line.function_id,
                        line: line.line,
                    })
                    .collect(),
            })
            .collect();

        let functions: Vec<Function> = profile
            .function
            .iter()
            .map(|f| {
                Ok(Function {
                    id: f.id,
                    name: string(f.name)?,
                    filename: string(f.filename)?,
                })
            })
            .collect::<Result<_, GraphError>>()?;

        let comments: Vec<String> = profile
            .comment
            .iter()
            .map(|&c| string(c))
            .collect::<Result<_, GraphError>>()?;

        Ok(Graph {
            sample_types,
            samples,
            mappings,
            locations,
            functions,
            comments,
        })
    }

    pub fn function(&self, id: u64) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn location(&self, id: u64) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == id)
    }
}

/// Deduplicating string table; index 0 is always "".
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl Default for StringTable {
    fn default() -> Self {
        StringTable {
            strings: vec![String::new()],
            index: HashMap::from([(String::new(), 0)]),
        }
    }
}

impl StringTable {
    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as i64;
        self.strings.push(s.to_owned());
        self.index.insert(s.to_owned(), idx);
        idx
    }

    fn into_vec(self) -> Vec<String> {
        self.strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_graph() -> Graph {
        Graph {
            sample_types: vec![ValueType {
                r#type: "samples".into(),
                unit: "count".into(),
            }],
            samples: vec![Sample {
                location_ids: vec![2, 1],
                values: vec![3],
                labels: BTreeMap::from([("thread".into(), vec!["main".into()])]),
                num_labels: BTreeMap::from([("tid".into(), vec![12])]),
                num_units: BTreeMap::from([("tid".into(), vec!["id".into()])]),
            }],
            mappings: vec![Mapping {
                id: 1,
                has_functions: true,
            }],
            locations: vec![
                Location {
                    id: 1,
                    mapping_id: 1,
                    lines: vec![Line {
                        function_id: 1,
                        line: 4,
                    }],
                },
                Location {
                    id: 2,
                    mapping_id: 1,
                    lines: vec![Line {
                        function_id: 2,
                        line: 8,
                    }],
                },
            ],
            functions: vec![
                Function {
                    id: 1,
                    name: "main".into(),
                    filename: "main.rs".into(),
                },
                Function {
                    id: 2,
                    name: "work".into(),
                    filename: "main.rs".into(),
                },
            ],
            comments: vec!["hello".into()],
        }
    }

    #[test]
    fn test_valid_graph_decodes_to_itself() {
        let graph = small_graph();
        graph.check_valid().unwrap();
        let decoded = Graph::decode(&graph.encode()).unwrap();
        assert_eq!(decoded, graph);
    }

    #[test]
    fn test_empty_string_label_stays_a_string() {
        let mut graph = small_graph();
        graph.samples[0]
            .labels
            .insert("state".into(), vec![String::new()]);
        let decoded = Graph::decode(&graph.encode()).unwrap();
        assert_eq!(decoded.samples[0].labels["state"], [""]);
        assert!(!decoded.samples[0].num_labels.contains_key("state"));
        assert_eq!(decoded, graph);
    }

    #[test]
    fn test_string_table_dedups() {
        let proto = small_graph().to_proto();
        assert_eq!(proto.string_table[0], "");
        let main_rs = proto
            .string_table
            .iter()
            .filter(|s| s.as_str() == "main.rs")
            .count();
        assert_eq!(main_rs, 1);
        assert_eq!(proto.function[0].filename, proto.function[1].filename);
    }

    #[test]
    fn test_missing_sample_types() {
        let mut graph = small_graph();
        graph.sample_types.clear();
        assert!(matches!(graph.check_valid(), Err(GraphError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_function_id() {
        let mut graph = small_graph();
        graph.functions[1].id = 1;
        let err = graph.check_valid().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid profile: multiple functions with same id: 1"
        );
    }

    #[test]
    fn test_dangling_references() {
        let mut graph = small_graph();
        graph.samples[0].location_ids.push(9);
        assert!(graph.check_valid().is_err());

        let mut graph = small_graph();
        graph.locations[0].lines[0].function_id = 7;
        assert!(graph.check_valid().is_err());

        let mut graph = small_graph();
        graph.locations[0].mapping_id = 5;
        assert!(graph.check_valid().is_err());
    }

    #[test]
    fn test_value_count_mismatch() {
        let mut graph = small_graph();
        graph.samples[0].values.push(1);
        assert!(graph.check_valid().is_err());
    }

    #[test]
    fn test_num_unit_mismatch() {
        let mut graph = small_graph();
        graph.samples[0].num_units.insert("tid".into(), vec![]);
        assert!(graph.check_valid().is_err());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Graph::decode(b"\xff\xff\xff"),
            Err(GraphError::Decode(_))
        ));
    }
}
