// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Converts a live task dump into a pprof profile of task wait durations.

use std::io::{BufRead, Write};

use thiserror::Error;

use crate::{
    pprof::{Function, Graph, GraphError, Line, Location, Mapping, Sample, ValueType},
    stackparse::{self, Frame, StackParseError, Task},
};

/// Virtual frame marking where a truncated stack was cut off.
pub const ELIDED_FRAME: &str = "...additional frames elided...";

const MAPPING_ID: u64 = 1;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConvertError {
    #[error(transparent)]
    Dump(#[from] StackParseError),
    #[error("goroutine wait profile: {0}")]
    Graph(#[from] GraphError),
}

/// Reads a `debug = 2` task dump from `r` and writes the pprof encoding of
/// its wait durations to `w`.
///
/// Tasks that could not be parsed are left out of the profile and listed
/// in its comments instead.
pub fn debug2_to_pprof(r: impl BufRead, w: &mut dyn Write) -> Result<(), ConvertError> {
    let mut tasks = stackparse::parse(r);
    let mut graph = build_graph(&mut tasks);
    let errors = tasks.finish()?;
    graph
        .comments
        .extend(errors.iter().map(|err| format!("error: {err}")));

    graph.check_valid()?;
    graph.write_to(w)?;
    Ok(())
}

/// Builds one sample per task. Every frame gets its own function and
/// location entry, even when identical frames were seen before.
pub fn build_graph(tasks: impl IntoIterator<Item = Task>) -> Graph {
    let mut builder = GraphBuilder::new();
    for task in tasks {
        builder.add_task(task);
    }
    builder.graph
}

struct GraphBuilder {
    graph: Graph,
    function_id: u64,
    location_id: u64,
}

impl GraphBuilder {
    fn new() -> Self {
        GraphBuilder {
            graph: Graph {
                sample_types: vec![ValueType {
                    r#type: "waitduration".into(),
                    unit: "nanoseconds".into(),
                }],
                mappings: vec![Mapping {
                    id: MAPPING_ID,
                    has_functions: true,
                }],
                ..Default::default()
            },
            function_id: 1,
            location_id: 1,
        }
    }

    fn add_task(&mut self, mut task: Task) {
        if task.frames_elided {
            task.stack.push(Frame {
                func: ELIDED_FRAME.into(),
                file: String::new(),
                line: 0,
            });
        }

        let wait = i64::try_from(task.wait.as_nanos()).unwrap_or(i64::MAX);
        let mut sample = Sample {
            values: vec![wait],
            ..Default::default()
        };
        sample.labels.insert("state".into(), vec![task.state]);
        let goid = i64::try_from(task.id).unwrap_or(i64::MAX);
        sample.num_labels.insert("goid".into(), vec![goid]);
        sample.num_units.insert("goid".into(), vec!["id".into()]);

        for frame in task.stack {
            let location_id = self.add_frame(frame);
            sample.location_ids.push(location_id);
        }

        self.graph.samples.push(sample);
    }

    fn add_frame(&mut self, frame: Frame) -> u64 {
        let function_id = self.function_id;
        self.function_id += 1;
        self.graph.functions.push(Function {
            id: function_id,
            name: frame.func,
            filename: frame.file,
        });

        let location_id = self.location_id;
        self.location_id += 1;
        self.graph.locations.push(Location {
            id: location_id,
            mapping_id: MAPPING_ID,
            lines: vec![Line {
                function_id,
                line: i64::from(frame.line),
            }],
        });
        location_id
    }
}
