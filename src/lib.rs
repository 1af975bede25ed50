// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## snapshot profiler agent
//! An in-process agent that captures point-in-time profiles of a running
//! process (heap, CPU, lock contention, live and waiting tasks, custom
//! counters) and groups them into batches for upload.
//!
//! ### Usage
//!
//! The agent does not sample anything by itself. The host runtime's capture
//! primitives are provided through a [`CaptureEngine`], and a [`Profiler`]
//! runs them, timing each collection and packaging the result under the
//! profile type's canonical filename (`cpu.pprof`, `goroutineswait.pprof`,
//! `metrics.json`, ...).
//!
//! ```no_run
//! # use snapshot_profiler_agent::capture::{CaptureEngine, CaptureError};
//! # use snapshot_profiler_agent::profile_type::ProfileType;
//! # use snapshot_profiler_agent::profiler::Profiler;
//! # use snapshot_profiler_agent::reporter::local::LocalReporter;
//! # use std::{io::Write, time::Duration};
//! # struct MyRuntime;
//! # impl CaptureEngine for MyRuntime {
//! #     fn write_heap_profile(&self, _: &mut dyn Write) -> Result<(), CaptureError> { Ok(()) }
//! #     fn start_cpu_profile(&self) -> Result<(), CaptureError> { Ok(()) }
//! #     fn stop_cpu_profile(&self) -> Result<Vec<u8>, CaptureError> { Ok(vec![]) }
//! #     fn lookup_profile(&self, _: &str, _: &mut dyn Write, _: u8) -> Result<(), CaptureError> { Ok(()) }
//! # }
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let profiler = Profiler::builder()
//!     .with_capture_engine(MyRuntime)
//!     .with_cpu_duration(Duration::from_secs(15))
//!     .with_tags(["service:checkout"])
//!     .with_profile_types([ProfileType::Cpu, ProfileType::Heap, ProfileType::GoroutineWait])
//!     .build()?;
//!
//! let reporter = LocalReporter::new("/tmp/profiles");
//! profiler.run_cycle(&reporter).await?;
//! # Ok(())
//! # }
//! ```
//!
//! How often cycles run is up to the caller. CPU capture is a process-wide
//! exclusive resource, so CPU collections must never overlap.
//!
//! ### Waiting tasks
//!
//! The `goroutinewait` profile is built from the human-readable dump of the
//! live task table: the dump is parsed by [`stackparse`], and every task
//! becomes one pprof sample weighted by how long it has been waiting (see
//! [`goroutine_wait`]). Malformed entries are skipped and recorded as comments
//! in the profile.
//!
//! [`CaptureEngine`]: capture::CaptureEngine
//! [`Profiler`]: profiler::Profiler

pub mod batch;
pub mod capture;
pub mod goroutine_wait;
pub mod metadata;
pub mod pprof;
pub mod profile_type;
pub mod profiler;
pub mod reporter;
pub mod stackparse;
