// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    batch::{Batch, ClosedBatch, Profile},
    capture::{CaptureEngine, CaptureError, CounterMetrics, MetricsSource},
    goroutine_wait::{self, ConvertError},
    metadata,
    profile_type::ProfileType,
    reporter::Reporter,
};
use cadence::{prelude::*, MetricSink, NopMetricSink, StatsdClient};
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};
use thiserror::Error;

const DEFAULT_NAMESPACE: &str = "snapshot_profiler";
const DEFAULT_CPU_DURATION: Duration = Duration::from_secs(10);
const COLLECT_TIME_METRIC: &str = "collect_time";

/// Builds a [`Profiler`]. Only the capture engine is required; everything
/// else has a default.
#[derive(Default)]
pub struct ProfilerBuilder {
    engine: Option<Box<dyn CaptureEngine>>,
    metrics: Option<Box<dyn MetricsSource>>,
    statsd_sink: Option<Box<dyn MetricSink + Send + Sync + std::panic::RefUnwindSafe>>,
    namespace: Option<String>,
    tags: Vec<String>,
    cpu_duration: Option<Duration>,
    host: Option<String>,
    profile_types: Option<Vec<ProfileType>>,
}

impl ProfilerBuilder {
    /// Sets the capture engine providing heap, CPU and capture-table snapshots.
    pub fn with_capture_engine(mut self, e: impl CaptureEngine + 'static) -> ProfilerBuilder {
        self.engine = Some(Box::new(e));
        self
    }

    /// Sets the source of the `metrics.json` profile. Defaults to reporting
    /// no counters.
    pub fn with_metrics_source(mut self, m: impl MetricsSource + 'static) -> ProfilerBuilder {
        self.metrics = Some(Box::new(m));
        self
    }

    /// Sets where collection timings are sent. Defaults to nowhere.
    pub fn with_statsd_sink(
        mut self,
        sink: impl MetricSink + Send + Sync + std::panic::RefUnwindSafe + 'static,
    ) -> ProfilerBuilder {
        self.statsd_sink = Some(Box::new(sink));
        self
    }

    /// Prefix of the timing metrics, `snapshot_profiler` by default.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> ProfilerBuilder {
        self.namespace = Some(namespace.into());
        self
    }

    /// Static `key:value` tags attached to every timing metric.
    pub fn with_tags(
        mut self,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> ProfilerBuilder {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// How long each CPU capture runs.
    pub fn with_cpu_duration(mut self, d: Duration) -> ProfilerBuilder {
        self.cpu_duration = Some(d);
        self
    }

    /// Host name stamped on batches. Detected when not set.
    pub fn with_host(mut self, host: impl Into<String>) -> ProfilerBuilder {
        self.host = Some(host.into());
        self
    }

    /// Profile types collected by [`Profiler::collect_batch`]. Defaults to
    /// CPU and heap. Duplicates are dropped.
    pub fn with_profile_types(
        mut self,
        types: impl IntoIterator<Item = ProfileType>,
    ) -> ProfilerBuilder {
        let mut unique = vec![];
        for t in types {
            if !unique.contains(&t) {
                unique.push(t);
            }
        }
        self.profile_types = Some(unique);
        self
    }

    pub fn build(self) -> Result<Profiler, BuildError> {
        let engine = self.engine.ok_or(BuildError::MissingCaptureEngine)?;
        let namespace = self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let statsd = match self.statsd_sink {
            Some(sink) => StatsdClient::from_sink(namespace, BoxedSink(sink)),
            None => StatsdClient::from_sink(namespace, NopMetricSink),
        };
        Ok(Profiler {
            inner: Arc::new(ProfilerInner {
                engine,
                metrics: self.metrics.unwrap_or_else(|| {
                    Box::new(CounterMetrics::new(Vec::new)) as Box<dyn MetricsSource>
                }),
                statsd,
                tags: self.tags,
                cpu_duration: self.cpu_duration.unwrap_or(DEFAULT_CPU_DURATION),
                host: self.host.unwrap_or_else(metadata::hostname),
                profile_types: self
                    .profile_types
                    .unwrap_or_else(|| vec![ProfileType::Cpu, ProfileType::Heap]),
            }),
        })
    }
}

struct BoxedSink(Box<dyn MetricSink + Send + Sync + std::panic::RefUnwindSafe>);

impl MetricSink for BoxedSink {
    fn emit(&self, metric: &str) -> std::io::Result<usize> {
        self.0.emit(metric)
    }

    fn flush(&self) -> std::io::Result<()> {
        self.0.flush()
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("a capture engine is required")]
    MissingCaptureEngine,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollectError {
    #[error("profile type not implemented: {0:?}")]
    UnsupportedProfileType(ProfileType),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CycleError {
    #[error("reporter: {0}")]
    Reporter(Box<dyn std::error::Error + Send>),
}

struct ProfilerInner {
    engine: Box<dyn CaptureEngine>,
    metrics: Box<dyn MetricsSource>,
    statsd: StatsdClient,
    tags: Vec<String>,
    cpu_duration: Duration,
    host: String,
    profile_types: Vec<ProfileType>,
}

/// Collects profiles through a [`CaptureEngine`].
///
/// Collection is synchronous: [`run_profile`](Self::run_profile) blocks for
/// as long as the capture takes, which for CPU profiles is the configured CPU
/// duration. CPU capture is exclusive process-wide, so callers running
/// several profilers (or several cycles) at once must not overlap CPU
/// collections.
///
/// Cloning is cheap and shares the same engine.
#[derive(Clone)]
pub struct Profiler {
    inner: Arc<ProfilerInner>,
}

impl Profiler {
    pub fn builder() -> ProfilerBuilder {
        ProfilerBuilder::default()
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Collects a single profile of the given type.
    ///
    /// On success, the collection time is reported as a `collect_time`
    /// timing tagged with the static tags and the profile type.
    pub fn run_profile(&self, t: ProfileType) -> Result<Profile, CollectError> {
        let inner = &*self.inner;
        match t {
            ProfileType::Heap => inner.heap_profile(),
            ProfileType::Cpu => inner.cpu_profile(),
            ProfileType::Mutex | ProfileType::Block | ProfileType::Goroutine => {
                inner.lookup_profile(t)
            }
            ProfileType::GoroutineWait => inner.goroutine_wait_profile(),
            ProfileType::Metrics => inner.metrics_profile(),
            ProfileType::Unknown(_) => Err(CollectError::UnsupportedProfileType(t)),
        }
    }

    /// Runs one collection cycle over the configured profile types.
    ///
    /// The CPU profile is collected on its own blocking task while the other
    /// types are collected one after the other on another, so the batch
    /// holds profiles in completion order. Failed types are logged and left
    /// out of the batch.
    pub async fn collect_batch(&self) -> ClosedBatch {
        let mut batch = Batch::new(SystemTime::now(), self.inner.host.clone());

        let (cpu, others): (Vec<ProfileType>, Vec<ProfileType>) = self
            .inner
            .profile_types
            .iter()
            .copied()
            .filter(|t| {
                if !t.is_supported() {
                    tracing::warn!(profile_type = %t, "unsupported profile type, skipping");
                }
                t.is_supported()
            })
            .partition(|&t| t == ProfileType::Cpu);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for group in [cpu, others] {
            if group.is_empty() {
                continue;
            }
            let profiler = self.clone();
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || {
                for t in group {
                    let result = profiler.run_profile(t);
                    if tx.send((t, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        // appends happen only here, on the coordinating task
        while let Some((t, result)) = rx.recv().await {
            match result {
                Ok(profile) => {
                    tracing::debug!(profile_type = %t, bytes = profile.data.len(), "collected profile");
                    batch.add_profile(profile);
                }
                Err(err) => {
                    tracing::warn!(profile_type = %t, ?err, "error collecting profile, skipping");
                }
            }
        }

        let batch = batch.close(SystemTime::now());
        tracing::info!(profiles = batch.profiles().len(), "collection cycle finished");
        batch
    }

    /// Collects a batch and hands it to `reporter`.
    pub async fn run_cycle(
        &self,
        reporter: &(dyn Reporter + Send + Sync),
    ) -> Result<ClosedBatch, CycleError> {
        let batch = self.collect_batch().await;
        reporter.report(&batch).await.map_err(CycleError::Reporter)?;
        Ok(batch)
    }
}

impl ProfilerInner {
    /// Runs `capture`, and if it succeeds reports how long it took and
    /// packages its output under the type's filename.
    fn collect(
        &self,
        t: ProfileType,
        capture: impl FnOnce(&mut Vec<u8>) -> Result<(), CollectError>,
    ) -> Result<Profile, CollectError> {
        let mut buf = vec![];
        let start = Instant::now();
        capture(&mut buf)?;
        let elapsed = start.elapsed();
        self.record_collect_time(t, elapsed);
        Ok(Profile {
            name: t.filename().to_owned(),
            data: buf,
        })
    }

    fn record_collect_time(&self, t: ProfileType, elapsed: Duration) {
        let type_tag = t.tag();
        let mut metric = self.statsd.time_with_tags(COLLECT_TIME_METRIC, elapsed);
        for tag in &self.tags {
            metric = metric.with_tag_value(tag);
        }
        if let Err(err) = metric.with_tag_value(&type_tag).try_send() {
            tracing::warn!(profile_type = %t, ?err, "unable to send collect time");
        }
    }

    fn heap_profile(&self) -> Result<Profile, CollectError> {
        self.collect(ProfileType::Heap, |buf| {
            self.engine.write_heap_profile(buf)?;
            Ok(())
        })
    }

    fn cpu_profile(&self) -> Result<Profile, CollectError> {
        self.collect(ProfileType::Cpu, |buf| {
            self.engine.start_cpu_profile()?;
            tracing::debug!(duration = ?self.cpu_duration, "cpu profile started");
            std::thread::sleep(self.cpu_duration);
            buf.extend(self.engine.stop_cpu_profile()?);
            Ok(())
        })
    }

    fn lookup_profile(&self, t: ProfileType) -> Result<Profile, CollectError> {
        self.collect(t, |buf| {
            self.engine.lookup_profile(t.name(), buf, 0)?;
            Ok(())
        })
    }

    fn goroutine_wait_profile(&self) -> Result<Profile, CollectError> {
        self.collect(ProfileType::GoroutineWait, |buf| {
            let mut text = vec![];
            self.engine
                .lookup_profile(ProfileType::Goroutine.name(), &mut text, 2)?;
            goroutine_wait::debug2_to_pprof(&text[..], buf)?;
            Ok(())
        })
    }

    fn metrics_profile(&self) -> Result<Profile, CollectError> {
        self.collect(ProfileType::Metrics, |buf| {
            self.metrics.report(SystemTime::now(), buf)?;
            Ok(())
        })
    }
}
