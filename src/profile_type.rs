// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The kinds of profiles the agent knows how to collect.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// A type of profile that the profiler is able to run.
///
/// Types arriving from configuration are converted with [`ProfileType::from`],
/// which never fails: codes outside the supported range become
/// [`ProfileType::Unknown`], whose name and filename are `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileType {
    /// Memory allocation samples, used to monitor current and historical
    /// memory usage and to look for leaks.
    Heap,
    /// Where the program spends its time while actively consuming CPU.
    Cpu,
    /// Where tasks block waiting on synchronization primitives.
    Block,
    /// Lock contention.
    Mutex,
    /// Stack traces of all live tasks.
    Goroutine,
    /// Stack traces and wait durations of blocked or waiting tasks.
    GoroutineWait,
    /// Top-line counters reported by a [`MetricsSource`](crate::capture::MetricsSource).
    Metrics,
    /// A code that does not name a supported type.
    Unknown(i32),
}

impl ProfileType {
    /// Every supported profile type, in code order.
    pub const ALL: [ProfileType; 7] = [
        ProfileType::Heap,
        ProfileType::Cpu,
        ProfileType::Block,
        ProfileType::Mutex,
        ProfileType::Goroutine,
        ProfileType::GoroutineWait,
        ProfileType::Metrics,
    ];

    /// Short name, also used to look up capture tables.
    pub fn name(&self) -> &'static str {
        match self {
            ProfileType::Heap => "heap",
            ProfileType::Cpu => "cpu",
            ProfileType::Mutex => "mutex",
            ProfileType::Block => "block",
            ProfileType::Goroutine => "goroutine",
            ProfileType::GoroutineWait => "goroutinewait",
            ProfileType::Metrics => "metrics",
            ProfileType::Unknown(_) => "unknown",
        }
    }

    /// The artifact name used on upload. Note that it differs from
    /// [`name`](Self::name) for the task profiles.
    pub fn filename(&self) -> &'static str {
        match self {
            ProfileType::Heap => "heap.pprof",
            ProfileType::Cpu => "cpu.pprof",
            ProfileType::Mutex => "mutex.pprof",
            ProfileType::Block => "block.pprof",
            ProfileType::Goroutine => "goroutines.pprof",
            ProfileType::GoroutineWait => "goroutineswait.pprof",
            ProfileType::Metrics => "metrics.json",
            ProfileType::Unknown(_) => "unknown",
        }
    }

    /// Tag attached to metrics about this profile type.
    pub fn tag(&self) -> String {
        format!("profile_type:{self}")
    }

    /// Whether this is one of the seven collectable types.
    pub fn is_supported(&self) -> bool {
        !matches!(self, ProfileType::Unknown(_))
    }
}

impl From<i32> for ProfileType {
    fn from(code: i32) -> Self {
        match code {
            0 => ProfileType::Heap,
            1 => ProfileType::Cpu,
            2 => ProfileType::Block,
            3 => ProfileType::Mutex,
            4 => ProfileType::Goroutine,
            5 => ProfileType::GoroutineWait,
            6 => ProfileType::Metrics,
            other => ProfileType::Unknown(other),
        }
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized profile type: {0:?}")]
pub struct ParseProfileTypeError(String);

impl FromStr for ProfileType {
    type Err = ParseProfileTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| ParseProfileTypeError(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::ProfileType;

    #[test_case(ProfileType::Heap, "heap", "heap.pprof")]
    #[test_case(ProfileType::Cpu, "cpu", "cpu.pprof")]
    #[test_case(ProfileType::Block, "block", "block.pprof")]
    #[test_case(ProfileType::Mutex, "mutex", "mutex.pprof")]
    #[test_case(ProfileType::Goroutine, "goroutine", "goroutines.pprof")]
    #[test_case(ProfileType::GoroutineWait, "goroutinewait", "goroutineswait.pprof")]
    #[test_case(ProfileType::Metrics, "metrics", "metrics.json")]
    fn test_projections(t: ProfileType, name: &str, filename: &str) {
        assert_eq!(t.name(), name);
        assert_eq!(t.filename(), filename);
        assert_eq!(t.tag(), format!("profile_type:{name}"));
        assert_eq!(name.parse::<ProfileType>().unwrap(), t);
        assert!(t.is_supported());
    }

    #[test]
    fn test_unknown() {
        let t = ProfileType::from(42);
        assert_eq!(t, ProfileType::Unknown(42));
        assert_eq!(t.name(), "unknown");
        assert_eq!(t.filename(), "unknown");
        assert_eq!(t.tag(), "profile_type:unknown");
        assert!(!t.is_supported());
        assert!("unknown".parse::<ProfileType>().is_err());
    }

    #[test]
    fn test_codes_round_trip() {
        for (code, t) in ProfileType::ALL.into_iter().enumerate() {
            assert_eq!(ProfileType::from(code as i32), t);
        }
        assert_eq!(ProfileType::from(-1), ProfileType::Unknown(-1));
    }
}
