// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Profiles collected in one cycle, and the batch that groups them.

use std::time::SystemTime;

/// A finished profile artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Profile type and format, e.g. `cpu.pprof` or `metrics.json`.
    pub name: String,
    pub data: Vec<u8>,
}

/// Profiles of different types collected at roughly the same time.
///
/// A batch is not synchronized: when several collections run concurrently,
/// their results must be appended from a single task.
#[derive(Debug, Clone)]
pub struct Batch {
    start: SystemTime,
    end: Option<SystemTime>,
    host: String,
    profiles: Vec<Profile>,
}

impl Batch {
    pub fn new(start: SystemTime, host: impl Into<String>) -> Self {
        Batch {
            start,
            end: None,
            host: host.into(),
            profiles: vec![],
        }
    }

    pub fn add_profile(&mut self, profile: Profile) {
        self.profiles.push(profile);
    }

    /// Marks the end of the collection cycle. The returned batch can no
    /// longer be appended to.
    pub fn close(mut self, end: SystemTime) -> ClosedBatch {
        self.end = Some(end);
        ClosedBatch(self)
    }

    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Unset until the batch is closed.
    pub fn end(&self) -> Option<SystemTime> {
        self.end
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }
}

/// A read-only view of a batch whose collection cycle is over.
#[derive(Debug, Clone)]
pub struct ClosedBatch(Batch);

impl ClosedBatch {
    pub fn start(&self) -> SystemTime {
        self.0.start
    }

    pub fn end(&self) -> SystemTime {
        // always set by Batch::close
        self.0.end.unwrap_or(self.0.start)
    }

    pub fn host(&self) -> &str {
        &self.0.host
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.0.profiles
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.into(),
            data: name.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_batch_keeps_call_order() {
        let start = UNIX_EPOCH + Duration::from_secs(100);
        let mut batch = Batch::new(start, "host-1");
        for name in ["cpu.pprof", "heap.pprof", "metrics.json"] {
            batch.add_profile(profile(name));
            assert_eq!(batch.end(), None);
        }
        assert_eq!(batch.profiles().len(), 3);

        let end = start + Duration::from_secs(60);
        let batch = batch.close(end);
        assert_eq!(batch.start(), start);
        assert_eq!(batch.end(), end);
        assert_eq!(batch.host(), "host-1");
        let names: Vec<_> = batch.profiles().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["cpu.pprof", "heap.pprof", "metrics.json"]);
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch::new(UNIX_EPOCH, "h").close(UNIX_EPOCH);
        assert!(batch.profiles().is_empty());
    }
}
