// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A reporter that reports into a directory.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};
use thiserror::Error;
use zip::result::ZipError;
use zip::{write::SimpleFileOptions, ZipWriter};

use crate::batch::ClosedBatch;

use super::Reporter;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LocalReporterError {
    #[error("{0}")]
    IoError(#[from] std::io::Error),
    #[error("creating zip file: {0}")]
    ZipError(#[from] ZipError),
    #[error("serializing metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("moving report into place: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("broken clock: {0}")]
    BrokenClock(#[from] SystemTimeError),
    #[error("tokio task: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// Contents of the `metadata.json` entry of each archive.
#[derive(Debug, Serialize)]
pub struct MetadataJson {
    /// Milliseconds since the epoch.
    start: u64,
    end: u64,
    host: String,
    files: Vec<String>,
}

/// A reporter that reports into a directory.
///
/// Each batch is written as `<host>_yyyy-mm-ddTHH-MM-SSZ.zip`, named after the
/// start of the batch, containing every profile under its filename and a
/// `metadata.json`.
#[derive(Debug)]
pub struct LocalReporter {
    directory: PathBuf,
}

impl LocalReporter {
    /// Instantiate a new LocalReporter writing into the provided directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        LocalReporter {
            directory: directory.into(),
        }
    }

    /// Writes the batch archive to disk.
    async fn report_batch(&self, batch: &ClosedBatch) -> Result<(), LocalReporterError> {
        let file_name = make_file_name(batch);
        tracing::debug!("reporting {file_name}");

        let metadata = MetadataJson {
            start: millis_since_epoch(batch.start())?,
            end: millis_since_epoch(batch.end())?,
            host: batch.host().to_owned(),
            files: batch.profiles().iter().map(|p| p.name.clone()).collect(),
        };
        let batch = batch.clone();
        let path = self.directory.join(file_name);
        let directory = self.directory.clone();

        tokio::task::spawn_blocking(move || -> Result<(), LocalReporterError> {
            let zip = make_zip(&batch, &metadata)?;
            let mut file = tempfile::NamedTempFile::new_in(directory)?;
            file.write_all(&zip)?;
            file.persist(path)?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}

fn millis_since_epoch(time: SystemTime) -> Result<u64, SystemTimeError> {
    Ok(time.duration_since(UNIX_EPOCH)?.as_millis() as u64)
}

fn make_file_name(batch: &ClosedBatch) -> String {
    let time: chrono::DateTime<chrono::Utc> = batch.start().into();
    let time = time
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(":", "-");
    let host = batch.host().replace(['/', '_'], "-");
    format!("{host}_{time}.zip")
}

fn make_zip(batch: &ClosedBatch, metadata: &MetadataJson) -> Result<Vec<u8>, LocalReporterError> {
    tracing::debug!("creating zip file");

    let mut zip = ZipWriter::new(Cursor::new(vec![]));
    for profile in batch.profiles() {
        add_bytes_to_zip(&mut zip, &profile.name, &profile.data)?;
    }
    let metadata = serde_json::to_vec(metadata)?;
    add_bytes_to_zip(&mut zip, "metadata.json", &metadata)?;
    Ok(zip.finish()?.into_inner())
}

fn add_bytes_to_zip(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    filename: &str,
    data: &[u8],
) -> Result<(), LocalReporterError> {
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file(filename, options)?;
    zip.write_all(data)?;
    Ok(())
}

#[async_trait]
impl Reporter for LocalReporter {
    async fn report(&self, batch: &ClosedBatch) -> Result<(), Box<dyn std::error::Error + Send>> {
        self.report_batch(batch)
            .await
            .map_err(|e| Box::new(e) as _)
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;
    use std::path::Path;
    use std::time::{Duration, UNIX_EPOCH};

    use crate::{
        batch::{Batch, Profile},
        reporter::{local::LocalReporter, Reporter},
    };

    #[tokio::test]
    async fn test_local_reporter() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = LocalReporter::new(dir.path());

        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut batch = Batch::new(start, "web_1");
        batch.add_profile(Profile {
            name: "cpu.pprof".into(),
            data: b"CPU".to_vec(),
        });
        batch.add_profile(Profile {
            name: "metrics.json".into(),
            data: b"[]".to_vec(),
        });
        let batch = batch.close(start + Duration::from_secs(60));
        reporter.report(&batch).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flat_map(|f| f.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let file_name = entries[0].file_name();
        assert_eq!(
            Path::new(&file_name),
            Path::new("web-1_2023-11-14T22-13-20Z.zip")
        );

        let mut zip = zip::ZipArchive::new(std::fs::File::open(entries[0].path()).unwrap()).unwrap();
        let mut cpu = vec![];
        zip.by_name("cpu.pprof").unwrap().read_to_end(&mut cpu).unwrap();
        assert_eq!(cpu, b"CPU");

        let mut metadata = String::new();
        zip.by_name("metadata.json")
            .unwrap()
            .read_to_string(&mut metadata)
            .unwrap();
        let metadata: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(metadata["start"], 1_700_000_000_000u64);
        assert_eq!(metadata["end"], 1_700_000_060_000u64);
        assert_eq!(metadata["host"], "web_1");
        assert_eq!(metadata["files"], serde_json::json!(["cpu.pprof", "metrics.json"]));
    }

    #[tokio::test]
    async fn test_local_reporter_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = LocalReporter::new(dir.path().join("does-not-exist"));
        let batch = Batch::new(UNIX_EPOCH, "h").close(UNIX_EPOCH);
        assert!(reporter.report(&batch).await.is_err());
    }
}
