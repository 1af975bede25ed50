// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Identity of the host the batches are collected on.

use std::path::Path;

const UNKNOWN_HOST: &str = "unknown";

/// Returns the host name, from `$HOSTNAME` if set, then from the kernel.
/// Falls back to `"unknown"`.
pub fn hostname() -> String {
    hostname_from(
        std::env::var("HOSTNAME").ok(),
        Path::new("/proc/sys/kernel/hostname"),
    )
}

fn hostname_from(env: Option<String>, kernel_file: &Path) -> String {
    let from_env = env.map(|h| h.trim().to_owned()).filter(|h| !h.is_empty());
    if let Some(host) = from_env {
        return host;
    }
    match std::fs::read_to_string(kernel_file) {
        Ok(host) if !host.trim().is_empty() => host.trim().to_owned(),
        Ok(_) => UNKNOWN_HOST.to_owned(),
        Err(err) => {
            tracing::debug!(?err, "unable to read host name");
            UNKNOWN_HOST.to_owned()
        }
    }
}
