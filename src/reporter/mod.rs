// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use async_trait::async_trait;

use crate::batch::ClosedBatch;

pub mod local;

/// Abstraction around handing a finished batch of profiles to a backend.
#[async_trait]
pub trait Reporter: fmt::Debug {
    async fn report(&self, batch: &ClosedBatch) -> Result<(), Box<dyn std::error::Error + Send>>;
}
