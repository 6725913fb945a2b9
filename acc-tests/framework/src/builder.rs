// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boundary with the builder under test.

use async_trait::async_trait;
use thiserror::Error;
use vsphere_builder_config::{template::ParseError, TemplateDocument};

use crate::artifact::Artifact;
use crate::connection::ConnectError;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("builder rejected template: {0}")]
    Template(#[from] ParseError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("template VM {0:?} not found")]
    TemplateNotFound(String),

    #[error("host {0:?} not found")]
    HostNotFound(String),

    #[error("resource pool {pool:?} not found on host {host:?}")]
    ResourcePoolNotFound { pool: String, host: String },

    #[error("a VM named {0:?} already exists")]
    VmExists(String),

    #[error("template {0:?} has no snapshot to link a clone against")]
    NoSnapshot(String),

    #[error("artifact {0:?} does not name an existing VM")]
    ArtifactNotFound(String),
}

/// A builder that consumes a rendered template and produces artifacts.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(
        &self,
        template: &TemplateDocument,
    ) -> Result<Vec<Artifact>, BuildError>;

    /// Removes whatever `artifact` describes. Called once per artifact when
    /// the test that produced it has finished.
    async fn destroy(&self, artifact: &Artifact) -> Result<(), BuildError>;
}
