// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Post-build verification of cloned VMs.
//!
//! [`PostBuildVerifier::verify`] checks, in order:
//!
//! 1. that the build produced exactly one artifact,
//! 2. that the artifact describes a VM,
//! 3. that the VM can be found by name,
//! 4. that the properties the remaining checks need can be read in one
//!    batched request,
//!
//! and then, without stopping at the first mismatch, the VM's name, its
//! host, whether its resource pool is a root pool, and the layer count of
//! its primary disk. Failing to reach the endpoint or read from it (steps 3
//! and 4, plus the host and pool reads) is an error; a VM that is reachable
//! but wrong is reported in a [`VerificationReport`].

use thiserror::Error;
use tracing::{info, instrument, warn};
use vsphere_builder_config::BuildConfig;
use vsphere_types::{
    CloneChain, CloneTopology, ManagedObjectReference, VmProperty,
};

use crate::artifact::{Artifact, VM_BUILDER_ID};
use crate::connection::Connection;
use crate::vim::SessionError;

/// A property of the built VM that did not match expectations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("build produced no artifacts")]
    NoArtifacts,

    #[error("expected 1 artifact, got {0}")]
    MultipleArtifacts(usize),

    #[error("unknown artifact: expected builder {expected:?}, got {actual:?}")]
    UnexpectedArtifactType { expected: String, actual: String },

    #[error("invalid VM name: expected {expected:?}, got {actual:?}")]
    NameMismatch { expected: String, actual: String },

    #[error("invalid host name: expected {expected:?}, got {actual:?}")]
    HostMismatch { expected: String, actual: String },

    #[error(
        "not a root resource pool: {pool} is owned by {owner} but its parent \
        is {}",
        .parent.as_ref().map_or_else(|| "<none>".to_owned(), |p| p.to_string())
    )]
    NotRootPool {
        pool: ManagedObjectReference,
        owner: ManagedObjectReference,
        parent: Option<ManagedObjectReference>,
    },

    #[error(
        "unexpected clone topology: expected a {expected}, got a primary \
        disk chain of length {actual}"
    )]
    UnexpectedCloneTopology { expected: CloneTopology, actual: usize },
}

/// An infrastructure failure that prevents verification from completing.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("VM {0:?} not found")]
    VmNotFound(String),

    #[error("cannot look up VM {name:?}")]
    VmLookup {
        name: String,
        #[source]
        source: SessionError,
    },

    #[error("cannot read VM properties of {vm}")]
    PropertyRead {
        vm: ManagedObjectReference,
        #[source]
        source: SessionError,
    },

    #[error("cannot read host properties of {host}")]
    HostRead {
        host: ManagedObjectReference,
        #[source]
        source: SessionError,
    },

    #[error("cannot read resource pool properties of {pool}")]
    PoolRead {
        pool: ManagedObjectReference,
        #[source]
        source: SessionError,
    },
}

/// What the built VM is expected to look like. Checks whose expectation is
/// unset are skipped, and the properties they need are not read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expectations {
    pub builder_id: String,
    pub vm_name: Option<String>,
    pub host: Option<String>,
    pub root_pool: bool,
    pub topology: Option<CloneTopology>,
}

impl Default for Expectations {
    fn default() -> Self {
        Self {
            builder_id: VM_BUILDER_ID.to_owned(),
            vm_name: None,
            host: None,
            root_pool: false,
            topology: None,
        }
    }
}

impl Expectations {
    /// Everything `config` asks for: its VM name and host, a root pool, and
    /// a full or linked clone according to `linked_clone`.
    /// `linked_chain_length` is the chain length a linked clone of the
    /// configured template has. Builds placed in a child pool opt out of the
    /// root-pool check with [`Expectations::in_root_pool`].
    pub fn for_build(config: &BuildConfig, linked_chain_length: usize) -> Self {
        let topology = if config.is_linked_clone() {
            CloneTopology::Linked { chain_length: linked_chain_length }
        } else {
            CloneTopology::Full
        };

        Self {
            vm_name: Some(config.vm_name.clone()),
            host: Some(config.host.clone()),
            root_pool: true,
            topology: Some(topology),
            ..Default::default()
        }
    }

    /// Only checks the clone topology.
    pub fn topology_only(topology: CloneTopology) -> Self {
        Self { topology: Some(topology), ..Default::default() }
    }

    pub fn named(mut self, vm_name: impl Into<String>) -> Self {
        self.vm_name = Some(vm_name.into());
        self
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn in_root_pool(mut self, root_pool: bool) -> Self {
        self.root_pool = root_pool;
        self
    }

    /// The VM properties the enabled checks need.
    pub fn vm_properties(&self) -> Vec<VmProperty> {
        let mut props = Vec::new();
        if self.vm_name.is_some() {
            props.push(VmProperty::Name);
        }
        if self.host.is_some() {
            props.push(VmProperty::RuntimeHost);
        }
        if self.root_pool {
            props.push(VmProperty::ResourcePool);
        }
        if self.topology.is_some() {
            props.push(VmProperty::LayoutExDisk);
        }
        props
    }
}

/// The semantic failures found while verifying one build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// The VM that was inspected, if verification got that far.
    pub vm: Option<ManagedObjectReference>,
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<(), FailedVerification> {
        if self.passed() {
            Ok(())
        } else {
            Err(FailedVerification { failures: self.failures })
        }
    }
}

/// A report with at least one failure, as an error.
#[derive(Debug, Error)]
#[error("{} verification failure(s): {}", .failures.len(), list(.failures))]
pub struct FailedVerification {
    pub failures: Vec<VerificationFailure>,
}

fn list(failures: &[VerificationFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub struct PostBuildVerifier {
    expectations: Expectations,
}

impl PostBuildVerifier {
    pub fn new(expectations: Expectations) -> Self {
        Self { expectations }
    }

    #[instrument(skip_all, fields(artifacts = artifacts.len()))]
    pub async fn verify(
        &self,
        artifacts: &[Artifact],
        conn: &Connection,
    ) -> Result<VerificationReport, VerifyError> {
        let mut report = VerificationReport::default();

        let artifact = match self.single_vm_artifact(artifacts) {
            Ok(artifact) => artifact,
            Err(failure) => {
                warn!(%failure, "artifact check failed");
                report.failures.push(failure);
                return Ok(report);
            }
        };

        let vm = conn
            .find_vm(&artifact.name)
            .await
            .map_err(|source| VerifyError::VmLookup {
                name: artifact.name.clone(),
                source,
            })?
            .ok_or_else(|| VerifyError::VmNotFound(artifact.name.clone()))?;
        report.vm = Some(vm.clone());

        let snapshot = conn
            .vm_properties(&vm, &self.expectations.vm_properties())
            .await
            .map_err(|source| VerifyError::PropertyRead {
                vm: vm.clone(),
                source,
            })?;

        if let (Some(expected), Some(actual)) =
            (&self.expectations.vm_name, &snapshot.name)
        {
            if expected != actual {
                report.failures.push(VerificationFailure::NameMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }

        if let (Some(expected), Some(host_ref)) =
            (&self.expectations.host, &snapshot.host)
        {
            let host = conn.host(host_ref).await.map_err(|source| {
                VerifyError::HostRead { host: host_ref.clone(), source }
            })?;
            if *expected != host.name {
                report.failures.push(VerificationFailure::HostMismatch {
                    expected: expected.clone(),
                    actual: host.name,
                });
            }
        }

        if let (true, Some(pool_ref)) =
            (self.expectations.root_pool, &snapshot.resource_pool)
        {
            let pool = conn.resource_pool(pool_ref).await.map_err(|source| {
                VerifyError::PoolRead { pool: pool_ref.clone(), source }
            })?;
            if !pool.is_root() {
                report.failures.push(VerificationFailure::NotRootPool {
                    pool: pool.moref,
                    owner: pool.owner,
                    parent: pool.parent,
                });
            }
        }

        if let Some(expected) = self.expectations.topology {
            let chain = snapshot.primary_disk().map(|d| &d.chain);
            if chain.map_or(true, CloneChain::is_empty) {
                warn!(%vm, "VM has no primary disk layers");
            }
            let actual = chain.map_or(0, CloneChain::len);
            if actual != expected.expected_chain_length() {
                report.failures.push(
                    VerificationFailure::UnexpectedCloneTopology {
                        expected,
                        actual,
                    },
                );
            }
        }

        for failure in &report.failures {
            warn!(%vm, %failure, "verification failure");
        }
        info!(%vm, failures = report.failures.len(), "verification complete");
        Ok(report)
    }

    fn single_vm_artifact<'a>(
        &self,
        artifacts: &'a [Artifact],
    ) -> Result<&'a Artifact, VerificationFailure> {
        let artifact = match artifacts {
            [] => return Err(VerificationFailure::NoArtifacts),
            [artifact] => artifact,
            many => {
                return Err(VerificationFailure::MultipleArtifacts(many.len()))
            }
        };

        if artifact.builder_id != self.expectations.builder_id {
            return Err(VerificationFailure::UnexpectedArtifactType {
                expected: self.expectations.builder_id.clone(),
                actual: artifact.builder_id.clone(),
            });
        }

        Ok(artifact)
    }
}
