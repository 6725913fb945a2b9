// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fundamental vSphere inventory types shared by the acceptance harness.
//!
//! These are the strongly-typed views of what a vCenter property read
//! returns: managed-object references, the VM/host/resource-pool snapshots
//! the post-build checks consume, and the disk layer chains that distinguish
//! a full clone from a linked clone. Clients (real or simulated) decode into
//! these types; nothing downstream of them sees untyped property values.

use std::fmt::Display;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

mod snapshot;

pub use snapshot::{
    CloneChain, CloneTopology, DiskLayout, HostSnapshot, ResourcePoolSnapshot,
    VmSnapshot,
};

pub const VIRTUAL_MACHINE: &str = "VirtualMachine";
pub const HOST_SYSTEM: &str = "HostSystem";
pub const RESOURCE_POOL: &str = "ResourcePool";
pub const COMPUTE_RESOURCE: &str = "ComputeResource";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MorefParseError {
    #[error("managed object reference {0:?} is not of the form Type:value")]
    MissingSeparator(String),

    #[error("managed object reference {0:?} has an empty type or value")]
    EmptyComponent(String),
}

/// A reference to a managed object in a vCenter inventory, e.g.
/// `VirtualMachine:vm-42`. Supports conversion from and to that string form.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ManagedObjectReference {
    kind: String,
    value: String,
}

impl ManagedObjectReference {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }

    pub fn virtual_machine(value: impl Into<String>) -> Self {
        Self::new(VIRTUAL_MACHINE, value)
    }

    pub fn host_system(value: impl Into<String>) -> Self {
        Self::new(HOST_SYSTEM, value)
    }

    pub fn resource_pool(value: impl Into<String>) -> Self {
        Self::new(RESOURCE_POOL, value)
    }

    pub fn compute_resource(value: impl Into<String>) -> Self {
        Self::new(COMPUTE_RESOURCE, value)
    }

    /// The managed object type, e.g. `HostSystem`.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The object's identifier within its type, e.g. `host-12`.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[inline]
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl FromStr for ManagedObjectReference {
    type Err = MorefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| MorefParseError::MissingSeparator(s.to_owned()))?;

        if kind.is_empty() || value.is_empty() {
            return Err(MorefParseError::EmptyComponent(s.to_owned()));
        }

        Ok(Self::new(kind, value))
    }
}

impl Display for ManagedObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl Serialize for ManagedObjectReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'d> Deserialize<'d> for ManagedObjectReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

/// The VM properties the harness knows how to request in a batched read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VmProperty {
    Name,
    RuntimeHost,
    ResourcePool,
    LayoutExDisk,
}

impl VmProperty {
    pub const ALL: [VmProperty; 4] = [
        VmProperty::Name,
        VmProperty::RuntimeHost,
        VmProperty::ResourcePool,
        VmProperty::LayoutExDisk,
    ];

    /// The vSphere property path for this property.
    pub fn path(&self) -> &'static str {
        match self {
            VmProperty::Name => "name",
            VmProperty::RuntimeHost => "runtime.host",
            VmProperty::ResourcePool => "resourcePool",
            VmProperty::LayoutExDisk => "layoutEx.disk",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.path() == path)
    }
}

impl Display for VmProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}
