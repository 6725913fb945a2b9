// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Point-in-time views of inventory objects, as returned by a property read.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::ManagedObjectReference;

/// The ordered disk-layer files backing one virtual disk, from the base disk
/// to the VM's own top-most delta.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloneChain(Vec<String>);

impl CloneChain {
    pub fn new(layers: Vec<String>) -> Self {
        Self(layers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn layers(&self) -> &[String] {
        &self.0
    }

    /// A full clone owns a single, independent disk layer.
    pub fn is_full_clone(&self) -> bool {
        self.0.len() == 1
    }

    /// A linked clone stacks its own delta on top of one or more layers
    /// shared with its source.
    pub fn is_linked_clone(&self) -> bool {
        self.0.len() > 1
    }
}

/// One entry of a VM's extended disk layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    /// The device key of the virtual disk this layout describes.
    pub key: i32,
    pub chain: CloneChain,
}

/// The clone topology a build is expected to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloneTopology {
    Full,

    /// A linked clone whose primary disk chain has exactly `chain_length`
    /// layers. The depth depends on the snapshot depth of the source
    /// template, so it is a property of the fixture, not of linked clones in
    /// general.
    Linked { chain_length: usize },
}

impl CloneTopology {
    pub fn expected_chain_length(&self) -> usize {
        match self {
            CloneTopology::Full => 1,
            CloneTopology::Linked { chain_length } => *chain_length,
        }
    }

    pub fn matches(&self, chain: &CloneChain) -> bool {
        chain.len() == self.expected_chain_length()
    }
}

impl Display for CloneTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloneTopology::Full => write!(f, "full clone (chain length 1)"),
            CloneTopology::Linked { chain_length } => {
                write!(f, "linked clone (chain length {chain_length})")
            }
        }
    }
}

/// The subset of a VM's properties returned by one batched read. Properties
/// that were not requested are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmSnapshot {
    pub moref: Option<ManagedObjectReference>,
    pub name: Option<String>,
    pub host: Option<ManagedObjectReference>,
    pub resource_pool: Option<ManagedObjectReference>,
    pub disks: Option<Vec<DiskLayout>>,
}

impl VmSnapshot {
    /// Returns the layout of the VM's first disk, if disk layout was read and
    /// the VM has at least one disk.
    pub fn primary_disk(&self) -> Option<&DiskLayout> {
        self.disks.as_ref()?.first()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostSnapshot {
    pub moref: ManagedObjectReference,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePoolSnapshot {
    pub moref: ManagedObjectReference,
    pub name: String,

    /// The compute resource that owns this pool.
    pub owner: ManagedObjectReference,

    /// The pool's parent entity. For a root pool this is the owning compute
    /// resource itself; for a child pool it is another pool.
    pub parent: Option<ManagedObjectReference>,
}

impl ResourcePoolSnapshot {
    pub fn is_root(&self) -> bool {
        self.parent.as_ref() == Some(&self.owner)
    }
}
