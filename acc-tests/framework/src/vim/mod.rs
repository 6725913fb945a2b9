// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The raw management-API surface a vCenter client has to provide.
//!
//! vCenter answers property reads with loosely-typed property sets: a list
//! of `(path, value)` pairs per managed object. [`PropertyCollector`] is the
//! seam a client implements at that level; [`decode`] is the only place
//! those untyped values are turned into the snapshots in [`vsphere_types`].

use async_trait::async_trait;
use thiserror::Error;
use vsphere_types::{DiskLayout, ManagedObjectReference};

pub mod decode;

pub use decode::DecodeError;

/// A property value as returned by the property collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Moref(ManagedObjectReference),
    DiskLayouts(Vec<DiskLayout>),
}

impl PropertyValue {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "xsd:string",
            PropertyValue::Moref(_) => "ManagedObjectReference",
            PropertyValue::DiskLayouts(_) => {
                "ArrayOfVirtualMachineFileLayoutExDiskLayout"
            }
        }
    }
}

/// One `(path, value)` pair of a property read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicProperty {
    pub name: String,
    pub val: PropertyValue,
}

/// The result of reading a set of properties from one managed object. Paths
/// that are unset on the object are absent from `prop_set`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectContent {
    pub obj: ManagedObjectReference,
    pub prop_set: Vec<DynamicProperty>,
}

impl ObjectContent {
    pub fn get(&self, path: &str) -> Option<&PropertyValue> {
        self.prop_set.iter().find(|p| p.name == path).map(|p| &p.val)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has been logged out")]
    NotAuthenticated,

    #[error("managed object {0} has been deleted or does not exist")]
    ManagedObjectNotFound(ManagedObjectReference),

    #[error("server fault: {0}")]
    Fault(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// An authenticated session with a vCenter endpoint.
///
/// Every call is one blocking round trip from the caller's point of view;
/// implementations neither retry nor time out.
#[async_trait]
pub trait PropertyCollector: Send + Sync {
    /// Looks up an inventory object of type `kind` by its display name.
    async fn find_by_name(
        &self,
        kind: &str,
        name: &str,
    ) -> Result<Option<ManagedObjectReference>, SessionError>;

    /// Reads the properties at `paths` from `obj` in a single request.
    async fn retrieve_properties(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> Result<ObjectContent, SessionError>;

    /// Ends the session. Called exactly once, when the owning connection is
    /// dropped; must not block on the network for long.
    fn logout(&self);
}
