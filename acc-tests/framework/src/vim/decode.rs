// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion of property-collector results into typed snapshots.

use thiserror::Error;
use vsphere_types::{
    DiskLayout, HostSnapshot, ManagedObjectReference, ResourcePoolSnapshot,
    VmProperty, VmSnapshot, HOST_SYSTEM, RESOURCE_POOL, VIRTUAL_MACHINE,
};

use super::{ObjectContent, PropertyValue};

/// The paths read to build a [`HostSnapshot`].
pub const HOST_PROPERTIES: &[&str] = &["name"];

/// The paths read to build a [`ResourcePoolSnapshot`].
pub const RESOURCE_POOL_PROPERTIES: &[&str] = &["name", "owner", "parent"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{obj} is not a {expected}")]
    WrongObjectType { obj: ManagedObjectReference, expected: &'static str },

    #[error("property {path:?} of {obj} is missing")]
    MissingProperty { obj: ManagedObjectReference, path: String },

    #[error(
        "property {path:?} of {obj} has type {actual}, expected {expected}"
    )]
    WrongPropertyType {
        obj: ManagedObjectReference,
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Decodes the properties in `requested` from a VM's property set. Each
/// requested property must be present; everything else is left unset.
pub fn vm(
    content: &ObjectContent,
    requested: &[VmProperty],
) -> Result<VmSnapshot, DecodeError> {
    expect_kind(content, VIRTUAL_MACHINE)?;

    let mut snapshot =
        VmSnapshot { moref: Some(content.obj.clone()), ..Default::default() };
    for prop in requested {
        match prop {
            VmProperty::Name => {
                snapshot.name = Some(string(content, prop.path())?)
            }
            VmProperty::RuntimeHost => {
                snapshot.host = Some(moref(content, prop.path())?)
            }
            VmProperty::ResourcePool => {
                snapshot.resource_pool = Some(moref(content, prop.path())?)
            }
            VmProperty::LayoutExDisk => {
                snapshot.disks = Some(disks(content, prop.path())?)
            }
        }
    }

    Ok(snapshot)
}

pub fn host(content: &ObjectContent) -> Result<HostSnapshot, DecodeError> {
    expect_kind(content, HOST_SYSTEM)?;
    Ok(HostSnapshot {
        moref: content.obj.clone(),
        name: string(content, "name")?,
    })
}

/// Decodes a resource pool. `parent` is optional: an orphaned pool simply
/// has none.
pub fn resource_pool(
    content: &ObjectContent,
) -> Result<ResourcePoolSnapshot, DecodeError> {
    expect_kind(content, RESOURCE_POOL)?;
    let parent = match content.get("parent") {
        None => None,
        Some(_) => Some(moref(content, "parent")?),
    };

    Ok(ResourcePoolSnapshot {
        moref: content.obj.clone(),
        name: string(content, "name")?,
        owner: moref(content, "owner")?,
        parent,
    })
}

fn expect_kind(
    content: &ObjectContent,
    expected: &'static str,
) -> Result<(), DecodeError> {
    if content.obj.is_kind(expected) {
        Ok(())
    } else {
        Err(DecodeError::WrongObjectType { obj: content.obj.clone(), expected })
    }
}

fn lookup<'c>(
    content: &'c ObjectContent,
    path: &str,
) -> Result<&'c PropertyValue, DecodeError> {
    content.get(path).ok_or_else(|| DecodeError::MissingProperty {
        obj: content.obj.clone(),
        path: path.to_owned(),
    })
}

fn wrong_type(
    content: &ObjectContent,
    path: &str,
    expected: &'static str,
    actual: &PropertyValue,
) -> DecodeError {
    DecodeError::WrongPropertyType {
        obj: content.obj.clone(),
        path: path.to_owned(),
        expected,
        actual: actual.type_name(),
    }
}

fn string(content: &ObjectContent, path: &str) -> Result<String, DecodeError> {
    match lookup(content, path)? {
        PropertyValue::String(s) => Ok(s.clone()),
        other => Err(wrong_type(content, path, "xsd:string", other)),
    }
}

fn moref(
    content: &ObjectContent,
    path: &str,
) -> Result<ManagedObjectReference, DecodeError> {
    match lookup(content, path)? {
        PropertyValue::Moref(m) => Ok(m.clone()),
        other => {
            Err(wrong_type(content, path, "ManagedObjectReference", other))
        }
    }
}

fn disks(
    content: &ObjectContent,
    path: &str,
) -> Result<Vec<DiskLayout>, DecodeError> {
    match lookup(content, path)? {
        PropertyValue::DiskLayouts(d) => Ok(d.clone()),
        other => Err(wrong_type(
            content,
            path,
            "ArrayOfVirtualMachineFileLayoutExDiskLayout",
            other,
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vim::DynamicProperty;
    use vsphere_types::CloneChain;

    fn prop(name: &str, val: PropertyValue) -> DynamicProperty {
        DynamicProperty { name: name.to_owned(), val }
    }

    fn vm_content() -> ObjectContent {
        ObjectContent {
            obj: ManagedObjectReference::virtual_machine("vm-42"),
            prop_set: vec![
                prop("name", PropertyValue::String("test-1".to_owned())),
                prop(
                    "runtime.host",
                    PropertyValue::Moref(ManagedObjectReference::host_system(
                        "host-1",
                    )),
                ),
                prop(
                    "layoutEx.disk",
                    PropertyValue::DiskLayouts(vec![DiskLayout {
                        key: 2000,
                        chain: CloneChain::new(vec![
                            "[datastore1] test-1/test-1.vmdk".to_owned(),
                        ]),
                    }]),
                ),
            ],
        }
    }

    #[test]
    fn decodes_only_requested_vm_properties() {
        let snapshot =
            vm(&vm_content(), &[VmProperty::Name, VmProperty::LayoutExDisk])
                .unwrap();
        assert_eq!(snapshot.name.as_deref(), Some("test-1"));
        assert!(snapshot.host.is_none());
        assert!(snapshot.resource_pool.is_none());
        assert!(snapshot.primary_disk().unwrap().chain.is_full_clone());
    }

    #[test]
    fn missing_requested_property_is_an_error() {
        let err = vm(&vm_content(), &[VmProperty::ResourcePool]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingProperty {
                obj: ManagedObjectReference::virtual_machine("vm-42"),
                path: "resourcePool".to_owned(),
            }
        );
    }

    #[test]
    fn wrong_object_and_property_types_are_errors() {
        let mut content = vm_content();
        assert!(matches!(
            host(&content),
            Err(DecodeError::WrongObjectType { expected: HOST_SYSTEM, .. })
        ));

        content.prop_set[0].val = PropertyValue::Moref(
            ManagedObjectReference::virtual_machine("vm-1"),
        );
        assert!(matches!(
            vm(&content, &[VmProperty::Name]),
            Err(DecodeError::WrongPropertyType { expected: "xsd:string", .. })
        ));
    }

    #[test]
    fn pool_without_parent_decodes() {
        let owner = ManagedObjectReference::compute_resource("domain-s1");
        let content = ObjectContent {
            obj: ManagedObjectReference::resource_pool("resgroup-2"),
            prop_set: vec![
                prop("name", PropertyValue::String("Resources".to_owned())),
                prop("owner", PropertyValue::Moref(owner.clone())),
            ],
        };
        let pool = resource_pool(&content).unwrap();
        assert_eq!(pool.owner, owner);
        assert_eq!(pool.parent, None);
        assert!(!pool.is_root());
    }
}
