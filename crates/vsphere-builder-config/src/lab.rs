// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The lab: the vCenter environment a test run targets.
//!
//! Credentials, placement and the expected shape of clones are injected from
//! a TOML file so the harness itself carries no environment literals. The
//! optional `[sim]` table describes an inventory for the in-process
//! simulated vCenter.

use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::ConnectConfig;

/// The chain length of a linked clone of a template with one snapshot on top
/// of its base disk.
pub const DEFAULT_LINKED_CLONE_CHAIN_LENGTH: usize = 3;

fn default_linked_clone_chain_length() -> usize {
    DEFAULT_LINKED_CLONE_CHAIN_LENGTH
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabConfig {
    pub connection: ConnectConfig,
    pub placement: Placement,

    #[serde(default)]
    pub ssh: Option<SshCredentials>,

    #[serde(default)]
    pub sim: Option<SimInventory>,
}

/// Where builds are placed and what they are expected to look like.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    /// The template VM builds clone from.
    pub template: String,

    /// The ESXi host builds are placed on.
    pub host: String,

    /// The number of disk layers a linked clone of `template` ends up with.
    #[serde(default = "default_linked_clone_chain_length")]
    pub linked_clone_chain_length: usize,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Inventory for the simulated vCenter.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimInventory {
    /// The server presents a certificate clients cannot verify, so only
    /// insecure connections succeed.
    #[serde(default)]
    pub self_signed_certificate: bool,

    #[serde(default, rename = "host")]
    pub hosts: Vec<SimHost>,

    #[serde(default, rename = "template")]
    pub templates: Vec<SimTemplate>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimHost {
    pub name: String,

    /// Child resource pools created under the host's root pool.
    #[serde(default)]
    pub resource_pools: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimTemplate {
    pub name: String,
    pub host: String,

    /// The number of snapshots stacked on the template's base disk.
    #[serde(default)]
    pub snapshot_depth: usize,
}

/// Errors which may be returned when loading a lab description.
#[derive(Error, Debug)]
pub enum LabError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("linked clone chain length must be at least 2, got {0}")]
    ChainTooShort(usize),

    #[error(
        "simulated template {template:?} is placed on unknown host {host:?}"
    )]
    UnknownTemplateHost { template: String, host: String },
}

impl LabConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, LabError> {
        let lab = toml::from_str::<LabConfig>(contents)?;
        lab.check()?;
        Ok(lab)
    }

    pub fn check(&self) -> Result<(), LabError> {
        let depth = self.placement.linked_clone_chain_length;
        if depth < 2 {
            return Err(LabError::ChainTooShort(depth));
        }

        if let Some(sim) = &self.sim {
            for template in &sim.templates {
                if !sim.hosts.iter().any(|h| h.name == template.host) {
                    return Err(LabError::UnknownTemplateHost {
                        template: template.name.clone(),
                        host: template.host.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Parses a TOML file into a lab description.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<LabConfig, LabError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    LabConfig::from_toml_str(&contents)
}

#[cfg(test)]
mod test {
    use super::*;

    const LAB: &str = r#"
[connection]
vcenter_server = "vcenter.vsphere55.test"
username = "root"
password = "jetbrains"
insecure_connection = true

[placement]
template = "basic"
host = "esxi-1.vsphere55.test"

[ssh]
username = "jetbrains"
password = "jetbrains"

[sim]
self_signed_certificate = true

[[sim.host]]
name = "esxi-1.vsphere55.test"
resource_pools = ["child-pool"]

[[sim.template]]
name = "basic"
host = "esxi-1.vsphere55.test"
snapshot_depth = 1
"#;

    #[test]
    fn parse_lab() {
        let lab = LabConfig::from_toml_str(LAB).unwrap();
        assert_eq!(lab.connection.vcenter_server, "vcenter.vsphere55.test");
        assert!(lab.connection.insecure_connection);
        assert_eq!(lab.placement.template, "basic");
        assert_eq!(
            lab.placement.linked_clone_chain_length,
            DEFAULT_LINKED_CLONE_CHAIN_LENGTH
        );
        assert_eq!(lab.ssh.unwrap().username, "jetbrains");

        let sim = lab.sim.unwrap();
        assert!(sim.self_signed_certificate);
        assert_eq!(sim.hosts[0].resource_pools, vec!["child-pool"]);
        assert_eq!(sim.templates[0].snapshot_depth, 1);
    }

    #[test]
    fn lab_can_be_serialized_as_toml() {
        let lab = LabConfig::from_toml_str(LAB).unwrap();
        let serialized = toml::ser::to_string(&lab).unwrap();
        let deserialized = LabConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(lab, deserialized);
    }

    #[test]
    fn reject_shallow_linked_chain() {
        let raw = LAB.replace(
            "host = \"esxi-1.vsphere55.test\"\n\n[ssh]",
            "host = \"esxi-1.vsphere55.test\"\n\
             linked_clone_chain_length = 1\n\n[ssh]",
        );
        assert!(matches!(
            LabConfig::from_toml_str(&raw),
            Err(LabError::ChainTooShort(1))
        ));
    }

    #[test]
    fn reject_template_on_unknown_host() {
        let raw = LAB.replace(
            "name = \"basic\"\nhost = \"esxi-1.vsphere55.test\"",
            "name = \"basic\"\nhost = \"esxi-9.vsphere55.test\"",
        );
        assert!(matches!(
            LabConfig::from_toml_str(&raw),
            Err(LabError::UnknownTemplateHost { .. })
        ));
    }
}
