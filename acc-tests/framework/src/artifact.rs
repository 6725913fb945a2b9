// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build artifacts: the records a builder returns for what it produced.

use serde::{Deserialize, Serialize};

/// The builder ID carried by artifacts that identify a cloned VM.
pub const VM_BUILDER_ID: &str = "jetbrains.vsphere";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Identifies which builder produced this artifact and therefore what
    /// kind of thing it describes.
    pub builder_id: String,

    pub id: String,

    /// The inventory name of the produced VM.
    pub name: String,

    #[serde(default)]
    pub files: Vec<String>,
}

impl Artifact {
    /// An artifact describing the VM named `name`.
    pub fn vm(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            builder_id: VM_BUILDER_ID.to_owned(),
            id: name.clone(),
            name,
            files: Vec::new(),
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VM: {} ({})", self.name, self.builder_id)
    }
}
