// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-process simulated vCenter.
//!
//! The simulation holds an inventory built from a lab's `[sim]` table:
//! one compute resource per host with a root resource pool named
//! `Resources`, any child pools the lab lists, and template VMs whose
//! primary disk carries one delta layer per snapshot. It answers the same
//! [`PropertyCollector`] calls a real client would, and [`SimBuilder`]
//! clones VMs into it so the whole build-then-verify flow can run without
//! a hypervisor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use vsphere_builder_config::lab::SimInventory;
use vsphere_builder_config::{ConnectConfig, LabConfig};
use vsphere_types::{
    CloneChain, DiskLayout, ManagedObjectReference, VIRTUAL_MACHINE,
};

use crate::builder::BuildError;
use crate::connection::{ConnectError, ConnectFailure, Connector};
use crate::vim::{
    DynamicProperty, ObjectContent, PropertyCollector, PropertyValue,
    SessionError,
};

mod builder;

pub use builder::SimBuilder;

const DATASTORE: &str = "datastore1";
const ROOT_POOL_NAME: &str = "Resources";
const PRIMARY_DISK_KEY: i32 = 2000;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("lab has no [sim] inventory")]
    NoInventory,
}

struct SimObject {
    name: String,
    props: BTreeMap<&'static str, PropertyValue>,
}

struct SimHost {
    root_pool: ManagedObjectReference,
    child_pools: BTreeMap<String, ManagedObjectReference>,
    host: ManagedObjectReference,
}

struct SimTemplate {
    vm: ManagedObjectReference,
    snapshot_depth: usize,
}

#[derive(Default)]
struct SimState {
    objects: BTreeMap<ManagedObjectReference, SimObject>,
    hosts: BTreeMap<String, SimHost>,
    templates: BTreeMap<String, SimTemplate>,
    next_id: u64,
    open_sessions: usize,
    unreachable: bool,
    fail_property_reads: bool,
}

impl SimState {
    fn alloc(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn insert(
        &mut self,
        moref: ManagedObjectReference,
        name: &str,
        props: Vec<(&'static str, PropertyValue)>,
    ) {
        let mut props: BTreeMap<_, _> = props.into_iter().collect();
        props.insert("name", PropertyValue::String(name.to_owned()));
        self.objects.insert(moref, SimObject { name: name.to_owned(), props });
    }

    fn vm_named(&self, name: &str) -> Option<&ManagedObjectReference> {
        self.objects.iter().find_map(|(moref, obj)| {
            let is_vm = moref.is_kind(VIRTUAL_MACHINE);
            (is_vm && obj.name == name).then_some(moref)
        })
    }

    fn primary_chain(&self, vm: &ManagedObjectReference) -> CloneChain {
        match self.objects.get(vm).and_then(|o| o.props.get("layoutEx.disk")) {
            Some(PropertyValue::DiskLayouts(disks)) => disks
                .first()
                .map(|d| d.chain.clone())
                .unwrap_or_default(),
            _ => CloneChain::default(),
        }
    }
}

/// A clone request, as issued by [`SimBuilder`].
pub(crate) struct CloneRequest<'a> {
    pub template: &'a str,
    pub vm_name: &'a str,
    pub host: &'a str,
    pub resource_pool: Option<&'a str>,
    pub linked: bool,
}

pub struct SimVcenter {
    server: String,
    username: String,
    password: String,
    self_signed_certificate: bool,
    state: Mutex<SimState>,
}

impl SimVcenter {
    /// Builds a simulated vCenter serving the lab's connection endpoint and
    /// credentials, populated from the lab's `[sim]` table.
    pub fn from_lab(lab: &LabConfig) -> Result<Self, SimError> {
        let inventory = lab.sim.as_ref().ok_or(SimError::NoInventory)?;
        let vcenter = Self {
            server: lab.connection.vcenter_server.clone(),
            username: lab.connection.username.clone(),
            password: lab.connection.password.clone(),
            self_signed_certificate: inventory.self_signed_certificate,
            state: Mutex::new(SimState::default()),
        };
        vcenter.populate(inventory);
        Ok(vcenter)
    }

    fn populate(&self, inventory: &SimInventory) {
        let mut state = self.state.lock().unwrap();

        for host in &inventory.hosts {
            let cluster = ManagedObjectReference::compute_resource(
                state.alloc("domain-s"),
            );
            state.insert(cluster.clone(), &host.name, vec![]);

            let host_ref =
                ManagedObjectReference::host_system(state.alloc("host"));
            state.insert(
                host_ref.clone(),
                &host.name,
                vec![("parent", PropertyValue::Moref(cluster.clone()))],
            );

            let root_pool =
                ManagedObjectReference::resource_pool(state.alloc("resgroup"));
            state.insert(
                root_pool.clone(),
                ROOT_POOL_NAME,
                vec![
                    ("owner", PropertyValue::Moref(cluster.clone())),
                    ("parent", PropertyValue::Moref(cluster.clone())),
                ],
            );

            let mut child_pools = BTreeMap::new();
            for pool_name in &host.resource_pools {
                let pool = ManagedObjectReference::resource_pool(
                    state.alloc("resgroup"),
                );
                state.insert(
                    pool.clone(),
                    pool_name,
                    vec![
                        ("owner", PropertyValue::Moref(cluster.clone())),
                        ("parent", PropertyValue::Moref(root_pool.clone())),
                    ],
                );
                child_pools.insert(pool_name.clone(), pool);
            }

            state.hosts.insert(
                host.name.clone(),
                SimHost { root_pool, child_pools, host: host_ref },
            );
        }

        for template in &inventory.templates {
            // `LabConfig::check` guarantees the host exists.
            let Some(host) = state.hosts.get(&template.host) else {
                continue;
            };
            let (host_ref, pool_ref) =
                (host.host.clone(), host.root_pool.clone());

            let mut layers = vec![disk_file(&template.name, 0)];
            layers.extend(
                (1..=template.snapshot_depth)
                    .map(|i| disk_file(&template.name, i)),
            );

            let vm = ManagedObjectReference::virtual_machine(state.alloc("vm"));
            state.insert(
                vm.clone(),
                &template.name,
                vm_props(host_ref, pool_ref, CloneChain::new(layers)),
            );
            state.templates.insert(
                template.name.clone(),
                SimTemplate { vm, snapshot_depth: template.snapshot_depth },
            );
        }
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(SimConnector { vcenter: Arc::clone(self) })
    }

    pub fn builder(self: &Arc<Self>) -> SimBuilder {
        SimBuilder::new(Arc::clone(self))
    }

    /// The number of sessions that have logged in and not yet logged out.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open_sessions
    }

    /// Makes the endpoint refuse (or accept again) new connections.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Makes every subsequent property read fail with a server fault.
    pub fn fail_property_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_property_reads = fail;
    }

    pub fn vm_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().vm_named(name).is_some()
    }

    /// Checks `config` the way the endpoint's login would, without opening
    /// a session.
    pub(crate) fn authenticate(
        &self,
        config: &ConnectConfig,
    ) -> Result<(), ConnectError> {
        let fail = |failure| ConnectError::new(&config.vcenter_server, failure);

        if config.vcenter_server != self.server {
            return Err(fail(ConnectFailure::Unreachable(format!(
                "lookup {}: no such host",
                config.vcenter_server
            ))));
        }
        if self.state.lock().unwrap().unreachable {
            return Err(fail(ConnectFailure::Unreachable(format!(
                "dial tcp {}:443: connection refused",
                self.server
            ))));
        }
        if self.self_signed_certificate && !config.insecure_connection {
            return Err(fail(ConnectFailure::TlsVerification(
                "x509: certificate signed by unknown authority".to_owned(),
            )));
        }
        if config.username != self.username || config.password != self.password
        {
            return Err(fail(ConnectFailure::AuthenticationRejected(
                config.username.clone(),
            )));
        }

        Ok(())
    }

    pub(crate) fn clone_vm(
        &self,
        req: &CloneRequest<'_>,
    ) -> Result<ManagedObjectReference, BuildError> {
        let mut state = self.state.lock().unwrap();

        let template = state.templates.get(req.template).ok_or_else(|| {
            BuildError::TemplateNotFound(req.template.to_owned())
        })?;
        let (template_vm, snapshot_depth) =
            (template.vm.clone(), template.snapshot_depth);

        let host = state
            .hosts
            .get(req.host)
            .ok_or_else(|| BuildError::HostNotFound(req.host.to_owned()))?;
        let pool = match req.resource_pool {
            None => host.root_pool.clone(),
            Some(ROOT_POOL_NAME) => host.root_pool.clone(),
            Some(name) => host.child_pools.get(name).cloned().ok_or_else(|| {
                BuildError::ResourcePoolNotFound {
                    pool: name.to_owned(),
                    host: req.host.to_owned(),
                }
            })?,
        };
        let host_ref = host.host.clone();

        if state.vm_named(req.vm_name).is_some() {
            return Err(BuildError::VmExists(req.vm_name.to_owned()));
        }

        let chain = if req.linked {
            if snapshot_depth == 0 {
                return Err(BuildError::NoSnapshot(req.template.to_owned()));
            }
            let mut layers =
                state.primary_chain(&template_vm).layers().to_vec();
            layers.push(disk_file(req.vm_name, 1));
            CloneChain::new(layers)
        } else {
            CloneChain::new(vec![disk_file(req.vm_name, 0)])
        };

        let vm = ManagedObjectReference::virtual_machine(state.alloc("vm"));
        debug!(%vm, chain_length = chain.len(), "cloned VM");
        state.insert(vm.clone(), req.vm_name, vm_props(host_ref, pool, chain));
        Ok(vm)
    }

    /// Deletes a cloned VM. Templates cannot be removed this way.
    pub(crate) fn remove_vm(
        &self,
        name: &str,
    ) -> Result<ManagedObjectReference, BuildError> {
        let mut state = self.state.lock().unwrap();
        let vm = state
            .vm_named(name)
            .filter(|_| !state.templates.contains_key(name))
            .cloned()
            .ok_or_else(|| BuildError::ArtifactNotFound(name.to_owned()))?;
        state.objects.remove(&vm);
        Ok(vm)
    }
}

fn disk_file(vm_name: &str, delta: usize) -> String {
    if delta == 0 {
        format!("[{DATASTORE}] {vm_name}/{vm_name}.vmdk")
    } else {
        format!("[{DATASTORE}] {vm_name}/{vm_name}-{delta:06}.vmdk")
    }
}

fn vm_props(
    host: ManagedObjectReference,
    pool: ManagedObjectReference,
    chain: CloneChain,
) -> Vec<(&'static str, PropertyValue)> {
    vec![
        ("runtime.host", PropertyValue::Moref(host)),
        ("resourcePool", PropertyValue::Moref(pool)),
        (
            "layoutEx.disk",
            PropertyValue::DiskLayouts(vec![DiskLayout {
                key: PRIMARY_DISK_KEY,
                chain,
            }]),
        ),
    ]
}

struct SimConnector {
    vcenter: Arc<SimVcenter>,
}

#[async_trait]
impl Connector for SimConnector {
    async fn login(
        &self,
        config: &ConnectConfig,
    ) -> Result<Box<dyn PropertyCollector>, ConnectError> {
        self.vcenter.authenticate(config)?;
        self.vcenter.state.lock().unwrap().open_sessions += 1;
        info!(server = %self.vcenter.server, "simulated session opened");
        Ok(Box::new(SimSession {
            vcenter: Arc::clone(&self.vcenter),
            logged_out: AtomicBool::new(false),
        }))
    }
}

struct SimSession {
    vcenter: Arc<SimVcenter>,
    logged_out: AtomicBool,
}

impl SimSession {
    fn check_session(&self) -> Result<(), SessionError> {
        if self.logged_out.load(Ordering::Acquire) {
            Err(SessionError::NotAuthenticated)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PropertyCollector for SimSession {
    async fn find_by_name(
        &self,
        kind: &str,
        name: &str,
    ) -> Result<Option<ManagedObjectReference>, SessionError> {
        self.check_session()?;
        let state = self.vcenter.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .find(|(moref, obj)| moref.is_kind(kind) && obj.name == name)
            .map(|(moref, _)| moref.clone()))
    }

    async fn retrieve_properties(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> Result<ObjectContent, SessionError> {
        self.check_session()?;
        let state = self.vcenter.state.lock().unwrap();
        if state.fail_property_reads {
            return Err(SessionError::Fault(
                "ServerFaultCode: property collector unavailable".to_owned(),
            ));
        }

        let object = state
            .objects
            .get(obj)
            .ok_or_else(|| SessionError::ManagedObjectNotFound(obj.clone()))?;
        let prop_set = paths
            .iter()
            .filter_map(|path| {
                object.props.get(path).map(|val| DynamicProperty {
                    name: (*path).to_owned(),
                    val: val.clone(),
                })
            })
            .collect();

        Ok(ObjectContent { obj: obj.clone(), prop_set })
    }

    fn logout(&self) {
        if !self.logged_out.swap(true, Ordering::AcqRel) {
            self.vcenter.state.lock().unwrap().open_sessions -= 1;
        }
    }
}

/// The lab used by this crate's tests: one host with a child pool and a
/// `basic` template with a single snapshot.
#[cfg(test)]
pub(crate) fn test_lab() -> LabConfig {
    LabConfig::from_toml_str(
        r#"
[connection]
vcenter_server = "vcenter.vsphere55.test"
username = "root"
password = "jetbrains"
insecure_connection = true

[placement]
template = "basic"
host = "esxi-1.vsphere55.test"
linked_clone_chain_length = 3

[ssh]
username = "jetbrains"
password = "jetbrains"

[sim]
self_signed_certificate = true

[[sim.host]]
name = "esxi-1.vsphere55.test"
resource_pools = ["child-pool"]

[[sim.host]]
name = "esxi-2.vsphere55.test"

[[sim.template]]
name = "basic"
host = "esxi-1.vsphere55.test"
snapshot_depth = 1

[[sim.template]]
name = "flat"
host = "esxi-2.vsphere55.test"
"#,
    )
    .unwrap()
}
