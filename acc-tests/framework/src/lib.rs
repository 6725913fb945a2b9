// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The acceptance-test framework: rendering builder templates, running the
//! builder under test, and checking the VMs it produces through a vCenter
//! session.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use camino::Utf8PathBuf;
use tracing::{info, instrument, warn};
use vsphere_builder_config::{
    default_vm_name, BuildConfig, LabConfig, TemplateDocument,
};
use vsphere_types::CloneTopology;

pub mod artifact;
pub mod builder;
pub mod connection;
pub mod sim;
pub mod verify;
pub mod vim;

pub use artifact::Artifact;
pub use builder::{BuildError, ImageBuilder};
pub use connection::{ConnectError, Connection, ConnectionFactory, Connector};
pub use verify::{Expectations, PostBuildVerifier, VerificationReport};

/// The VM name the basic acceptance template uses.
pub const BASIC_VM_NAME: &str = "test-1";

/// The number of distinct names [`default_vm_name`] can produce.
const VM_NAME_SPACE: usize = 1000;

/// Everything a [`Framework`] is assembled from.
pub struct FrameworkParameters {
    pub lab: LabConfig,
    pub connector: Arc<dyn Connector>,
    pub builder: Arc<dyn ImageBuilder>,

    /// When set, every rendered template and the artifacts it produced are
    /// written here.
    pub tmp_directory: Option<Utf8PathBuf>,
}

/// The context handed to every test case.
pub struct Framework {
    lab: LabConfig,
    connections: ConnectionFactory,
    builder: Arc<dyn ImageBuilder>,
    tmp_directory: Option<Utf8PathBuf>,
    sim: Option<Arc<sim::SimVcenter>>,
    issued_names: Mutex<BTreeSet<String>>,
    built: Mutex<Vec<Artifact>>,
}

impl Framework {
    pub fn new(params: FrameworkParameters) -> Self {
        Self {
            lab: params.lab,
            connections: ConnectionFactory::new(params.connector),
            builder: params.builder,
            tmp_directory: params.tmp_directory,
            sim: None,
            issued_names: Mutex::new(BTreeSet::new()),
            built: Mutex::new(Vec::new()),
        }
    }

    /// Builds a framework whose endpoint and builder are a [`sim::SimVcenter`]
    /// populated from the lab's `[sim]` table.
    pub fn simulated(
        lab: LabConfig,
        tmp_directory: Option<Utf8PathBuf>,
    ) -> Result<Self, sim::SimError> {
        let vcenter = Arc::new(sim::SimVcenter::from_lab(&lab)?);
        let mut framework = Self::new(FrameworkParameters {
            connector: vcenter.connector(),
            builder: Arc::new(vcenter.builder()),
            lab,
            tmp_directory,
        });
        framework.sim = Some(vcenter);
        Ok(framework)
    }

    pub fn lab(&self) -> &LabConfig {
        &self.lab
    }

    /// The simulated endpoint, if this framework runs against one.
    pub fn sim(&self) -> Option<&Arc<sim::SimVcenter>> {
        self.sim.as_ref()
    }

    pub fn tmp_directory(&self) -> Option<&Utf8PathBuf> {
        self.tmp_directory.as_ref()
    }

    /// The lab's default option set with a `test-<n>` VM name no other
    /// configuration from this framework has used.
    pub fn default_build_config(&self) -> BuildConfig {
        let mut rng = rand::thread_rng();
        let mut config = BuildConfig::with_defaults(&self.lab, &mut rng);

        let mut issued = self.issued_names.lock().unwrap();
        while issued.contains(&config.vm_name) && issued.len() < VM_NAME_SPACE
        {
            config.named(default_vm_name(&mut rng));
        }
        issued.insert(config.vm_name.clone());
        config
    }

    /// The lab's default option set under the fixed name [`BASIC_VM_NAME`].
    pub fn basic_build_config(&self) -> BuildConfig {
        let mut config =
            BuildConfig::with_defaults(&self.lab, &mut rand::thread_rng());
        config.named(BASIC_VM_NAME);
        self.issued_names.lock().unwrap().insert(BASIC_VM_NAME.to_owned());
        config
    }

    /// The topology a linked clone of the lab's template has.
    pub fn linked_topology(&self) -> CloneTopology {
        CloneTopology::Linked {
            chain_length: self.lab.placement.linked_clone_chain_length,
        }
    }

    /// Everything `config` asks for, with the lab's linked-clone depth.
    pub fn expectations_for(&self, config: &BuildConfig) -> Expectations {
        Expectations::for_build(
            config,
            self.lab.placement.linked_clone_chain_length,
        )
    }

    /// Renders `config` and runs the builder on it. The artifacts are
    /// remembered so [`Framework::destroy_artifacts`] can remove them.
    #[instrument(skip_all, fields(vm = %config.vm_name))]
    pub async fn build(
        &self,
        config: &BuildConfig,
    ) -> anyhow::Result<Vec<Artifact>> {
        let document =
            TemplateDocument::new(config).context("rendering template")?;
        if let Some(dir) = &self.tmp_directory {
            let path = dir.join(format!("{}.json", config.vm_name));
            document
                .write_to(&path)
                .with_context(|| format!("writing template to {path}"))?;
        }

        let artifacts = self
            .builder
            .build(&document)
            .await
            .with_context(|| format!("building VM {:?}", config.vm_name))?;
        info!(count = artifacts.len(), "build produced artifacts");

        if let Some(dir) = &self.tmp_directory {
            let path = dir.join(format!("{}.artifacts.json", config.vm_name));
            let contents = serde_json::to_string_pretty(&artifacts)?;
            std::fs::write(&path, contents)
                .with_context(|| format!("writing artifacts to {path}"))?;
        }

        self.built.lock().unwrap().extend(artifacts.iter().cloned());
        Ok(artifacts)
    }

    /// Opens a session with the lab's credentials.
    pub async fn connect(&self) -> Result<Connection, ConnectError> {
        self.connections.connect(&self.lab.connection).await
    }

    /// Opens a session and checks `artifacts` against `expectations`. The
    /// session is released before this returns.
    pub async fn verify(
        &self,
        artifacts: &[Artifact],
        expectations: Expectations,
    ) -> anyhow::Result<()> {
        let conn = self.connect().await?;
        let report = PostBuildVerifier::new(expectations)
            .verify(artifacts, &conn)
            .await?;
        report.into_result()?;
        Ok(())
    }

    /// Destroys every artifact built since the last call. All artifacts are
    /// attempted; the first failure is returned.
    #[instrument(skip_all)]
    pub async fn destroy_artifacts(&self) -> anyhow::Result<usize> {
        let built = std::mem::take(&mut *self.built.lock().unwrap());
        let mut first_error = None;
        for artifact in &built {
            if let Err(e) = self.builder.destroy(artifact).await {
                warn!(%artifact, error = %e, "failed to destroy artifact");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e).context("destroying build artifacts"),
            None => Ok(built.len()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::verify::FailedVerification;

    fn framework() -> Framework {
        Framework::simulated(sim::test_lab(), None).unwrap()
    }

    #[test]
    fn default_names_are_not_reused() {
        let framework = framework();
        let basic = framework.basic_build_config();
        assert_eq!(basic.vm_name, BASIC_VM_NAME);

        let names: BTreeSet<String> = (0..200)
            .map(|_| framework.default_build_config().vm_name)
            .collect();
        assert_eq!(names.len(), 200);
        assert!(!names.contains(BASIC_VM_NAME));
        assert!(names.iter().all(|n| n.starts_with("test-")));
    }

    #[tokio::test]
    async fn build_then_verify_then_destroy() {
        let framework = framework();
        let config = framework.default_build_config();

        let artifacts = framework.build(&config).await.unwrap();
        framework
            .verify(&artifacts, framework.expectations_for(&config))
            .await
            .unwrap();

        let sim = framework.sim().unwrap();
        assert!(sim.vm_exists(&config.vm_name));
        assert_eq!(sim.open_sessions(), 0);

        assert_eq!(framework.destroy_artifacts().await.unwrap(), 1);
        assert!(!sim.vm_exists(&config.vm_name));
        assert_eq!(framework.destroy_artifacts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn verification_failures_surface_as_errors() {
        let framework = framework();
        let config = framework.default_build_config();
        let artifacts = framework.build(&config).await.unwrap();

        let expectations =
            Expectations::topology_only(framework.linked_topology());
        let err =
            framework.verify(&artifacts, expectations).await.unwrap_err();
        let failed = err.downcast_ref::<FailedVerification>().unwrap();
        assert_eq!(failed.failures.len(), 1);
    }

    #[tokio::test]
    async fn rendered_templates_are_written_to_the_tmp_directory() {
        let dir = std::env::temp_dir()
            .join(format!("acc-framework-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dir = Utf8PathBuf::from_path_buf(dir).unwrap();

        let framework =
            Framework::simulated(sim::test_lab(), Some(dir.clone())).unwrap();
        let config = framework.basic_build_config();
        framework.build(&config).await.unwrap();

        let written =
            std::fs::read_to_string(dir.join("test-1.json")).unwrap();
        assert_eq!(vsphere_builder_config::parse(&written).unwrap(), config);

        let artifacts: Vec<Artifact> = serde_json::from_str(
            &std::fs::read_to_string(dir.join("test-1.artifacts.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(artifacts, vec![Artifact::vm("test-1")]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
