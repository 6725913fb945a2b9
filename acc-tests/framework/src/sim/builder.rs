// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use vsphere_builder_config::TemplateDocument;

use super::{CloneRequest, SimVcenter};
use crate::artifact::Artifact;
use crate::builder::{BuildError, ImageBuilder};

/// Builds VMs by cloning a template inside a [`SimVcenter`].
///
/// The builder reads everything it needs from the rendered document, the
/// same way an external builder would, so a malformed document fails here.
pub struct SimBuilder {
    vcenter: Arc<SimVcenter>,
}

impl SimBuilder {
    pub(crate) fn new(vcenter: Arc<SimVcenter>) -> Self {
        Self { vcenter }
    }
}

#[async_trait]
impl ImageBuilder for SimBuilder {
    async fn build(
        &self,
        template: &TemplateDocument,
    ) -> Result<Vec<Artifact>, BuildError> {
        let config = vsphere_builder_config::parse(template.as_str())?;
        self.vcenter.authenticate(&config.connection)?;

        let vm = self.vcenter.clone_vm(&CloneRequest {
            template: &config.template,
            vm_name: &config.vm_name,
            host: &config.host,
            resource_pool: config.resource_pool.as_deref(),
            linked: config.is_linked_clone(),
        })?;
        info!(
            %vm,
            name = %config.vm_name,
            linked = config.is_linked_clone(),
            "build finished"
        );

        Ok(vec![Artifact::vm(config.vm_name)])
    }

    async fn destroy(&self, artifact: &Artifact) -> Result<(), BuildError> {
        let vm = self.vcenter.remove_vm(&artifact.name)?;
        info!(%vm, name = %artifact.name, "destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::ConnectFailure;
    use crate::sim::test_lab;
    use vsphere_builder_config::BuildConfig;

    fn config(vm_name: &str) -> BuildConfig {
        let lab = test_lab();
        BuildConfig::new(
            lab.connection,
            lab.placement.template,
            vm_name,
            lab.placement.host,
        )
    }

    async fn build(
        sim: &Arc<SimVcenter>,
        config: &BuildConfig,
    ) -> Result<Vec<Artifact>, BuildError> {
        sim.builder().build(&TemplateDocument::new(config).unwrap()).await
    }

    #[tokio::test]
    async fn builds_one_vm_artifact() {
        let sim = Arc::new(SimVcenter::from_lab(&test_lab()).unwrap());
        let artifacts = build(&sim, &config("test-1")).await.unwrap();

        assert_eq!(artifacts, vec![Artifact::vm("test-1")]);
        assert!(sim.vm_exists("test-1"));
        assert_eq!(sim.open_sessions(), 0);
    }

    #[tokio::test]
    async fn destroying_an_artifact_frees_its_name() {
        let sim = Arc::new(SimVcenter::from_lab(&test_lab()).unwrap());
        let builder = sim.builder();
        let artifacts = build(&sim, &config("test-1")).await.unwrap();

        builder.destroy(&artifacts[0]).await.unwrap();
        assert!(!sim.vm_exists("test-1"));
        assert!(matches!(
            builder.destroy(&artifacts[0]).await,
            Err(BuildError::ArtifactNotFound(_))
        ));
        build(&sim, &config("test-1")).await.unwrap();
    }

    #[tokio::test]
    async fn name_collisions_are_refused() {
        let sim = Arc::new(SimVcenter::from_lab(&test_lab()).unwrap());
        build(&sim, &config("test-1")).await.unwrap();

        assert!(matches!(
            build(&sim, &config("test-1")).await,
            Err(BuildError::VmExists(name)) if name == "test-1"
        ));
        assert!(matches!(
            build(&sim, &config("basic")).await,
            Err(BuildError::VmExists(_))
        ));
    }

    #[tokio::test]
    async fn placement_must_exist() {
        let sim = Arc::new(SimVcenter::from_lab(&test_lab()).unwrap());

        let mut missing_template = config("test-1");
        missing_template.template = "windows".to_owned();
        assert!(matches!(
            build(&sim, &missing_template).await,
            Err(BuildError::TemplateNotFound(_))
        ));

        let mut missing_host = config("test-1");
        missing_host.host = "esxi-9.vsphere55.test".to_owned();
        assert!(matches!(
            build(&sim, &missing_host).await,
            Err(BuildError::HostNotFound(_))
        ));

        let mut missing_pool = config("test-1");
        missing_pool.in_resource_pool("no-such-pool");
        assert!(matches!(
            build(&sim, &missing_pool).await,
            Err(BuildError::ResourcePoolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn linked_clone_needs_a_snapshot() {
        let sim = Arc::new(SimVcenter::from_lab(&test_lab()).unwrap());
        let mut flat = config("test-1");
        flat.template = "flat".to_owned();
        flat.linked_clone(true);

        assert!(matches!(
            build(&sim, &flat).await,
            Err(BuildError::NoSnapshot(template)) if template == "flat"
        ));
    }

    #[tokio::test]
    async fn builder_authenticates_with_the_document_credentials() {
        let sim = Arc::new(SimVcenter::from_lab(&test_lab()).unwrap());
        let mut config = config("test-1");
        config.connection.password = "wrong".to_owned();

        match build(&sim, &config).await {
            Err(BuildError::Connect(err)) => assert!(matches!(
                err.failure,
                ConnectFailure::AuthenticationRejected(_)
            )),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!sim.vm_exists("test-1"));
    }
}
