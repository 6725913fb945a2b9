// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Opening sessions against a vCenter endpoint and querying it through a
//! typed interface.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument, Span};
use vsphere_builder_config::ConnectConfig;
use vsphere_types::{
    HostSnapshot, ManagedObjectReference, ResourcePoolSnapshot, VmProperty,
    VmSnapshot, VIRTUAL_MACHINE,
};

use crate::vim::{decode, PropertyCollector, SessionError};

/// Why a session could not be established.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectFailure {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("authentication rejected for user {0:?}")]
    AuthenticationRejected(String),

    #[error("TLS certificate verification failed: {0}")]
    TlsVerification(String),
}

/// The single error kind surfaced for any failure to open a session.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot connect to {server}: {failure}")]
pub struct ConnectError {
    pub server: String,
    #[source]
    pub failure: ConnectFailure,
}

impl ConnectError {
    pub fn new(server: impl Into<String>, failure: ConnectFailure) -> Self {
        Self { server: server.into(), failure }
    }
}

/// Something that can log in to a vCenter endpoint. A real SDK client
/// implements this; the harness ships a simulated one.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Logs in with `config`. Certificate verification must be skipped when
    /// `config.insecure_connection` is set.
    async fn login(
        &self,
        config: &ConnectConfig,
    ) -> Result<Box<dyn PropertyCollector>, ConnectError>;
}

/// Opens [`Connection`]s. No retries: the first failure is returned.
#[derive(Clone)]
pub struct ConnectionFactory {
    connector: Arc<dyn Connector>,
}

impl ConnectionFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub async fn connect(
        &self,
        config: &ConnectConfig,
    ) -> Result<Connection, ConnectError> {
        let span = info_span!(
            "vcenter_session",
            server = %config.vcenter_server,
            user = %config.username
        );
        span.in_scope(|| {
            debug!(insecure = config.insecure_connection, "logging in")
        });
        let session =
            self.connector.login(config).instrument(span.clone()).await?;

        span.in_scope(|| info!("session established"));
        Ok(Connection {
            server: config.vcenter_server.clone(),
            session,
            span,
        })
    }
}

/// A live session. The session is logged out when the connection is
/// dropped, whether the test using it passed or failed.
pub struct Connection {
    server: String,
    session: Box<dyn PropertyCollector>,
    span: Span,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Resolves a VM by its inventory name.
    pub async fn find_vm(
        &self,
        name: &str,
    ) -> Result<Option<ManagedObjectReference>, SessionError> {
        self.session.find_by_name(VIRTUAL_MACHINE, name).await
    }

    /// Reads `properties` of a VM in one batched request.
    pub async fn vm_properties(
        &self,
        vm: &ManagedObjectReference,
        properties: &[VmProperty],
    ) -> Result<VmSnapshot, SessionError> {
        let paths: Vec<&str> =
            properties.iter().map(VmProperty::path).collect();
        let content = self.session.retrieve_properties(vm, &paths).await?;
        Ok(decode::vm(&content, properties)?)
    }

    pub async fn host(
        &self,
        host: &ManagedObjectReference,
    ) -> Result<HostSnapshot, SessionError> {
        let content = self
            .session
            .retrieve_properties(host, decode::HOST_PROPERTIES)
            .await?;
        Ok(decode::host(&content)?)
    }

    pub async fn resource_pool(
        &self,
        pool: &ManagedObjectReference,
    ) -> Result<ResourcePoolSnapshot, SessionError> {
        let content = self
            .session
            .retrieve_properties(pool, decode::RESOURCE_POOL_PROPERTIES)
            .await?;
        Ok(decode::resource_pool(&content)?)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _span = self.span.enter();
        info!("logging out");
        self.session.logout();
    }
}
