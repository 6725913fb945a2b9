// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for builds driven by the vSphere clone acceptance tests.
//!
//! A [`BuildConfig`] is the typed form of one builder entry in a builder
//! template. It is rendered into a JSON template document by
//! [`template::TemplateDocument`] and can be parsed back with
//! [`template::parse`]. The [`lab`] module describes the environment the
//! tests run against.

use std::collections::BTreeMap;
use std::fmt::Display;

use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub mod lab;
pub mod template;

pub use lab::LabConfig;
pub use template::{parse, render, TemplateDocument};

/// The builder type discriminator every rendered builder entry carries.
pub const BUILDER_TYPE: &str = "test";

/// The key holding the builder type discriminator.
pub const TYPE_KEY: &str = "type";

const VCENTER_SERVER: &str = "vcenter_server";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const INSECURE_CONNECTION: &str = "insecure_connection";
const TEMPLATE: &str = "template";
const VM_NAME: &str = "vm_name";
const HOST: &str = "host";
const RESOURCE_POOL: &str = "resource_pool";
const SSH_USERNAME: &str = "ssh_username";
const SSH_PASSWORD: &str = "ssh_password";
const LINKED_CLONE: &str = "linked_clone";

/// The keys stored in named fields of a [`BuildConfig`].
pub const KNOWN_KEYS: &[&str] = &[
    VCENTER_SERVER,
    USERNAME,
    PASSWORD,
    INSECURE_CONNECTION,
    TEMPLATE,
    VM_NAME,
    HOST,
    RESOURCE_POOL,
    SSH_USERNAME,
    SSH_PASSWORD,
    LINKED_CLONE,
];

/// A scalar option value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    String(String),
}

/// Keys whose fields hold booleans. Every other known key holds a string.
const BOOL_KEYS: &[&str] = &[INSECURE_CONNECTION, LINKED_CLONE];

impl Scalar {
    /// Interprets command-line text as the value of option `key`. Known
    /// string options keep the text as is and known boolean options accept
    /// `true` or `false`. Values for unknown keys are booleans, integers or
    /// strings, whichever parses first.
    pub fn for_key(key: &str, raw: &str) -> Self {
        let as_bool = match raw {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        };

        if BOOL_KEYS.contains(&key) {
            return as_bool
                .map(Scalar::Bool)
                .unwrap_or_else(|| Scalar::String(raw.to_owned()));
        }
        if KNOWN_KEYS.contains(&key) {
            return Scalar::String(raw.to_owned());
        }

        match (as_bool, raw.parse::<i64>()) {
            (Some(b), _) => Scalar::Bool(b),
            (None, Ok(i)) => Scalar::Integer(i),
            (None, Err(_)) => Scalar::String(raw.to_owned()),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<Scalar> for serde_json::Value {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Bool(b) => b.into(),
            Scalar::Integer(i) => i.into(),
            Scalar::String(s) => s.into(),
        }
    }
}

impl TryFrom<serde_json::Value> for Scalar {
    type Error = serde_json::Value;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Bool(b) => Ok(Scalar::Bool(b)),
            serde_json::Value::String(s) => Ok(Scalar::String(s)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Scalar::Integer(i)),
                None => Err(serde_json::Value::Number(n)),
            },
            other => Err(other),
        }
    }
}

/// Errors raised while assembling or validating a [`BuildConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required option {0:?} is missing or empty")]
    MissingField(&'static str),

    #[error("option {key:?} expects a {expected} value, got {actual}")]
    WrongKind { key: String, expected: &'static str, actual: Scalar },

    #[error("option {0:?} is reserved and cannot be overridden")]
    ReservedKey(String),
}

/// Static credentials and transport settings for a vCenter endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectConfig {
    pub vcenter_server: String,
    pub username: String,
    pub password: String,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure_connection: bool,
}

// The password stays out of logs.
impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("vcenter_server", &self.vcenter_server)
            .field("username", &self.username)
            .field("insecure_connection", &self.insecure_connection)
            .finish_non_exhaustive()
    }
}

/// One builder entry of a builder template.
///
/// Required options live in plain fields, optional ones in `Option`s that
/// are omitted from the rendered document when unset. Options the harness
/// does not model are carried verbatim in an extra-options map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildConfig {
    pub connection: ConnectConfig,
    pub template: String,
    pub vm_name: String,
    pub host: String,
    pub resource_pool: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub linked_clone: Option<bool>,
    extra: BTreeMap<String, Scalar>,
}

impl BuildConfig {
    pub fn new(
        connection: ConnectConfig,
        template: impl Into<String>,
        vm_name: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            template: template.into(),
            vm_name: vm_name.into(),
            host: host.into(),
            resource_pool: None,
            ssh_username: None,
            ssh_password: None,
            linked_clone: None,
            extra: BTreeMap::new(),
        }
    }

    /// Builds the default option set for a lab: its connection, template and
    /// host, its SSH credentials, and a randomly numbered VM name of the form
    /// `test-<n>` with `n` in `0..1000`.
    pub fn with_defaults<R: Rng>(lab: &LabConfig, rng: &mut R) -> Self {
        let mut config = Self::new(
            lab.connection.clone(),
            lab.placement.template.clone(),
            default_vm_name(rng),
            lab.placement.host.clone(),
        );
        if let Some(ssh) = &lab.ssh {
            config.ssh_username = Some(ssh.username.clone());
            config.ssh_password = Some(ssh.password.clone());
        }
        config
    }

    pub fn named(&mut self, vm_name: impl Into<String>) -> &mut Self {
        self.vm_name = vm_name.into();
        self
    }

    pub fn linked_clone(&mut self, linked: bool) -> &mut Self {
        self.linked_clone = Some(linked);
        self
    }

    pub fn in_resource_pool(&mut self, pool: impl Into<String>) -> &mut Self {
        self.resource_pool = Some(pool.into());
        self
    }

    /// Whether this configuration asks the builder for a linked clone.
    pub fn is_linked_clone(&self) -> bool {
        self.linked_clone.unwrap_or(false)
    }

    /// Options the harness does not model, in key order.
    pub fn extra(&self) -> &BTreeMap<String, Scalar> {
        &self.extra
    }

    /// Overrides a single option by key. Known keys replace the matching
    /// field and must carry a value of that field's kind; unknown keys are
    /// kept verbatim. The builder type discriminator cannot be overridden.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<Scalar>,
    ) -> Result<&mut Self, ConfigError> {
        let value = value.into();
        match key {
            TYPE_KEY => return Err(ConfigError::ReservedKey(key.to_owned())),
            VCENTER_SERVER => {
                self.connection.vcenter_server = expect_string(key, value)?
            }
            USERNAME => self.connection.username = expect_string(key, value)?,
            PASSWORD => self.connection.password = expect_string(key, value)?,
            INSECURE_CONNECTION => {
                self.connection.insecure_connection = expect_bool(key, value)?
            }
            TEMPLATE => self.template = expect_string(key, value)?,
            VM_NAME => self.vm_name = expect_string(key, value)?,
            HOST => self.host = expect_string(key, value)?,
            RESOURCE_POOL => {
                self.resource_pool = Some(expect_string(key, value)?)
            }
            SSH_USERNAME => {
                self.ssh_username = Some(expect_string(key, value)?)
            }
            SSH_PASSWORD => {
                self.ssh_password = Some(expect_string(key, value)?)
            }
            LINKED_CLONE => self.linked_clone = Some(expect_bool(key, value)?),
            _ => {
                self.extra.insert(key.to_owned(), value);
            }
        }
        Ok(self)
    }

    /// Looks up the value an option will be rendered with.
    pub fn get(&self, key: &str) -> Option<Scalar> {
        self.options().remove(key)
    }

    /// The full option set this configuration renders, excluding the builder
    /// type discriminator.
    pub fn options(&self) -> BTreeMap<String, Scalar> {
        let mut options = self.extra.clone();
        let mut put = |key: &str, value: Option<Scalar>| {
            if let Some(value) = value {
                options.insert(key.to_owned(), value);
            }
        };

        let conn = &self.connection;
        put(VCENTER_SERVER, Some(conn.vcenter_server.as_str().into()));
        put(USERNAME, Some(conn.username.as_str().into()));
        put(PASSWORD, Some(conn.password.as_str().into()));
        put(INSECURE_CONNECTION, Some(conn.insecure_connection.into()));
        put(TEMPLATE, Some(self.template.as_str().into()));
        put(VM_NAME, Some(self.vm_name.as_str().into()));
        put(HOST, Some(self.host.as_str().into()));
        put(RESOURCE_POOL, self.resource_pool.as_deref().map(Scalar::from));
        put(SSH_USERNAME, self.ssh_username.as_deref().map(Scalar::from));
        put(SSH_PASSWORD, self.ssh_password.as_deref().map(Scalar::from));
        put(LINKED_CLONE, self.linked_clone.map(Scalar::from));

        options
    }

    /// Checks that every required option is present and that no extra
    /// option shadows a named one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (VCENTER_SERVER, &self.connection.vcenter_server),
            (USERNAME, &self.connection.username),
            (PASSWORD, &self.connection.password),
            (TEMPLATE, &self.template),
            (VM_NAME, &self.vm_name),
            (HOST, &self.host),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(key));
            }
        }

        if let Some(key) = self.extra.keys().find(|k| {
            k.as_str() == TYPE_KEY || KNOWN_KEYS.contains(&k.as_str())
        }) {
            return Err(ConfigError::ReservedKey(key.clone()));
        }

        Ok(())
    }
}

/// Produces a VM name of the form `test-<n>`, `n` drawn from `0..1000`.
pub fn default_vm_name<R: Rng>(rng: &mut R) -> String {
    format!("test-{}", rng.gen_range(0..1000))
}

pub(crate) fn expect_string(
    key: &str,
    value: Scalar,
) -> Result<String, ConfigError> {
    match value {
        Scalar::String(s) => Ok(s),
        other => Err(ConfigError::WrongKind {
            key: key.to_owned(),
            expected: "string",
            actual: other,
        }),
    }
}

pub(crate) fn expect_bool(
    key: &str,
    value: Scalar,
) -> Result<bool, ConfigError> {
    match value {
        Scalar::Bool(b) => Ok(b),
        other => Err(ConfigError::WrongKind {
            key: key.to_owned(),
            expected: "boolean",
            actual: other,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn lab_connection() -> ConnectConfig {
        ConnectConfig {
            vcenter_server: "vcenter.vsphere55.test".to_owned(),
            username: "root".to_owned(),
            password: "jetbrains".to_owned(),
            insecure_connection: true,
        }
    }

    fn basic() -> BuildConfig {
        BuildConfig::new(
            lab_connection(),
            "basic",
            "test-1",
            "esxi-1.vsphere55.test",
        )
    }

    #[test]
    fn command_line_values_take_the_kind_of_their_option() {
        let string = |s: &str| Scalar::String(s.to_owned());
        assert_eq!(Scalar::for_key("password", "1234"), string("1234"));
        assert_eq!(Scalar::for_key("vm_name", "true"), string("true"));
        assert_eq!(Scalar::for_key("linked_clone", "true"), Scalar::Bool(true));
        assert_eq!(Scalar::for_key("linked_clone", "yes"), string("yes"));
        assert_eq!(Scalar::for_key("cpus", "4"), Scalar::Integer(4));
        assert_eq!(Scalar::for_key("notes", "false"), Scalar::Bool(false));
        assert_eq!(Scalar::for_key("notes", "four"), string("four"));

        let mut config = basic();
        config.set("password", Scalar::for_key("password", "1234")).unwrap();
        assert_eq!(config.connection.password, "1234");
        assert!(config
            .set("linked_clone", Scalar::for_key("linked_clone", "yes"))
            .is_err());
    }

    #[test]
    fn set_routes_known_keys_into_fields() {
        let mut config = basic();
        config
            .set("vm_name", "test-2")
            .unwrap()
            .set("linked_clone", true)
            .unwrap()
            .set("insecure_connection", false)
            .unwrap();

        assert_eq!(config.vm_name, "test-2");
        assert_eq!(config.linked_clone, Some(true));
        assert!(!config.connection.insecure_connection);
        assert!(config.extra().is_empty());
    }

    #[test]
    fn set_keeps_unknown_keys_verbatim() {
        let mut config = basic();
        config.set("datastore", "datastore1").unwrap();
        config.set("cpus", 2).unwrap();

        assert_eq!(config.get("datastore"), Some(Scalar::from("datastore1")));
        assert_eq!(config.get("cpus"), Some(Scalar::Integer(2)));
    }

    #[test]
    fn set_rejects_wrong_kind_and_reserved_keys() {
        let mut config = basic();
        assert_eq!(
            config.set("linked_clone", "yes").unwrap_err(),
            ConfigError::WrongKind {
                key: "linked_clone".to_owned(),
                expected: "boolean",
                actual: Scalar::from("yes"),
            }
        );
        assert_eq!(
            config.set("type", "vsphere").unwrap_err(),
            ConfigError::ReservedKey("type".to_owned())
        );
    }

    #[test]
    fn unset_optional_options_are_absent() {
        let options = basic().options();
        assert!(!options.contains_key("linked_clone"));
        assert!(!options.contains_key("ssh_username"));
        assert!(!options.contains_key("resource_pool"));
        assert_eq!(
            options.get("host"),
            Some(&Scalar::from("esxi-1.vsphere55.test"))
        );
    }

    #[test]
    fn validate_requires_placement() {
        let mut config = basic();
        assert_eq!(config.validate(), Ok(()));

        config.host = String::new();
        assert_eq!(config.validate(), Err(ConfigError::MissingField("host")));
    }

    #[test]
    fn default_names_are_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let name = default_vm_name(&mut rng);
            let n: u32 = name.strip_prefix("test-").unwrap().parse().unwrap();
            assert!(n < 1000);
        }
    }

    #[test]
    fn connect_config_debug_hides_password() {
        let rendered = format!("{:?}", lab_connection());
        assert!(rendered.contains("vcenter.vsphere55.test"));
        assert!(!rendered.contains("jetbrains"));
    }
}
