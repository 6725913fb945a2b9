// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rendering [`BuildConfig`]s into builder template documents and parsing
//! them back.
//!
//! A template document has the shape
//! `{"builders": [{"type": "test", <options>}]}`. Options are emitted
//! verbatim; checking that their values make sense is the builder's job.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::{
    expect_bool, expect_string, BuildConfig, ConfigError, ConnectConfig,
    Scalar, BUILDER_TYPE, TYPE_KEY,
};

const BUILDERS_KEY: &str = "builders";

/// Errors which may be returned when parsing a template document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Cannot parse template JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("template has no {:?} list", BUILDERS_KEY)]
    MissingBuilders,

    #[error("expected exactly one builder entry, found {0}")]
    BuilderCount(usize),

    #[error("builder entry is not a JSON object")]
    NotAnObject,

    #[error("builder type {0:?} is not {:?}", BUILDER_TYPE)]
    WrongType(Option<String>),

    #[error("option {key:?} has non-scalar value {value}")]
    NonScalar { key: String, value: serde_json::Value },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A validated, rendered builder template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateDocument {
    contents: String,
}

impl TemplateDocument {
    /// Validates `config` and renders it.
    pub fn new(config: &BuildConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { contents: render(config) })
    }

    pub fn as_str(&self) -> &str {
        &self.contents
    }

    /// Writes the document to `path`, replacing any existing file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, &self.contents)
    }
}

impl std::fmt::Display for TemplateDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.contents)
    }
}

/// Renders `config` into a template document without validating it.
pub fn render(config: &BuildConfig) -> String {
    let mut builder = serde_json::Map::new();
    builder.insert(TYPE_KEY.to_owned(), BUILDER_TYPE.into());
    for (key, value) in config.options() {
        builder.insert(key, value.into());
    }

    let mut root = serde_json::Map::new();
    root.insert(
        BUILDERS_KEY.to_owned(),
        serde_json::Value::Array(vec![builder.into()]),
    );
    serde_json::Value::Object(root).to_string()
}

/// Parses a template document with a single `test` builder entry back into
/// a [`BuildConfig`].
pub fn parse(document: &str) -> Result<BuildConfig, ParseError> {
    let mut root: serde_json::Value = serde_json::from_str(document)?;
    let builders = root
        .get_mut(BUILDERS_KEY)
        .and_then(serde_json::Value::as_array_mut)
        .ok_or(ParseError::MissingBuilders)?;

    if builders.len() != 1 {
        return Err(ParseError::BuilderCount(builders.len()));
    }

    let serde_json::Value::Object(mut entry) = builders.remove(0) else {
        return Err(ParseError::NotAnObject);
    };

    match entry.remove(TYPE_KEY) {
        Some(serde_json::Value::String(ty)) if ty == BUILDER_TYPE => {}
        Some(serde_json::Value::String(ty)) => {
            return Err(ParseError::WrongType(Some(ty)))
        }
        _ => return Err(ParseError::WrongType(None)),
    }

    let mut options = BTreeMap::new();
    for (key, value) in entry {
        let scalar = Scalar::try_from(value).map_err(|value| {
            ParseError::NonScalar { key: key.clone(), value }
        })?;
        options.insert(key, scalar);
    }

    let connection = ConnectConfig {
        vcenter_server: required(&mut options, "vcenter_server")?,
        username: required(&mut options, "username")?,
        password: required(&mut options, "password")?,
        insecure_connection: options
            .remove("insecure_connection")
            .map(|v| expect_bool("insecure_connection", v))
            .transpose()?
            .unwrap_or(false),
    };

    let mut config = BuildConfig::new(
        connection,
        required(&mut options, "template")?,
        required(&mut options, "vm_name")?,
        required(&mut options, "host")?,
    );
    for (key, value) in options {
        config.set(&key, value)?;
    }

    config.validate()?;
    Ok(config)
}

fn required(
    options: &mut BTreeMap<String, Scalar>,
    key: &'static str,
) -> Result<String, ConfigError> {
    let value = options.remove(key).ok_or(ConfigError::MissingField(key))?;
    expect_string(key, value)
}
