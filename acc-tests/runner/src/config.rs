// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use vsphere_builder_config::{BuildConfig, Scalar};

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunOptions),
    List(ListOptions),
    Render(RenderOptions),
}

/// Runtime configuration options for the runner.
#[derive(Debug, Parser)]
#[clap(verbatim_doc_comment)]
pub struct ProcessArgs {
    #[clap(subcommand)]
    pub command: Command,

    /// Suppress emission of terminal control codes in the runner's log output.
    #[clap(long, conflicts_with = "emit_bunyan")]
    pub disable_ansi: bool,

    /// Emit Bunyan-formatted logs.
    #[clap(long)]
    pub emit_bunyan: bool,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RunOptions {
    /// The lab TOML describing the vCenter endpoint, the placement of test
    /// builds, and the simulated inventory to run against.
    #[clap(long, value_parser)]
    pub lab: Utf8PathBuf,

    /// The directory into which to write rendered templates and the
    /// artifacts each build produced.
    #[clap(long, value_parser)]
    pub tmp_directory: Option<Utf8PathBuf>,

    /// Only run tests whose fully-qualified names contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub include_filter: Vec<String>,

    /// Only run tests whose fully-qualified names do not contain this
    /// string. Can be specified multiple times.
    #[clap(long, value_parser)]
    pub exclude_filter: Vec<String>,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct ListOptions {
    /// Only list tests whose fully-qualified names contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub include_filter: Vec<String>,

    /// Only list tests whose fully-qualified names do not contain this
    /// string. Can be specified multiple times.
    #[clap(long, value_parser)]
    pub exclude_filter: Vec<String>,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RenderOptions {
    /// The lab TOML whose defaults the template starts from.
    #[clap(long, value_parser)]
    pub lab: Utf8PathBuf,

    /// Ask the builder for a linked clone.
    #[clap(long)]
    pub linked_clone: bool,

    /// The VM name to use instead of a random `test-<n>`.
    #[clap(long)]
    pub vm_name: Option<String>,

    /// Place the VM in this resource pool instead of the host's root pool.
    #[clap(long)]
    pub resource_pool: Option<String>,

    /// Override a single option, as `key=value`. Values of known options are
    /// taken as that option's kind. For other keys `true` and `false` are
    /// booleans, integers are numbers, anything else is a string.
    /// Can be specified multiple times.
    #[clap(long = "set", value_parser)]
    pub overrides: Vec<Override>,
}

impl RenderOptions {
    /// Applies these options on top of `config`.
    pub fn apply(&self, config: &mut BuildConfig) -> anyhow::Result<()> {
        if self.linked_clone {
            config.linked_clone(true);
        }
        if let Some(name) = &self.vm_name {
            config.named(name);
        }
        if let Some(pool) = &self.resource_pool {
            config.in_resource_pool(pool);
        }
        for o in &self.overrides {
            config
                .set(&o.key, o.value.clone())
                .with_context(|| format!("applying --set {}", o.key))?;
        }
        Ok(())
    }
}

/// A `key=value` option override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: Scalar,
}

impl FromStr for Override {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, raw) = s
            .split_once('=')
            .context("override must have the form key=value")?;
        let key = key.trim();
        anyhow::ensure!(!key.is_empty(), "override key must not be empty");

        Ok(Self { key: key.to_owned(), value: Scalar::for_key(key, raw) })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides_infer_scalar_kinds() {
        let cases = [
            ("linked_clone=true", "linked_clone", Scalar::Bool(true)),
            ("cpus=2", "cpus", Scalar::Integer(2)),
            ("password=1234", "password", Scalar::String("1234".to_owned())),
            ("host=esxi-2", "host", Scalar::String("esxi-2".to_owned())),
            ("notes=a=b", "notes", Scalar::String("a=b".to_owned())),
            ("empty=", "empty", Scalar::String(String::new())),
        ];
        for (input, key, value) in cases {
            let parsed: Override = input.parse().unwrap();
            let expected = Override { key: key.to_owned(), value };
            assert_eq!(parsed, expected, "{input}");
        }
    }

    #[test]
    fn numeric_text_overrides_string_options() {
        let lab = vsphere_builder_config::lab::parse(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../lab.toml"
        ))
        .unwrap();
        let mut config =
            BuildConfig::with_defaults(&lab, &mut rand::thread_rng());

        let args = ProcessArgs::parse_from([
            "acc-runner",
            "render",
            "--lab",
            "lab.toml",
            "--set",
            "password=1234",
            "--set",
            "vm_name=2024",
            "--set",
            "linked_clone=true",
        ]);
        let Command::Render(opts) = args.command else {
            panic!("expected render options");
        };
        opts.apply(&mut config).unwrap();

        assert_eq!(config.connection.password, "1234");
        assert_eq!(config.vm_name, "2024");
        assert!(config.is_linked_clone());
        assert!(config.extra().is_empty());
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        assert!("linked_clone".parse::<Override>().is_err());
        assert!("=true".parse::<Override>().is_err());
    }

    #[test]
    fn cli_parses() {
        let args = ProcessArgs::parse_from([
            "acc-runner",
            "render",
            "--lab",
            "lab.toml",
            "--linked-clone",
            "--set",
            "cpus=4",
        ]);
        match args.command {
            Command::Render(opts) => {
                assert!(opts.linked_clone);
                assert_eq!(opts.overrides.len(), 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
