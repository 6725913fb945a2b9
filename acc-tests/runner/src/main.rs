// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod config;
mod execute;
mod fixtures;

use std::sync::Arc;

use acc_tests::acc_testcase::Framework;
use anyhow::Context;
use clap::Parser;
use config::{ListOptions, ProcessArgs, RenderOptions, RunOptions};
use tracing::{debug, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};
use vsphere_builder_config::{BuildConfig, TemplateDocument};

use crate::execute::ExecutionStats;
use crate::fixtures::TestFixtures;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runner_args = ProcessArgs::parse();
    set_tracing_subscriber(&runner_args)?;

    info!(?runner_args);

    match &runner_args.command {
        config::Command::Run(opts) => {
            let exit_code = run_tests(opts).await?.exit_code();
            debug!(exit_code);
            std::process::exit(exit_code);
        }
        config::Command::List(opts) => list_tests(opts),
        config::Command::Render(opts) => render_template(opts)?,
    }

    Ok(())
}

async fn run_tests(run_opts: &RunOptions) -> anyhow::Result<ExecutionStats> {
    let lab = vsphere_builder_config::lab::parse(&run_opts.lab)
        .with_context(|| format!("loading lab {}", run_opts.lab))?;
    let ctx = Arc::new(
        Framework::simulated(lab, run_opts.tmp_directory.clone())
            .context("setting up the simulated lab")?,
    );

    let fixtures = TestFixtures::new(ctx.clone());

    // Run the tests and print results.
    let execution_stats =
        execute::run_tests_with_ctx(&ctx, fixtures, run_opts).await;
    if !execution_stats.failed_test_cases.is_empty() {
        println!("\nfailures:");
        for tc in &execution_stats.failed_test_cases {
            println!("    {}", tc.fully_qualified_name());
        }
        println!();
    }
    if execution_stats.fixture_failed {
        println!("a setup or cleanup fixture failed; see the log above\n");
    }

    println!(
        "test result: {}. {} passed; {} failed; {} skipped; {} not run; \
        finished in {:.2}s\n",
        if execution_stats.succeeded() { "ok" } else { "FAILED" },
        execution_stats.tests_passed,
        execution_stats.tests_failed,
        execution_stats.tests_skipped,
        execution_stats.tests_not_run,
        execution_stats.duration.as_secs_f64()
    );

    Ok(execution_stats)
}

fn list_tests(list_opts: &ListOptions) {
    println!("Tests enabled after applying filters:\n");

    let mut count = 0;
    for tc in acc_tests::acc_testcase::filtered_test_cases(
        &list_opts.include_filter,
        &list_opts.exclude_filter,
    ) {
        println!("    {}", tc.fully_qualified_name());
        count += 1
    }

    println!("\n{} test(s) selected", count);
}

fn render_template(opts: &RenderOptions) -> anyhow::Result<()> {
    let lab = vsphere_builder_config::lab::parse(&opts.lab)
        .with_context(|| format!("loading lab {}", opts.lab))?;
    let mut config = BuildConfig::with_defaults(&lab, &mut rand::thread_rng());
    opts.apply(&mut config)?;

    let document =
        TemplateDocument::new(&config).context("invalid build options")?;
    println!("{document}");
    Ok(())
}

fn set_tracing_subscriber(args: &ProcessArgs) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into());
    let subscriber = Registry::default().with(filter.from_env_lossy());
    if args.emit_bunyan {
        let bunyan_layer =
            BunyanFormattingLayer::new("acc-runner".into(), std::io::stdout);
        let subscriber = subscriber.with(JsonStorageLayer).with(bunyan_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let stdout_log = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_ansi(!args.disable_ansi);
        let subscriber = subscriber.with(stdout_log);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}
