// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use acc_testcase::acc_framework::Expectations;
use acc_testcase::*;
use tracing::info;

/// The builder accepts the lab's default template under a fixed VM name.
#[acc_testcase]
async fn basic_build_test(ctx: &TestCtx) {
    let config = ctx.basic_build_config();
    let artifacts = ctx.build(&config).await?;
    anyhow::ensure!(!artifacts.is_empty(), "build produced no artifacts");
}

/// A default build is a full clone named and placed as configured, in the
/// host's root resource pool.
#[acc_testcase]
async fn default_full_clone_test(ctx: &TestCtx) {
    let config = ctx.default_build_config();
    let artifacts = ctx.build(&config).await?;

    let expectations = ctx.expectations_for(&config);
    info!(?expectations, "verifying full clone");
    ctx.verify(&artifacts, expectations)
        .await
        .with_context(|| format!("verifying {}", config.vm_name))?;
}

#[acc_testcase]
async fn linked_clone_test(ctx: &TestCtx) {
    let mut config = ctx.default_build_config();
    config.linked_clone(true);
    let artifacts = ctx.build(&config).await?;

    ctx.verify(&artifacts, Expectations::topology_only(ctx.linked_topology()))
        .await
        .with_context(|| format!("verifying {}", config.vm_name))?;
}
