// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use acc_testcase::*;

/// Verification leaves no session behind, whatever its outcome.
#[acc_testcase]
async fn session_released_after_verify_test(ctx: &TestCtx) {
    let Some(sim) = ctx.sim() else {
        acc_skip!("session accounting needs the simulated endpoint");
    };

    let config = ctx.default_build_config();
    let artifacts = ctx.build(&config).await?;

    let wrong_name = ctx.expectations_for(&config).named("not-the-vm");
    let outcome = ctx.verify(&artifacts, wrong_name).await;
    anyhow::ensure!(outcome.is_err(), "mismatched name was not reported");
    anyhow::ensure!(
        sim.open_sessions() == 0,
        "{} session(s) still open",
        sim.open_sessions()
    );
}

/// The lab's credentials open a session and can see the configured template.
#[acc_testcase]
async fn lab_template_visible_test(ctx: &TestCtx) {
    let template = &ctx.lab().placement.template;
    let conn = ctx.connect().await?;
    let vm = conn
        .find_vm(template)
        .await
        .with_context(|| format!("looking up template {template:?}"))?;
    anyhow::ensure!(vm.is_some(), "template {template:?} not found");
}
