// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use acc_framework::Framework;
use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Setup and cleanup steps run around the whole execution and around each
/// test.
pub struct TestFixtures {
    ctx: Arc<Framework>,
}

impl TestFixtures {
    pub fn new(ctx: Arc<Framework>) -> Self {
        Self { ctx }
    }

    /// Creates the temporary directory rendered templates are written to.
    #[instrument(skip_all)]
    pub fn execution_setup(&mut self) -> Result<()> {
        if let Some(dir) = self.ctx.tmp_directory() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {dir}"))?;
        }
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn test_setup(&mut self) -> Result<()> {
        self.check_sessions_released()
    }

    /// Destroys everything the test built and checks that it released its
    /// sessions.
    #[instrument(skip_all)]
    pub async fn test_cleanup(&mut self) -> Result<()> {
        let destroyed = self.ctx.destroy_artifacts().await?;
        debug!(destroyed, "destroyed test artifacts");
        self.check_sessions_released()
    }

    #[instrument(skip_all)]
    pub fn execution_cleanup(&mut self) -> Result<()> {
        self.check_sessions_released()
    }

    fn check_sessions_released(&self) -> Result<()> {
        if let Some(sim) = self.ctx.sim() {
            let open = sim.open_sessions();
            anyhow::ensure!(open == 0, "{open} vCenter session(s) leaked");
        }
        Ok(())
    }
}
