//! Startup gate
//!
//! The only way to obtain a [`SessionRegistry`]. Runs, in order:
//! 1. Base image build (fatal on failure)
//! 2. Orphan sweep of workspaces left by an earlier run
//! 3. Registry construction

use std::sync::Arc;

use devbox_runtime::{Reaper, WorkspaceRuntime};
use tracing::{error, info, warn};

use crate::config::DevboxConfig;
use crate::error::DevboxError;
use crate::registry::SessionRegistry;

/// Prepare the runtime and hand out the session registry
///
/// # Errors
/// Returns [`DevboxError::RuntimeUnavailable`] if the base image cannot be
/// built. A failed orphan sweep is logged and does not stop startup.
pub async fn bootstrap(
    config: DevboxConfig,
    runtime: Arc<dyn WorkspaceRuntime>,
) -> Result<SessionRegistry, DevboxError> {
    info!(backend = runtime.backend_name(), image = %config.runtime.image_tag, "preparing workspace runtime");
    if let Err(e) = runtime.build_base_image().await {
        error!(error = %e, "base image build failed");
        return Err(DevboxError::RuntimeUnavailable(e));
    }

    match Reaper::new(Arc::clone(&runtime)).sweep().await {
        Ok(report) if report.is_clean() => {
            info!(found = report.found, removed = report.removed.len(), "orphan sweep complete");
        }
        Ok(report) => {
            warn!(
                found = report.found,
                removed = report.removed.len(),
                failed = report.failed.len(),
                "orphan sweep left workspaces behind"
            );
        }
        Err(e) => warn!(error = %e, "orphan sweep failed"),
    }

    Ok(SessionRegistry::new(runtime, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_test_utils::MemoryRuntime;

    #[tokio::test]
    async fn image_failure_is_fatal() {
        let runtime = MemoryRuntime::new();
        runtime.fail_image_build();
        let result = bootstrap(DevboxConfig::default(), Arc::new(runtime)).await;
        assert!(matches!(result, Err(DevboxError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn orphans_are_reaped_before_registry() {
        let runtime = MemoryRuntime::new();
        let orphan = runtime.container_for("old");
        runtime.seed_orphan(&orphan);

        let registry = bootstrap(DevboxConfig::default(), Arc::new(runtime.clone()))
            .await
            .unwrap();
        assert!(registry.is_empty());
        assert_eq!(runtime.image_builds(), 1);
        assert_eq!(runtime.removed(), vec![orphan]);
    }

    #[tokio::test]
    async fn failed_sweep_entries_do_not_block_startup() {
        let runtime = MemoryRuntime::new();
        let orphan = runtime.container_for("stuck");
        runtime.seed_orphan(&orphan);
        runtime.fail_removal_of(&orphan);

        assert!(bootstrap(DevboxConfig::default(), Arc::new(runtime)).await.is_ok());
    }
}
