//! Orphan sandbox reaper
//!
//! Sandboxes outlive the process that created them when it crashes. At
//! startup every sandbox carrying the managed label and name prefix is
//! force-removed together with its host directory, so a fresh registry
//! starts from a clean slate.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::RuntimeError;
use crate::runtime::WorkspaceRuntime;

/// Outcome of one reaper sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Managed sandboxes found
    pub found: usize,
    /// Sandboxes removed
    pub removed: Vec<String>,
    /// Sandboxes that could not be removed, with the reason
    pub failed: Vec<(String, String)>,
}

impl ReapReport {
    /// Whether every managed sandbox was removed
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes managed sandboxes left over from earlier runs
#[derive(Clone)]
pub struct Reaper {
    runtime: Arc<dyn WorkspaceRuntime>,
}

impl Reaper {
    /// Create a reaper over a runtime
    #[must_use]
    pub fn new(runtime: Arc<dyn WorkspaceRuntime>) -> Self {
        Self { runtime }
    }

    /// Remove every managed sandbox
    ///
    /// Individual removal failures are recorded and skipped.
    ///
    /// # Errors
    /// Returns [`RuntimeError`] only if the managed sandboxes cannot be
    /// listed.
    pub async fn sweep(&self) -> Result<ReapReport, RuntimeError> {
        let names = self.runtime.list_managed().await?;
        let mut report = ReapReport {
            found: names.len(),
            ..ReapReport::default()
        };

        for name in names {
            match self.runtime.remove_named(&name).await {
                Ok(()) => report.removed.push(name),
                Err(e) => {
                    warn!(container = %name, error = %e, "failed to reap orphaned workspace");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if report.found > 0 {
            info!(
                backend = self.runtime.backend_name(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "reaped orphaned workspaces"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("backend", &self.runtime.backend_name())
            .finish()
    }
}
