//! Workspace file synchronization
//!
//! [`FileSync`] turns editor requests into workspace operations:
//! - Writes are sanitized, packed as a single-entry tar archive, injected
//!   and flushed, then stale truncated-extension duplicates anywhere in the
//!   workspace are removed
//! - Reads, listings and path operations run guarded commands and classify
//!   failures as not-found, permission-denied or other
//!
//! [`SyncQueue`] serializes every operation of one session in submission
//! order.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use devbox_runtime::{
    classify_failure, commands, ExecOutput, FailureKind, WorkspaceHandle, WorkspaceRuntime,
};
use devbox_sanitize::path::parent_dir;
use devbox_sanitize::{
    canonical_sibling, is_truncation_artifact, prepare_write, repair_path, strip_control_sequences,
    workspace_dir, workspace_relative,
};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FsError;
use crate::tree::{build_listing, build_tree, Tree};
use crate::types::{PathKind, SessionId, TreeEntry};

/// Pack one file as a tar archive: relative path, mode `0644`, current mtime
///
/// # Errors
/// Returns [`FsError::Archive`] if the entry cannot be encoded.
pub fn pack_single_file(path: &str, content: &[u8]) -> Result<Vec<u8>, FsError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0));

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, path, content)
        .map_err(|e| FsError::Archive(e.to_string()))?;
    builder
        .into_inner()
        .map_err(|e| FsError::Archive(e.to_string()))
}

/// Regular-file paths from `path|type` listing lines
fn listed_files(listing: &str) -> HashSet<&str> {
    listing
        .lines()
        .filter_map(|line| match line.trim_end_matches('\r').rsplit_once('|') {
            Some((path, "f")) if !path.is_empty() => Some(path),
            _ => None,
        })
        .collect()
}

/// File operations against one session's workspace
pub struct FileSync {
    session: SessionId,
    runtime: Arc<dyn WorkspaceRuntime>,
    handle: WorkspaceHandle,
}

impl FileSync {
    /// Create file sync for a provisioned workspace
    #[must_use]
    pub fn new(session: SessionId, runtime: Arc<dyn WorkspaceRuntime>, handle: WorkspaceHandle) -> Self {
        Self {
            session,
            runtime,
            handle,
        }
    }

    /// Workspace this instance operates on
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &WorkspaceHandle {
        &self.handle
    }

    fn failure(op: &'static str, path: &str, output: &ExecOutput) -> FsError {
        let text = output.combined_text();
        match classify_failure(output.exit_code, &text) {
            FailureKind::NotFound => FsError::NotFound(path.to_string()),
            FailureKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
            FailureKind::Other => FsError::Command {
                op,
                path: path.to_string(),
                message: text.trim().to_string(),
            },
        }
    }

    async fn run(&self, op: &'static str, argv: &[String], path: &str) -> Result<ExecOutput, FsError> {
        let output = self.runtime.exec(&self.handle, argv).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(Self::failure(op, path, &output))
        }
    }

    /// Write an editor upload into the workspace
    ///
    /// Returns the repaired workspace-relative path.
    ///
    /// # Errors
    /// Returns [`FsError`] if the path is invalid or injection fails.
    pub async fn write_file(&self, raw_path: &str, raw_content: &[u8]) -> Result<String, FsError> {
        let prepared = prepare_write(raw_path, raw_content)?;
        let archive = pack_single_file(&prepared.path, prepared.content.as_bytes())?;

        self.runtime.inject_archive(&self.handle, archive).await?;
        self.run("sync", &commands::sync(), &prepared.path).await?;
        self.remove_truncated_siblings().await;

        debug!(
            session = %self.session,
            path = %prepared.path,
            bytes = prepared.content.len(),
            recovered = prepared.recovered,
            "file written"
        );
        Ok(prepared.path)
    }

    /// Remove truncated-extension files anywhere in the workspace that are
    /// shadowed by their canonical sibling
    ///
    /// Failures are logged and ignored.
    async fn remove_truncated_siblings(&self) {
        let output = match self.run("list", &commands::list_tree(), ".").await {
            Ok(output) => output,
            Err(e) => {
                debug!(session = %self.session, error = %e, "cleanup listing failed");
                return;
            }
        };

        let listing = output.stdout_text();
        let files = listed_files(&listing);
        let mut stale: Vec<String> = files
            .iter()
            .filter(|path| is_truncation_artifact(path))
            .filter(|path| canonical_sibling(path).is_some_and(|sibling| files.contains(sibling.as_str())))
            .map(|path| (*path).to_string())
            .collect();
        if stale.is_empty() {
            return;
        }
        stale.sort();

        match self.run("cleanup", &commands::remove_files(&stale), ".").await {
            Ok(_) => info!(session = %self.session, removed = ?stale, "removed truncated duplicates"),
            Err(e) => warn!(session = %self.session, error = %e, "truncated duplicate cleanup failed"),
        }
    }

    /// Read a file as text with terminal control sequences removed
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] if the file does not exist.
    pub async fn read_file(&self, raw_path: &str) -> Result<String, FsError> {
        let path = repair_path(&workspace_relative(raw_path)?);
        let output = self.run("read", &commands::read_file(&path), &path).await?;
        Ok(strip_control_sequences(&output.stdout_text()))
    }

    /// Nested tree of the whole workspace
    ///
    /// # Errors
    /// Returns [`FsError`] if the listing produced no output and failed.
    pub async fn list_tree(&self) -> Result<Tree, FsError> {
        let output = self.runtime.exec(&self.handle, &commands::list_tree()).await?;
        if !output.success() {
            if output.stdout.is_empty() {
                return Err(Self::failure("tree", ".", &output));
            }
            warn!(session = %self.session, code = ?output.exit_code, "workspace listing incomplete");
        }
        Ok(build_tree(&output.stdout_text()))
    }

    /// Immediate children of a directory, sorted by name
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] if the directory does not exist.
    pub async fn list_directory(&self, raw_dir: &str) -> Result<Vec<TreeEntry>, FsError> {
        let dir = workspace_dir(raw_dir)?;
        let output = self.run("list", &commands::list_directory(&dir), &dir).await?;
        Ok(build_listing(&output.stdout_text()))
    }

    /// Create a directory and its parents, then normalize permissions
    ///
    /// # Errors
    /// Returns [`FsError`] if the directory cannot be created.
    pub async fn create_directory(&self, raw_path: &str) -> Result<String, FsError> {
        let path = workspace_relative(raw_path)?;
        self.run("mkdir", &commands::make_directory(&path), &path).await?;
        self.run("chmod", &commands::normalize_permissions(&path), &path).await?;
        debug!(session = %self.session, path = %path, "directory created");
        Ok(path)
    }

    /// Rename a path; the new name gets extension repair
    ///
    /// Returns the final path.
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] if the source does not exist.
    pub async fn rename_path(&self, raw_from: &str, raw_to: &str) -> Result<String, FsError> {
        let from = workspace_relative(raw_from)?;
        let to = repair_path(&workspace_relative(raw_to)?);

        let parent = parent_dir(&to);
        if parent != "." {
            self.run("mkdir", &commands::make_directory(parent), parent).await?;
        }
        self.run("rename", &commands::move_path(&from, &to), &from).await?;
        debug!(session = %self.session, from = %from, to = %to, "path renamed");
        Ok(to)
    }

    /// Delete a file, or a directory and its contents
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] if the path does not exist.
    pub async fn delete_path(&self, raw_path: &str, kind: PathKind) -> Result<(), FsError> {
        let path = workspace_relative(raw_path)?;
        self.run("delete", &commands::remove_path(&path, kind.is_dir()), &path)
            .await?;
        debug!(session = %self.session, path = %path, ?kind, "path deleted");
        Ok(())
    }
}

impl std::fmt::Debug for FileSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSync")
            .field("session", &self.session)
            .field("container", &self.handle.container())
            .finish_non_exhaustive()
    }
}

type Job = Box<dyn FnOnce(Arc<FileSync>) -> BoxFuture<'static, ()> + Send>;

/// Serial FIFO of one session's file operations
///
/// Jobs are queued when submitted and run one at a time by a single worker
/// task, so completion order equals submission order.
#[derive(Debug)]
pub struct SyncQueue {
    jobs: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl SyncQueue {
    /// Start the worker for a workspace
    #[must_use]
    pub fn start(sync: Arc<FileSync>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(Arc::clone(&sync)).await;
            }
        });
        Self { jobs, worker }
    }

    /// Queue an operation; the returned future resolves with its result
    ///
    /// The operation is queued before this function returns, regardless of
    /// when the future is first polled.
    pub fn submit<T, F, Fut>(&self, op: F) -> impl Future<Output = Result<T, FsError>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(Arc<FileSync>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FsError>> + Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let job: Job = Box::new(move |sync: Arc<FileSync>| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = reply.send(op(sync).await);
            })
        });
        let queued = self.jobs.send(job).is_ok();

        async move {
            if !queued {
                return Err(FsError::QueueClosed);
            }
            result.await.unwrap_or(Err(FsError::QueueClosed))
        }
    }

    /// Stop the worker; queued and in-flight operations fail with
    /// [`FsError::QueueClosed`]
    pub fn close(&self) {
        self.worker.abort();
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
