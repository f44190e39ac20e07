//! Session registry
//!
//! Owns every live session and the connection bindings that route client
//! traffic to it. A session moves through:
//!
//! ```text
//! create ──► Provisioning ──► Installed ──► (shell attached: ready)
//!                 │
//!                 └──► Failed
//! destroy (from any state) ──► Destroyed
//! ```
//!
//! Provisioning runs in a background task. If the session is destroyed
//! before the workspace is installed, the task removes the workspace itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use devbox_runtime::{WorkspaceHandle, WorkspaceRuntime};
use devbox_sanitize::path::join_relative;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DevboxConfig;
use crate::error::{FsError, SessionError};
use crate::shell::{ShellChannel, ShellState};
use crate::sync::{FileSync, SyncQueue};
use crate::tree::Tree;
use crate::types::{ConnectionId, FileAck, InputDelivery, PathKind, SessionEvent, SessionId, TreeEntry};

struct Workspace {
    handle: WorkspaceHandle,
    queue: SyncQueue,
}

enum Slot {
    Provisioning,
    Installed(Workspace),
    Failed,
    Destroyed,
}

struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    shell: ShellChannel,
    events: mpsc::Sender<SessionEvent>,
    slot: Mutex<Slot>,
    provisioning: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Install a provisioned workspace; hands it back if the session has
    /// moved on
    fn install(&self, workspace: Workspace) -> Result<(), Workspace> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Provisioning) {
            *slot = Slot::Installed(workspace);
            Ok(())
        } else {
            Err(workspace)
        }
    }

    async fn fail(&self, reason: String) {
        {
            let mut slot = self.slot.lock();
            match *slot {
                Slot::Provisioning => *slot = Slot::Failed,
                Slot::Installed(_) => {}
                Slot::Failed | Slot::Destroyed => return,
            }
        }
        if let Err(e) = self.events.send(SessionEvent::Failed { reason }).await {
            debug!(session = %self.id, error = %e, "session event dropped");
        }
    }

    /// Mark destroyed and take the workspace, if one was installed
    fn retire(&self) -> Option<Workspace> {
        match std::mem::replace(&mut *self.slot.lock(), Slot::Destroyed) {
            Slot::Installed(workspace) => Some(workspace),
            _ => None,
        }
    }

    fn notify(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(session = %self.id, error = %e, "session event dropped");
        }
    }
}

#[derive(Default)]
struct Bindings {
    by_connection: HashMap<ConnectionId, SessionId>,
    by_session: HashMap<SessionId, ConnectionId>,
}

struct RegistryInner {
    runtime: Arc<dyn WorkspaceRuntime>,
    config: DevboxConfig,
    sessions: DashMap<SessionId, Arc<Session>>,
    bindings: Mutex<Bindings>,
}

/// Registry of live sessions
///
/// Obtained from [`crate::bootstrap`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub(crate) fn new(runtime: Arc<dyn WorkspaceRuntime>, config: DevboxConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                runtime,
                config,
                sessions: DashMap::new(),
                bindings: Mutex::new(Bindings::default()),
            }),
        }
    }

    /// Register a session for a connection and start provisioning
    ///
    /// Returns the receiver for the session's events. [`SessionEvent::Ready`]
    /// arrives once the workspace exists and the shell is attached,
    /// [`SessionEvent::Failed`] if provisioning fails.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyExists`] if the id has a live session
    /// - [`SessionError::ConnectionInUse`] if the connection is bound
    pub fn create(
        &self,
        connection: ConnectionId,
        id: SessionId,
    ) -> Result<mpsc::Receiver<SessionEvent>, SessionError> {
        let (events, receiver) = mpsc::channel(self.inner.config.event_buffer.max(1));
        let session = Arc::new(Session {
            id: id.clone(),
            created_at: Utc::now(),
            shell: ShellChannel::new(id.clone(), events.clone(), self.inner.config.input_buffer),
            events,
            slot: Mutex::new(Slot::Provisioning),
            provisioning: Mutex::new(None),
        });

        {
            let mut bindings = self.inner.bindings.lock();
            if self.inner.sessions.contains_key(&id) {
                error!(session = %id, connection = %connection, "session already exists");
                return Err(SessionError::AlreadyExists(id));
            }
            if bindings.by_connection.contains_key(&connection) {
                warn!(session = %id, connection = %connection, "connection already bound");
                return Err(SessionError::ConnectionInUse(connection));
            }
            self.inner.sessions.insert(id.clone(), Arc::clone(&session));
            bindings.by_connection.insert(connection.clone(), id.clone());
            bindings.by_session.insert(id.clone(), connection.clone());
        }

        info!(session = %id, connection = %connection, "session created");
        *session.provisioning.lock() = Some(tokio::spawn(Self::provision(
            Arc::clone(&self.inner),
            Arc::clone(&session),
        )));
        Ok(receiver)
    }

    async fn provision(inner: Arc<RegistryInner>, session: Arc<Session>) {
        let id = session.id.clone();
        let handle = match inner.runtime.create_workspace(id.as_str()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(session = %id, error = %e, "workspace creation failed");
                session.fail(format!("workspace creation failed: {e}")).await;
                return;
            }
        };

        let sync = Arc::new(FileSync::new(id.clone(), Arc::clone(&inner.runtime), handle.clone()));
        let workspace = Workspace {
            handle: handle.clone(),
            queue: SyncQueue::start(sync),
        };
        if let Err(orphaned) = session.install(workspace) {
            info!(session = %id, container = %handle, "session destroyed during provisioning");
            orphaned.queue.close();
            remove_workspace(inner.runtime.as_ref(), &id, &orphaned.handle).await;
            return;
        }

        match inner.runtime.spawn_shell(&handle).await {
            Ok(process) => {
                if session.shell.attach(process) {
                    info!(session = %id, container = %handle, "session ready");
                }
            }
            Err(e) => {
                error!(session = %id, container = %handle, error = %e, "shell attach failed");
                session.fail(format!("shell attach failed: {e}")).await;
            }
        }
    }

    /// Remove a session from the maps and both bindings together
    fn detach(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut bindings = self.inner.bindings.lock();
        let (_, session) = self.inner.sessions.remove(id)?;
        if let Some(connection) = bindings.by_session.remove(id) {
            bindings.by_connection.remove(&connection);
        }
        Some(session)
    }

    /// Tear down a session and its workspace
    ///
    /// Unknown or already-destroyed ids are ignored. Teardown failures are
    /// logged.
    pub async fn destroy(&self, id: &SessionId) {
        let Some(session) = self.detach(id) else {
            debug!(session = %id, "destroy ignored for unknown session");
            return;
        };

        session.shell.close();
        let workspace = session.retire();
        if let Some(workspace) = &workspace {
            workspace.queue.close();
        }

        let provisioning = session.provisioning.lock().take();
        if let Some(task) = provisioning {
            if let Err(e) = task.await {
                warn!(session = %id, error = %e, "provisioning task failed");
            }
        }

        if let Some(workspace) = workspace {
            remove_workspace(self.inner.runtime.as_ref(), id, &workspace.handle).await;
        }
        info!(session = %id, "session destroyed");
    }

    /// Destroy the session bound to a connection, if any
    pub async fn destroy_connection(&self, connection: &ConnectionId) {
        match self.session_for(connection) {
            Some(id) => self.destroy(&id).await,
            None => debug!(connection = %connection, "no session bound to connection"),
        }
    }

    /// Destroy every live session
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.inner.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.destroy(&id).await;
        }
    }

    fn session(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.inner
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Queue a file operation on the session's serial queue
    ///
    /// Queuing happens before this returns, so submission order is
    /// execution order.
    fn submit<T, F, Fut>(
        &self,
        id: &SessionId,
        op: F,
    ) -> Result<(Arc<Session>, impl Future<Output = Result<T, FsError>>), SessionError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<FileSync>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FsError>> + Send + 'static,
    {
        let session = self.session(id)?;
        let pending = match &*session.slot.lock() {
            Slot::Installed(workspace) => workspace.queue.submit(op),
            _ => return Err(SessionError::NotReady(id.clone())),
        };
        Ok((session, pending))
    }

    /// Forward keystrokes to the session's shell
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown sessions.
    pub async fn keystroke(&self, id: &SessionId, bytes: Vec<u8>) -> Result<InputDelivery, SessionError> {
        let session = self.session(id)?;
        let delivery = session.shell.send_input(bytes).await;
        if delivery != InputDelivery::Forwarded {
            debug!(session = %id, ?delivery, "keystroke not delivered");
        }
        Ok(delivery)
    }

    /// Forward pasted text to the session's shell
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown sessions.
    pub async fn paste(&self, id: &SessionId, text: &str) -> Result<InputDelivery, SessionError> {
        self.keystroke(id, text.as_bytes().to_vec()).await
    }

    /// Apply an editor file write
    ///
    /// Never fails: the outcome is reported in the [`FileAck`]. Successful
    /// writes emit [`SessionEvent::TreeChanged`].
    pub async fn file_change(&self, id: &SessionId, path: &str, content: &[u8]) -> FileAck {
        let raw_path = path.to_string();
        let bytes = content.to_vec();
        let submitted = self.submit(id, move |sync| async move {
            sync.write_file(&raw_path, &bytes).await
        });
        let result = match submitted {
            Ok((session, pending)) => pending
                .await
                .map(|written| (session, written))
                .map_err(SessionError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok((session, written)) => {
                session.notify(SessionEvent::TreeChanged);
                FileAck::ok(written)
            }
            Err(e) => {
                warn!(session = %id, path, error = %e, "file write failed");
                FileAck::failed(path, e)
            }
        }
    }

    /// Nested tree of the session's workspace
    ///
    /// # Errors
    /// Returns [`SessionError`] if the session is unknown or not ready, or
    /// the listing fails.
    pub async fn tree(&self, id: &SessionId) -> Result<Tree, SessionError> {
        let (_, pending) = self.submit(id, |sync| async move { sync.list_tree().await })?;
        Ok(pending.await?)
    }

    /// Text content of a workspace file
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] (wrapped) if the file does not exist.
    pub async fn file_content(&self, id: &SessionId, path: &str) -> Result<String, SessionError> {
        let path = path.to_string();
        let (_, pending) = self.submit(id, move |sync| async move { sync.read_file(&path).await })?;
        Ok(pending.await?)
    }

    /// Create a file or directory, optionally under a parent directory
    ///
    /// Missing parents are created. Returns the final workspace path.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the path is invalid or creation fails.
    pub async fn create_path(
        &self,
        id: &SessionId,
        path: &str,
        kind: PathKind,
        content: Option<&[u8]>,
        parent: Option<&str>,
    ) -> Result<String, SessionError> {
        let target = join_relative(parent, path).map_err(FsError::from)?;
        let content = content.map(<[u8]>::to_vec).unwrap_or_default();
        let (session, pending) = self.submit(id, move |sync| async move {
            match kind {
                PathKind::Directory => sync.create_directory(&target).await,
                PathKind::File => sync.write_file(&target, &content).await,
            }
        })?;
        let created = pending.await?;
        session.notify(SessionEvent::TreeChanged);
        Ok(created)
    }

    /// Rename a workspace path; returns the final path
    ///
    /// # Errors
    /// Returns [`SessionError`] if the source is missing or the move fails.
    pub async fn rename_path(&self, id: &SessionId, from: &str, to: &str) -> Result<String, SessionError> {
        let (from, to) = (from.to_string(), to.to_string());
        let (session, pending) =
            self.submit(id, move |sync| async move { sync.rename_path(&from, &to).await })?;
        let renamed = pending.await?;
        session.notify(SessionEvent::TreeChanged);
        Ok(renamed)
    }

    /// Delete a workspace file or directory
    ///
    /// # Errors
    /// Returns [`SessionError`] if the path is missing or removal fails.
    pub async fn delete_path(&self, id: &SessionId, path: &str, kind: PathKind) -> Result<(), SessionError> {
        let path = path.to_string();
        let (session, pending) =
            self.submit(id, move |sync| async move { sync.delete_path(&path, kind).await })?;
        pending.await?;
        session.notify(SessionEvent::TreeChanged);
        Ok(())
    }

    /// Immediate children of a workspace directory
    ///
    /// # Errors
    /// Returns [`SessionError`] if the directory is missing.
    pub async fn directory(&self, id: &SessionId, path: &str) -> Result<Vec<TreeEntry>, SessionError> {
        let path = path.to_string();
        let (_, pending) = self.submit(id, move |sync| async move { sync.list_directory(&path).await })?;
        Ok(pending.await?)
    }

    /// Session bound to a connection
    #[must_use]
    pub fn session_for(&self, connection: &ConnectionId) -> Option<SessionId> {
        self.inner.bindings.lock().by_connection.get(connection).cloned()
    }

    /// Connection bound to a session
    #[must_use]
    pub fn connection_for(&self, id: &SessionId) -> Option<ConnectionId> {
        self.inner.bindings.lock().by_session.get(id).cloned()
    }

    /// Whether the session's workspace is provisioned and its shell attached
    #[must_use]
    pub fn is_ready(&self, id: &SessionId) -> bool {
        self.inner.sessions.get(id).is_some_and(|session| {
            matches!(*session.slot.lock(), Slot::Installed(_))
                && session.shell.state() == ShellState::Attached
        })
    }

    /// Creation time of a live session
    #[must_use]
    pub fn created_at(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        self.inner.sessions.get(id).map(|session| session.created_at)
    }

    /// Whether a session with this id is live
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.sessions.contains_key(id)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether no sessions are live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Runtime backing this registry
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn WorkspaceRuntime> {
        &self.inner.runtime
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("backend", &self.inner.runtime.backend_name())
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

async fn remove_workspace(runtime: &dyn WorkspaceRuntime, id: &SessionId, handle: &WorkspaceHandle) {
    match runtime.stop_and_remove(handle).await {
        Ok(()) => debug!(session = %id, container = %handle, "workspace removed"),
        Err(e) if e.is_already_gone() => debug!(session = %id, container = %handle, "workspace already gone"),
        Err(e) => warn!(session = %id, container = %handle, error = %e, "workspace teardown failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_test_utils::MemoryRuntime;

    fn registry() -> (MemoryRuntime, SessionRegistry) {
        let runtime = MemoryRuntime::new();
        let registry = SessionRegistry::new(Arc::new(runtime.clone()), DevboxConfig::default());
        (runtime, registry)
    }

    #[tokio::test]
    async fn bindings_move_together() {
        let (_runtime, registry) = registry();
        let id = SessionId::from("s1");
        let conn = ConnectionId::from("c1");
        let _events = registry.create(conn.clone(), id.clone()).unwrap();

        assert_eq!(registry.session_for(&conn), Some(id.clone()));
        assert_eq!(registry.connection_for(&id), Some(conn.clone()));

        registry.destroy_connection(&conn).await;
        assert_eq!(registry.session_for(&conn), None);
        assert_eq!(registry.connection_for(&id), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn rejected_create_leaves_no_binding() {
        let (_runtime, registry) = registry();
        let _events = registry.create("c1".into(), "s1".into()).unwrap();

        let err = registry.create("c2".into(), "s1".into()).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
        assert_eq!(registry.session_for(&"c2".into()), None);

        let err = registry.create("c1".into(), "s2".into()).unwrap_err();
        assert!(matches!(err, SessionError::ConnectionInUse(_)));
        assert!(!registry.contains(&"s2".into()));
        assert_eq!(registry.len(), 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn destroy_during_provisioning_removes_workspace() {
        let (runtime, registry) = registry();
        runtime.set_create_delay(std::time::Duration::from_millis(100));
        let id = SessionId::from("slow");
        let _events = registry.create("c1".into(), id.clone()).unwrap();

        registry.destroy(&id).await;
        assert!(!runtime.is_live("slow"));
        assert_eq!(runtime.live_count(), 0);
    }
}
