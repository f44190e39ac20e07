//! Testing utilities for the devbox workspace
//!
//! [`MemoryRuntime`] is a [`WorkspaceRuntime`] that keeps every workspace in
//! memory. It interprets the in-workspace command set, unpacks injected tar
//! archives, attaches an echoing shell and supports failure injection and
//! artificial latency.

#![allow(missing_docs)]

pub mod fs;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use devbox_runtime::{
    ExecOutput, RuntimeConfig, RuntimeError, ShellProcess, WorkspaceHandle, WorkspaceRuntime,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

pub use fs::MemoryFs;

/// One entry unpacked from an injected archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedEntry {
    pub path: String,
    pub mode: u32,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug)]
struct Workspace {
    fs: MemoryFs,
    injections: Vec<Vec<InjectedEntry>>,
    exec_log: Vec<Vec<String>>,
    shell_input: Vec<u8>,
    shell_kills: Vec<oneshot::Sender<()>>,
}

impl Workspace {
    fn new() -> Self {
        Self {
            fs: MemoryFs::default(),
            injections: Vec::new(),
            exec_log: Vec::new(),
            shell_input: Vec::new(),
            shell_kills: Vec::new(),
        }
    }

    fn kill_shells(&mut self) {
        for kill in self.shell_kills.drain(..) {
            let _ = kill.send(());
        }
    }
}

#[derive(Debug, Default)]
struct State {
    workspaces: HashMap<String, Workspace>,
    orphans: BTreeSet<String>,
    removed: Vec<String>,
    denied: BTreeSet<String>,
    image_built: bool,
    image_builds: usize,
    fail_image_build: bool,
    fail_next_create: bool,
    failing_sessions: HashSet<String>,
    failing_removals: HashSet<String>,
    fail_next_shell: bool,
    create_delay: Duration,
    inject_delays: Vec<Duration>,
}

/// In-memory workspace runtime for tests
#[derive(Debug, Clone)]
pub struct MemoryRuntime {
    config: RuntimeConfig,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // Failure injection and latency

    pub fn fail_image_build(&self) {
        self.state.lock().fail_image_build = true;
    }

    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    pub fn fail_create_for(&self, session_id: &str) {
        self.state.lock().failing_sessions.insert(session_id.to_string());
    }

    pub fn fail_removal_of(&self, container: &str) {
        self.state.lock().failing_removals.insert(container.to_string());
    }

    pub fn fail_next_shell(&self) {
        self.state.lock().fail_next_shell = true;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = delay;
    }

    /// Delay the next injections, one entry per call, in order
    pub fn queue_inject_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.state.lock().inject_delays.extend(delays);
    }

    /// Make a path and its descendants unreadable and unwritable
    pub fn deny(&self, path: &str) {
        self.state.lock().denied.insert(fs::normalize(path));
    }

    /// Register a managed sandbox left over from an earlier run
    pub fn seed_orphan(&self, container: &str) {
        self.state.lock().orphans.insert(container.to_string());
    }

    // Inspection

    pub fn container_for(&self, session_id: &str) -> String {
        self.config.container_name(session_id)
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        let container = self.container_for(session_id);
        self.state.lock().workspaces.contains_key(&container)
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().workspaces.len()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn image_builds(&self) -> usize {
        self.state.lock().image_builds
    }

    pub fn file(&self, session_id: &str, path: &str) -> Option<Vec<u8>> {
        let container = self.container_for(session_id);
        let state = self.state.lock();
        state
            .workspaces
            .get(&container)
            .and_then(|ws| ws.fs.file(path))
            .map(<[u8]>::to_vec)
    }

    pub fn paths(&self, session_id: &str) -> Vec<String> {
        let container = self.container_for(session_id);
        let state = self.state.lock();
        state
            .workspaces
            .get(&container)
            .map(|ws| ws.fs.paths())
            .unwrap_or_default()
    }

    /// Place a file directly, bypassing injection
    pub fn put_file(&self, session_id: &str, path: &str, content: &[u8]) {
        let container = self.container_for(session_id);
        let mut state = self.state.lock();
        if let Some(ws) = state.workspaces.get_mut(&container) {
            let _ = ws.fs.write_file(path, content.to_vec());
        }
    }

    pub fn injections(&self, session_id: &str) -> Vec<Vec<InjectedEntry>> {
        let container = self.container_for(session_id);
        let state = self.state.lock();
        state
            .workspaces
            .get(&container)
            .map(|ws| ws.injections.clone())
            .unwrap_or_default()
    }

    pub fn exec_log(&self, session_id: &str) -> Vec<Vec<String>> {
        let container = self.container_for(session_id);
        let state = self.state.lock();
        state
            .workspaces
            .get(&container)
            .map(|ws| ws.exec_log.clone())
            .unwrap_or_default()
    }

    /// Bytes the shell has received so far
    pub fn shell_input(&self, session_id: &str) -> Vec<u8> {
        let container = self.container_for(session_id);
        let state = self.state.lock();
        state
            .workspaces
            .get(&container)
            .map(|ws| ws.shell_input.clone())
            .unwrap_or_default()
    }

    /// Terminate every shell attached to a session's workspace
    pub fn kill_shell(&self, session_id: &str) {
        let container = self.container_for(session_id);
        if let Some(ws) = self.state.lock().workspaces.get_mut(&container) {
            ws.kill_shells();
        }
    }

    fn unpack(archive: &[u8]) -> std::io::Result<Vec<(InjectedEntry, Vec<u8>)>> {
        let mut unpacked = Vec::new();
        let mut archive = tar::Archive::new(archive);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header();
            let record = InjectedEntry {
                path: entry.path()?.to_string_lossy().into_owned(),
                mode: header.mode()?,
                size: header.size()?,
                is_dir: header.entry_type().is_dir(),
            };
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            unpacked.push((record, data));
        }
        Ok(unpacked)
    }
}

fn simulated(op: &'static str, code: i32, stderr: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        op,
        code: Some(code),
        stderr: stderr.to_string(),
    }
}

#[async_trait::async_trait]
impl WorkspaceRuntime for MemoryRuntime {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn build_base_image(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if state.fail_image_build {
            return Err(RuntimeError::ImageBuild("simulated build failure".to_string()));
        }
        if !state.image_built {
            state.image_built = true;
            state.image_builds += 1;
        }
        Ok(())
    }

    async fn create_workspace(&self, session_id: &str) -> Result<WorkspaceHandle, RuntimeError> {
        let (delay, fail) = {
            let mut state = self.state.lock();
            let fail = std::mem::take(&mut state.fail_next_create)
                || state.failing_sessions.contains(session_id);
            (state.create_delay, fail)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(simulated("create_workspace", 125, "simulated create failure"));
        }

        let container = self.config.container_name(session_id);
        let handle = WorkspaceHandle::new(
            container.clone(),
            self.config.host_path(session_id),
            self.config.limits,
        );

        let mut state = self.state.lock();
        state.orphans.remove(&container);
        if let Some(mut stale) = state.workspaces.insert(container, Workspace::new()) {
            stale.kill_shells();
        }
        Ok(handle)
    }

    async fn exec(
        &self,
        handle: &WorkspaceHandle,
        argv: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let ws = state
            .workspaces
            .get_mut(handle.container())
            .ok_or_else(|| RuntimeError::NotFound(handle.container().to_string()))?;
        ws.exec_log.push(argv.to_vec());
        Ok(ws.fs.exec(argv, &state.denied))
    }

    async fn inject_archive(
        &self,
        handle: &WorkspaceHandle,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let delay = {
            let mut state = self.state.lock();
            if state.inject_delays.is_empty() {
                Duration::ZERO
            } else {
                state.inject_delays.remove(0)
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let entries = Self::unpack(&archive)
            .map_err(|e| simulated("inject_archive", 1, &format!("invalid archive: {e}")))?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let ws = state
            .workspaces
            .get_mut(handle.container())
            .ok_or_else(|| RuntimeError::NotFound(handle.container().to_string()))?;

        for (entry, data) in &entries {
            if state.denied.iter().any(|root| {
                entry.path == *root || entry.path.starts_with(&format!("{root}/"))
            }) {
                return Err(simulated("inject_archive", 1, "Permission denied"));
            }
            let applied = if entry.is_dir {
                ws.fs.make_dirs(&entry.path)
            } else {
                ws.fs.write_file(&entry.path, data.clone())
            };
            applied.map_err(|reason| simulated("inject_archive", 1, reason))?;
        }
        ws.injections.push(entries.into_iter().map(|(entry, _)| entry).collect());
        Ok(())
    }

    async fn spawn_shell(&self, handle: &WorkspaceHandle) -> Result<ShellProcess, RuntimeError> {
        let container = handle.container().to_string();
        let (client_input, mut shell_input) = tokio::io::duplex(64 * 1024);
        let (mut shell_output, client_output) = tokio::io::duplex(64 * 1024);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        {
            let mut state = self.state.lock();
            if std::mem::take(&mut state.fail_next_shell) {
                return Err(RuntimeError::Shell("simulated attach failure".to_string()));
            }
            let ws = state
                .workspaces
                .get_mut(&container)
                .ok_or_else(|| RuntimeError::NotFound(container.clone()))?;
            ws.shell_kills.push(kill_tx);
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                tokio::select! {
                    _ = &mut kill_rx => break,
                    read = shell_input.read(&mut buf) => {
                        let n = match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        if let Some(ws) = state.lock().workspaces.get_mut(&container) {
                            ws.shell_input.extend_from_slice(&buf[..n]);
                        }
                        if shell_output.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(ShellProcess::new(client_input, client_output))
    }

    async fn stop_and_remove(&self, handle: &WorkspaceHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if state.failing_removals.contains(handle.container()) {
            return Err(simulated("remove", 1, "simulated removal failure"));
        }
        if let Some(mut ws) = state.workspaces.remove(handle.container()) {
            ws.kill_shells();
            state.removed.push(handle.container().to_string());
        }
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<String>, RuntimeError> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .workspaces
            .keys()
            .chain(state.orphans.iter())
            .filter(|name| self.config.is_managed_name(name))
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn remove_named(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if state.failing_removals.contains(name) {
            return Err(simulated("remove", 1, "simulated removal failure"));
        }
        let live = state.workspaces.remove(name).map(|mut ws| ws.kill_shells());
        let orphan = state.orphans.remove(name);
        if live.is_some() || orphan {
            state.removed.push(name.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_runtime::commands;

    fn single_file_archive(path: &str, content: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, path, content).unwrap();
        builder.into_inner().unwrap()
    }

    #[tokio::test]
    async fn inject_then_read() {
        let runtime = MemoryRuntime::new();
        let handle = runtime.create_workspace("s1").await.unwrap();

        runtime
            .inject_archive(&handle, single_file_archive("src/main.py", b"print(1)"))
            .await
            .unwrap();

        let out = runtime
            .exec(&handle, &commands::read_file("src/main.py"))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"print(1)");
        assert_eq!(runtime.injections("s1")[0][0].mode, 0o644);
    }

    #[tokio::test]
    async fn shell_echoes_input() {
        let runtime = MemoryRuntime::new();
        let handle = runtime.create_workspace("s1").await.unwrap();
        let (mut input, mut output, _) = runtime.spawn_shell(&handle).await.unwrap().into_parts();

        input.write_all(b"ls\n").await.unwrap();
        let mut buf = [0u8; 3];
        output.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\n");
        assert_eq!(runtime.shell_input("s1"), b"ls\n");

        runtime.kill_shell("s1");
        let mut rest = Vec::new();
        output.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn exec_after_removal_is_not_found() {
        let runtime = MemoryRuntime::new();
        let handle = runtime.create_workspace("s1").await.unwrap();
        runtime.stop_and_remove(&handle).await.unwrap();
        runtime.stop_and_remove(&handle).await.unwrap();

        let err = runtime.exec(&handle, &commands::sync()).await.unwrap_err();
        assert!(err.is_already_gone());
        assert_eq!(runtime.removed(), vec!["devbox-s1".to_string()]);
    }
}
