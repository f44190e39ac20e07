//! Reaper integration tests against the in-memory runtime and a stand-in
//! docker binary

use std::path::{Path, PathBuf};
use std::sync::Arc;

use devbox_runtime::{DockerRuntime, Reaper, RuntimeConfig, WorkspaceRuntime};
use devbox_test_utils::MemoryRuntime;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn sweep_removes_orphans_from_previous_run() {
    let runtime = MemoryRuntime::new();
    runtime.seed_orphan("devbox-old-1");
    runtime.seed_orphan("devbox-old-2");

    let reaper = Reaper::new(Arc::new(runtime.clone()));
    let report = reaper.sweep().await.unwrap();

    assert_eq!(report.found, 2);
    assert_eq!(report.removed, vec!["devbox-old-1".to_string(), "devbox-old-2".to_string()]);
    assert!(report.is_clean());
    assert!(runtime.list_managed().await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_ignores_unmanaged_names() {
    let runtime = MemoryRuntime::new();
    runtime.seed_orphan("postgres");
    runtime.seed_orphan("devbox-stale");

    let report = Reaper::new(Arc::new(runtime.clone())).sweep().await.unwrap();

    assert_eq!(report.found, 1);
    assert_eq!(report.removed, vec!["devbox-stale".to_string()]);
}

#[tokio::test]
async fn sweep_continues_past_failures() {
    let runtime = MemoryRuntime::new();
    runtime.seed_orphan("devbox-a");
    runtime.seed_orphan("devbox-b");
    runtime.seed_orphan("devbox-c");
    runtime.fail_removal_of("devbox-b");

    let report = Reaper::new(Arc::new(runtime.clone())).sweep().await.unwrap();

    assert_eq!(report.found, 3);
    assert_eq!(report.removed, vec!["devbox-a".to_string(), "devbox-c".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "devbox-b");
    assert!(!report.is_clean());
}

#[tokio::test]
async fn sweep_removes_live_workspaces_too() {
    let runtime = MemoryRuntime::new();
    runtime.create_workspace("s1").await.unwrap();

    let report = Reaper::new(Arc::new(runtime.clone())).sweep().await.unwrap();

    assert_eq!(report.removed, vec!["devbox-s1".to_string()]);
    assert!(!runtime.is_live("s1"));
}

#[tokio::test]
async fn sweep_on_clean_runtime_is_empty() {
    let runtime = MemoryRuntime::new();
    let report = Reaper::new(Arc::new(runtime)).sweep().await.unwrap();
    assert_eq!(report, devbox_runtime::ReapReport::default());
}

/// Shell script answering `docker ps` with fixed names and accepting
/// everything else
#[cfg(unix)]
fn fake_docker(dir: &Path, names: &[&str]) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("docker");
    let listing: String = names.iter().map(|name| format!("echo {name}\n")).collect();
    let script = format!("#!/bin/sh\nif [ \"$1\" = ps ]; then\n{listing}fi\nexit 0\n");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn sweep_removes_orphan_host_directories() {
    let bin = tempfile::tempdir().unwrap();
    let storage = tempfile::tempdir().unwrap();
    let docker = fake_docker(bin.path(), &["devbox-old-1", "postgres"]);

    let config = RuntimeConfig::default()
        .with_docker_binary(docker.to_string_lossy().into_owned())
        .with_storage_root(storage.path());
    let orphan = config.host_path("old-1");
    let unrelated = storage.path().join("postgres");
    std::fs::create_dir_all(orphan.join("src")).unwrap();
    std::fs::write(orphan.join("src/app.js"), "let x;").unwrap();
    std::fs::create_dir_all(&unrelated).unwrap();

    let report = Reaper::new(Arc::new(DockerRuntime::new(config)))
        .sweep()
        .await
        .unwrap();

    assert_eq!(report.removed, vec!["devbox-old-1".to_string()]);
    assert!(!orphan.exists());
    assert!(unrelated.is_dir());
}
