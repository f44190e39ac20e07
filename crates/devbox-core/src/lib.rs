//! devbox core - per-tenant sandboxed workspaces
//!
//! Each client connection gets a session: an isolated workspace, an
//! interactive shell inside it, and serialized file synchronization from
//! the editor. This crate provides:
//! - [`bootstrap`]: the startup gate that yields the [`SessionRegistry`]
//! - [`SessionRegistry`]: session lifecycle, input routing and file access
//! - [`ShellChannel`]: the duplex shell stream
//! - [`FileSync`] and [`SyncQueue`]: sanitized, ordered file operations
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use devbox_core::{bootstrap, DevboxConfig, SessionEvent};
//! use devbox_runtime::DockerRuntime;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DevboxConfig::default();
//! let runtime = Arc::new(DockerRuntime::new(config.runtime.clone()));
//! let registry = bootstrap(config, runtime).await?;
//!
//! let mut events = registry.create("conn-1".into(), "s1".into())?;
//! while let Some(event) = events.recv().await {
//!     if event == SessionEvent::Ready {
//!         break;
//!     }
//! }
//! let ack = registry.file_change(&"s1".into(), "main.py", b"print(1)").await;
//! assert!(ack.success);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod registry;
pub mod shell;
pub mod sync;
pub mod tree;
pub mod types;

pub use bootstrap::bootstrap;
pub use config::DevboxConfig;
pub use error::{ConfigError, DevboxError, FsError, SessionError};
pub use registry::SessionRegistry;
pub use shell::{ShellChannel, ShellState};
pub use sync::{pack_single_file, FileSync, SyncQueue};
pub use tree::{build_listing, build_tree, Tree, TreeNode};
pub use types::{ConnectionId, FileAck, InputDelivery, PathKind, SessionEvent, SessionId, TreeEntry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
