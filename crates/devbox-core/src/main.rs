use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use devbox_core::{bootstrap, ConnectionId, DevboxConfig, InputDelivery, SessionEvent, SessionId};
use devbox_runtime::{DockerRuntime, Reaper, WorkspaceRuntime};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

fn cli() -> Command {
    Command::new("devboxd")
        .version(devbox_core::VERSION)
        .about("Per-tenant sandboxed workspace manager")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("storage-root")
                .long("storage-root")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Host directory holding per-session workspaces"),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .global(true)
                .help("Workspace image tag"),
        )
        .arg(
            Arg::new("docker")
                .long("docker")
                .global(true)
                .help("Docker CLI binary"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(Command::new("prepare").about("Build the workspace image and reap orphaned workspaces"))
        .subcommand(Command::new("reap").about("Remove workspaces left behind by earlier runs"))
        .subcommand(
            Command::new("shell")
                .about("Open an interactive shell in a fresh workspace")
                .arg(
                    Arg::new("session-id")
                        .required(false)
                        .help("Session id (generated when omitted)"),
                ),
        )
}

fn init_tracing(json: bool) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    let init_result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = init_result {
        eprintln!("failed to initialize logging: {e}");
    }
}

fn load_config(matches: &ArgMatches) -> Result<DevboxConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => DevboxConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DevboxConfig::default(),
    };
    if let Some(root) = matches.get_one::<PathBuf>("storage-root") {
        config = config.with_storage_root(root.clone());
    }
    if let Some(image) = matches.get_one::<String>("image") {
        config = config.with_image_tag(image.clone());
    }
    if let Some(docker) = matches.get_one::<String>("docker") {
        config.runtime = config.runtime.with_docker_binary(docker.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(&matches)?;
    let runtime: Arc<dyn WorkspaceRuntime> = Arc::new(DockerRuntime::new(config.runtime.clone()));

    match matches.subcommand() {
        Some(("prepare", _)) => {
            bootstrap(config, runtime).await.context("workspace runtime unavailable")?;
            println!("workspace runtime ready");
        }
        Some(("reap", _)) => {
            let report = Reaper::new(runtime).sweep().await.context("listing managed workspaces")?;
            println!("found {}, removed {}", report.found, report.removed.len());
            for (name, reason) in &report.failed {
                println!("failed {name}: {reason}");
            }
            if !report.is_clean() {
                anyhow::bail!("{} workspaces could not be removed", report.failed.len());
            }
        }
        Some(("shell", args)) => {
            let id = args
                .get_one::<String>("session-id")
                .map_or_else(SessionId::generate, |id| SessionId::new(id.as_str()));
            run_shell(config, runtime, id).await?;
        }
        Some((other, _)) => anyhow::bail!("unknown command: {other}"),
        None => anyhow::bail!("no command given"),
    }
    Ok(())
}

/// Bridge the terminal to a session shell until either side closes
async fn run_shell(config: DevboxConfig, runtime: Arc<dyn WorkspaceRuntime>, id: SessionId) -> Result<()> {
    let registry = bootstrap(config, runtime).await.context("workspace runtime unavailable")?;
    let connection = ConnectionId::new(format!("cli-{}", std::process::id()));
    let mut events = registry.create(connection, id.clone())?;
    info!(session = %id, "waiting for workspace");

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 4096];
    let mut stdin_open = true;
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Output(bytes)) => {
                    if let Err(e) = write_output(&bytes) {
                        break Err(e);
                    }
                }
                Some(SessionEvent::Ready) => info!(session = %id, "shell attached"),
                Some(SessionEvent::Failed { reason }) => break Err(anyhow::anyhow!(reason)),
                Some(SessionEvent::ShellExited) | None => break Ok(()),
                Some(SessionEvent::TreeChanged) => {}
            },
            read = stdin.read(&mut buf), if stdin_open => match read {
                Ok(0) | Err(_) => stdin_open = false,
                Ok(n) => match registry.keystroke(&id, buf[..n].to_vec()).await {
                    Ok(InputDelivery::NotReady) => warn!(session = %id, "input dropped before shell attached"),
                    Ok(_) => {}
                    Err(e) => break Err(e.into()),
                },
            },
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    registry.destroy(&id).await;
    outcome
}

fn write_output(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes).context("writing shell output")?;
    stdout.flush().context("writing shell output")
}
