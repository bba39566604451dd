//! wsync CLI
//!
//! Thin wrapper over `wsync-core`: inspect the configured workspace service
//! and drive one headless session through the load, mutate, save cycle.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use wsync_core::config::{LogFormat, RemoteKind, WsyncConfig};
use wsync_core::error::ConfigError;
use wsync_core::logging::{LogSettings, init_logging};
use wsync_core::prompt::ScriptedPrompt;
use wsync_core::remote::{
    FileWorkspaceService, HttpWorkspaceService, MemoryWorkspaceService, WorkspaceService,
};
use wsync_core::resolver::BeaconOracle;
use wsync_core::route::{HistoryRouter, RecordingHost, Router};
use wsync_core::splash::RecordingSurface;
use wsync_core::storage::MemoryStorage;
use wsync_core::transform::DirectiveKind;
use wsync_core::{Session, SessionParts};

#[derive(Parser)]
#[command(name = "wsync", version, about = "Persisted workspace sessions")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "WSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (overrides config)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty or json (overrides config)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workspace ids
    List,

    /// Print a stored workspace record as JSON
    Show {
        /// Workspace id
        id: String,
    },

    /// Open a session at a URL, apply mutations and save
    Open {
        /// Page URL, e.g. /lab/workspaces/proj1?clone=template
        url: String,

        /// Set a state key: key=<json>
        #[arg(long = "set", value_name = "KEY=JSON")]
        set: Vec<String>,

        /// Remove a state key
        #[arg(long = "remove", value_name = "KEY")]
        remove: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Serialize)]
struct OpenSummary {
    workspace: String,
    directive: Option<DirectiveKind>,
    url: String,
    keys: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(remediation) = remediation_for(&err) {
                eprintln!();
                eprintln!("{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

fn remediation_for(err: &anyhow::Error) -> Option<wsync_core::error::Remediation> {
    if let Some(core) = err.downcast_ref::<wsync_core::Error>() {
        return core.remediation();
    }
    err.downcast_ref::<ConfigError>()
        .map(ConfigError::remediation)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = WsyncConfig::load(cli.config.as_deref())?;
    init_cli_logging(&config, cli.log_level.as_deref(), cli.log_format.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli.command, config))
}

fn init_cli_logging(
    config: &WsyncConfig,
    level: Option<&str>,
    format: Option<&str>,
) -> anyhow::Result<()> {
    let format = format
        .map(str::parse::<LogFormat>)
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid --log-format: {e}"))?;
    let settings = LogSettings::from_config(&config.logging)
        .with_level(level)
        .with_format(format);
    init_logging(&settings)?;
    Ok(())
}

async fn dispatch(command: Commands, config: WsyncConfig) -> anyhow::Result<()> {
    match command {
        Commands::List => {
            let service = build_service(&config)?;
            let listing = service.list().await.map_err(wsync_core::Error::from)?;
            for id in listing.ids {
                println!("{id}");
            }
        }
        Commands::Show { id } => {
            let service = build_service(&config)?;
            let record = service.fetch(&id).await.map_err(wsync_core::Error::from)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Open { url, set, remove } => {
            let service = build_service(&config)?;
            let summary = open(config, service, &url, &set, &remove).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Config => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

fn build_service(config: &WsyncConfig) -> anyhow::Result<Arc<dyn WorkspaceService>> {
    let remote = &config.remote;
    Ok(match remote.kind {
        RemoteKind::Memory => Arc::new(MemoryWorkspaceService::new()),
        RemoteKind::File => {
            let Some(dir) = remote.resolved_dir() else {
                return Err(ConfigError::ValidationError(
                    "remote.dir is required for the file service".to_string(),
                )
                .into());
            };
            Arc::new(FileWorkspaceService::new(dir))
        }
        RemoteKind::Http => {
            let url = remote.url.as_deref().unwrap_or_default();
            Arc::new(HttpWorkspaceService::new(
                url,
                remote.token.clone(),
                remote.timeout(),
            )?)
        }
    })
}

fn parse_assignment(raw: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, json)) = raw.split_once('=') else {
        bail!("--set expects KEY=JSON, got {raw:?}");
    };
    if key.is_empty() {
        bail!("--set key must not be empty");
    }
    let value = serde_json::from_str(json)
        .map_err(wsync_core::Error::from)
        .with_context(|| format!("invalid JSON for key {key:?}"))?;
    Ok((key.to_string(), value))
}

async fn open(
    config: WsyncConfig,
    service: Arc<dyn WorkspaceService>,
    url: &str,
    set: &[String],
    remove: &[String],
) -> anyhow::Result<OpenSummary> {
    let assignments = set
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let storage = Arc::new(MemoryStorage::new());
    let oracle = Arc::new(BeaconOracle::start(
        storage.clone(),
        config.resolver.beacon_timeout(),
    ));
    let host = Arc::new(RecordingHost::new());
    let router: Arc<dyn Router> = Arc::new(HistoryRouter::new(url, host));

    let session = Session::bootstrap(SessionParts {
        config,
        storage,
        oracle,
        service,
        router: Arc::clone(&router),
        prompt: Arc::new(ScriptedPrompt::new()),
        surface: Arc::new(RecordingSurface::new()),
    })
    .await?;

    let store = session.store();
    for (key, value) in assignments {
        debug!(key = %key, "setting state key");
        store.save(&key, value).await;
    }
    for key in remove {
        debug!(key = %key, "removing state key");
        store.remove(key).await;
    }
    session
        .orchestrator()
        .save_state(true)
        .await
        .map_err(wsync_core::Error::from)?;

    let keys = store.to_json().await.keys().cloned().collect();
    Ok(OpenSummary {
        workspace: session.workspace().to_string(),
        directive: session.orchestrator().directive(),
        url: router.current().to_string(),
        keys,
    })
}
