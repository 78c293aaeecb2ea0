//! widget-restore CLI entry point.
//!
//! Replays recorded kernel sessions through the reconstruction engine and
//! talks to a Jupyter server about the kernel behind a rendered page.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;
use widget_restore::config::{config_path, RestoreConfig};
use widget_restore::document::{DocumentSpec, MemoryDocument};
use widget_restore::fixture::ReplayFixture;
use widget_restore::host::NoopHost;
use widget_restore::kernel::rest::{JupyterServerClient, ShutdownRoute};
use widget_restore::kernel::{discover_kernel_in, frame_kernel_id_in, shutdown_kernel_in};
use widget_restore::registry::default_registry;
use widget_restore::session::RestoreSession;
use widget_restore::tasks::TaskSet;
use widget_restore::views::SummaryViewFactory;

/// How long `frame-kernel --shutdown` waits for the request before giving up.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "widget-restore")]
#[command(about = "Rebuild live Jupyter widgets into a rendered page")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (default: <config dir>/widget-restore/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a reconstruction pass over a recorded session
    Replay {
        /// Fixture with widget states and the page document
        #[arg(long)]
        fixture: PathBuf,

        /// Include the updated document in the output
        #[arg(long)]
        document: bool,
    },

    /// Show the kernel a rendered page belongs to
    FrameKernel {
        /// Page document as a JSON tree
        #[arg(long)]
        frame: PathBuf,

        /// Shut the kernel down through the configured server
        #[arg(long)]
        shutdown: bool,

        /// Use the viewer's stop route instead of the kernels API
        #[arg(long)]
        viewer_route: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = RestoreConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { fixture, document } => replay(&config, &fixture, document).await,
        Commands::FrameKernel {
            frame,
            shutdown,
            viewer_route,
        } => frame_kernel(&config, &frame, shutdown, viewer_route).await,
        Commands::Config => show_config(&config, cli.config.as_deref()),
    }
}

async fn replay(
    config: &RestoreConfig,
    fixture: &Path,
    include_document: bool,
) -> anyhow::Result<()> {
    let fixture = ReplayFixture::from_path(fixture)?;
    let kernel = fixture.kernel()?;
    let mut doc = fixture.document();
    info!("Replaying {} recorded widgets", fixture.widgets.len());

    let mut session = RestoreSession::new(
        Arc::new(kernel),
        Arc::new(default_registry()),
        SummaryViewFactory::new(),
        NoopHost,
        config,
    )?;
    let report = session.run(&mut doc).await?;

    let output = if include_document {
        json!({ "report": report, "document": doc.to_spec() })
    } else {
        json!({ "report": report })
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn frame_kernel(
    config: &RestoreConfig,
    frame: &Path,
    shutdown: bool,
    viewer_route: bool,
) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(frame)
        .with_context(|| format!("Failed to read frame {}", frame.display()))?;
    let spec: DocumentSpec = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid frame document {}", frame.display()))?;
    let doc = MemoryDocument::from_spec(&spec);
    let element_id = config.config_element_id.as_str();

    let Some(kernel_id) = frame_kernel_id_in(&doc, element_id) else {
        println!("No kernel id in frame");
        return Ok(());
    };
    println!("Kernel: {}", kernel_id);

    let Some(server_url) = config.server_url.as_deref() else {
        if shutdown {
            bail!("--shutdown needs server_url in the config or WIDGET_RESTORE_SERVER_URL");
        }
        return Ok(());
    };
    let route = if viewer_route {
        ShutdownRoute::ViewerStop
    } else {
        ShutdownRoute::KernelsApi
    };
    let client = JupyterServerClient::new(server_url)?
        .with_token(config.token.clone())
        .with_route(route);

    match discover_kernel_in(&doc, element_id, &client).await {
        Some(model) => println!("{}", serde_json::to_string_pretty(&model)?),
        None => println!("Kernel {} is not running on {}", kernel_id, server_url),
    }

    if shutdown {
        let mut tasks = TaskSet::new();
        let outcome = shutdown_kernel_in(&doc, element_id, Arc::new(client), &mut tasks);
        let joined = tokio::time::timeout(SHUTDOWN_WAIT, tasks.join_all()).await;
        match joined {
            Ok(summary) => info!("Shutdown tasks: {:?}", summary),
            Err(_) => {
                tasks.abandon("kernel shutdown did not finish in time");
            }
        }
        println!("{}", serde_json::to_string(&outcome)?);
    }
    Ok(())
}

fn show_config(config: &RestoreConfig, explicit: Option<&Path>) -> anyhow::Result<()> {
    let source = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(config_path);
    let mut shown = config.clone();
    if shown.token.is_some() {
        shown.token = Some("<redacted>".to_string());
    }
    println!("# {}", source.display());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
