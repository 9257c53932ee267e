use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vaingogh::{Config, GitHubHost, HtmlGenerator, Lister, RepoHost, Server, Watcher};

#[derive(Parser)]
#[command(name = "vaingogh")]
#[command(about = "Vanity import server for Go repositories hosted on GitHub")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./vaingogh.yaml, then XDG and /etc locations)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a vanity imports redirection server
    Serve {
        /// The port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// The address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: std::net::IpAddr,
    },

    /// List all Go repositories of the configured account (sanity check)
    Repos,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load and validate configuration
    let config = load_config(cli.config)?;
    init_logging(cli.verbose, &config);
    config.validate().context("Invalid configuration")?;

    info!("Starting vaingogh v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { port, bind } => cmd_serve(SocketAddr::new(bind, port), &config).await,
        Commands::Repos => cmd_repos(&config).await,
    }
}

/// Initialize logging from RUST_LOG, the verbose flag, or the configured level
fn init_logging(verbose: bool, config: &Config) {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "full" {
        registry.with(fmt::layer()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

fn build_lister(config: &Config) -> Result<Lister> {
    let host: Arc<dyn RepoHost> =
        Arc::new(GitHubHost::new(&config.lister.github).context("Failed to create GitHub client")?);
    Ok(Lister::new(host, config.lister_options()?))
}

/// Print the Go repositories, one per line
async fn cmd_repos(config: &Config) -> Result<()> {
    let lister = build_lister(config)?;

    let mut repos = lister
        .list_repositories()
        .await
        .context("Failed to list repositories")?;
    repos.sort();

    for repo in repos {
        println!("{}", repo);
    }
    Ok(())
}

/// Run the watcher and the HTTP server until interrupted
async fn cmd_serve(addr: SocketAddr, config: &Config) -> Result<()> {
    let lister = Arc::new(build_lister(config)?);
    let interval = config.check_interval()?;

    let watcher = Arc::new(Watcher::new(lister, interval));
    watcher
        .start()
        .await
        .context("Failed to load the initial repository list")?;

    let generator = HtmlGenerator::new(config.template_options()?)
        .context("Failed to build page generator")?;
    let server = Server::new(
        watcher.clone(),
        Arc::new(generator),
        &config.base_url(),
        config.server.environment.clone(),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.serve(listener, async move {
        let _ = shutdown_rx.await;
    }));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("Received interrupt signal; shutting down");
            let _ = shutdown_tx.send(());
            drain_server(&mut server_task, config).await;
        }
        result = &mut server_task => {
            watcher.stop().await;
            return result
                .context("Server task failed")?
                .context("Server error");
        }
    }

    watcher.stop().await;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for the server to finish in-flight requests, bounded by the shutdown timeout
async fn drain_server(
    server_task: &mut tokio::task::JoinHandle<std::io::Result<()>>,
    config: &Config,
) {
    let timeout = match config.shutdown_timeout() {
        Ok(timeout) => timeout,
        Err(e) => {
            warn!("Ignoring invalid shutdown timeout: {}", e);
            None
        }
    };

    let result = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, &mut *server_task).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Server didn't shut down within {:?}", timeout);
                server_task.abort();
                return;
            }
        },
        None => (&mut *server_task).await,
    };

    match result {
        Ok(Ok(())) => debug!("Server stopped"),
        Ok(Err(e)) => error!("Server didn't shut down correctly: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }
}

/// Wait for Ctrl+C
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
