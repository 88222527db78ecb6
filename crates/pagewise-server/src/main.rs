//! Pagewise: entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use pagewise::{DriverFactory, PaginationMode, ProgressPublisher, ScrapeRequest, SiteProfile};
use pagewise_server::config::{
    build_orchestrator, load_dotenv, load_profile, resolve_addr, resolve_profile_source,
};
use pagewise_server::session::{SessionManager, DEFAULT_RETENTION};
use pagewise_server::{EventBus, HttpTransport};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(
    name = "pagewise",
    about = "Paginated record extraction from dynamic pages, with streamed progress",
    version
)]
struct Cli {
    /// Path to a site profile JSON file.
    #[arg(short, long, global = true)]
    profile: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Show the browser window.
    #[arg(long, global = true)]
    headful: bool,

    /// Do not run the profile's sign-in recipe.
    #[arg(long, global = true)]
    skip_login: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (default).
    Serve {
        /// Listen address (host:port). Also reads PAGEWISE_ADDR.
        #[arg(long)]
        addr: Option<String>,
    },

    /// Scrape one URL and write the records as JSON.
    Scrape {
        url: String,

        /// Field to extract (repeatable). Defaults to every profile field.
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Pagination mode: bounded or continuous.
        #[arg(short, long, default_value = "bounded")]
        mode: String,

        /// Page limit in bounded mode.
        #[arg(long, default_value_t = 1)]
        max_pages: i64,

        /// Output file. Prints to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the fields the active profile can extract.
    Fields,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   pagewise completions bash > ~/.local/share/bash-completion/completions/pagewise
    ///   pagewise completions zsh > ~/.zfunc/_pagewise
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);
    load_dotenv();

    match cli.command.unwrap_or(Commands::Serve { addr: None }) {
        Commands::Serve { addr } => {
            let profile = open_profile(cli.profile)?;
            let orchestrator = Arc::new(build_orchestrator(&profile, !cli.skip_login)?);
            let factory = open_factory(&profile, cli.headful).await;

            let manager = Arc::new(SessionManager::new(
                orchestrator,
                factory,
                Arc::new(EventBus::default()),
            ));
            spawn_cleanup(Arc::clone(&manager));

            let shutdown = {
                let manager = Arc::clone(&manager);
                async move {
                    let _ = tokio::signal::ctrl_c().await;
                    let stopped = manager.stop_all().await;
                    tracing::info!("Shutting down, stopped {stopped} running sessions");
                }
            };

            let addr = resolve_addr(addr.as_deref());
            HttpTransport::new(manager).run(&addr, shutdown).await?;
        }

        Commands::Scrape {
            url,
            fields,
            mode,
            max_pages,
            output,
        } => {
            let profile = open_profile(cli.profile)?;
            let orchestrator = build_orchestrator(&profile, !cli.skip_login)?;
            let fields = if fields.is_empty() {
                profile.fields.names().map(str::to_string).collect()
            } else {
                fields
            };
            let request = ScrapeRequest::new(url, fields, PaginationMode::from(mode), Some(max_pages));
            let prepared = orchestrator.prepare(&request)?;

            let factory = open_factory(&profile, cli.headful).await;
            let driver = factory.open().await?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupted, finishing current page");
                        cancel.cancel();
                    }
                }
            });

            let publisher = ProgressPublisher::default();
            let outcome = orchestrator.run(prepared, driver, &publisher, cancel).await?;
            let json = serde_json::to_string_pretty(&outcome.records)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(
                        "Saved {} records from {} pages to {}",
                        outcome.records.len(),
                        outcome.pages_scraped,
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }

        Commands::Fields => {
            let profile = open_profile(cli.profile)?;
            println!("{} (v{})", profile.name, profile.version);
            for name in profile.fields.names() {
                println!("  {name}");
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pagewise", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn open_profile(explicit: Option<PathBuf>) -> anyhow::Result<SiteProfile> {
    let source = resolve_profile_source(explicit.as_deref());
    let profile = load_profile(&source)?;
    tracing::info!("Profile: {} v{} ({source})", profile.name, profile.version);
    Ok(profile)
}

#[cfg(feature = "chromium")]
async fn open_factory(profile: &SiteProfile, headful: bool) -> Arc<dyn DriverFactory> {
    use pagewise::driver::chromium::{BrowserOptions, ChromiumFactory};

    let options = BrowserOptions {
        headless: !headful,
        navigation_timeout: profile.navigation_timeout(),
        ..BrowserOptions::default()
    };
    match ChromiumFactory::launch(options).await {
        Ok(factory) => Arc::new(factory),
        Err(e) => {
            tracing::warn!("{e}. New sessions are rejected until a browser is available.");
            Arc::new(pagewise::NoopFactory)
        }
    }
}

#[cfg(not(feature = "chromium"))]
async fn open_factory(_profile: &SiteProfile, _headful: bool) -> Arc<dyn DriverFactory> {
    tracing::warn!("Built without the chromium feature. New sessions are rejected.");
    Arc::new(pagewise::NoopFactory)
}

fn spawn_cleanup(manager: Arc<SessionManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            manager.cleanup(DEFAULT_RETENTION).await;
        }
    });
}
