mod cli;

use anyhow::Context;
use clap::Parser;
use cli::app::App;
use graph_studio::{ClientState, ConnectionConfig, MemoryDriver, NotificationManager, SessionType};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DATABASE: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "graph-studio", version, about = "Terminal client for graph databases")]
struct Args {
    /// Connection URL, e.g. graphdb://admin@localhost:1729/social
    #[arg(long)]
    url: Option<String>,

    /// JSON connection profile
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Server address as host[:port]
    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    username: Option<String>,

    /// Database to open a session on after connecting
    #[arg(long)]
    database: Option<String>,

    /// data or schema
    #[arg(long)]
    session_type: Option<SessionType>,

    /// Database created in the bundled server (repeatable)
    #[arg(long = "seed")]
    seeds: Vec<String>,

    #[arg(long, default_value = "graph-studio.log")]
    log_file: PathBuf,
}

impl Args {
    /// Defaults, then profile, then URL, then individual flags.
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        let mut config = match &self.profile {
            Some(path) => ConnectionConfig::from_json_file(path)
                .with_context(|| format!("failed to load profile {}", path.display()))?,
            None => ConnectionConfig::default(),
        };

        if let Some(url) = &self.url {
            let from_url = ConnectionConfig::from_url(url)?;
            config.host = from_url.host;
            config.port = from_url.port;
            if !from_url.username.is_empty() {
                config.username = from_url.username;
            }
            if from_url.password.is_some() {
                config.password = from_url.password;
            }
            if from_url.database.is_some() {
                config.database = from_url.database;
            }
        }

        if let Some(address) = &self.address {
            config = config.with_address(address)?;
        }
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(database) = &self.database {
            config = config.database(database);
        }
        if let Some(session_type) = self.session_type {
            config = config.session_type(session_type);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    // The terminal UI owns stdout, so logs go to a file
    let file = File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graph_studio=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let mut config = args.connection_config()?;
    let seeds = if args.seeds.is_empty() {
        vec![DEFAULT_DATABASE.to_string()]
    } else {
        args.seeds.clone()
    };
    if config.database.is_none() {
        config.database = seeds.first().cloned();
    }

    let driver = seeds
        .iter()
        .fold(MemoryDriver::new(), |driver, name| driver.with_database(name));
    tracing::info!(url = %config.to_url(), databases = ?seeds, "starting graph studio");

    let client = Arc::new(ClientState::new(Arc::new(driver), NotificationManager::new()));
    client.connect(config).await?;

    let mut app = App::new(client);
    app.run().await?;
    Ok(())
}
