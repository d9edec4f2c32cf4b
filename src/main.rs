use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ugor::config::Config;
use ugor::files::Store;

#[derive(Parser, Debug)]
#[command(name = "ugor", version, about = "Minimal file storage service")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        database: Option<String>,
    },
    /// Display application and schema version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Command::Serve { host: None, port: None, database: None }) {
        Command::Serve { host, port, database } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(database) = database {
                config.database = database;
            }
            info!(version = ugor::VERSION, "ugor starting");
            ugor::gateway::run(&config).await
        }
        Command::Version => {
            let store = Store::open(config.database_path())?;
            println!("App version: {}", ugor::VERSION);
            println!("Schema version: {}", store.schema_version()?);
            Ok(())
        }
    }
}
