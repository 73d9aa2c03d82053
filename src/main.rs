use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

mod backend;
mod connection;
mod format;
mod protocol;
mod session;
mod settings;
mod transcript;

use settings::{resolve_effective_settings, CliOverrides, EnvDefaults};

#[derive(Debug, Parser)]
#[command(name = "chat_relay")]
#[command(about = "Auto-reconnecting chat client for a tool-using assistant backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct OriginArg {
    /// Origin the backend is served from, e.g. https://chat.example.com
    #[arg(long)]
    origin: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat session on stdin/stdout
    Chat {
        #[command(flatten)]
        origin: OriginArg,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        reconnect_ms: Option<u64>,
        /// Also keep an HTML transcript at this path
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    Health {
        #[command(flatten)]
        origin: OriginArg,
    },
    Tools {
        #[command(flatten)]
        origin: OriginArg,
    },
    ClearHistory {
        identity: String,
        #[command(flatten)]
        origin: OriginArg,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = EnvDefaults::from_env();
    match cli.command {
        Commands::Chat { origin, identity, reconnect_ms, transcript } => {
            let overrides = CliOverrides { origin: origin.origin, identity, reconnect_ms, transcript };
            let settings = resolve_effective_settings(&env, &overrides)?;
            session::run_console(settings).await?;
        }
        Commands::Health { origin } => {
            let client = backend_for(&env, origin)?;
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Tools { origin } => {
            let client = backend_for(&env, origin)?;
            let tools = client.tools().await?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Commands::ClearHistory { identity, origin } => {
            let client = backend_for(&env, origin)?;
            let resp = client.clear_history(&identity).await?;
            println!("{}", resp.message);
        }
    }
    Ok(())
}

fn backend_for(env: &EnvDefaults, origin: OriginArg) -> anyhow::Result<backend::BackendClient> {
    let overrides = CliOverrides { origin: origin.origin, ..Default::default() };
    let settings = resolve_effective_settings(env, &overrides)?;
    Ok(backend::BackendClient::new(settings.origin))
}
