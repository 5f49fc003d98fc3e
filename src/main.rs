use clap::Parser;
use tracing_subscriber::EnvFilter;

use tasklet::config::Config;
use tasklet::error::Result;
use tasklet::server;

#[derive(Parser, Debug)]
#[command(name = "taskletd")]
#[command(about = "Tasklet to-do service daemon")]
struct Cli {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    db: Option<String>,

    #[arg(long, env = "TASKLET_TOKEN_SECRET")]
    token_secret: Option<String>,

    #[arg(long)]
    token_ttl_minutes: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tasklet=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let host = cli.host.unwrap_or_else(|| config.host());
    let port = cli.port.unwrap_or_else(|| config.port());
    let db = cli.db.unwrap_or_else(|| config.sqlite_path());
    let token_ttl_minutes = cli
        .token_ttl_minutes
        .unwrap_or_else(|| config.token_ttl_minutes());
    let token_secret = cli
        .token_secret
        .filter(|secret| !secret.is_empty())
        .or_else(|| config.token_secret())
        .unwrap_or_else(|| {
            tracing::warn!(
                "no token secret configured; using an ephemeral secret, issued tokens will not survive a restart"
            );
            uuid::Uuid::new_v4().to_string()
        });

    server::run(&host, port, &db, &token_secret, token_ttl_minutes).await
}
