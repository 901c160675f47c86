use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};
use unigram_server::build_app;

#[derive(Parser)]
struct Args {
    /// Store directory path
    #[arg(long, default_value = "./data/db")]
    db: String,
    /// Data file loaded by /upload_data
    #[arg(long, default_value = "./data/top_500_lateral_wiki_utf8.csv")]
    data_file: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let app: Router = build_app(&args.db, args.data_file)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
