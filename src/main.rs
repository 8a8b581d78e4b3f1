//! gemchat - terminal chat client for a session-scoped chatbot backend
//!
//! A readline chat client that talks to the backend over HTTP:
//! - Buffered or streamed (line-delimited event) replies
//! - Server-side history restored per session
//! - Connectivity-aware input (sends are refused while the backend is down)

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

mod client;
mod config;
mod repl;
mod state;

#[derive(Parser)]
#[command(name = "gemchat")]
#[command(about = "Terminal chat client for a session-scoped chatbot backend")]
struct Args {
    /// Backend base URL
    #[arg(long, env = "GEMCHAT_SERVER_URL")]
    server_url: Option<String>,

    /// Session to open at startup
    #[arg(long, short = 's')]
    session: Option<String>,

    /// Disable streamed replies (use the buffered endpoint)
    #[arg(long)]
    no_stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from ~/.gemchat/.env or current dir)
    let env_path = dirs::home_dir()
        .map(|h| h.join(".gemchat").join(".env"))
        .filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv(); // fallback to current dir
    }

    // Initialize logging
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    // Load config file (~/.gemchat/config.toml)
    let config = config::Config::load();

    // Resolve values: CLI args > env vars (handled by clap) > config file > defaults
    let server_url = args
        .server_url
        .or(config.server_url)
        .unwrap_or_else(|| "http://localhost:8000".to_string());

    let session_id = args
        .session
        .or(config.session_id)
        .unwrap_or_else(|| state::DEFAULT_SESSION.to_string());

    let streaming = if args.no_stream {
        false
    } else {
        config.streaming.unwrap_or(true)
    };

    use repl::colors::ansi::*;

    // Pretty startup banner
    println!();
    println!(
        "{}{}  gemchat {}{}",
        BOLD,
        MAGENTA,
        env!("CARGO_PKG_VERSION"),
        RESET
    );
    println!("{}", repl::colors::separator(50));
    println!("{}Backend{}     {}", DIM, RESET, server_url);
    println!("{}Session{}     {}", DIM, RESET, session_id);
    println!(
        "{}Streaming{}   {}",
        DIM,
        RESET,
        if streaming {
            format!("{}on{}", GREEN, RESET)
        } else {
            format!("{}off{}", YELLOW, RESET)
        }
    );
    println!("{}", repl::colors::separator(50));
    println!();

    let client = client::ApiClient::new(&server_url);
    repl::run(client, session_id, streaming).await
}
