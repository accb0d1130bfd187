//! Quizsmith Agent - Entry Point
//!
//! Modes:
//! - Default: HTTP server (generate, MCP, A2A, discovery, health)
//! - --stdio / -s: MCP server over stdio

use quizsmith_agent::{server, Config, McpServer, QuizService};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let stdio_mode = args.iter().any(|a| a == "--stdio" || a == "-s");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Quizsmith Agent v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: quizsmith [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --stdio, -s   Run as MCP server over stdio");
        println!("  --help, -h    Show this help");
        println!();
        println!("Default: Run as HTTP server");
        println!();
        println!("Environment variables:");
        println!("  OPENAI_API_KEY          Generator API key");
        println!("  OPENAI_BASE_URL         Chat completions base URL");
        println!("  QUIZ_MODEL              Model id (default: gpt-3.5-turbo)");
        println!("  TAVILY_API_KEY          Web search API key");
        println!("  QUIZ_HOST / QUIZ_PORT   HTTP bind (default: 127.0.0.1:8001)");
        println!("  QUIZ_MAX_ATTEMPTS       Generation attempt bound (default: 3)");
        println!("  QUIZ_MAX_QUESTIONS      Question ceiling (default: 50)");
        println!("  QUIZ_MAX_ATTEMPTS_LIMIT Attempt ceiling per request (default: 10)");
        return Ok(());
    }

    // Setup logging based on mode
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if stdio_mode {
        // MCP mode - stdout is the protocol channel, log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    let service = Arc::new(QuizService::from_config(config)?);

    if stdio_mode {
        info!("Quizsmith MCP Server v{}", env!("CARGO_PKG_VERSION"));
        McpServer::new(service).run().await?;
    } else {
        info!("Quizsmith HTTP Server v{}", env!("CARGO_PKG_VERSION"));
        server::serve(service).await?;
    }

    Ok(())
}
