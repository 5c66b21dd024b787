mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gptbridge")]
#[command(about = "ChatGPT browser agent API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Host to bind to (overrides config server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Execute a single prompt from the terminal
    Run {
        /// The prompt to submit to ChatGPT
        prompt: String,
    },

    /// Run environment diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Run { prompt } => {
            commands::run_cmd::run(&prompt).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
    }

    Ok(())
}
