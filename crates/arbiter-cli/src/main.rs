use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "arbiter")]
#[command(about = "Arbiter - compile, run and grade submissions against test cases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP judge service
    Serve {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Grade a local source file and print the report as JSON
    Evaluate {
        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        source: PathBuf,

        /// JSON file holding `[{"input": ..., "expected_output": ...}]`
        #[arg(long)]
        cases: PathBuf,

        /// Seconds per test case
        #[arg(short, long)]
        time_limit: Option<f64>,

        #[arg(short, long)]
        memory_limit_mb: Option<u64>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List registered language profiles
    Languages {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            commands::serve::execute(config, host, port).await?;
        }
        Commands::Evaluate {
            language,
            source,
            cases,
            time_limit,
            memory_limit_mb,
            config,
        } => {
            commands::evaluate::execute(commands::evaluate::EvaluateArgs {
                language,
                source,
                cases,
                time_limit,
                memory_limit_mb,
                config,
            })
            .await?;
        }
        Commands::Languages { config } => {
            commands::languages::execute(config).await?;
        }
        Commands::Version => {
            println!("arbiter {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
