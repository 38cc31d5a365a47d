//! jobgraph CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::RunArgs;

#[derive(Parser)]
#[command(name = "jobgraph")]
#[command(about = "Generate optimized CI job graphs", long_about = None)]
struct Cli {
    /// Directory holding config.kdl and one directory per stage
    #[arg(long, env = "JOBGRAPH_ROOT", default_value = "ci")]
    root: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, env = "JOBGRAPH_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline and write the pipeline documents
    Decision {
        #[command(flatten)]
        run: RunArgs,
        /// Where to write the pipeline documents and debug artifacts
        #[arg(long, env = "JOBGRAPH_ARTIFACTS_DIR", default_value = "artifacts")]
        artifacts_dir: PathBuf,
    },
    /// Print the full job graph
    Full {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the target job graph
    Target {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the optimized job graph and its decisions
    Optimized {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Check that every stage loads and the full graph assembles
    Validate {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the run parameters built from flags and environment
    Parameters {
        #[command(flatten)]
        run: RunArgs,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries graph documents; logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Decision { run, artifacts_dir } => {
            commands::generate::decision(&cli.root, &run, &artifacts_dir).await?;
        }
        Commands::Full { run } => {
            commands::generate::full(&cli.root, &run).await?;
        }
        Commands::Target { run } => {
            commands::generate::target(&cli.root, &run).await?;
        }
        Commands::Optimized { run } => {
            commands::generate::optimized(&cli.root, &run).await?;
        }
        Commands::Validate { run } => {
            commands::validate(&cli.root, &run).await?;
        }
        Commands::Parameters { run } => {
            commands::parameters(&run)?;
        }
    }

    Ok(())
}
