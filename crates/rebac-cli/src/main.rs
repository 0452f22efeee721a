//! rebac command-line utilities.
//!
//! # Usage
//!
//! ```bash
//! # Emit a materialized-index view for a model
//! rebac index --file model.json --name fga_index --dialect materialize
//!
//! # Write the view to a file instead of stdout
//! rebac index --file model.json --name fga_index --output index.sql
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rebac_domain::model::{AuthorizationModel, TypeSystem};
use rebac_index::{materialize, Dialect, MaterializerInput};

/// rebac - relationship-based access-control utilities
#[derive(Parser, Debug)]
#[command(name = "rebac")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a materialized-index view from an authorization model
    Index(IndexArgs),
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Path to the authorization model (JSON)
    #[arg(long, default_value = "model.json")]
    file: PathBuf,

    /// Unique name for the index view
    #[arg(long)]
    name: String,

    /// Output file path; prints to stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,

    /// SQL dialect (postgresql, mysql, materialize)
    #[arg(long, default_value = "materialize")]
    dialect: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Index(args) => generate_index(args),
    }
}

fn generate_index(args: IndexArgs) -> Result<()> {
    let dialect: Dialect = args.dialect.parse()?;

    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read model file '{}'", args.file.display()))?;
    let model: AuthorizationModel = serde_json::from_str(&raw)
        .with_context(|| format!("model file '{}' is not a valid model", args.file.display()))?;

    let typesystem = TypeSystem::new_and_validate(model).context("model failed validation")?;

    let sql = materialize(MaterializerInput {
        dialect,
        index_name: &args.name,
        typesystem: &typesystem,
    })?;

    match &args.output {
        Some(path) => {
            fs::write(path, &sql)
                .with_context(|| format!("failed to write output file '{}'", path.display()))?;
            info!(output = %path.display(), dialect = %dialect, "index view written");
        }
        None => println!("{sql}"),
    }

    Ok(())
}
