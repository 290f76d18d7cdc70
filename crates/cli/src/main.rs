//! Educore CLI: the main entry point.
//!
//! Commands:
//! - `query`        : Answer a tenant query through the RAG pipeline
//! - `personalized` : Answer with the learner's context and recommendations
//! - `events`       : Consume newline-delimited graph events
//! - `status`       : Show configured backends and providers
//! - `config`       : Show, validate or initialise the config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod app;
mod commands;

#[derive(Parser)]
#[command(
    name = "educore",
    about = "Educore: multi-tenant retrieval-augmented query engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query for a tenant
    ///
    /// Without database.url the content index, cache and graph are in-memory
    /// and start empty on every run, so answers carry no sources. Memory
    /// backends suit tests and embedding the pipeline in one process.
    Query {
        /// Tenant the query is scoped to
        #[arg(short, long)]
        tenant: String,

        /// The question to answer
        query: String,

        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        session: Option<String>,

        /// Caller roles, comma separated
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,

        /// Attribute filter as key=value (repeatable)
        #[arg(long = "attr", value_parser = commands::query::parse_attribute)]
        attributes: Vec<(String, String)>,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Answer a query with the learner's context and recommendations
    Personalized {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        user: String,

        query: String,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Consume graph events (NDJSON) from a file or stdin
    Events {
        /// Input file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Show system status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Query {
            tenant,
            query,
            user,
            session,
            roles,
            attributes,
            top_k,
            no_cache,
        } => {
            let args = commands::query::QueryArgs {
                tenant,
                query,
                user,
                session,
                roles,
                attributes: attributes.into_iter().collect(),
                top_k,
                use_cache: !no_cache,
            };
            commands::query::run(args).await?
        }
        Commands::Personalized {
            tenant,
            user,
            query,
            session,
        } => commands::personalized::run(&tenant, &user, &query, session.as_deref()).await?,
        Commands::Events { file } => commands::events::run(file).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}
