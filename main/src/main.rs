use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{
    storage::db::SurrealDbClient,
    utils::config::{get_config, AppConfig},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use anamnes::{QueryEngine, QueryOptions};

#[derive(Parser)]
#[command(
    name = "anamnes",
    about = "Retrieval-augmented question answering over a patient's medical record"
)]
struct Cli {
    /// Acting user id, used for deterministic feature rollout.
    #[arg(long, default_value = "system")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question against one patient's indexed record.
    Query {
        /// Patient identifier the question is scoped to.
        #[arg(long)]
        patient: String,
        /// The clinical question.
        question: String,
        /// Hybrid blend weight override (0..=1).
        #[arg(long)]
        alpha: Option<f32>,
        /// Number of candidates to return.
        #[arg(long)]
        top_k: Option<usize>,
        /// Force detailed clinical reasoning in the summary.
        #[arg(long)]
        detailed: bool,
    },
    /// Chunk, embed, and index a patient's artifacts.
    Index {
        #[arg(long)]
        patient: String,
        /// Re-index artifacts that already have chunks.
        #[arg(long)]
        force: bool,
    },
    /// List the patient's recent conversations.
    Recent {
        #[arg(long)]
        patient: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = get_config().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    let db = connect(&config).await?;
    db.apply_migrations(config.vector_db.dimension)
        .await
        .context("applying migrations")?;

    let engine = QueryEngine::new(Arc::new(db), config, cli.user);
    let warmed = engine.warm_start().await.context("rebuilding keyword index")?;
    info!(chunks = warmed, "Keyword index warmed");

    match cli.command {
        Command::Query {
            patient,
            question,
            alpha,
            top_k,
            detailed,
        } => {
            let bundle = engine
                .query(
                    &question,
                    &patient,
                    QueryOptions {
                        alpha,
                        top_k,
                        detailed_reasoning: detailed,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Command::Index { patient, force } => {
            let report = engine.index(&patient, force).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Recent { patient, limit } => {
            let records = engine.recent_queries(&patient, limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<SurrealDbClient> {
    SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    .context("connecting to metadata store")
}
