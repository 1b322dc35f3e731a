mod batch;

use adkuu_core::{EngineConfig, PerformanceRecord};
use anyhow::Context;
use background_service::{LearningFeatureUpdater, PerformanceFeedback};
use batch::{rank_batch, RankBatch};
use chrono::Utc;
use clap::{Parser, Subcommand};
use database::Database;
use llm_interface::{KeywordRelevanceScorer, OpenAiRelevanceScorer};
use opportunity_engine::OpportunityEngine;
use quality_gates::{suggest_improvements, QualityGate};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "adkuu")]
#[command(about = "Opportunity scoring, quality gating and learning for Reddit engagement")]
struct Cli {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank a JSON batch of posts read from stdin and print opportunities.
    Rank {
        /// Score relevance with the configured LLM instead of keywords.
        #[arg(long, default_value_t = false)]
        llm: bool,
    },
    /// Run the quality gate over content text read from stdin.
    Gate {
        #[arg(long, default_value_t = 100.0)]
        relevance: f64,
    },
    /// Recompute learning features in the configured database.
    Learn {
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Store a JSON array of performance records read from stdin and credit
    /// successful posts to their accounts.
    Feedback,
}

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading stdin")?;
    Ok(input)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adkuu=info,opportunity_engine=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Rank { llm } => {
            let batch: RankBatch =
                serde_json::from_str(&read_stdin()?).context("parsing post batch")?;
            let engine = OpportunityEngine::from_config(&config);
            let now = Utc::now();
            let opportunities = if llm {
                let scorer = OpenAiRelevanceScorer::new(&config.llm)?;
                rank_batch(batch, &engine, &scorer, now).await
            } else {
                rank_batch(batch, &engine, &KeywordRelevanceScorer::new(), now).await
            };
            println!("{}", serde_json::to_string_pretty(&opportunities)?);
        }
        Commands::Gate { relevance } => {
            let text = read_stdin()?;
            let result = QualityGate::new(config.quality).check(text.trim(), relevance);
            if let Some(advisory) = result.advisory() {
                tracing::warn!("{}", advisory);
                for suggestion in suggest_improvements(&result) {
                    tracing::info!("Suggestion: {}", suggestion);
                }
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Learn { window_days } => {
            let db = Database::connect(&config.database).await?;
            db.run_migrations().await?;
            let updater = LearningFeatureUpdater::new(Arc::new(db), config.learning.clone());
            let snapshot = updater
                .update_learning_features(
                    window_days.unwrap_or(config.learning.window_days),
                    Utc::now(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Feedback => {
            let records: Vec<PerformanceRecord> =
                serde_json::from_str(&read_stdin()?).context("parsing performance records")?;
            let db = Database::connect(&config.database).await?;
            db.run_migrations().await?;
            let feedback = PerformanceFeedback::new(Arc::new(db), config.learning.clone());
            let (credited, failed) = feedback.record_all(&records).await;
            for (content_id, error) in &failed {
                tracing::warn!("Performance record {} not stored: {}", content_id, error);
            }
            tracing::info!(
                "Processed {} of {} performance records, {} credited to accounts",
                records.len() - failed.len(),
                records.len(),
                credited
            );
        }
    }

    Ok(())
}
