//! fsmap CLI - Financial statement mapper
//!
//! Usage:
//!   fsmap init                          Initialize database
//!   fsmap corpus import --file CSV      Load training data
//!   fsmap classify "Sundry Debtors"     Classify one line item
//!   fsmap batch -i in.csv -o out.csv    Classify a CSV file
//!   fsmap stage --file items.csv        Stage line items
//!   fsmap run --workers 5               Classify all pending staged items

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fsmap_core::batch::default_checkpoint_path;
use fsmap_core::BatchOptions;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use commands::{GlobalOpts, TrainingSource};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let opts = GlobalOpts {
        db: cli.db,
        no_encrypt: cli.no_encrypt,
        config: cli.config,
        corpus: cli.corpus,
    };

    match cli.command {
        Commands::Init => commands::cmd_init(&opts.db, opts.no_encrypt),
        Commands::Status => {
            let config = commands::load_config(&opts)?;
            commands::cmd_status(&opts, &config)
        }
        Commands::Classify {
            text,
            trail,
            top,
            domain,
            json,
        } => {
            let mut config = commands::load_config(&opts)?;
            commands::apply_domain(&mut config, domain.as_deref());
            let source = commands::training_source(&opts)?;
            let ai = commands::ai_client(&config);
            let mapper = commands::load_mapper(source.as_source(), config, ai).await?;
            commands::cmd_classify(&mapper, &text, trail, top, json).await
        }
        Commands::Batch {
            input,
            output,
            resume,
            checkpoint,
            interval,
            domain,
        } => {
            let mut config = commands::load_config(&opts)?;
            commands::apply_domain(&mut config, domain.as_deref());
            let options = BatchOptions::new(input.display().to_string())
                .with_checkpoint(checkpoint.unwrap_or_else(default_checkpoint_path))
                .with_resume(resume)
                .with_interval(interval.unwrap_or(config.batch.checkpoint_interval));
            let source = commands::training_source(&opts)?;
            let ai = commands::ai_client(&config);
            let mapper = commands::load_mapper(source.as_source(), config, ai).await?;
            commands::cmd_batch(&mapper, &input, &output, options).await
        }
        Commands::Stage { file, tenant } => {
            let db = commands::open_db(&opts.db, opts.no_encrypt)?;
            commands::cmd_stage(&db, &file, tenant.as_deref())
        }
        Commands::Run { workers, domain } => {
            let mut config = commands::load_config(&opts)?;
            commands::apply_domain(&mut config, domain.as_deref());
            let workers = workers.unwrap_or(config.batch.workers);
            let db = commands::open_db(&opts.db, opts.no_encrypt)?;
            let ai = commands::ai_client(&config);
            let mapper = match &opts.corpus {
                Some(_) => {
                    let source = commands::training_source(&opts)?;
                    commands::load_mapper(source.as_source(), config, ai).await?
                }
                None => commands::load_mapper(&db, config, ai).await?,
            };
            commands::cmd_run(Arc::new(mapper), &db, workers).await
        }
        Commands::Results { limit, review } => {
            let db = commands::open_db(&opts.db, opts.no_encrypt)?;
            commands::cmd_results(&db, limit, review)
        }
        Commands::Corpus { action } => match action {
            CorpusAction::Refresh { force } => {
                let config = commands::load_config(&opts)?;
                let source = commands::training_source(&opts)?;
                let ai = commands::ai_client(&config);
                let mut mapper = commands::load_mapper(source.as_source(), config, ai).await?;
                commands::cmd_corpus_refresh(&mut mapper, source.as_source(), force).await
            }
            CorpusAction::Add { primary_group, fs } => {
                let config = commands::load_config(&opts)?;
                let source = commands::training_source(&opts)?;
                let ai = commands::ai_client(&config);
                let mut mapper = commands::load_mapper(source.as_source(), config, ai).await?;
                commands::cmd_corpus_add(&mut mapper, source.as_source(), &primary_group, &fs)
                    .await
            }
            CorpusAction::Stats => {
                let source = commands::training_source(&opts)?;
                commands::cmd_corpus_stats(source.as_source())
            }
            CorpusAction::Search { query, limit } => {
                let source = commands::training_source(&opts)?;
                commands::cmd_corpus_search(source.as_source(), &query, limit)
            }
            CorpusAction::Import { file } => {
                let db = commands::open_db(&opts.db, opts.no_encrypt)?;
                commands::cmd_corpus_import(&db, &file)
            }
            CorpusAction::Export { output } => {
                let source = commands::training_source(&opts)?;
                commands::cmd_corpus_export(source.as_source(), &output)
            }
            CorpusAction::Remove { primary_group } => match commands::training_source(&opts)? {
                TrainingSource::Database(db) => commands::cmd_corpus_remove(&db, &primary_group),
                TrainingSource::Csv(_) => {
                    anyhow::bail!("'corpus remove' works on the database; edit the CSV directly")
                }
            },
        },
        Commands::Checkpoint { path, clear } => commands::cmd_checkpoint(path.as_deref(), clear),
        Commands::Domains { show } => {
            let config = commands::load_config(&opts)?;
            commands::cmd_domains(show.as_deref(), &config.llm.domain)
        }
    }
}
