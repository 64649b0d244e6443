use std::path::Path;

use anyhow::Context;
use clap::Parser;

mod cli;
mod config;
mod corpus;
mod semantic;
#[cfg(test)]
mod tests;

use config::Config;
use semantic::IntertextEngine;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Bring up the engine and restore the persisted snapshot when present.
fn load_engine(config: &Config) -> anyhow::Result<IntertextEngine> {
    let engine = IntertextEngine::new(&config.engine).context("failed to initialize engine")?;
    engine
        .load(&config.index_path(), &config.corpus_path())
        .context("failed to load persisted index")?;
    Ok(engine)
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    let config = Config::load(Path::new(&args.config))
        .with_context(|| format!("failed to load config from {}", args.config))?;

    match args.command {
        cli::Command::Ingest { source } => {
            let verses = corpus::parse_morphgnt_dir(Path::new(&source))
                .with_context(|| format!("failed to parse corpus from {source}"))?;
            corpus::CorpusStore::save(&verses, &config.corpus_path())?;
            println!("{} verses ingested", verses.len());
            Ok(())
        }

        cli::Command::Index {} => {
            let verses = corpus::CorpusStore::load(&config.corpus_path())
                .context("no ingested corpus found, run `ingest` first")?;

            let engine = IntertextEngine::new(&config.engine)?;
            let count = engine.ingest_and_index(verses)?;
            engine.persist(&config.index_path(), &config.corpus_path())?;
            println!("{count} verses indexed");
            Ok(())
        }

        cli::Command::Search { query, top_k } => {
            let engine = load_engine(&config)?;
            let results = engine.find_similar(&query, top_k.unwrap_or(config.top_k))?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Links {
            position,
            top_k,
            exclude_same_book,
        } => {
            let engine = load_engine(&config)?;
            let links =
                engine.find_links_for(position, top_k.unwrap_or(config.top_k), exclude_same_book)?;
            println!("{}", serde_json::to_string_pretty(&links)?);
            Ok(())
        }

        cli::Command::Device { action } => {
            let engine = load_engine(&config)?;
            match action {
                cli::DeviceArgs::Status {} => {
                    println!("{}", serde_json::to_string_pretty(&engine.device_info())?);
                }
                cli::DeviceArgs::Set { name } => {
                    let report = engine.set_device(&name);
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Ok(())
        }
    }
}
