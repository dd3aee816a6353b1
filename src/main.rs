use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;

mod app;
mod auth;
mod cli;
mod config;
mod dataset;
mod keywords;
mod semantic;
mod store;
#[cfg(test)]
mod tests;
mod web;

use app::{AppFactory, SearchParams, SearchService};
use config::Config;
use dataset::Region;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    match args.command {
        cli::Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
                config.bind_addr()?;
            }
            runtime.block_on(serve(config))
        }

        cli::Command::Index { path } => runtime.block_on(async {
            let entries = dataset::load_jsonl_file(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let service = AppFactory::create_service(&config).await?;
            let report = service.index(entries).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok::<_, anyhow::Error>(())
        }),

        cli::Command::Search {
            query,
            limit,
            region,
            keywords,
        } => {
            let region = match region {
                Some(region) => match Region::parse(&region) {
                    Some(region) => Some(region),
                    None => bail!("Unknown region {region:?}, expected B, T or N"),
                },
                None => None,
            };
            let params = SearchParams {
                query,
                limit,
                region,
                with_scores: true,
                score_threshold: None,
            };

            runtime.block_on(async {
                let service = AppFactory::create_service(&config).await?;
                let output = if keywords {
                    serde_json::to_string_pretty(&service.keyword_search(params).await?)?
                } else {
                    serde_json::to_string_pretty(&service.search(params).await?)?
                };
                println!("{output}");
                Ok::<_, anyhow::Error>(())
            })
        }

        cli::Command::Recreate { yes } => {
            if !yes {
                match inquire::prompt_confirmation(format!(
                    "This deletes every point in collection {:?}. Are you sure?",
                    config.collection
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            runtime.block_on(async {
                let service = AppFactory::create_service(&config).await?;
                let info = service.recreate().await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
                Ok::<_, anyhow::Error>(())
            })
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let service = Arc::new(AppFactory::create_service(&config).await?);

    if config.index_on_startup {
        index_dataset_if_empty(&service, &config).await?;
    }

    web::serve(service, &config).await
}

/// Seed an absent or empty collection from `dataset_path`.
async fn index_dataset_if_empty(service: &SearchService, config: &Config) -> anyhow::Result<()> {
    let Some(path) = config.dataset_path.as_deref() else {
        return Ok(());
    };

    let points = service
        .collection_info()
        .await?
        .map(|info| info.points_count)
        .unwrap_or_default();
    if points > 0 {
        log::info!(
            "collection {:?} already holds {points} points, skipping startup indexing",
            service.collection()
        );
        return Ok(());
    }

    let entries = dataset::load_jsonl_file(path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;
    let report = service.index(entries).await?;
    log::info!(
        "indexed {} records from {} on startup",
        report.indexed,
        path.display()
    );

    Ok(())
}
