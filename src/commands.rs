use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::load_catalog;
use crate::config::Config;
use crate::database::index_exists;
use crate::embeddings::{EmbeddingService, OllamaClient};
use crate::engine::{IngestStats, ItemFilter, ItemPredicate, Recommendation, RecommendationEngine};
use crate::features::FeatureBuilder;

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Configuration is invalid")?;
    Ok(config)
}

fn open_engine(config: &Config) -> Result<RecommendationEngine> {
    let index_dir = config.index_dir();
    RecommendationEngine::open(
        &index_dir,
        EmbeddingService::from_config(config)?,
        FeatureBuilder::new(config.features.clone()),
        config.recommend.clone(),
    )
    .with_context(|| format!("Failed to open index at {}", index_dir.display()))
}

fn progress_bar(total: usize) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} Embedding {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(total as u64).with_style(style)
}

/// Embed a catalog file into the index, incrementally unless `full` is set.
#[inline]
pub async fn build_index(catalog: &Path, full: bool) -> Result<()> {
    let config = load_config()?;
    let records = load_catalog(catalog)
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    let index_dir = config.index_dir();

    let engine = if !full && index_exists(&index_dir) {
        info!("Updating existing index at {}", index_dir.display());
        open_engine(&config).context("Rerun with --full to rebuild the index from scratch")?
    } else {
        RecommendationEngine::from_config(&config)?
    };

    println!(
        "Indexing {} records from {}",
        style(records.len()).cyan(),
        style(catalog.display()).cyan()
    );

    let bar = progress_bar(records.len());
    bar.set_message(engine.embedder().model().to_string());
    let advance = |n: usize| bar.inc(n as u64);

    let result = if full || engine.snapshot().index().is_empty() {
        engine.rebuild_with_progress(records, &advance).await
    } else {
        engine.ingest_with_progress(records, &advance).await
    };
    bar.finish_and_clear();

    let stats = result.context("Indexing failed; the saved index was left unchanged")?;
    let manifest = engine
        .save(&index_dir)
        .await
        .with_context(|| format!("Failed to save index to {}", index_dir.display()))?;

    print_ingest_stats(&stats);
    println!(
        "Index now holds {} items ({} dimensions) in {}",
        style(manifest.count).green(),
        manifest.dimension,
        style(index_dir.display()).dim()
    );

    let report = engine.consistency_report();
    if !report.is_consistent {
        warn!("{}", report.summary());
    }
    Ok(())
}

fn print_ingest_stats(stats: &IngestStats) {
    println!("{}", style("✓ Indexing complete").green());
    println!("  Added: {}", stats.added);
    println!("  Updated: {}", stats.updated);
    println!("  Unchanged: {}", stats.unchanged);
    if stats.skipped > 0 {
        println!(
            "  Skipped: {} {}",
            stats.skipped,
            style("(not enough descriptive text)").dim()
        );
    }
}

/// Print the items most similar to `query`.
#[inline]
pub async fn recommend(query: &str, k: Option<usize>, filter: ItemFilter) -> Result<()> {
    let config = load_config()?;
    if !index_exists(&config.index_dir()) {
        bail!("No index found. Run 'cinebrain build <catalog>' first.");
    }
    let engine = open_engine(&config)?;
    let k = k.unwrap_or(config.recommend.default_k);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let predicate: Option<&dyn ItemPredicate> = if filter.is_empty() {
        None
    } else {
        Some(&filter)
    };
    let result = engine
        .recommend_with_cancel(query, k, predicate, &cancel)
        .await;
    interrupt.abort();

    let result = result.context("Recommendation failed")?;
    if result.is_empty() {
        println!("No matches for \"{}\" with the given filters.", query);
        return Ok(());
    }

    println!("Recommendations for \"{}\":", style(query).bold());
    println!();
    for recommendation in result.iter() {
        print_recommendation(recommendation);
    }
    Ok(())
}

fn print_recommendation(recommendation: &Recommendation) {
    let record = &recommendation.record;
    let year = record
        .year()
        .map(|year| format!(" ({})", year))
        .unwrap_or_default();

    println!(
        "{}. {}{}  {}",
        recommendation.rank,
        style(record.display_title()).bold(),
        year,
        style(format!("score {:.3}", recommendation.score)).dim()
    );

    let mut details = Vec::new();
    if !record.genres.is_empty() {
        details.push(record.genres.join(", "));
    }
    if record.runtime.is_some() {
        details.push(record.runtime_display());
    }
    if let Some(rating) = record.rating {
        details.push(format!("★ {:.1}", rating));
    }
    if !details.is_empty() {
        println!("   {}", details.join(" · "));
    }
    if let Some(director) = &record.director {
        println!("   Directed by {}", director);
    }
    if let Some(poster) = record.poster_url() {
        println!("   {}", style(poster).dim());
    }
    println!();
}

/// Report configuration, provider health and index state.
#[inline]
pub async fn show_status() -> Result<()> {
    let config = load_config()?;

    println!("📊 CineBrain Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    let ollama = config.ollama.clone();
    let health = tokio::task::spawn_blocking(move || {
        OllamaClient::new(&ollama).and_then(|client| client.health_check())
    })
    .await
    .context("Health check task failed")?;
    match health {
        Ok(()) => {
            println!("   ✅ Ollama: Connected at {}", config.ollama_url()?);
            println!("   📋 Model: {}", config.ollama.model);
            println!("   🔢 Dimension: {}", config.ollama.embedding_dimension);
        }
        Err(e) => println!("   ❌ Ollama: {}", e),
    }
    println!();

    println!("🗂️  Index Status:");
    let index_dir = config.index_dir();
    if !index_exists(&index_dir) {
        println!("   💤 No index built yet ({})", index_dir.display());
        return Ok(());
    }

    match open_engine(&config) {
        Ok(engine) => {
            let stats = engine.stats();
            println!("   ✅ Items: {}", stats.items);
            if let Some(dimension) = stats.dimension {
                println!("   🔢 Dimension: {}", dimension);
            }
            println!("   📁 Location: {}", index_dir.display());

            println!();
            println!("🔍 Consistency:");
            let report = engine.consistency_report();
            if report.is_consistent {
                println!("   ✅ {}", report.summary());
            } else {
                println!("   ⚠️  {}", report.summary());
                for id in report.missing_vectors.iter().take(10) {
                    println!("      - no vector for {}", id);
                }
                for id in report.orphaned_vectors.iter().take(10) {
                    println!("      - no record for {}", id);
                }
            }
        }
        Err(e) => println!("   ❌ Index unreadable: {:#}", e),
    }

    Ok(())
}
