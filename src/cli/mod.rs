//! Command-line interface
//!
//! Provides CLI commands for split, ingest, ask, demo, drop, collections
//! and heartbeat.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::app::AppContext;
use crate::config::{IndexBackend, IndexSection};
use crate::data::{
    lines_to_units, ordinal_units, split_articles_to_json, split_sentences, BoundaryPattern,
    Segments, Unit, REPKA,
};
use crate::error::RagError;
use crate::rag::GenerationConfig;
use crate::retrieval::{DistanceMetric, VectorIndex};

/// Where ingested units come from
#[derive(Debug, Clone)]
pub enum UnitSource {
    /// JSON object of article label to text, as written by `split`
    Articles(String),
    /// Plain text, one unit per non-blank line
    Lines(String),
    /// Plain text, one unit per sentence
    Sentences(String),
    /// The built-in "Репка" tale
    Repka,
}

impl std::fmt::Display for UnitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Articles(path) => write!(f, "articles from {}", path),
            Self::Lines(path) => write!(f, "lines from {}", path),
            Self::Sentences(path) => write!(f, "sentences from {}", path),
            Self::Repka => f.write_str("built-in tale"),
        }
    }
}

/// Read the units a source describes
pub fn load_units(source: &UnitSource) -> Result<Vec<Unit>> {
    let read = |path: &str| {
        fs::read_to_string(path).with_context(|| format!("Failed to read input file: {}", path))
    };

    let units = match source {
        UnitSource::Articles(path) => {
            let segments: Segments = serde_json::from_str(&read(path)?)
                .with_context(|| format!("Failed to parse article map: {}", path))?;
            segments.into_units()
        }
        UnitSource::Lines(path) => lines_to_units(&read(path)?),
        UnitSource::Sentences(path) => ordinal_units(split_sentences(&read(path)?)),
        UnitSource::Repka => ordinal_units(REPKA),
    };
    Ok(units)
}

/// Fail unless the configured index outlives this process.
///
/// Commands that leave state for a later run (or read what an earlier run
/// left) are meaningless against the in-memory index.
pub fn require_shared_index(section: &IndexSection, command: &str) -> crate::error::Result<()> {
    if section.backend == IndexBackend::Memory {
        return Err(RagError::invalid_config(format!(
            "`{}` needs an index that outlives the process; the memory index is dropped on exit (use --index chroma, or `demo`)",
            command
        )));
    }
    Ok(())
}

/// Execute the split command
pub fn split(input: &Path, output: &Path, pattern: &str) -> Result<()> {
    tracing::info!("Splitting document into articles");
    tracing::info!("  Input: {}", input.display());
    tracing::info!("  Output: {}", output.display());
    tracing::info!("  Pattern: {}", pattern);

    let pattern = BoundaryPattern::from_spec(pattern)?;
    let count = split_articles_to_json(input, output, &pattern)?;

    println!("\nSplit Summary:");
    println!("  Articles written: {}", count);
    println!("  Output file: {}", output.display());

    Ok(())
}

/// Execute the ingest command
pub fn ingest(
    ctx: &AppContext,
    source: &UnitSource,
    collection: &str,
    create: bool,
    metric: DistanceMetric,
) -> Result<()> {
    require_shared_index(&ctx.config().index, "ingest")?;

    tracing::info!("Starting ingestion");
    tracing::info!("  Source: {}", source);
    tracing::info!("  Collection: {}", collection);
    tracing::info!("  Index: {}", ctx.index().name());

    let units = load_units(source)?;
    if units.is_empty() {
        anyhow::bail!("No units found in {}", source);
    }

    let pipeline = ctx.pipeline();
    if create {
        if pipeline.ensure_collection(collection, metric)? {
            tracing::info!("Created collection '{}' ({})", collection, metric);
        } else {
            tracing::info!("Collection '{}' already exists", collection);
        }
    }

    ctx.wait_embedder_ready()?;
    let inserted = pipeline.ingest_units(collection, &units)?;
    let total = ctx.index().count(collection)?;

    println!("\nIngestion Summary:");
    println!("  Units inserted: {}", inserted);
    println!("  Collection size: {}", total);

    Ok(())
}

/// Execute the ask command
pub fn ask(
    ctx: &AppContext,
    question: &str,
    collection: &str,
    generation: &GenerationConfig,
    deadline_secs: Option<u64>,
) -> Result<()> {
    require_shared_index(&ctx.config().index, "ask")?;
    answer_and_print(ctx, question, collection, generation, deadline_secs)
}

fn answer_and_print(
    ctx: &AppContext,
    question: &str,
    collection: &str,
    generation: &GenerationConfig,
    deadline_secs: Option<u64>,
) -> Result<()> {
    tracing::info!("Waiting for models to load");
    ctx.wait_ready()?;

    let answer = match deadline_secs {
        Some(secs) => ctx.answer_with_deadline(
            question,
            collection,
            generation,
            Duration::from_secs(secs),
        )?,
        None => ctx.answer_question(question, collection, generation)?,
    };

    println!("{}", answer);
    Ok(())
}

/// Execute the demo command: index the built-in tale once, then ask
pub fn demo(ctx: &AppContext, question: &str, generation: &GenerationConfig) -> Result<()> {
    const COLLECTION: &str = "repka";

    let pipeline = ctx.pipeline();
    pipeline.ensure_collection(COLLECTION, ctx.config().index.metric)?;
    if ctx.index().count(COLLECTION)? == 0 {
        ctx.wait_embedder_ready()?;
        pipeline.ingest_units(COLLECTION, &ordinal_units(REPKA))?;
    }

    answer_and_print(ctx, question, COLLECTION, generation, None)
}

/// Execute the drop command
pub fn drop_collection(index: &dyn VectorIndex, collection: &str) -> Result<()> {
    index.delete_collection(collection)?;
    println!("Dropped collection '{}'", collection);
    Ok(())
}

/// Execute the collections command
pub fn collections(index: &dyn VectorIndex) -> Result<()> {
    let names = index.list_collections()?;
    if names.is_empty() {
        println!("No collections");
        return Ok(());
    }
    for name in names {
        let count = index.count(&name)?;
        println!("  {} ({} units)", name, count);
    }
    Ok(())
}

/// Execute the heartbeat command
pub fn heartbeat(index: &dyn VectorIndex) -> Result<()> {
    index.heartbeat()?;
    println!("{} index is reachable", index.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::data::ARTICLE_KEY;
    use crate::embedding::backends::TokenEmbedder;
    use crate::error::ErrorKind;
    use crate::rag::Generator;
    use crate::retrieval::InMemoryIndex;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    struct FirstLine;

    impl Generator for FirstLine {
        fn ask(
            &self,
            _question: &str,
            context: &str,
            _config: &GenerationConfig,
        ) -> crate::error::Result<String> {
            Ok(context.lines().next().unwrap_or_default().to_string())
        }

        fn model_name(&self) -> &str {
            "first-line"
        }
    }

    fn memory_context() -> AppContext {
        let mut config = AppConfig::default();
        config.index.backend = IndexBackend::Memory;
        AppContext::with_components(
            config,
            Arc::new(TokenEmbedder::new(256)),
            Arc::new(InMemoryIndex::new()),
            Arc::new(FirstLine),
        )
    }

    fn config_error(err: &anyhow::Error) -> ErrorKind {
        err.downcast_ref::<RagError>().unwrap().kind()
    }

    #[test]
    fn test_memory_index_refused_across_runs() {
        let memory = IndexSection {
            backend: IndexBackend::Memory,
            ..Default::default()
        };
        for command in ["ingest", "ask", "drop", "collections"] {
            let err = require_shared_index(&memory, command).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
            assert!(err.to_string().contains(command));
        }
        require_shared_index(&IndexSection::default(), "ingest").unwrap();
    }

    #[test]
    fn test_ingest_into_memory_index_writes_nothing() {
        let ctx = memory_context();
        let err = ingest(&ctx, &UnitSource::Repka, "tale", true, DistanceMetric::Cosine).unwrap_err();

        assert_eq!(config_error(&err), ErrorKind::InvalidConfig);
        assert!(ctx.index().list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_ask_against_memory_index_refused() {
        let ctx = memory_context();
        let err = ask(&ctx, "Кто посадил репку?", "tale", &GenerationConfig::default(), None)
            .unwrap_err();
        assert_eq!(config_error(&err), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_demo_runs_on_memory_index() {
        let ctx = memory_context();
        demo(&ctx, "Кто посадил репку?", &GenerationConfig::default()).unwrap();
        assert_eq!(ctx.index().count("repka").unwrap(), REPKA.len());
    }

    #[test]
    fn test_load_repka() {
        let units = load_units(&UnitSource::Repka).unwrap();
        assert_eq!(units.len(), REPKA.len());
        assert_eq!(units[0].id, "0");
    }

    #[test]
    fn test_load_articles_keeps_order() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"Статья 2": "второй", "Статья 1": "первый"}}"#).unwrap();

        let source = UnitSource::Articles(file.path().display().to_string());
        let units = load_units(&source).unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, "Статья 2");
        assert_eq!(units[1].text, "первый");
        assert_eq!(units[1].metadata.get(ARTICLE_KEY).unwrap(), "Статья 1");
    }

    #[test]
    fn test_load_lines_skips_blanks() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "первая\n\n  \nвторая").unwrap();

        let source = UnitSource::Lines(file.path().display().to_string());
        let units = load_units(&source).unwrap();
        assert_eq!(
            units.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            vec!["0", "1"]
        );
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_units(&UnitSource::Lines("/nonexistent/story.txt".into())).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/story.txt"));
    }
}
