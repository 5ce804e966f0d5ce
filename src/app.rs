//! Application context
//!
//! Built once at startup from [`AppConfig`] and passed by reference to every
//! caller. Model weights start loading in the background as soon as the
//! context exists; [`AppContext::wait_ready`] is the readiness gate.

use anyhow::Result;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{AppConfig, IndexBackend, IndexSection};
use crate::embedding::backends::{CandleBertEmbedder, EmbedderKind, LazyEmbedder, TokenEmbedder};
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::models::ModelCache;
use crate::rag::{
    GenerationConfig, Generator, GeneratorBackend, GeneratorKind, HostedGenerator,
    LocalGenerator, RagAnswer, RagPipeline,
};
use crate::retrieval::{ChromaIndex, InMemoryIndex, VectorIndex};
use crate::utils::get_models_dir;

/// Index backend named by the config, without any model
pub fn build_index(section: &IndexSection) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match section.backend {
        IndexBackend::Memory => Arc::new(InMemoryIndex::new()),
        IndexBackend::Chroma => Arc::new(ChromaIndex::new(&section.chroma)?),
    };
    Ok(index)
}

/// Shared embedder, index and generator for one process
pub struct AppContext {
    config: AppConfig,
    pipeline: Arc<RagPipeline>,
    bert: Option<Arc<LazyEmbedder<CandleBertEmbedder>>>,
    backend: Option<Arc<GeneratorBackend>>,
}

impl AppContext {
    /// Build every component named by `config`.
    ///
    /// Returns once model downloads are resolved far enough to know the
    /// embedding dimension; weights keep loading on background threads.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let models_dir = match &config.models_dir {
            Some(dir) => dir.clone(),
            None => get_models_dir()?,
        };
        let cache = ModelCache::new(models_dir).offline(config.offline);

        let mut bert = None;
        let embedder: Arc<dyn Embedder> = match config.embedder.kind {
            EmbedderKind::Token => Arc::new(TokenEmbedder::new(config.embedder.token_dimension)),
            EmbedderKind::Bert => {
                let lazy = Arc::new(CandleBertEmbedder::spawn(
                    config.embedder.bert.clone(),
                    cache.clone(),
                )?);
                bert = Some(lazy.clone());
                lazy
            }
        };

        let index = build_index(&config.index)?;

        let backend = Arc::new(match config.generator.kind {
            GeneratorKind::Local => GeneratorBackend::Local(LocalGenerator::spawn(
                config.generator.local.clone(),
                cache,
            )),
            GeneratorKind::Hosted => {
                GeneratorBackend::Hosted(HostedGenerator::from_env(config.generator.hosted.clone())?)
            }
        });

        tracing::info!(
            embedder = embedder.model_name(),
            index = index.name(),
            generator = backend.model_name(),
            "Application context ready"
        );

        let pipeline = RagPipeline::new(embedder, index, backend.clone(), config.rag.clone());
        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            bert,
            backend: Some(backend),
        })
    }

    /// Context around caller-supplied components; nothing loads lazily
    pub fn with_components(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let pipeline = RagPipeline::new(embedder, index, generator, config.rag.clone());
        Self {
            config,
            pipeline: Arc::new(pipeline),
            bert: None,
            backend: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<RagPipeline> {
        &self.pipeline
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        self.pipeline.index()
    }

    /// True once every background model has finished loading
    pub fn is_ready(&self) -> bool {
        let embedder_ready = self.bert.as_ref().map_or(true, |e| e.is_ready());
        let generator_ready = match self.backend.as_deref() {
            Some(GeneratorBackend::Local(generator)) => generator.is_ready(),
            _ => true,
        };
        embedder_ready && generator_ready
    }

    /// Block until background models are loaded, or report the load failure
    pub fn wait_ready(&self) -> crate::error::Result<()> {
        if let Some(embedder) = &self.bert {
            embedder.wait_ready()?;
        }
        if let Some(GeneratorBackend::Local(generator)) = self.backend.as_deref() {
            generator.wait_ready()?;
        }
        Ok(())
    }

    /// Wait only for the embedder; ingestion does not need the generator
    pub fn wait_embedder_ready(&self) -> crate::error::Result<()> {
        match &self.bert {
            Some(embedder) => embedder.wait_ready(),
            None => Ok(()),
        }
    }

    pub fn answer_question(
        &self,
        question: &str,
        collection: &str,
        generation: &GenerationConfig,
    ) -> crate::error::Result<RagAnswer> {
        self.pipeline.answer_question(question, collection, generation)
    }

    /// Run one question on a worker thread and give up after `deadline`.
    ///
    /// An overrun is reported as `GenerationUnavailable`; the worker is left
    /// to finish and its result is dropped.
    pub fn answer_with_deadline(
        &self,
        question: &str,
        collection: &str,
        generation: &GenerationConfig,
        deadline: Duration,
    ) -> crate::error::Result<RagAnswer> {
        let (tx, rx) = mpsc::channel();
        let pipeline = Arc::clone(&self.pipeline);
        let question_owned = question.to_string();
        let collection_owned = collection.to_string();
        let generation = generation.clone();

        thread::Builder::new()
            .name("lexrag-question".to_string())
            .spawn(move || {
                let result =
                    pipeline.answer_question(&question_owned, &collection_owned, &generation);
                // The receiver is gone after a timeout
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "No answer within {}ms for: {}",
                    deadline.as_millis(),
                    question
                );
                Err(RagError::unavailable(format!(
                    "no answer within {}ms",
                    deadline.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(RagError::unavailable("question worker exited without a result"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ordinal_units, REPKA};
    use crate::error::ErrorKind;
    use crate::retrieval::DistanceMetric;

    struct SlowGenerator {
        delay: Duration,
    }

    impl Generator for SlowGenerator {
        fn ask(
            &self,
            _question: &str,
            context: &str,
            _config: &GenerationConfig,
        ) -> crate::error::Result<String> {
            thread::sleep(self.delay);
            Ok(context.lines().next().unwrap_or_default().to_string())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn context_with_delay(delay: Duration) -> AppContext {
        let ctx = AppContext::with_components(
            AppConfig::default(),
            Arc::new(TokenEmbedder::new(256)),
            Arc::new(InMemoryIndex::new()),
            Arc::new(SlowGenerator { delay }),
        );
        ctx.pipeline()
            .ensure_collection("repka", DistanceMetric::Cosine)
            .unwrap();
        ctx.pipeline()
            .ingest_units("repka", &ordinal_units(REPKA))
            .unwrap();
        ctx
    }

    #[test]
    fn test_injected_components_are_ready() {
        let ctx = context_with_delay(Duration::ZERO);
        assert!(ctx.is_ready());
        ctx.wait_ready().unwrap();
        assert_eq!(ctx.index().count("repka").unwrap(), REPKA.len());
    }

    #[test]
    fn test_answer_within_deadline() {
        let ctx = context_with_delay(Duration::from_millis(5));
        let answer = ctx
            .answer_with_deadline(
                "Кто посадил репку?",
                "repka",
                &GenerationConfig::default(),
                Duration::from_secs(10),
            )
            .unwrap();
        assert!(answer.answer.starts_with("1. Посадил дед репку"));
    }

    #[test]
    fn test_deadline_overrun_is_unavailable() {
        let ctx = context_with_delay(Duration::from_millis(500));
        let err = ctx
            .answer_with_deadline(
                "Кто посадил репку?",
                "repka",
                &GenerationConfig::default(),
                Duration::from_millis(20),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenerationUnavailable);
    }

    #[test]
    fn test_from_config_token_and_hosted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.models_dir = Some(dir.path().to_path_buf());
        config.offline = true;
        config.embedder.kind = EmbedderKind::Token;
        config.generator.kind = GeneratorKind::Hosted;
        config.index.backend = IndexBackend::Memory;

        let ctx = AppContext::from_config(config).unwrap();
        assert!(ctx.is_ready());
        assert_eq!(ctx.index().name(), "memory");
    }

    #[test]
    fn test_default_index_is_chroma() {
        let index = build_index(&AppConfig::default().index).unwrap();
        assert_eq!(index.name(), "chroma");
    }
}
