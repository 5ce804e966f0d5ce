//! RAG pipeline orchestration
//!
//! Runs one question through embed → retrieve → assemble → generate and
//! hands the first failing stage's error back untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::data::Unit;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::retrieval::{DistanceMetric, VectorIndex};

use super::context::ContextAssembler;
use super::generator::{GenerationConfig, Generator};
use super::query::{Diagnostics, FlowStage, RagAnswer, Source};

/// Retrieval and context settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Number of units to retrieve
    pub top_k: usize,

    /// Maximum characters in the assembled context
    pub max_context_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_context_chars: 3000,
        }
    }
}

impl RagConfig {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_max_context_chars(mut self, chars: usize) -> Self {
        self.max_context_chars = chars;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::invalid_config("top_k must be at least 1"));
        }
        Ok(())
    }
}

/// Tracks the current stage of one flow and logs transitions
struct Flow<'a> {
    question: &'a str,
    stage: FlowStage,
}

impl<'a> Flow<'a> {
    fn start(question: &'a str) -> Self {
        Self {
            question,
            stage: FlowStage::Idle,
        }
    }

    fn enter(&mut self, stage: FlowStage, observer: &mut dyn FnMut(FlowStage)) {
        tracing::debug!(from = %self.stage, to = %stage, "flow transition");
        self.stage = stage;
        observer(stage);
    }

    fn fail(&self, err: RagError) -> RagError {
        tracing::warn!(
            stage = %self.stage,
            question = self.question,
            "question failed: {}",
            err
        );
        err
    }
}

/// Question answering over one vector index
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    assembler: ContextAssembler,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        config: RagConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            assembler: ContextAssembler::new(),
            config,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Answer `question` from the units in `collection`
    pub fn answer_question(
        &self,
        question: &str,
        collection: &str,
        generation: &GenerationConfig,
    ) -> Result<RagAnswer> {
        self.answer_question_observed(question, collection, generation, &mut |_| {})
    }

    /// Same as [`answer_question`](Self::answer_question), reporting each
    /// stage to `observer` as it starts, then `Done` or `Failed`.
    pub fn answer_question_observed(
        &self,
        question: &str,
        collection: &str,
        generation: &GenerationConfig,
        observer: &mut dyn FnMut(FlowStage),
    ) -> Result<RagAnswer> {
        let mut flow = Flow::start(question);
        let result = self.run(&mut flow, collection, generation, observer);
        let last = if result.is_ok() {
            FlowStage::Done
        } else {
            FlowStage::Failed
        };
        flow.enter(last, observer);
        result
    }

    fn run(
        &self,
        flow: &mut Flow<'_>,
        collection: &str,
        generation: &GenerationConfig,
        observer: &mut dyn FnMut(FlowStage),
    ) -> Result<RagAnswer> {
        let question = flow.question;
        tracing::info!(collection, "answering: {}", question);

        generation.validate().map_err(|e| flow.fail(e))?;
        self.config.validate().map_err(|e| flow.fail(e))?;

        let retrieval_start = Instant::now();

        flow.enter(FlowStage::Embedding, observer);
        let vector = self.embedder.embed(question).map_err(|e| flow.fail(e))?;

        flow.enter(FlowStage::Retrieving, observer);
        let hits = self
            .index
            .query(collection, &vector, self.config.top_k)
            .map_err(|e| flow.fail(e))?;
        let retrieval_time_ms = retrieval_start.elapsed().as_millis() as u64;
        tracing::info!(
            "Retrieved {} units in {}ms",
            hits.len(),
            retrieval_time_ms
        );

        flow.enter(FlowStage::Assembling, observer);
        let context = self.assembler.assemble(&hits, self.config.max_context_chars);
        if context.is_empty() {
            tracing::info!(collection, "no context retrieved, answering ungrounded");
        }

        flow.enter(FlowStage::Generating, observer);
        let generation_start = Instant::now();
        let answer = self
            .generator
            .ask(question, &context, generation)
            .map_err(|e| flow.fail(e))?;
        let generation_time_ms = generation_start.elapsed().as_millis() as u64;
        tracing::info!(
            model = self.generator.model_name(),
            "Generated answer in {}ms",
            generation_time_ms
        );

        let diagnostics = Diagnostics {
            distances: hits.iter().map(|h| h.distance).collect(),
            unit_ids: hits.iter().map(|h| h.id.clone()).collect(),
            grounded: !context.is_empty(),
        };

        Ok(RagAnswer {
            answer,
            diagnostics,
            sources: hits.iter().map(Source::from_hit).collect(),
            context,
            retrieval_time_ms,
            generation_time_ms,
        })
    }

    /// Create `collection` unless it already exists; true when created
    pub fn ensure_collection(&self, collection: &str, metric: DistanceMetric) -> Result<bool> {
        match self.index.create_collection(collection, metric) {
            Ok(()) => Ok(true),
            Err(RagError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Embed and insert `units` in order.
    ///
    /// Stops at the first failure; units before it stay inserted.
    pub fn ingest_units(&self, collection: &str, units: &[Unit]) -> Result<usize> {
        tracing::info!(
            "Ingesting {} units into '{}' with {}",
            units.len(),
            collection,
            self.embedder.model_name()
        );

        let mut inserted = 0;
        for unit in units {
            let vector = self.embedder.embed(&unit.text)?;
            if let Err(e) = self.index.insert(collection, unit, &vector) {
                tracing::warn!(
                    unit = unit.id.as_str(),
                    inserted,
                    "ingestion stopped: {}",
                    e
                );
                return Err(e);
            }
            inserted += 1;
        }

        tracing::info!("Ingested {} units into '{}'", inserted, collection);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::narrative::{ordinal_units, REPKA};
    use crate::embedding::backends::TokenEmbedder;
    use crate::embedding::Embedding;
    use crate::error::ErrorKind;
    use crate::retrieval::InMemoryIndex;
    use std::sync::Mutex;

    /// Echoes the context it was handed
    struct EchoGenerator {
        seen: Mutex<Vec<String>>,
    }

    impl EchoGenerator {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Generator for EchoGenerator {
        fn ask(&self, _question: &str, context: &str, config: &GenerationConfig) -> Result<String> {
            config.validate()?;
            self.seen.lock().unwrap().push(context.to_string());
            Ok(format!("echo: {}", context))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(RagError::embedding("model offline"))
        }

        fn dimension(&self) -> usize {
            8
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn repka_pipeline(generator: Arc<EchoGenerator>) -> RagPipeline {
        let pipeline = RagPipeline::new(
            Arc::new(TokenEmbedder::new(512)),
            Arc::new(InMemoryIndex::new()),
            generator,
            RagConfig::default(),
        );
        pipeline
            .ensure_collection("repka", DistanceMetric::Cosine)
            .unwrap();
        pipeline
            .ingest_units("repka", &ordinal_units(REPKA))
            .unwrap();
        pipeline
    }

    #[test]
    fn test_repka_first_sentence_ranks_first() {
        let pipeline = repka_pipeline(Arc::new(EchoGenerator::new()));

        let answer = pipeline
            .answer_question("Кто посадил репку?", "repka", &GenerationConfig::default())
            .unwrap();

        assert_eq!(answer.diagnostics.unit_ids[0], "0");
        assert_eq!(answer.diagnostics.distances.len(), 3);
        assert!(answer
            .diagnostics
            .distances
            .windows(2)
            .all(|w| w[0] <= w[1]));
        assert!(answer.diagnostics.grounded);
        assert!(answer.context.starts_with("1. Посадил дед репку"));
    }

    #[test]
    fn test_ingest_counts_units() {
        let pipeline = repka_pipeline(Arc::new(EchoGenerator::new()));
        assert_eq!(pipeline.index().count("repka").unwrap(), REPKA.len());
        assert!(!pipeline
            .ensure_collection("repka", DistanceMetric::Cosine)
            .unwrap());
    }

    #[test]
    fn test_ingest_stops_on_duplicate() {
        let pipeline = repka_pipeline(Arc::new(EchoGenerator::new()));
        let units = vec![Unit::new("100", "новая строка"), Unit::new("0", "дубликат")];

        let err = pipeline.ingest_units("repka", &units).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateId);
        assert_eq!(pipeline.index().count("repka").unwrap(), REPKA.len() + 1);
    }

    #[test]
    fn test_empty_collection_still_generates() {
        let generator = Arc::new(EchoGenerator::new());
        let pipeline = RagPipeline::new(
            Arc::new(TokenEmbedder::new(64)),
            Arc::new(InMemoryIndex::new()),
            generator.clone(),
            RagConfig::default(),
        );
        pipeline
            .ensure_collection("empty", DistanceMetric::Cosine)
            .unwrap();

        let answer = pipeline
            .answer_question("Что угодно?", "empty", &GenerationConfig::default())
            .unwrap();

        assert!(!answer.diagnostics.grounded);
        assert!(answer.diagnostics.distances.is_empty());
        assert_eq!(generator.seen.lock().unwrap().as_slice(), &[String::new()]);
    }

    #[test]
    fn test_missing_collection_fails_at_retrieval() {
        let pipeline = RagPipeline::new(
            Arc::new(TokenEmbedder::new(64)),
            Arc::new(InMemoryIndex::new()),
            Arc::new(EchoGenerator::new()),
            RagConfig::default(),
        );

        let mut stages = Vec::new();
        let err = pipeline
            .answer_question_observed(
                "вопрос",
                "nope",
                &GenerationConfig::default(),
                &mut |stage| stages.push(stage),
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            stages,
            vec![FlowStage::Embedding, FlowStage::Retrieving, FlowStage::Failed]
        );
    }

    #[test]
    fn test_embedder_error_returned_unmodified() {
        let pipeline = RagPipeline::new(
            Arc::new(FailingEmbedder),
            Arc::new(InMemoryIndex::new()),
            Arc::new(EchoGenerator::new()),
            RagConfig::default(),
        );

        let err = pipeline
            .answer_question("вопрос", "any", &GenerationConfig::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Embedding failed: model offline");
    }

    #[test]
    fn test_invalid_generation_config_rejected() {
        let generator = Arc::new(EchoGenerator::new());
        let pipeline = repka_pipeline(generator.clone());
        let config = GenerationConfig::default().with_max_new_tokens(0);

        let err = pipeline
            .answer_question("Кто посадил репку?", "repka", &config)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_successful_flow_stages() {
        let pipeline = repka_pipeline(Arc::new(EchoGenerator::new()));
        let mut stages = Vec::new();

        pipeline
            .answer_question_observed(
                "Кто посадил репку?",
                "repka",
                &GenerationConfig::default(),
                &mut |stage| stages.push(stage),
            )
            .unwrap();

        assert_eq!(
            stages,
            vec![
                FlowStage::Embedding,
                FlowStage::Retrieving,
                FlowStage::Assembling,
                FlowStage::Generating,
                FlowStage::Done,
            ]
        );
    }
}
