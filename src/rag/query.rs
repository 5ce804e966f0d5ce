//! Answer and flow-state types

use serde::{Deserialize, Serialize};

use crate::retrieval::QueryHit;
use crate::utils::truncate_snippet;

/// Stage of one question's trip through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStage {
    Idle,
    Embedding,
    Retrieving,
    Assembling,
    Generating,
    Done,
    Failed,
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Embedding => "embedding",
            Self::Retrieving => "retrieving",
            Self::Assembling => "assembling",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Retrieved passage reference in an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub unit_id: String,
    pub distance: f32,
    pub snippet: String,
}

impl Source {
    pub fn from_hit(hit: &QueryHit) -> Self {
        Self {
            unit_id: hit.id.clone(),
            distance: hit.distance,
            snippet: truncate_snippet(hit.text(), 200),
        }
    }
}

/// What retrieval contributed to an answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Distances of the retrieved units, ascending
    pub distances: Vec<f32>,
    pub unit_ids: Vec<String>,
    /// False when the answer was produced without any context
    pub grounded: bool,
}

/// Result of `answer_question`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub diagnostics: Diagnostics,
    pub sources: Vec<Source>,
    /// Context block handed to the generator
    pub context: String,
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
}

impl RagAnswer {
    pub fn total_time_ms(&self) -> u64 {
        self.retrieval_time_ms + self.generation_time_ms
    }
}

impl std::fmt::Display for RagAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.answer)?;
        if !self.diagnostics.grounded {
            writeln!(f, "\n(no matching passages were found)")?;
            return Ok(());
        }
        writeln!(f, "\nSources:")?;
        for (i, source) in self.sources.iter().enumerate() {
            writeln!(
                f,
                "  [{}] {} (distance: {:.4})",
                i + 1,
                source.unit_id,
                source.distance
            )?;
            writeln!(f, "      {}", source.snippet)?;
        }
        write!(
            f,
            "\nRetrieval: {}ms, generation: {}ms",
            self.retrieval_time_ms, self.generation_time_ms
        )
    }
}
