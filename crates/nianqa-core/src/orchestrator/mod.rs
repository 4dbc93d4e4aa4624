//! Query pipeline: follow-up detection, processing, retrieval and the answer branch.

mod conversation;

pub use conversation::Conversation;

use crate::answer::{AnswerGenerator, NO_ANSWER};
use crate::dialogue::{DialogueManager, DialogueTurn};
use crate::error::{CoreError, KnowledgeError};
use crate::knowledge::{KnowledgeEntry, KnowledgeRetriever};
use crate::llm::LlmBackend;
use crate::question::QuestionProcessor;
use crate::shared::CoreConfig;
use serde::{Deserialize, Serialize};

/// Entries considered when generating from the knowledge base.
pub const RETRIEVAL_TOP_N: usize = 3;

/// Turns handed to processing when a question is a follow-up.
pub const FOLLOW_UP_CONTEXT_TURNS: usize = 3;

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    KnowledgeBase,
    Llm,
    Fallback,
}

impl AnswerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerSource::KnowledgeBase => "knowledge_base",
            AnswerSource::Llm => "llm",
            AnswerSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub source: AnswerSource,
}

/// Outcome of the pipeline up to the answer branch.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Knowledge-base answer or the fixed apology.
    Answered(QueryResponse),
    /// Nothing retrieved; the model should answer.
    Delegate {
        question: String,
        context: Option<Vec<DialogueTurn>>,
    },
}

impl Plan {
    pub fn source(&self) -> AnswerSource {
        match self {
            Plan::Answered(r) => r.source,
            Plan::Delegate { .. } => AnswerSource::Llm,
        }
    }
}

/// Shared, read-mostly part of the pipeline. Conversations hold it behind an `Arc`.
#[derive(Debug)]
pub struct Orchestrator {
    processor: QuestionProcessor,
    retriever: KnowledgeRetriever,
    generator: AnswerGenerator,
    llm: Option<LlmBackend>,
}

impl Orchestrator {
    pub fn new(retriever: KnowledgeRetriever, llm: Option<LlmBackend>) -> Self {
        Self {
            processor: QuestionProcessor::new(),
            retriever,
            generator: AnswerGenerator::new(),
            llm,
        }
    }

    /// Loads the knowledge base (fatal on failure) and tries to enable the model
    /// fallback (disabled with a warning when unavailable).
    pub fn from_config(config: &CoreConfig) -> Result<Self, CoreError> {
        let retriever = KnowledgeRetriever::open_path(&config.knowledge_base_path)?;
        let llm = match LlmBackend::from_config_file(&config.llm_config_path) {
            Ok(backend) => Some(backend),
            Err(err) => {
                tracing::warn!(
                    target: "nianqa::orchestrator",
                    error = %err,
                    "LLM backend disabled; answering from the knowledge base only"
                );
                None
            }
        };
        Ok(Self::new(retriever, llm))
    }

    pub fn llm(&self) -> Option<&LlmBackend> {
        self.llm.as_ref()
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm.is_some()
    }

    pub fn knowledge_entries(&self) -> usize {
        self.retriever.len()
    }

    /// Runs detection, processing and retrieval, and picks the answer branch.
    pub fn plan(&self, dialogue: &DialogueManager, question: &str) -> Plan {
        let follow_up = dialogue.is_follow_up(question);
        let context = follow_up
            .then(|| dialogue.get_recent_context(FOLLOW_UP_CONTEXT_TURNS).to_vec())
            .filter(|turns| !turns.is_empty());

        let query = self.processor.process(question, context.as_deref());
        let retrieved = self.retriever.retrieve(&query, RETRIEVAL_TOP_N);
        tracing::debug!(
            target: "nianqa::orchestrator",
            follow_up,
            intent = query.intent.as_str(),
            keywords = ?query.keywords,
            hits = retrieved.len(),
            "query planned"
        );

        if !retrieved.is_empty() {
            let answer = self.generator.generate(&retrieved, &query, context.as_deref());
            return Plan::Answered(QueryResponse {
                answer,
                source: AnswerSource::KnowledgeBase,
            });
        }
        if self.llm.is_some() {
            tracing::info!(target: "nianqa::orchestrator", question, "knowledge base miss, using LLM");
            return Plan::Delegate {
                question: question.to_string(),
                context,
            };
        }
        Plan::Answered(QueryResponse {
            answer: NO_ANSWER.to_string(),
            source: AnswerSource::Fallback,
        })
    }

    /// Completes a plan, calling the model for a delegated one.
    pub async fn resolve(&self, plan: Plan) -> QueryResponse {
        match plan {
            Plan::Answered(response) => response,
            Plan::Delegate { question, context } => match &self.llm {
                Some(llm) => QueryResponse {
                    answer: llm.generate_answer(&question, context.as_deref()).await,
                    source: AnswerSource::Llm,
                },
                None => QueryResponse {
                    answer: NO_ANSWER.to_string(),
                    source: AnswerSource::Fallback,
                },
            },
        }
    }

    /// Re-reads the knowledge-base file and swaps it in.
    pub fn reload_knowledge_base(&self) -> Result<usize, KnowledgeError> {
        self.retriever.reload()
    }

    pub fn related_entries(&self, entry_id: &str, top_n: usize) -> Vec<KnowledgeEntry> {
        self.retriever.get_related(entry_id, top_n)
    }
}
