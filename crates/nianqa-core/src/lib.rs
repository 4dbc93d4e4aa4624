//! nianqa-core: Chinese New Year customs question answering.
//!
//! Questions are cleaned and classified, matched against a curated knowledge
//! base and answered from templates; misses fall back to an LLM whose output is
//! sanitized before it is shown.

mod answer;
mod dialogue;
mod error;
mod knowledge;
mod llm;
mod orchestrator;
mod question;
mod shared;

pub use shared::CoreConfig;

pub use error::{CoreError, KnowledgeError, LlmError};

pub use dialogue::{latest_content, DialogueManager, DialogueTurn, Role, DEFAULT_MAX_HISTORY_LENGTH};

pub use question::{clean, classify_intent, extract_keywords, Intent, Query, QuestionProcessor, RecentContext};

pub use knowledge::{
    score_entry, KnowledgeBase, KnowledgeEntry, KnowledgeRetriever, ScoredEntry, CANONICAL_QUESTIONS,
};

pub use answer::{
    colloquialize, extract_method, extract_place, extract_reason, extract_time, AnswerGenerator,
    NO_ANSWER,
};

pub use llm::{
    build_messages, build_prompt, cost_per_token, is_disallowed, post_process, ChatMessage,
    ChatModel, ChatRequest, Completion, Delta, DeltaStream, LlmBackend, LlmConfig,
    LlmConfigUpdate, Monitor, MonitoringStats, OpenAiClient, ThinkFilter, API_BASE_ENV, API_KEY_ENV, APOLOGY,
    DEFAULT_CONFIG_PATH, END_MARKERS, REFUSAL, START_MARKERS, SYSTEM_INSTRUCTION,
};

pub use orchestrator::{
    AnswerSource, Conversation, Orchestrator, Plan, QueryResponse, FOLLOW_UP_CONTEXT_TURNS,
    RETRIEVAL_TOP_N,
};
