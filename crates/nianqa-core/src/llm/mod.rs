//! Model-backed fallback for questions the knowledge base cannot answer.
//!
//! Failures never leave this module as errors on the answer path: they are
//! logged and replaced by [`APOLOGY`].

mod client;
mod config;
mod monitor;
mod sanitize;

pub use client::{ChatMessage, ChatModel, ChatRequest, Completion, Delta, DeltaStream, OpenAiClient};
pub use config::{LlmConfig, LlmConfigUpdate, API_BASE_ENV, API_KEY_ENV};
pub use monitor::{cost_per_token, Monitor, MonitoringStats};
pub use sanitize::{post_process, ThinkFilter, END_MARKERS, START_MARKERS};

use crate::dialogue::{DialogueTurn, Role};
use crate::error::LlmError;
use futures_util::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Default location of the persisted model options.
pub const DEFAULT_CONFIG_PATH: &str = "config/llm.json";

pub const SYSTEM_INSTRUCTION: &str = "你是一个中国年俗知识专家，负责回答用户关于中国传统节日和习俗的问题。请使用口语化的语言，确保回答准确、有趣。请直接回答问题，不要输出思考过程或分析内容。";

/// Returned when the model call fails.
pub const APOLOGY: &str = "抱歉，我暂时无法回答这个问题。";

/// Returned in place of an answer that touches a banned topic.
pub const REFUSAL: &str = "抱歉，我无法回答这个问题。";

const BANNED_TOPICS: [&str; 9] = [
    "色情", "赌博", "毒品", "暴力", "恐怖", "政治敏感", "歧视", "侮辱", "诈骗",
];

pub fn is_disallowed(text: &str) -> bool {
    BANNED_TOPICS.iter().any(|t| text.contains(t))
}

/// Single-turn prompt; the last two context turns are rendered as labeled lines.
pub fn build_prompt(question: &str, context: Option<&[DialogueTurn]>) -> String {
    let mut prompt = format!("请回答以下关于中国年俗的问题：{}", question);
    if let Some(turns) = context.filter(|t| !t.is_empty()) {
        prompt.push_str("\n最近的对话：\n");
        for turn in &turns[turns.len().saturating_sub(2)..] {
            let label = match turn.role {
                Role::User => "用户",
                Role::System => "助手",
            };
            prompt.push_str(&format!("{}：{}\n", label, turn.content));
        }
    }
    prompt.push_str("\n请使用口语化的语言回答，确保回答准确、有趣。");
    prompt
}

/// System instruction, then either the replayed conversation plus the
/// question, or one constructed prompt when there is no conversation.
pub fn build_messages(question: &str, context: Option<&[DialogueTurn]>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_INSTRUCTION)];
    match context.filter(|t| !t.is_empty()) {
        Some(turns) => {
            messages.extend(turns.iter().map(|turn| match turn.role {
                Role::User => ChatMessage::user(turn.content.clone()),
                Role::System => ChatMessage::assistant(turn.content.clone()),
            }));
            messages.push(ChatMessage::user(question));
        }
        None => messages.push(ChatMessage::user(build_prompt(question, None))),
    }
    messages
}

/// Model fallback. Clones share the model, the options and the counters.
#[derive(Clone)]
pub struct LlmBackend {
    model: Arc<dyn ChatModel>,
    config: Arc<RwLock<LlmConfig>>,
    config_path: Option<PathBuf>,
    monitor: Monitor,
}

impl std::fmt::Debug for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmBackend")
            .field("config_path", &self.config_path)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl LlmBackend {
    /// Loads options from `path` and connects an [`OpenAiClient`].
    /// Fails with [`LlmError::MissingCredentials`] when no API key is configured.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let config = LlmConfig::load(path)?;
        let client = OpenAiClient::new(&config)?;
        tracing::info!(
            target: "nianqa::llm",
            model = %config.model,
            base_url = %config.base_url(),
            "LLM backend enabled"
        );
        Ok(Self::with_model(Arc::new(client), config).persist_to(path))
    }

    pub fn with_model(model: Arc<dyn ChatModel>, config: LlmConfig) -> Self {
        Self {
            model,
            config: Arc::new(RwLock::new(config)),
            config_path: None,
            monitor: Monitor::default(),
        }
    }

    /// File that [`LlmBackend::update_config`] writes back to.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> LlmConfig {
        match self.config.read() {
            Ok(cfg) => cfg.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn request(&self, question: &str, context: Option<&[DialogueTurn]>) -> ChatRequest {
        ChatRequest::new(&self.config(), build_messages(question, context))
    }

    /// One complete answer: moderated and post-processed, or a fixed apology.
    pub async fn generate_answer(&self, question: &str, context: Option<&[DialogueTurn]>) -> String {
        let request = self.request(question, context);
        let start = Instant::now();
        match self.model.complete(&request).await {
            Ok(completion) => {
                self.monitor
                    .record(&request.model, completion.total_tokens, start.elapsed());
                if is_disallowed(&completion.text) {
                    tracing::warn!(target: "nianqa::llm", "answer withheld by content filter");
                    return REFUSAL.to_string();
                }
                post_process(&completion.text)
            }
            Err(err) => {
                tracing::error!(target: "nianqa::llm", error = %err, "LLM call failed");
                APOLOGY.to_string()
            }
        }
    }

    /// Streamed answer with thinking blocks filtered out as they arrive.
    ///
    /// A failure before any text yields [`APOLOGY`] once; a failure after text
    /// was shown ends the stream.
    pub fn stream_answer(
        &self,
        question: &str,
        context: Option<&[DialogueTurn]>,
    ) -> impl Stream<Item = String> + Send + 'static {
        let backend = self.clone();
        let request = self.request(question, context);
        async_stream::stream! {
            let start = Instant::now();
            match backend.model.stream(&request).await {
                Err(err) => {
                    tracing::error!(target: "nianqa::llm", error = %err, "LLM stream failed to start");
                    yield APOLOGY.to_string();
                }
                Ok(mut deltas) => {
                    let mut filter = ThinkFilter::new();
                    let mut shown = false;
                    let mut failed = false;
                    let mut tokens = 0;
                    while let Some(item) = deltas.next().await {
                        match item {
                            Ok(delta) => {
                                if let Some(total) = delta.total_tokens {
                                    tokens = total;
                                }
                                if let Some(text) = delta.text {
                                    let visible = filter.feed(&text);
                                    if !visible.is_empty() {
                                        shown = true;
                                        yield visible;
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::warn!(target: "nianqa::llm", error = %err, shown, "LLM stream interrupted");
                                failed = true;
                                break;
                            }
                        }
                    }
                    if failed {
                        if !shown {
                            yield APOLOGY.to_string();
                        }
                    } else {
                        let tail = filter.finish();
                        if !tail.is_empty() {
                            yield tail;
                        }
                        backend.monitor.record(&request.model, tokens, start.elapsed());
                    }
                }
            }
        }
    }

    pub fn post_process_response(&self, text: &str) -> String {
        post_process(text)
    }

    pub fn get_monitoring_stats(&self) -> MonitoringStats {
        self.monitor.snapshot()
    }

    pub fn reset_monitoring(&self) {
        self.monitor.reset();
    }

    /// Applies `update` and writes the result back to the config file, if any.
    pub fn update_config(&self, update: LlmConfigUpdate) -> Result<LlmConfig, LlmError> {
        let updated = {
            let mut cfg = match self.config.write() {
                Ok(cfg) => cfg,
                Err(poisoned) => poisoned.into_inner(),
            };
            cfg.apply(update);
            cfg.clone()
        };
        if let Some(path) = &self.config_path {
            updated.save(path)?;
            tracing::info!(target: "nianqa::llm", path = %path.display(), model = %updated.model, "LLM config saved");
        }
        Ok(updated)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{backend, ScriptedModel};
    use super::*;

    #[test]
    fn prompt_renders_last_two_turns() {
        let turns = vec![
            DialogueTurn::now(Role::User, "一"),
            DialogueTurn::now(Role::User, "福字什么时候贴"),
            DialogueTurn::now(Role::System, "除夕贴"),
        ];
        let prompt = build_prompt("白天还是晚上", Some(turns.as_slice()));
        assert!(prompt.starts_with("请回答以下关于中国年俗的问题：白天还是晚上"));
        assert!(prompt.contains("用户：福字什么时候贴\n助手：除夕贴\n"));
        assert!(!prompt.contains("用户：一"));
        assert!(prompt.ends_with("请使用口语化的语言回答，确保回答准确、有趣。"));
    }

    #[test]
    fn messages_replay_context_with_assistant_role() {
        let turns = vec![
            DialogueTurn::now(Role::User, "福字什么时候贴"),
            DialogueTurn::now(Role::System, "除夕贴"),
        ];
        let msgs = build_messages("那白天还是晚上贴", Some(turns.as_slice()));
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(msgs[3].content, "那白天还是晚上贴");

        let single = build_messages("压岁钱", None);
        assert_eq!(single.len(), 2);
        assert!(single[1].content.contains("压岁钱"));
    }

    #[tokio::test]
    async fn generate_answer_post_processes_and_counts() {
        let (llm, model) = backend(ScriptedModel::answering("<think>嗯</think>答：元宵节要吃汤圆。"));
        assert_eq!(llm.generate_answer("元宵节吃什么", None).await, "元宵节要吃汤圆呢。");
        let stats = llm.get_monitoring_stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_tokens, 10);
        assert_eq!(model.requests.lock().unwrap()[0].messages[0].content, SYSTEM_INSTRUCTION);

        llm.reset_monitoring();
        assert_eq!(llm.get_monitoring_stats().total_calls, 0);
    }

    #[tokio::test]
    async fn banned_topic_is_refused() {
        let (llm, _) = backend(ScriptedModel::answering("这和赌博有关。"));
        assert_eq!(llm.generate_answer("打麻将", None).await, REFUSAL);
    }

    #[tokio::test]
    async fn failure_becomes_apology() {
        let (llm, _) = backend(ScriptedModel::failing());
        assert_eq!(llm.generate_answer("春节", None).await, APOLOGY);
        assert_eq!(llm.get_monitoring_stats().total_calls, 0);

        let streamed: Vec<String> = llm.stream_answer("春节", None).collect().await;
        assert_eq!(streamed, [APOLOGY]);
    }

    #[tokio::test]
    async fn stream_filters_thinking_and_counts_once() {
        let (llm, _) = backend(ScriptedModel::streaming(&["<th", "ink>ignore", "</think>hel", "lo"]));
        let text: String = llm.stream_answer("hi", None).collect::<Vec<_>>().await.concat();
        assert_eq!(text, "hello");
        assert_eq!(llm.get_monitoring_stats().total_calls, 1);
    }

    #[tokio::test]
    async fn stream_interrupted_after_output_just_ends() {
        let mut model = ScriptedModel::streaming(&["春节", "快乐", "吗"]);
        model.fail_after = Some(2);
        let (llm, _) = backend(model);
        let parts: Vec<String> = llm.stream_answer("hi", None).collect().await;
        assert_eq!(parts, ["春节", "快乐"]);
    }

    #[test]
    fn update_config_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.json");
        let (llm, _) = backend(ScriptedModel::answering("好"));
        let llm = llm.persist_to(&path);
        let updated = llm
            .update_config(LlmConfigUpdate { model: Some("gpt-4".into()), ..Default::default() })
            .unwrap();
        assert_eq!(updated.model, "gpt-4");
        assert_eq!(llm.config().model, "gpt-4");
        assert_eq!(LlmConfig::load(&path).unwrap().model, "gpt-4");
    }
}
