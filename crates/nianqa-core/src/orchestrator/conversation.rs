use super::{Orchestrator, Plan, QueryResponse};
use crate::dialogue::{DialogueManager, DialogueTurn, Role};
use crate::error::KnowledgeError;
use std::sync::Arc;

/// One user's session: the shared pipeline plus a history nobody else sees.
#[derive(Debug)]
pub struct Conversation {
    orchestrator: Arc<Orchestrator>,
    dialogue: DialogueManager,
}

impl Conversation {
    pub fn new(orchestrator: Arc<Orchestrator>, max_history_length: usize) -> Self {
        Self {
            orchestrator,
            dialogue: DialogueManager::new(max_history_length),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Pipeline up to the answer branch, against this conversation's history.
    pub fn plan(&self, question: &str) -> Plan {
        self.orchestrator.plan(&self.dialogue, question)
    }

    /// Stores the question and its answer, whichever branch produced it.
    pub fn record(&mut self, question: &str, answer: &str) {
        self.dialogue.add_turn(Role::User, question);
        self.dialogue.add_turn(Role::System, answer);
    }

    pub async fn process_query(&mut self, question: &str) -> QueryResponse {
        let plan = self.plan(question);
        let response = self.orchestrator.resolve(plan).await;
        self.record(question, &response.answer);
        tracing::debug!(
            target: "nianqa::orchestrator",
            source = response.source.as_str(),
            turns = self.dialogue.get_history().len(),
            "query answered"
        );
        response
    }

    pub fn get_history(&self) -> &[DialogueTurn] {
        self.dialogue.get_history()
    }

    pub fn clear_history(&mut self) {
        self.dialogue.clear_history();
    }

    pub fn reload_knowledge_base(&self) -> Result<usize, KnowledgeError> {
        self.orchestrator.reload_knowledge_base()
    }

    pub fn set_max_history_length(&mut self, max_history_length: usize) {
        self.dialogue.set_max_history_length(max_history_length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::NO_ANSWER;
    use crate::knowledge::{KnowledgeBase, KnowledgeRetriever};
    use crate::llm::testing::{backend, ScriptedModel};
    use crate::orchestrator::tests::sample_retriever;
    use crate::orchestrator::AnswerSource;

    fn conversation(llm: Option<crate::llm::LlmBackend>) -> Conversation {
        Conversation::new(Arc::new(Orchestrator::new(sample_retriever(), llm)), 5)
    }

    #[tokio::test]
    async fn miss_without_model_returns_apology_and_records_turns() {
        let mut conv = conversation(None);
        let response = conv.process_query("圣诞节吃火鸡").await;
        assert_eq!(response.answer, NO_ANSWER);
        assert_eq!(response.source, AnswerSource::Fallback);

        let history = conv.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, NO_ANSWER);
    }

    #[tokio::test]
    async fn follow_up_question_sees_previous_turns() {
        let (llm, model) = backend(ScriptedModel::answering("除夕贴。"));
        let empty = KnowledgeRetriever::from_snapshot(KnowledgeBase::default());
        let mut conv = Conversation::new(Arc::new(Orchestrator::new(empty, Some(llm))), 5);

        let first = conv.process_query("福字什么时候贴").await;
        assert_eq!(first.source, AnswerSource::Llm);
        assert_eq!(first.answer, "除夕贴呢。");

        let second = conv.plan("那白天还是晚上贴");
        match &second {
            Plan::Delegate { question, context } => {
                assert_eq!(question, "那白天还是晚上贴");
                let turns = context.as_ref().expect("follow-up context");
                assert_eq!(turns.len(), 2);
                assert_eq!(turns[0].content, "福字什么时候贴");
                assert_eq!(turns[1].content, "除夕贴呢。");
            }
            other => panic!("unexpected plan {other:?}"),
        }

        let response = conv.orchestrator().resolve(second).await;
        conv.record("那白天还是晚上贴", &response.answer);
        assert_eq!(response.source, AnswerSource::Llm);
        assert_eq!(conv.get_history().len(), 4);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let sent = &requests[1].messages;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1].role, "user");
        assert_eq!(sent[1].content, "福字什么时候贴");
        assert_eq!(sent[2].role, "assistant");
        assert_eq!(sent[2].content, "除夕贴呢。");
        assert_eq!(sent[3].content, "那白天还是晚上贴");
    }

    #[tokio::test]
    async fn conversations_do_not_share_history() {
        let orch = Arc::new(Orchestrator::new(sample_retriever(), None));
        let mut a = Conversation::new(Arc::clone(&orch), 5);
        let b = Conversation::new(orch, 5);
        a.process_query("为啥要倒贴福？").await;
        assert_eq!(a.get_history().len(), 2);
        assert!(b.get_history().is_empty());
    }

    #[tokio::test]
    async fn shrinking_the_bound_truncates_and_clear_empties() {
        let mut conv = conversation(None);
        conv.process_query("为啥要倒贴福？").await;
        conv.process_query("春联什么时候贴").await;
        conv.set_max_history_length(1);
        assert_eq!(conv.get_history().len(), 1);
        conv.clear_history();
        assert!(conv.get_history().is_empty());
        assert_eq!(conv.reload_knowledge_base().unwrap(), 2);
    }
}
