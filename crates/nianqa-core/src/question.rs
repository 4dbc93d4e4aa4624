//! Question understanding: cleaning, intent classification, keyword extraction
//! and follow-up reference resolution.

use crate::dialogue::{latest_content, DialogueTurn, Role};
use serde::{Deserialize, Serialize};

/// Punctuation replaced by a space during cleaning.
const PUNCTUATION: [char; 18] = [
    '，', '。', '！', '？', '；', '：', '"', '\'', '（', '）', '“', '”', '‘', '’', ',', '!', '?', ';',
];

const STOP_WORDS: [&str; 40] = [
    "的", "了", "是", "在", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也", "很",
    "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "那", "那么", "然后",
    "接着", "还有", "另外", "再问", "再", "又", "还", "更", "吗",
];

/// Festival names picked up even when they are glued to other characters.
const FESTIVAL_TERMS: [&str; 9] = [
    "新年", "春节", "除夕", "元宵", "清明", "端午", "七夕", "中秋", "重阳",
];

/// Pronouns and demonstratives that point back into the conversation.
const REFERENCE_MARKERS: [&str; 8] = ["这", "那", "它", "他", "她", "他们", "她们", "它们"];

/// Shape of a question. Declaration order is classification precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Why,
    What,
    When,
    How,
    Where,
}

impl Intent {
    /// Categories in the order they are checked.
    pub const ORDERED: [Intent; 5] = [
        Intent::Why,
        Intent::What,
        Intent::When,
        Intent::How,
        Intent::Where,
    ];

    /// Trigger substrings, scanned in order.
    pub fn triggers(self) -> &'static [&'static str] {
        match self {
            Intent::Why => &["为什么", "为啥", "何故", "何以"],
            Intent::What => &["什么", "啥", "何谓", "是什么"],
            Intent::When => &["什么时候", "何时", "几时"],
            Intent::How => &["怎么", "如何", "怎样", "如何做"],
            Intent::Where => &["哪里", "哪儿", "在什么地方", "位置"],
        }
    }

    /// Words in an entry description that suggest it answers this kind of question.
    pub fn description_indicators(self) -> &'static [&'static str] {
        match self {
            Intent::Why => &["因为", "由于", "是因为", "源于", "起因"],
            Intent::What => &[],
            Intent::When => &["时间", "时候", "何时", "什么时候", "通常", "一般"],
            Intent::How => &["如何", "怎么", "怎样", "方法", "步骤"],
            Intent::Where => &["地方", "位置", "地点", "在", "于"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Why => "why",
            Intent::What => "what",
            Intent::When => "when",
            Intent::How => "how",
            Intent::Where => "where",
        }
    }
}

/// The two most recent utterances a follow-up question may refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentContext {
    pub system_response: Option<String>,
    pub user_question: Option<String>,
}

/// A processed question. Built once per incoming question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub original_text: String,
    pub cleaned_text: String,
    pub intent: Intent,
    pub keywords: Vec<String>,
    pub context_aware: bool,
    pub recent_context: Option<RecentContext>,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionProcessor;

impl QuestionProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Builds a [`Query`]; a non-empty `context` enables reference resolution.
    pub fn process(&self, question: &str, context: Option<&[DialogueTurn]>) -> Query {
        let cleaned = clean(question);
        let intent = classify_intent(&cleaned);
        let keywords = extract_keywords(&cleaned);

        match context.filter(|turns| !turns.is_empty()) {
            Some(turns) => self.process_with_context(question, cleaned, intent, keywords, turns),
            None => Query {
                original_text: question.to_string(),
                cleaned_text: cleaned,
                intent,
                keywords,
                context_aware: false,
                recent_context: None,
            },
        }
    }

    fn process_with_context(
        &self,
        question: &str,
        cleaned: String,
        intent: Intent,
        mut keywords: Vec<String>,
        turns: &[DialogueTurn],
    ) -> Query {
        let system_response = latest_content(turns, Role::System).map(str::to_string);
        let user_question = latest_content(turns, Role::User).map(str::to_string);

        if REFERENCE_MARKERS.iter().any(|m| cleaned.contains(*m)) {
            let referent = system_response.as_deref().or(user_question.as_deref());
            if let Some(text) = referent {
                keywords.extend(extract_keywords(&clean(text)));
            }
        }
        dedup_in_place(&mut keywords);

        Query {
            original_text: question.to_string(),
            cleaned_text: cleaned,
            intent,
            keywords,
            context_aware: true,
            recent_context: Some(RecentContext {
                system_response,
                user_question,
            }),
        }
    }
}

/// Replaces punctuation with spaces, collapses whitespace runs and trims.
pub fn clean(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if PUNCTUATION.contains(&c) { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First intent, in precedence order, with a trigger present in `text`.
///
/// An occurrence that overlaps a longer trigger of a different intent does not
/// count, so "什么" inside "什么时候" no longer claims the question for `what`.
pub fn classify_intent(text: &str) -> Intent {
    for intent in Intent::ORDERED {
        for trigger in intent.triggers() {
            let hit = text
                .match_indices(*trigger)
                .any(|(start, m)| !is_shadowed(text, intent, start, start + m.len()));
            if hit {
                return intent;
            }
        }
    }
    Intent::What
}

fn is_shadowed(text: &str, intent: Intent, start: usize, end: usize) -> bool {
    Intent::ORDERED
        .iter()
        .filter(|other| **other != intent)
        .flat_map(|other| other.triggers().iter())
        .filter(|longer| longer.len() > end - start)
        .any(|longer| {
            text.match_indices(*longer)
                .any(|(s, m)| s < end && start < s + m.len())
        })
}

/// Content words of an already-cleaned question.
pub fn extract_keywords(cleaned: &str) -> Vec<String> {
    let mut stripped = cleaned.to_string();
    for intent in Intent::ORDERED {
        for trigger in intent.triggers() {
            stripped = stripped.replace(*trigger, "");
        }
    }

    let mut keywords: Vec<String> = stripped
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w) && w.chars().count() > 1)
        .map(str::to_string)
        .collect();

    for term in FESTIVAL_TERMS {
        if cleaned.contains(term) && !keywords.iter().any(|k| k == term) {
            keywords.push(term.to_string());
        }
    }
    dedup_in_place(&mut keywords);
    keywords
}

fn dedup_in_place(keywords: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_punctuation_and_collapses_whitespace() {
        assert_eq!(clean("  为啥要倒贴福？  "), "为啥要倒贴福");
        assert_eq!(clean("春联，福字。  还有  红包！"), "春联 福字 还有 红包");
        let once = clean("（压岁钱）是  什么？");
        assert_eq!(clean(&once), once);
    }

    #[test]
    fn precedence_follows_declaration_order() {
        assert_eq!(classify_intent("为什么要守岁"), Intent::Why);
        assert_eq!(classify_intent("为啥要倒贴福"), Intent::Why);
        assert_eq!(classify_intent("年兽是什么"), Intent::What);
        assert_eq!(classify_intent("饺子怎么包"), Intent::How);
        assert_eq!(classify_intent("庙会在哪里"), Intent::Where);
        assert_eq!(classify_intent("压岁钱"), Intent::What);
    }

    #[test]
    fn longer_when_trigger_masks_embedded_what() {
        assert_eq!(classify_intent("福字什么时候贴"), Intent::When);
        assert_eq!(classify_intent("春联在什么地方贴"), Intent::Where);
        assert_eq!(classify_intent("福字是什么时候贴的"), Intent::When);
        assert_eq!(classify_intent("福字是什么 什么时候贴"), Intent::What);
    }

    #[test]
    fn keywords_drop_triggers_stop_words_and_single_chars() {
        let kws = extract_keywords("守岁 是 干啥的");
        assert!(kws.contains(&"守岁".to_string()));
        assert!(!kws.iter().any(|k| k == "是"));
        assert!(!kws.iter().any(|k| k.contains('啥')));
    }

    #[test]
    fn repeated_words_yield_one_keyword() {
        assert_eq!(extract_keywords("春联 春联"), vec!["春联".to_string()]);
        let q = QuestionProcessor::new().process("守岁 守岁 熬年", None);
        assert_eq!(q.keywords, vec!["守岁".to_string(), "熬年".to_string()]);
    }

    #[test]
    fn festival_terms_are_added_from_glued_text() {
        let kws = extract_keywords("春节为什么要放鞭炮");
        assert_eq!(kws[0], "春节要放鞭炮");
        assert!(kws.contains(&"春节".to_string()));
    }

    #[test]
    fn process_without_context_is_not_context_aware() {
        let q = QuestionProcessor::new().process("为啥要倒贴福？", None);
        assert_eq!(q.intent, Intent::Why);
        assert_eq!(q.cleaned_text, "为啥要倒贴福");
        assert_eq!(q.keywords, vec!["要倒贴福".to_string()]);
        assert!(!q.context_aware);
        assert!(q.recent_context.is_none());
    }

    #[test]
    fn pronoun_pulls_keywords_from_last_system_answer() {
        let turns = vec![
            DialogueTurn::now(Role::User, "福字什么时候贴"),
            DialogueTurn::now(Role::System, "福字 除夕贴"),
        ];
        let q = QuestionProcessor::new().process("那白天还是晚上贴", Some(turns.as_slice()));
        assert!(q.context_aware);
        assert!(q.keywords.contains(&"福字".to_string()));
        assert!(q.keywords.contains(&"除夕贴".to_string()));
        assert!(q.keywords.contains(&"除夕".to_string()));
        let recent = q.recent_context.expect("recent context");
        assert_eq!(recent.user_question.as_deref(), Some("福字什么时候贴"));
        assert_eq!(recent.system_response.as_deref(), Some("福字 除夕贴"));
    }

    #[test]
    fn user_question_is_used_when_no_system_answer() {
        let turns = vec![DialogueTurn::now(Role::User, "压岁钱 红包")];
        let q = QuestionProcessor::new().process("那它呢", Some(turns.as_slice()));
        assert!(q.keywords.contains(&"压岁钱".to_string()));
        assert!(q.keywords.contains(&"红包".to_string()));
    }

    #[test]
    fn context_keywords_are_deduplicated() {
        let turns = vec![DialogueTurn::now(Role::System, "守岁 守岁")];
        let q = QuestionProcessor::new().process("这个守岁", Some(turns.as_slice()));
        assert_eq!(q.keywords.iter().filter(|k| *k == "守岁").count(), 1);
    }

    #[test]
    fn empty_context_takes_plain_path() {
        let q = QuestionProcessor::new().process("那守岁呢", Some(&[][..]));
        assert!(!q.context_aware);
    }
}
