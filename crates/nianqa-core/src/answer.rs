//! Template-driven colloquial answers built from the best knowledge entry.

use crate::dialogue::{latest_content, DialogueTurn, Role};
use crate::knowledge::ScoredEntry;
use crate::question::{Intent, Query};

/// Returned when nothing relevant is known.
pub const NO_ANSWER: &str = "抱歉，我暂时没有关于这个问题的信息。";

/// Formal phrasing rewritten to spoken phrasing, applied in order.
const COLLOQUIAL_REPLACEMENTS: [(&str, &str); 10] = [
    ("是因为", "因为"),
    ("因此", "所以"),
    ("例如", "比如"),
    ("也就是说", "就是说"),
    ("此外", "另外"),
    ("综上所述", "总之"),
    ("需要注意的是", "要注意的是"),
    ("可以", "可以啊"),
    ("应该", "应该吧"),
    ("必须", "一定要"),
];

pub(crate) const PARTICLES: [&str; 5] = ["啊", "呀", "呢", "吧", "嘛"];

const TERMINATORS: [char; 3] = ['。', '！', '？'];

/// Markers in a previous user turn that introduce the topic being continued.
const TOPIC_MARKERS: [&str; 2] = ["那么", "那"];

/// How one intent pulls its slot out of a description.
struct FieldRule {
    indicators: &'static [&'static str],
    /// The candidate must contain one of these; empty accepts anything.
    validators: &'static [&'static str],
    /// Characters that end the candidate.
    stops: &'static [char],
    /// Noun used in the unfilled fallback sentence.
    label: &'static str,
}

const REASON: FieldRule = FieldRule {
    indicators: &["因为", "由于", "是因为", "源于", "起因"],
    validators: &[],
    stops: &['。'],
    label: "原因",
};

const TIME: FieldRule = FieldRule {
    indicators: &["在", "于", "通常", "一般", "时候", "时间", "日期"],
    validators: &["春节", "除夕", "正月", "腊月", "时候", "时间", "日期"],
    stops: &['，', '。'],
    label: "时间",
};

const METHOD: FieldRule = FieldRule {
    indicators: &["通过", "使用", "采用", "做法", "方法", "步骤", "如何"],
    validators: &[],
    stops: &['，', '。'],
    label: "方法",
};

const PLACE: FieldRule = FieldRule {
    indicators: &["在", "于", "地方", "位置", "地点"],
    validators: &["门", "墙", "窗户", "房间", "院子", "广场", "寺庙", "公园"],
    stops: &['，', '。'],
    label: "地点",
};

impl FieldRule {
    /// Text after the first validated indicator, up to the next stop character.
    fn extract(&self, description: &str) -> Option<String> {
        self.indicators.iter().find_map(|indicator| {
            let (_, rest) = description.split_once(indicator)?;
            let candidate = rest.split(self.stops).next().unwrap_or("").trim();
            let valid = !candidate.is_empty()
                && (self.validators.is_empty()
                    || self.validators.iter().any(|v| candidate.contains(v)));
            valid.then(|| candidate.to_string())
        })
    }
}

fn first_sentence(description: &str) -> &str {
    description.split('。').next().unwrap_or("").trim()
}

/// Reason behind a custom; falls back to the first sentence of the description.
pub fn extract_reason(description: &str) -> String {
    REASON
        .extract(description)
        .unwrap_or_else(|| first_sentence(description).to_string())
}

pub fn extract_time(description: &str) -> Option<String> {
    TIME.extract(description)
}

pub fn extract_method(description: &str) -> Option<String> {
    METHOD.extract(description)
}

pub fn extract_place(description: &str) -> Option<String> {
    PLACE.extract(description)
}

#[derive(Debug, Clone, Default)]
pub struct AnswerGenerator;

impl AnswerGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Answer from the highest-scored entry, shaped by the query intent.
    pub fn generate(
        &self,
        retrieved: &[ScoredEntry],
        query: &Query,
        context: Option<&[DialogueTurn]>,
    ) -> String {
        let Some(top) = retrieved.first() else {
            return NO_ANSWER.to_string();
        };
        let title = top.entry.title.as_str();
        let description = top.entry.description.as_str();

        let answer = colloquialize(&fill_template(query.intent, title, description));

        if !query.context_aware {
            return answer;
        }
        let previous_question = context
            .and_then(|turns| latest_content(turns, Role::User))
            .or_else(|| {
                query
                    .recent_context
                    .as_ref()
                    .and_then(|r| r.user_question.as_deref())
            });
        match previous_question.and_then(topic_after_marker) {
            Some(topic) => format!("你问的关于{}的问题，{}", topic, answer),
            None => answer,
        }
    }
}

fn fill_template(intent: Intent, title: &str, description: &str) -> String {
    let unfilled = |rule: &FieldRule| format!("关于{}的{}，{}", title, rule.label, description);
    match intent {
        Intent::What => format!("{}。", description),
        Intent::Why => {
            let reason = extract_reason(description);
            if reason.is_empty() {
                unfilled(&REASON)
            } else {
                format!("因为{}，所以{}。", reason, title)
            }
        }
        Intent::When => match extract_time(description) {
            Some(time) => format!("{}通常在{}。", title, time),
            None => unfilled(&TIME),
        },
        Intent::How => match extract_method(description) {
            Some(method) => format!("{}的方法是{}。", title, method),
            None => unfilled(&METHOD),
        },
        Intent::Where => match extract_place(description) {
            Some(place) => format!("{}通常在{}。", title, place),
            None => unfilled(&PLACE),
        },
    }
}

/// Topic text following "那"/"那么" in a previous question, if any.
fn topic_after_marker(question: &str) -> Option<String> {
    let (_, rest) = TOPIC_MARKERS
        .iter()
        .find_map(|m| question.split_once(m))?;
    let topic = crate::question::clean(rest);
    (!topic.is_empty()).then_some(topic)
}

/// Rewrites formal phrasing into spoken Chinese. Deterministic.
pub fn colloquialize(answer: &str) -> String {
    let mut out = answer.to_string();
    for (formal, spoken) in COLLOQUIAL_REPLACEMENTS {
        out = out.replace(formal, spoken);
    }
    out = collapse_terminators(&out);

    if !PARTICLES.iter().any(|p| out.contains(p)) {
        match out.strip_suffix('。') {
            Some(body) => out = format!("{}呢。", body),
            None => out.push('呢'),
        }
    }
    collapse_terminators(&out)
}

/// Squeezes runs of the same sentence terminator down to one.
fn collapse_terminators(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last: Option<char> = None;
    for c in text.chars() {
        if TERMINATORS.contains(&c) && last == Some(c) {
            continue;
        }
        out.push(c);
        last = Some(c);
    }
    out
}
