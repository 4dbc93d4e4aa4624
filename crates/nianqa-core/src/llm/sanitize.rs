//! Removal of model "thinking" output, incremental and whole-text.

use regex::Regex;
use std::sync::LazyLock;

/// Opening markers of a thinking block. Any one of them opens a block.
pub const START_MARKERS: [&str; 8] = [
    "＜thought>", "<thought>", "＜think>", "<think>", "＜THINK>", "＜Think>", "<THINK>", "<Think>",
];

/// Closing markers. Any one of them closes whichever block is open.
pub const END_MARKERS: [&str; 8] = [
    "＜/thought>", "</thought>", "＜/think>", "</think>", "＜/THINK>", "＜/Think>", "</THINK>",
    "</Think>",
];

const BOILERPLATE_PREFIXES: [&str; 3] = ["回答：", "答：", "我来回答："];

static REASONING_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:思考过程|分析过程|思考|分析|推理)[:：].*(?:\n|$)").unwrap()
});

static LET_ME_THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*让我[思考分析想一想推理].*(?:\n|$)").unwrap());

static NEWLINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").unwrap());

static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());

/// Byte range of the earliest marker in `text`; longest marker wins a tie.
fn earliest(text: &str, markers: &[&str]) -> Option<(usize, usize)> {
    markers
        .iter()
        .filter_map(|m| text.find(m).map(|start| (start, start + m.len())))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
}

/// Start of the longest suffix of `text` that could still grow into a marker.
fn partial_marker_start(text: &str, markers: &[&str]) -> usize {
    let longest = markers.iter().map(|m| m.len()).max().unwrap_or(0);
    let floor = text.len().saturating_sub(longest);
    text.char_indices()
        .map(|(i, _)| i)
        .skip_while(|&i| i < floor)
        .find(|&i| markers.iter().any(|m| m.starts_with(&text[i..])))
        .unwrap_or(text.len())
}

/// Streaming filter that drops thinking blocks from a fragmented response.
///
/// Text is released only once it cannot be part of a marker, so the output is
/// the same however the response is split, and no partial marker is emitted.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    pending: String,
    in_block: bool,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an opened block is still waiting for its end marker.
    pub fn in_block(&self) -> bool {
        self.in_block
    }

    /// Consumes one fragment and returns the text that is now safe to show.
    pub fn feed(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        let mut emitted = String::new();
        loop {
            if self.in_block {
                match earliest(&self.pending, &END_MARKERS) {
                    Some((_, end)) => {
                        self.pending.drain(..end);
                        self.in_block = false;
                    }
                    None => {
                        let keep = partial_marker_start(&self.pending, &END_MARKERS);
                        self.pending.drain(..keep);
                        break;
                    }
                }
                continue;
            }

            let Some((start, after_start)) = earliest(&self.pending, &START_MARKERS) else {
                let hold = partial_marker_start(&self.pending, &START_MARKERS);
                emitted.extend(self.pending.drain(..hold));
                break;
            };
            match earliest(&self.pending[after_start..], &END_MARKERS) {
                Some((_, end)) => {
                    self.pending.replace_range(start..after_start + end, "");
                }
                None => {
                    emitted.extend(self.pending.drain(..start));
                    self.in_block = true;
                    break;
                }
            }
        }
        emitted
    }

    /// Flushes the tail. An unterminated block is discarded.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.in_block) {
            String::new()
        } else {
            rest
        }
    }

    /// Whole-text form: every complete block removed, an unterminated one dropped.
    pub fn strip(text: &str) -> String {
        let mut filter = Self::new();
        let mut out = filter.feed(text);
        out.push_str(&filter.finish());
        out
    }
}

/// Cleans a complete model answer for display.
pub fn post_process(answer: &str) -> String {
    let text = ThinkFilter::strip(answer);
    let text = REASONING_LINE_RE.replace_all(&text, "");
    let text = LET_ME_THINK_RE.replace_all(&text, "");
    let text = NEWLINES_RE.replace_all(&text, "\n");
    let text = SPACES_RE.replace_all(&text, " ");

    let mut text = text.trim();
    for prefix in BOILERPLATE_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }

    let has_particle = crate::answer::PARTICLES.iter().any(|p| text.contains(p));
    match text.strip_suffix('。') {
        Some(body) if !has_particle => format!("{}呢。", body),
        _ => text.to_string(),
    }
}
