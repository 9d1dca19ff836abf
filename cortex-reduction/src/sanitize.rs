//! Deterministic, versioned text sanitization.
//!
//! `sanitize` is a pure function: same input, same output, and running it
//! on its own output changes nothing. It is an evidence transform: it
//! strips noise and extracts marker spans verbatim, and it never parses,
//! normalizes, or interprets what the text means.
//!
//! Steps, in order (each sets its flag only when it changed something):
//!
//! 1. strip fenced code blocks (an unterminated fence truncates the rest)
//! 2. strip `<think>…</think>` blocks (unterminated likewise)
//! 3. truncate degenerations: runs of 4+ identical tokens collapse to
//!    three; a trigram repeating 3+ times truncates at the third repeat
//! 4. flag multiple verbatim `[GOAL: …]` markers
//! 5. extract markers verbatim and strip them from the text
//! 6. collapse whitespace
//!
//! Bump [`SANITIZER_VERSION`] whenever any rule changes; envelopes store
//! the version they were sanitized under.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Version of the rule set above. Pinned by the implementation; not
/// configurable at runtime.
pub const SANITIZER_VERSION: &str = "sanitize-v3";

/// Longest allowed run of one repeated token.
const MAX_TOKEN_RUN: usize = 3;

/// Trigram repetitions at which the tail is considered degenerate.
const TRIGRAM_LIMIT: usize = 3;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("fence regex"))
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex"))
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[GOAL:[^\]]*\]").expect("marker regex"))
}

/// Which transforms changed the text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeFlags {
    /// A fenced code block was removed.
    pub stripped_code_fence: bool,
    /// A `<think>` block was removed.
    pub stripped_think_block: bool,
    /// A run of identical tokens was collapsed.
    pub truncated_token_run: bool,
    /// A repeating trigram truncated the tail.
    pub truncated_trigram_loop: bool,
    /// Two or more goal markers were present.
    pub multiple_goal_markers: bool,
    /// Markers were extracted and stripped.
    pub extracted_markers: bool,
    /// Whitespace was collapsed.
    pub collapsed_whitespace: bool,
}

impl SanitizeFlags {
    /// True when no transform changed anything.
    pub fn is_identity(&self) -> bool {
        *self == SanitizeFlags::default()
    }
}

/// Result of sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOutcome {
    /// Cleaned text, markers removed.
    pub sanitized_text: String,
    /// Marker spans exactly as they appeared, in order.
    pub markers: Vec<String>,
    /// Which transforms fired.
    pub flags: SanitizeFlags,
    /// Rule-set version the text was sanitized under.
    pub version: &'static str,
}

/// Sanitize one candidate utterance. Pure and idempotent.
pub fn sanitize(text: &str) -> SanitizeOutcome {
    let mut flags = SanitizeFlags::default();

    // 1. Fenced code blocks.
    let after_fences = strip_blocks(text, fence_re(), "```");
    if after_fences != text {
        flags.stripped_code_fence = true;
    }

    // 2. <think> blocks.
    let after_think = strip_blocks(&after_fences, think_re(), "<think>");
    if after_think != after_fences {
        flags.stripped_think_block = true;
    }

    // 3. Degenerations.
    let after_degen = truncate_degenerations(&after_think, &mut flags);

    // 4–5. Markers: detect, extract verbatim, strip.
    let markers: Vec<String> = marker_re()
        .find_iter(&after_degen)
        .map(|m| m.as_str().to_string())
        .collect();
    if markers.len() >= 2 {
        flags.multiple_goal_markers = true;
    }
    let after_markers = if markers.is_empty() {
        after_degen
    } else {
        flags.extracted_markers = true;
        let stripped = marker_re().replace_all(&after_degen, " ").into_owned();
        // Removing a marker can join tokens into a fresh degeneration;
        // re-check so the output is a fixed point.
        truncate_degenerations(&stripped, &mut flags)
    };

    // 6. Whitespace.
    let collapsed = after_markers.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed != after_markers {
        flags.collapsed_whitespace = true;
    }

    SanitizeOutcome {
        sanitized_text: collapsed,
        markers,
        flags,
        version: SANITIZER_VERSION,
    }
}

/// Remove paired blocks; an unterminated opener truncates the remainder.
fn strip_blocks(text: &str, re: &Regex, opener: &str) -> String {
    let stripped = re.replace_all(text, " ").into_owned();
    match stripped.find(opener) {
        Some(pos) => stripped[..pos].to_string(),
        None => stripped,
    }
}

/// Collapse 4+ identical consecutive tokens and truncate at a trigram
/// repeating three or more times. Returns the input untouched when no
/// degeneration is present, so honest flags and idempotence both hold.
fn truncate_degenerations(text: &str, flags: &mut SanitizeFlags) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return text.to_string();
    }

    // Runs of identical tokens.
    let mut kept: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut run_len = 0usize;
    let mut collapsed_run = false;
    for &token in &tokens {
        if kept.last() == Some(&token) {
            run_len += 1;
        } else {
            run_len = 1;
        }
        if run_len > MAX_TOKEN_RUN {
            collapsed_run = true;
            continue;
        }
        kept.push(token);
    }

    // Repeating trigram: keep two repetitions, drop the degenerate tail.
    let mut truncated_at: Option<usize> = None;
    if kept.len() >= 9 {
        'outer: for i in 0..kept.len().saturating_sub(3 * TRIGRAM_LIMIT - 1) {
            let first = &kept[i..i + 3];
            let mut reps = 1;
            let mut j = i + 3;
            while j + 3 <= kept.len() && &kept[j..j + 3] == first {
                reps += 1;
                if reps >= TRIGRAM_LIMIT {
                    truncated_at = Some(i + 3 * (TRIGRAM_LIMIT - 1));
                    break 'outer;
                }
                j += 3;
            }
        }
    }
    if let Some(cut) = truncated_at {
        kept.truncate(cut);
        flags.truncated_trigram_loop = true;
    }

    if collapsed_run {
        flags.truncated_token_run = true;
    }
    if collapsed_run || truncated_at.is_some() {
        kept.join(" ")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_input_sets_no_flags() {
        let out = sanitize("I see trees nearby.");
        assert_eq!(out.sanitized_text, "I see trees nearby.");
        assert!(out.flags.is_identity());
        assert!(out.markers.is_empty());
        assert_eq!(out.version, SANITIZER_VERSION);
    }

    #[test]
    fn strips_fenced_code_blocks() {
        let out = sanitize("before ```let x = 1;\nx += 1;``` after");
        assert_eq!(out.sanitized_text, "before after");
        assert!(out.flags.stripped_code_fence);
    }

    #[test]
    fn unterminated_fence_truncates_tail() {
        let out = sanitize("keep this ```fn broken( and everything after");
        assert_eq!(out.sanitized_text, "keep this");
        assert!(out.flags.stripped_code_fence);
    }

    #[test]
    fn strips_think_blocks() {
        let out = sanitize("a <think>internal\nchain of thought</think> b");
        assert_eq!(out.sanitized_text, "a b");
        assert!(out.flags.stripped_think_block);
        assert!(!out.flags.stripped_code_fence);
    }

    #[test]
    fn collapses_token_runs() {
        let out = sanitize("go go go go go west");
        assert_eq!(out.sanitized_text, "go go go west");
        assert!(out.flags.truncated_token_run);
    }

    #[test]
    fn three_identical_tokens_are_untouched() {
        let out = sanitize("go go go west");
        assert_eq!(out.sanitized_text, "go go go west");
        assert!(!out.flags.truncated_token_run);
    }

    #[test]
    fn truncates_repeating_trigram() {
        let out = sanitize("mine the ore mine the ore mine the ore mine the ore then rest");
        assert_eq!(out.sanitized_text, "mine the ore mine the ore");
        assert!(out.flags.truncated_trigram_loop);
    }

    #[test]
    fn extracts_markers_verbatim() {
        let out = sanitize("I see trees nearby. [GOAL: craft wooden_planks]");
        assert_eq!(out.sanitized_text, "I see trees nearby.");
        assert_eq!(out.markers, vec!["[GOAL: craft wooden_planks]"]);
        assert!(out.flags.extracted_markers);
        assert!(!out.flags.multiple_goal_markers);
    }

    #[test]
    fn flags_multiple_markers() {
        let out = sanitize("[GOAL: a] middle [GOAL: b]");
        assert_eq!(out.markers.len(), 2);
        assert!(out.flags.multiple_goal_markers);
        assert_eq!(out.sanitized_text, "middle");
    }

    #[test]
    fn marker_content_is_not_interpreted() {
        // Whatever is inside the brackets travels byte-for-byte.
        let raw = "[GOAL:   MiXeD caSe   oddness??]";
        let out = sanitize(raw);
        assert_eq!(out.markers, vec![raw.to_string()]);
    }

    #[test]
    fn collapses_whitespace() {
        let out = sanitize("  spaced\t\tout\n\nwords  ");
        assert_eq!(out.sanitized_text, "spaced out words");
        assert!(out.flags.collapsed_whitespace);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "plain text",
            "x ```code``` y [GOAL: dig down] z",
            "go go go go <think>hmm</think> stop stop stop stop stop",
            "mine ore now mine ore now mine ore now tail",
            "  messy \n whitespace ",
        ];
        for input in inputs {
            let once = sanitize(input);
            let twice = sanitize(&once.sanitized_text);
            assert_eq!(once.sanitized_text, twice.sanitized_text, "input: {input}");
            assert!(twice.flags.is_identity(), "input: {input}");
        }
    }

    #[test]
    fn marker_removal_cannot_reintroduce_degeneration() {
        // Stripping the marker joins the halves into a trigram loop; the
        // output must still be a fixed point.
        let out = sanitize("a b c [GOAL: x] a b c a b c");
        assert_eq!(out.sanitized_text, "a b c a b c");
        assert!(out.flags.truncated_trigram_loop);
        let again = sanitize(&out.sanitized_text);
        assert_eq!(again.sanitized_text, out.sanitized_text);
        assert!(again.flags.is_identity());
    }

    #[test]
    fn sanitize_is_stable() {
        let input = "a ```b``` c [GOAL: d] e e e e e";
        assert_eq!(sanitize(input), sanitize(input));
    }
}
