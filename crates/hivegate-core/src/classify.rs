//! Task classification and complexity scoring.
//!
//! The rule-based classifier labels an inbound message with a task type
//! (the labels tiers declare as triggers). When a classifier model is
//! configured, [`classify_with_model`] asks it for a single label and
//! falls back to the rules on any failure. The complexity score drives
//! the swarm auto-trigger.

use tracing::debug;

use hivegate_llm::ChatClient;
use hivegate_types::provider::{ChatMessage, ChatOptions};

/// The labels the classifier can produce.
pub const TASK_LABELS: [&str; 11] = [
    "chat",
    "simple_query",
    "task_management",
    "code",
    "debug",
    "implement",
    "refactor",
    "brainstorm",
    "creative",
    "complex_analysis",
    "research",
];

/// Rule-based classification by keyword scan.
pub fn classify(content: &str) -> &'static str {
    let lower = content.to_lowercase();

    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has(&["debug", "stack trace", "error message", "traceback", "broken"]) {
        return "debug";
    }
    if has(&["refactor", "clean up the code", "restructure"]) {
        return "refactor";
    }
    if has(&["implement", "build a", "create a", "add a feature", "write a"])
        && has(&["code", "function", "class", "module", "api", "endpoint", "script"])
    {
        return "implement";
    }
    if has(&["code", "function", "compile", "program", "script", "regex", "sql"]) {
        return "code";
    }
    if has(&["research", "find out", "investigate", "sources", "compare studies"]) {
        return "research";
    }
    if has(&["analyze", "analysis", "trade-off", "tradeoff", "evaluate", "pros and cons"]) {
        return "complex_analysis";
    }
    if has(&["brainstorm", "ideas for", "come up with"]) {
        return "brainstorm";
    }
    if has(&["write a story", "poem", "creative", "slogan"]) {
        return "creative";
    }
    if has(&["remind", "schedule", "todo", "task list", "deadline"]) {
        return "task_management";
    }
    if has(&["what is", "who is", "when did", "how many", "define"]) {
        return "simple_query";
    }
    "chat"
}

/// Complexity score used by the swarm auto-trigger.
///
/// Counts independent signals: length, multi-step phrasing, conjunction
/// density, and explicitly enumerated subtasks.
pub fn complexity_score(content: &str) -> u32 {
    let lower = content.to_lowercase();
    let mut score = 0;

    let words = content.split_whitespace().count();
    if words > 50 {
        score += 1;
    }
    if words > 150 {
        score += 1;
    }

    const MULTI_STEP: &[&str] = &[
        "step by step", "first", "then", "after that", "finally",
        "and also", "as well as",
    ];
    if MULTI_STEP.iter().filter(|p| lower.contains(*p)).count() >= 2 {
        score += 1;
    }

    const BROAD: &[&str] = &[
        "comprehensive", "thorough", "in depth", "end to end", "everything",
        "full report",
    ];
    if BROAD.iter().any(|p| lower.contains(p)) {
        score += 1;
    }

    // Enumerated subtasks ("1.", "2)", "- item").
    let enumerated = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with('-')
                || trimmed
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
        })
        .count();
    if enumerated >= 3 {
        score += 2;
    }

    score
}

/// Ask the classifier model for a label; fall back to the rules when the
/// call fails or produces an unknown label.
pub async fn classify_with_model(
    content: &str,
    client: &ChatClient,
    classifier_model: &str,
) -> String {
    if classifier_model.is_empty() {
        return classify(content).to_string();
    }

    let prompt = format!(
        "Classify the user request into exactly one label from this list:\n{}\n\n\
         Request:\n{}\n\n\
         Reply with the label only.",
        TASK_LABELS.join(", "),
        content.chars().take(1000).collect::<String>()
    );
    let options = ChatOptions {
        max_tokens: Some(10),
        temperature: Some(0.0),
        ..Default::default()
    };
    let response = client
        .chat(&[ChatMessage::user(prompt)], classifier_model, &options)
        .await;

    let label = response.content.trim().to_lowercase();
    if response.finish_reason != "error"
        && TASK_LABELS.contains(&label.as_str())
    {
        debug!(label = %label, "model classification");
        label
    } else {
        let fallback = classify(content);
        debug!(label = fallback, "rule-based classification (model fallback)");
        fallback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_labels() {
        assert_eq!(classify("write a function to sort this list"), "implement");
        assert_eq!(classify("why is my regex slow"), "code");
        assert_eq!(classify("debug this stack trace for me"), "debug");
        assert_eq!(classify("refactor the session module"), "refactor");
    }

    #[test]
    fn research_and_analysis_labels() {
        assert_eq!(classify("research trends in storage engines"), "research");
        assert_eq!(
            classify("analyze the trade-offs between these approaches"),
            "complex_analysis"
        );
    }

    #[test]
    fn light_labels() {
        assert_eq!(classify("what is the capital of France"), "simple_query");
        assert_eq!(classify("remind me to call Sam tomorrow"), "task_management");
        assert_eq!(classify("good morning!"), "chat");
        assert_eq!(classify("brainstorm ideas for the launch"), "brainstorm");
    }

    #[test]
    fn complexity_short_message_is_zero() {
        assert_eq!(complexity_score("hi there"), 0);
    }

    #[test]
    fn complexity_counts_enumerations_and_phrases() {
        let msg = "Please do this comprehensively. First gather data, then analyze it, after that:\n\
                   1. collect sources\n2. summarize each\n3. compare them\n";
        assert!(complexity_score(msg) >= 3);
    }

    #[test]
    fn complexity_counts_length() {
        let long = "word ".repeat(200);
        assert!(complexity_score(&long) >= 2);
    }

    #[test]
    fn all_rule_labels_are_known() {
        let samples = [
            "debug this error message",
            "refactor my code please restructure",
            "implement a new api endpoint",
            "write sql for me",
            "research the topic and cite sources",
            "evaluate the pros and cons",
            "brainstorm ideas for names",
            "write a poem about rust",
            "add this to my todo list",
            "what is entropy",
            "hello",
        ];
        for sample in samples {
            let label = classify(sample);
            assert!(TASK_LABELS.contains(&label), "unknown label {label}");
        }
    }
}
