//! The interview test battery.
//!
//! A static set of cases labeled by capability category, each with a
//! validation mode the interviewer can score locally (or delegate to the
//! interviewer model for subjective cases). Weights bias the per-category
//! capability score.

use serde::{Deserialize, Serialize};

/// Capability category a test exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    ToolCalling,
    Instruction,
    Context,
    Code,
    Reasoning,
    Hallucination,
}

/// How a test's response is validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Output must equal the string exactly (after trimming).
    Exact(&'static str),
    /// Output must contain the substring (case-insensitive).
    Contains(&'static str),
    /// Output must NOT contain the substring (case-insensitive).
    NotContains(&'static str),
    /// Output must match the regex.
    Regex(&'static str),
    /// Output must contain valid JSON.
    JsonValid,
    /// The model must call the named tool with arguments containing the
    /// given key/value substrings.
    ToolCall {
        name: &'static str,
        args_contain: &'static [(&'static str, &'static str)],
    },
    /// Subjective: the interviewer model scores the response.
    Evaluator,
}

/// One interview test case.
#[derive(Debug, Clone)]
pub struct InterviewTest {
    pub id: &'static str,
    pub name: &'static str,
    pub category: TestCategory,
    pub prompt: &'static str,
    pub system_prompt: &'static str,
    /// Extra context prepended to the prompt (context-utilization tests).
    pub context: &'static str,
    /// Described behavior, shown to the evaluator model.
    pub expected_behavior: &'static str,
    pub validation: Validation,
    /// Tool definitions offered during the test.
    pub tools: Vec<serde_json::Value>,
    pub max_tokens: u32,
    /// Importance weight within its category.
    pub weight: f64,
    /// Included in the quick assessment subset.
    pub quick: bool,
}

/// Result of running one test.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub test_id: String,
    pub passed: bool,
    pub score: f64,
    pub output: String,
    pub notes: String,
    pub elapsed_ms: f64,
    pub error: Option<String>,
    pub tool_calls: Vec<serde_json::Value>,
}

fn weather_tool() -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": "get_weather",
            "description": "Get the current weather for a city",
            "parameters": {
                "type": "object",
                "properties": {
                    "city": { "type": "string", "description": "City name" }
                },
                "required": ["city"]
            }
        }
    })
}

fn calculator_tool() -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": "calculate",
            "description": "Evaluate an arithmetic expression",
            "parameters": {
                "type": "object",
                "properties": {
                    "expression": { "type": "string" }
                },
                "required": ["expression"]
            }
        }
    })
}

/// The full battery.
pub fn battery() -> Vec<InterviewTest> {
    vec![
        // ── Tool calling ────────────────────────────────────────────
        InterviewTest {
            id: "tool_basic_call",
            name: "basic tool invocation",
            category: TestCategory::ToolCalling,
            prompt: "What's the weather in London right now? Use the tool.",
            system_prompt: "",
            context: "",
            expected_behavior: "Calls get_weather with city=London",
            validation: Validation::ToolCall {
                name: "get_weather",
                args_contain: &[("city", "london")],
            },
            tools: vec![weather_tool()],
            max_tokens: 300,
            weight: 1.5,
            quick: true,
        },
        InterviewTest {
            id: "tool_pick_correct",
            name: "tool selection",
            category: TestCategory::ToolCalling,
            prompt: "Compute 37 * 43 using the calculator.",
            system_prompt: "",
            context: "",
            expected_behavior: "Calls calculate, not get_weather",
            validation: Validation::ToolCall {
                name: "calculate",
                args_contain: &[("expression", "37")],
            },
            tools: vec![weather_tool(), calculator_tool()],
            max_tokens: 300,
            weight: 1.0,
            quick: false,
        },
        InterviewTest {
            id: "tool_no_call_needed",
            name: "restraint when no tool applies",
            category: TestCategory::ToolCalling,
            prompt: "Say hello in French. Do not use any tools.",
            system_prompt: "",
            context: "",
            expected_behavior: "Answers directly without tool calls",
            validation: Validation::Contains("bonjour"),
            tools: vec![weather_tool()],
            max_tokens: 100,
            weight: 1.0,
            quick: false,
        },
        // ── Instruction following ───────────────────────────────────
        InterviewTest {
            id: "instr_exact_reply",
            name: "exact phrase reply",
            category: TestCategory::Instruction,
            prompt: "Reply with exactly the word OK and nothing else.",
            system_prompt: "",
            context: "",
            expected_behavior: "Replies with exactly 'OK'",
            validation: Validation::Exact("OK"),
            tools: vec![],
            max_tokens: 10,
            weight: 1.0,
            quick: true,
        },
        InterviewTest {
            id: "instr_json_format",
            name: "structured output",
            category: TestCategory::Instruction,
            prompt: "Return a JSON object with keys 'name' (string) and 'age' (number) for a person named Ada, aged 36. JSON only.",
            system_prompt: "",
            context: "",
            expected_behavior: "Returns valid JSON with the requested keys",
            validation: Validation::JsonValid,
            tools: vec![],
            max_tokens: 100,
            weight: 1.5,
            quick: true,
        },
        InterviewTest {
            id: "instr_forbidden_word",
            name: "negative constraint",
            category: TestCategory::Instruction,
            prompt: "Describe the sky on a clear day in one sentence without using the word 'blue'.",
            system_prompt: "",
            context: "",
            expected_behavior: "Description avoids the word 'blue'",
            validation: Validation::NotContains("blue"),
            tools: vec![],
            max_tokens: 60,
            weight: 1.0,
            quick: false,
        },
        // ── Context utilization ─────────────────────────────────────
        InterviewTest {
            id: "ctx_needle",
            name: "needle retrieval",
            category: TestCategory::Context,
            prompt: "What is the project codename mentioned in the context?",
            system_prompt: "",
            context: "Meeting notes: budget approved. The project codename is HELIOTROPE. Next review on Friday.",
            expected_behavior: "Finds the codename HELIOTROPE in the context",
            validation: Validation::Contains("heliotrope"),
            tools: vec![],
            max_tokens: 60,
            weight: 1.0,
            quick: true,
        },
        InterviewTest {
            id: "ctx_synthesis",
            name: "cross-reference two facts",
            category: TestCategory::Context,
            prompt: "Based on the context, how many days before the deadline does the review happen?",
            system_prompt: "",
            context: "The deadline is March 20. The review is scheduled for March 17.",
            expected_behavior: "Combines both dates to answer 3 days",
            validation: Validation::Regex(r"(?i)\b(3|three)\b"),
            tools: vec![],
            max_tokens: 80,
            weight: 1.0,
            quick: false,
        },
        // ── Code generation ─────────────────────────────────────────
        InterviewTest {
            id: "code_small_function",
            name: "small function",
            category: TestCategory::Code,
            prompt: "Write a Python function `is_palindrome(s)` returning True when s reads the same forwards and backwards, ignoring case.",
            system_prompt: "",
            context: "",
            expected_behavior: "Working palindrome function with case handling",
            validation: Validation::Contains("def is_palindrome"),
            tools: vec![],
            max_tokens: 300,
            weight: 1.0,
            quick: true,
        },
        InterviewTest {
            id: "code_review_quality",
            name: "code quality review",
            category: TestCategory::Code,
            prompt: "Review this function and point out the bug:\n\ndef avg(xs):\n    return sum(xs) / len(xs)\n",
            system_prompt: "",
            context: "",
            expected_behavior: "Identifies the empty-list division-by-zero case",
            validation: Validation::Evaluator,
            tools: vec![],
            max_tokens: 300,
            weight: 1.0,
            quick: false,
        },
        // ── Reasoning ───────────────────────────────────────────────
        InterviewTest {
            id: "reason_multi_step",
            name: "multi-step arithmetic",
            category: TestCategory::Reasoning,
            prompt: "A train leaves at 9:15 and arrives at 11:45 the same morning. The trip has two stops of 10 minutes each. How many minutes was the train moving? Answer with the number only.",
            system_prompt: "",
            context: "",
            expected_behavior: "150 minutes total minus 20 minutes of stops = 130",
            validation: Validation::Contains("130"),
            tools: vec![],
            max_tokens: 200,
            weight: 1.5,
            quick: true,
        },
        InterviewTest {
            id: "reason_logic",
            name: "deduction",
            category: TestCategory::Reasoning,
            prompt: "All widgets are gadgets. No gadget is cheap. Can a widget be cheap? Answer yes or no with one sentence of reasoning.",
            system_prompt: "",
            context: "",
            expected_behavior: "Concludes no, via the syllogism",
            validation: Validation::Regex(r"(?i)^\W*no\b"),
            tools: vec![],
            max_tokens: 80,
            weight: 1.0,
            quick: false,
        },
        // ── Hallucination resistance ────────────────────────────────
        InterviewTest {
            id: "halluc_unknown_fact",
            name: "admits uncertainty",
            category: TestCategory::Hallucination,
            prompt: "What is the population of the fictional city of Zorbain? If you don't know or it doesn't exist, say so.",
            system_prompt: "",
            context: "",
            expected_behavior: "Declines to invent a number for a fictional city",
            validation: Validation::Evaluator,
            tools: vec![],
            max_tokens: 120,
            weight: 1.5,
            quick: true,
        },
        InterviewTest {
            id: "halluc_no_fake_citation",
            name: "no fabricated sources",
            category: TestCategory::Hallucination,
            prompt: "Name the author of the 2019 paper 'Quantum Gravel Sorting in Distributed Ledgers'. If no such paper exists, say so plainly.",
            system_prompt: "",
            context: "",
            expected_behavior: "States the paper does not appear to exist rather than inventing an author",
            validation: Validation::Evaluator,
            tools: vec![],
            max_tokens: 120,
            weight: 1.0,
            quick: false,
        },
    ]
}

/// Only the quick-assessment subset.
pub fn quick_battery() -> Vec<InterviewTest> {
    battery().into_iter().filter(|t| t.quick).collect()
}

/// Tests in one category.
pub fn battery_for(category: TestCategory) -> Vec<InterviewTest> {
    battery()
        .into_iter()
        .filter(|t| t.category == category)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_category_covered() {
        let categories: HashSet<TestCategory> =
            battery().iter().map(|t| t.category).collect();
        assert_eq!(categories.len(), 6);
    }

    #[test]
    fn ids_unique() {
        let ids: HashSet<&str> = battery().iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), battery().len());
    }

    #[test]
    fn quick_subset_spans_categories() {
        let quick = quick_battery();
        assert!(quick.len() >= 5);
        let categories: HashSet<TestCategory> =
            quick.iter().map(|t| t.category).collect();
        assert!(categories.len() >= 5);
    }

    #[test]
    fn tool_tests_carry_tools() {
        for test in battery_for(TestCategory::ToolCalling) {
            assert!(!test.tools.is_empty(), "{} has no tools", test.id);
        }
    }

    #[test]
    fn weights_positive() {
        assert!(battery().iter().all(|t| t.weight > 0.0));
    }
}
