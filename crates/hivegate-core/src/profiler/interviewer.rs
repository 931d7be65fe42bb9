//! The model interviewer.
//!
//! Runs the battery against a candidate model, validates each response
//! (locally for mechanical modes, via the interviewer model for
//! subjective ones), aggregates weighted per-category scores into the
//! eight capability axes, asks the interviewer for a qualitative
//! synthesis, and derives guardrails from the scores.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info, warn};

use hivegate_llm::ChatClient;
use hivegate_types::profile::{
    CapabilityScores, Guardrails, ModelProfile, PROFILE_VERSION,
};
use hivegate_types::provider::{ChatMessage, ChatOptions};

use super::battery::{
    InterviewTest, TestCategory, TestOutcome, Validation, battery, quick_battery,
};

/// Default interviewer model.
pub const DEFAULT_INTERVIEWER: &str = "anthropic/claude-opus-4-5";

/// Conducts interviews and synthesizes profiles.
pub struct Interviewer {
    interviewer_model: String,
    test_timeout: Duration,
}

impl Interviewer {
    /// Create with the default interviewer model and 30s test timeout.
    pub fn new() -> Self {
        Self {
            interviewer_model: DEFAULT_INTERVIEWER.into(),
            test_timeout: Duration::from_secs(30),
        }
    }

    /// Use a specific interviewer model.
    pub fn with_interviewer_model(mut self, model: impl Into<String>) -> Self {
        self.interviewer_model = model.into();
        self
    }

    /// Per-test timeout.
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Full interview: run the whole battery and synthesize a profile.
    pub async fn interview(&self, client: &ChatClient, model_id: &str) -> ModelProfile {
        info!(model = model_id, interviewer = %self.interviewer_model, "starting interview");
        let outcomes = self.run_tests(client, model_id, battery()).await;
        let mut profile = self.synthesize(client, model_id, &outcomes).await;
        profile.quick = false;
        info!(
            model = model_id,
            overall = profile.overall_score(),
            "interview complete"
        );
        profile
    }

    /// Quick assessment: the pre-declared subset, same synthesis pipeline
    /// flagged as quick.
    pub async fn quick_assessment(
        &self,
        client: &ChatClient,
        model_id: &str,
    ) -> ModelProfile {
        info!(model = model_id, "quick assessment");
        let outcomes = self.run_tests(client, model_id, quick_battery()).await;
        let mut profile = self.synthesize(client, model_id, &outcomes).await;
        profile.quick = true;
        profile
    }

    async fn run_tests(
        &self,
        client: &ChatClient,
        model_id: &str,
        tests: Vec<InterviewTest>,
    ) -> Vec<(InterviewTest, TestOutcome)> {
        let mut outcomes = Vec::with_capacity(tests.len());
        for test in tests {
            let outcome = self.run_test(client, model_id, &test).await;
            debug!(
                test = test.id,
                passed = outcome.passed,
                score = outcome.score,
                "test finished"
            );
            outcomes.push((test, outcome));
        }
        outcomes
    }

    async fn run_test(
        &self,
        client: &ChatClient,
        model_id: &str,
        test: &InterviewTest,
    ) -> TestOutcome {
        let start = Instant::now();

        let mut messages = Vec::new();
        if !test.system_prompt.is_empty() {
            messages.push(ChatMessage::system(test.system_prompt));
        }
        let prompt = if test.context.is_empty() {
            test.prompt.to_string()
        } else {
            format!("Context:\n{}\n\n{}", test.context, test.prompt)
        };
        messages.push(ChatMessage::user(prompt));

        let options = ChatOptions {
            max_tokens: Some(test.max_tokens),
            temperature: Some(0.7),
            tools: test.tools.clone(),
            ..Default::default()
        };

        let response = match tokio::time::timeout(
            self.test_timeout,
            client.chat(&messages, model_id, &options),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                return TestOutcome {
                    test_id: test.id.to_string(),
                    passed: false,
                    score: 0.0,
                    output: String::new(),
                    notes: "test timed out".into(),
                    elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
                    error: Some("timeout".into()),
                    tool_calls: Vec::new(),
                };
            }
        };

        if response.finish_reason == "error" {
            return TestOutcome {
                test_id: test.id.to_string(),
                passed: false,
                score: 0.0,
                output: String::new(),
                notes: format!("provider error: {}", response.content),
                elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: Some(response.content),
                tool_calls: Vec::new(),
            };
        }

        let tool_calls: Vec<serde_json::Value> = response
            .tool_calls
            .iter()
            .map(|c| serde_json::json!({ "name": c.name, "arguments": c.arguments }))
            .collect();

        let (score, notes, passed) = self
            .validate(client, test, &response.content, &tool_calls)
            .await;

        TestOutcome {
            test_id: test.id.to_string(),
            passed,
            score,
            output: response.content.chars().take(1000).collect(),
            notes,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            error: None,
            tool_calls,
        }
    }

    async fn validate(
        &self,
        client: &ChatClient,
        test: &InterviewTest,
        output: &str,
        tool_calls: &[serde_json::Value],
    ) -> (f64, String, bool) {
        match &test.validation {
            Validation::Exact(expected) => {
                let passed = output.trim() == *expected;
                (
                    if passed { 1.0 } else { 0.0 },
                    if passed { "exact match" } else { "no match" }.into(),
                    passed,
                )
            }
            Validation::Contains(needle) => {
                let passed = output.to_lowercase().contains(&needle.to_lowercase());
                (
                    if passed { 1.0 } else { 0.0 },
                    format!(
                        "{} '{needle}'",
                        if passed { "contains" } else { "missing" }
                    ),
                    passed,
                )
            }
            Validation::NotContains(needle) => {
                let passed = !output.to_lowercase().contains(&needle.to_lowercase());
                (
                    if passed { 1.0 } else { 0.0 },
                    format!(
                        "{} forbidden '{needle}'",
                        if passed { "avoided" } else { "contains" }
                    ),
                    passed,
                )
            }
            Validation::Regex(pattern) => match Regex::new(pattern) {
                Ok(re) => {
                    let passed = re.is_match(output);
                    (
                        if passed { 1.0 } else { 0.0 },
                        if passed { "regex match" } else { "no regex match" }.into(),
                        passed,
                    )
                }
                Err(_) => (0.0, "invalid regex in test".into(), false),
            },
            Validation::JsonValid => {
                let passed = extract_json(output).is_some();
                (
                    if passed { 1.0 } else { 0.0 },
                    if passed { "valid JSON" } else { "invalid JSON" }.into(),
                    passed,
                )
            }
            Validation::ToolCall { name, args_contain } => {
                if tool_calls.is_empty() {
                    return (0.0, "no tool call made".into(), false);
                }
                for call in tool_calls {
                    if call.get("name").and_then(|v| v.as_str()) != Some(name) {
                        continue;
                    }
                    let args = call
                        .get("arguments")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    let all_match = args_contain.iter().all(|(key, needle)| {
                        args.get(*key)
                            .map(|v| {
                                v.to_string().to_lowercase().contains(&needle.to_lowercase())
                            })
                            .unwrap_or(false)
                    });
                    return if all_match {
                        (1.0, format!("correct tool call: {name}"), true)
                    } else {
                        (0.5, "correct tool, wrong arguments".into(), false)
                    };
                }
                let called: Vec<&str> = tool_calls
                    .iter()
                    .filter_map(|c| c.get("name").and_then(|v| v.as_str()))
                    .collect();
                (0.2, format!("wrong tool(s): {called:?}"), false)
            }
            Validation::Evaluator => {
                self.evaluate_with_interviewer(client, test, output, tool_calls)
                    .await
            }
        }
    }

    /// Delegate subjective scoring to the interviewer model; parse the
    /// first JSON object out of its reply.
    async fn evaluate_with_interviewer(
        &self,
        client: &ChatClient,
        test: &InterviewTest,
        output: &str,
        tool_calls: &[serde_json::Value],
    ) -> (f64, String, bool) {
        let output_snippet: String = output.chars().take(2000).collect();
        let prompt = format!(
            "You are evaluating an AI model's response to a test.\n\n\
             TEST: {}\nPROMPT: {}\nEXPECTED BEHAVIOR: {}\n\n\
             MODEL'S RESPONSE:\n{}\n\n{}\n\n\
             Respond with JSON only:\n\
             {{\"score\": <float 0.0-1.0>, \"passed\": <true/false>, \"notes\": \"<brief notes>\"}}",
            test.name,
            test.prompt,
            test.expected_behavior,
            output_snippet,
            if tool_calls.is_empty() {
                "NO TOOL CALLS".to_string()
            } else {
                format!("TOOL CALLS: {}", serde_json::to_string(tool_calls).unwrap_or_default())
            },
        );

        let options = ChatOptions {
            max_tokens: Some(500),
            temperature: Some(0.3),
            ..Default::default()
        };
        let response = client
            .chat(
                &[ChatMessage::user(prompt)],
                &self.interviewer_model,
                &options,
            )
            .await;

        if response.finish_reason == "error" {
            warn!("interviewer evaluation failed, scoring neutral");
            return (0.5, "evaluation unavailable".into(), true);
        }

        match extract_json(&response.content) {
            Some(json) => {
                let score = json
                    .get("score")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0);
                let passed = json
                    .get("passed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(score >= 0.6);
                let notes = json
                    .get("notes")
                    .and_then(|v| v.as_str())
                    .unwrap_or("evaluated by interviewer")
                    .to_string();
                (score, notes, passed)
            }
            None => {
                let lower = response.content.to_lowercase();
                if lower.contains("pass") {
                    (0.8, "evaluation indicates pass".into(), true)
                } else if lower.contains("fail") {
                    (0.3, "evaluation indicates fail".into(), false)
                } else {
                    (0.5, "could not parse evaluation".into(), true)
                }
            }
        }
    }

    /// Aggregate outcomes into a profile.
    async fn synthesize(
        &self,
        client: &ChatClient,
        model_id: &str,
        outcomes: &[(InterviewTest, TestOutcome)],
    ) -> ModelProfile {
        // Weighted mean per category.
        let mut sums: HashMap<TestCategory, (f64, f64)> = HashMap::new();
        for (test, outcome) in outcomes {
            let slot = sums.entry(test.category).or_insert((0.0, 0.0));
            slot.0 += outcome.score * test.weight;
            slot.1 += test.weight;
        }
        let mean = |category: TestCategory| -> f64 {
            sums.get(&category)
                .map(|(total, weight)| if *weight > 0.0 { total / weight } else { 0.5 })
                .unwrap_or(0.5)
        };

        let instruction = mean(TestCategory::Instruction);
        let context = mean(TestCategory::Context);
        let capabilities = CapabilityScores {
            tool_calling_accuracy: mean(TestCategory::ToolCalling),
            instruction_following: instruction,
            context_utilization: context,
            code_generation: mean(TestCategory::Code),
            reasoning_depth: mean(TestCategory::Reasoning),
            hallucination_resistance: mean(TestCategory::Hallucination),
            // Derived axes: no dedicated tests, scaled from their parents.
            structured_output: instruction * 0.9,
            long_context_handling: context * 0.9,
        };

        let synthesis = self
            .qualitative_synthesis(client, model_id, outcomes, &capabilities)
            .await;

        let guardrails = derive_guardrails(&capabilities, outcomes);

        let mut profile = ModelProfile::new(model_id);
        profile.profile_version = PROFILE_VERSION.into();
        profile.interviewer_model = self.interviewer_model.clone();
        profile.capabilities = capabilities;
        profile.strengths = synthesis.strengths;
        profile.weaknesses = synthesis.weaknesses;
        profile.optimal_tasks = synthesis.optimal_tasks;
        profile.avoid_tasks = synthesis.avoid_tasks;
        profile.interview_notes = synthesis.notes;
        profile.guardrails = guardrails;
        profile
    }

    async fn qualitative_synthesis(
        &self,
        client: &ChatClient,
        model_id: &str,
        outcomes: &[(InterviewTest, TestOutcome)],
        capabilities: &CapabilityScores,
    ) -> Synthesis {
        let mut summary_lines: Vec<String> = outcomes
            .iter()
            .map(|(test, outcome)| {
                format!(
                    "- {:?}/{}: {} ({:.2}) - {}",
                    test.category,
                    test.name,
                    if outcome.passed { "PASS" } else { "FAIL" },
                    outcome.score,
                    outcome.notes
                )
            })
            .collect();
        summary_lines.truncate(20);

        let prompt = format!(
            "You are synthesizing interview results for an AI model evaluation.\n\n\
             MODEL: {model_id}\n\n\
             CAPABILITY SCORES:\n\
             - Tool Calling: {:.2}\n- Instruction Following: {:.2}\n\
             - Context Utilization: {:.2}\n- Code Generation: {:.2}\n\
             - Reasoning: {:.2}\n- Hallucination Resistance: {:.2}\n\n\
             TEST RESULTS:\n{}\n\n\
             Respond with JSON only:\n\
             {{\"strengths\": [...], \"weaknesses\": [...], \"optimal_tasks\": [...], \
             \"avoid_tasks\": [...], \"notes\": \"...\"}}",
            capabilities.tool_calling_accuracy,
            capabilities.instruction_following,
            capabilities.context_utilization,
            capabilities.code_generation,
            capabilities.reasoning_depth,
            capabilities.hallucination_resistance,
            summary_lines.join("\n"),
        );

        let options = ChatOptions {
            max_tokens: Some(800),
            temperature: Some(0.3),
            ..Default::default()
        };
        let response = client
            .chat(
                &[ChatMessage::user(prompt)],
                &self.interviewer_model,
                &options,
            )
            .await;

        if response.finish_reason != "error"
            && let Some(json) = extract_json(&response.content)
        {
            let list = |key: &str| -> Vec<String> {
                json.get(key)
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            return Synthesis {
                strengths: list("strengths"),
                weaknesses: list("weaknesses"),
                optimal_tasks: list("optimal_tasks"),
                avoid_tasks: list("avoid_tasks"),
                notes: json
                    .get("notes")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            };
        }

        warn!(model = model_id, "interviewer synthesis failed, using score-derived fallback");
        fallback_synthesis(capabilities)
    }
}

impl Default for Interviewer {
    fn default() -> Self {
        Self::new()
    }
}

struct Synthesis {
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    optimal_tasks: Vec<String>,
    avoid_tasks: Vec<String>,
    notes: String,
}

/// Deterministic synthesis from score thresholds.
fn fallback_synthesis(capabilities: &CapabilityScores) -> Synthesis {
    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    let mut optimal_tasks = Vec::new();
    let mut avoid_tasks = Vec::new();

    if capabilities.tool_calling_accuracy >= 0.8 {
        strengths.push("reliable tool calling".into());
        optimal_tasks.push("automated tasks".into());
    } else if capabilities.tool_calling_accuracy < 0.6 {
        weaknesses.push("inconsistent tool calling".into());
        avoid_tasks.push("complex tool workflows".into());
    }

    if capabilities.instruction_following >= 0.8 {
        strengths.push("strong instruction following".into());
    } else if capabilities.instruction_following < 0.6 {
        weaknesses.push("may deviate from instructions".into());
    }

    if capabilities.code_generation >= 0.8 {
        strengths.push("quality code generation".into());
        optimal_tasks.push("code".into());
    } else if capabilities.code_generation < 0.6 {
        weaknesses.push("code quality issues".into());
        avoid_tasks.push("complex coding".into());
    }

    if capabilities.reasoning_depth >= 0.8 {
        strengths.push("strong reasoning".into());
        optimal_tasks.push("analysis".into());
    } else if capabilities.reasoning_depth < 0.6 {
        weaknesses.push("limited reasoning depth".into());
        avoid_tasks.push("complex analysis".into());
    }

    if capabilities.hallucination_resistance >= 0.8 {
        strengths.push("factual accuracy".into());
        optimal_tasks.push("research".into());
    } else if capabilities.hallucination_resistance < 0.6 {
        weaknesses.push("prone to hallucination".into());
        avoid_tasks.push("fact-critical tasks".into());
    }

    Synthesis {
        strengths,
        weaknesses,
        optimal_tasks,
        avoid_tasks,
        notes: "profile synthesized from capability scores".into(),
    }
}

/// Derive runtime guardrails from the scores and observed failures.
fn derive_guardrails(
    capabilities: &CapabilityScores,
    outcomes: &[(InterviewTest, TestOutcome)],
) -> Guardrails {
    let tool_failures = outcomes
        .iter()
        .filter(|(test, outcome)| {
            test.category == TestCategory::ToolCalling && !outcome.passed
        })
        .count();
    let format_failures = outcomes
        .iter()
        .filter(|(test, outcome)| {
            matches!(test.validation, Validation::JsonValid) && !outcome.passed
        })
        .count();

    Guardrails {
        needs_structured_output: capabilities.structured_output < 0.7
            || format_failures > 0,
        needs_explicit_format: capabilities.instruction_following < 0.8,
        needs_tool_examples: capabilities.tool_calling_accuracy < 0.8
            || tool_failures > 1,
        max_reliable_context: if capabilities.long_context_handling >= 0.7 {
            128_000
        } else {
            64_000
        },
        recommended_temperature: if capabilities.hallucination_resistance < 0.7 {
            0.5
        } else {
            0.7
        },
        tool_call_retry_limit: if capabilities.tool_calling_accuracy < 0.7 {
            2
        } else {
            3
        },
        needs_step_by_step: capabilities.reasoning_depth < 0.7,
        avoid_parallel_tools: capabilities.tool_calling_accuracy < 0.6,
    }
}

/// Extract the first JSON object or array from free text.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let outer = Regex::new(r"(?s)[\[{].*[\]}]").ok()?;
    if let Some(m) = outer.find(text)
        && let Ok(value) = serde_json::from_str(m.as_str())
    {
        return Some(value);
    }
    // Retry with the innermost braces when the greedy span failed.
    let inner = Regex::new(r"\{[^{}]*\}").ok()?;
    for m in inner.find_iter(text) {
        if let Ok(value) = serde_json::from_str(m.as_str()) {
            return Some(value);
        }
    }
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hivegate_llm::types::{
        WireChoice, WireFunction, WireMessage, WireRequest, WireResponse,
        WireToolCall,
    };
    use hivegate_llm::{Provider, ProviderError};
    use std::sync::Arc;

    /// Candidate answers by canned rules; the interviewer model answers
    /// evaluator/synthesis prompts with fixed JSON.
    struct InterviewSim;

    fn text_response(text: &str) -> WireResponse {
        WireResponse {
            id: "r".into(),
            choices: vec![WireChoice {
                index: 0,
                message: WireMessage {
                    role: "assistant".into(),
                    content: Some(text.into()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".into()),
            }],
            usage: None,
            model: "sim".into(),
        }
    }

    fn tool_response(name: &str, args: &str) -> WireResponse {
        WireResponse {
            id: "r".into(),
            choices: vec![WireChoice {
                index: 0,
                message: WireMessage {
                    role: "assistant".into(),
                    content: None,
                    tool_calls: Some(vec![WireToolCall {
                        id: "c1".into(),
                        call_type: "function".into(),
                        function: WireFunction {
                            name: name.into(),
                            arguments: serde_json::json!(args),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
            model: "sim".into(),
        }
    }

    #[async_trait]
    impl Provider for InterviewSim {
        fn name(&self) -> &str {
            "sim"
        }
        async fn complete(
            &self,
            request: &WireRequest,
        ) -> Result<WireResponse, ProviderError> {
            let prompt = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();

            if request.model == "interviewer" {
                if prompt.contains("synthesizing interview results") {
                    return Ok(text_response(
                        r#"{"strengths": ["solid reasoning"], "weaknesses": [], "optimal_tasks": ["analysis"], "avoid_tasks": [], "notes": "capable model"}"#,
                    ));
                }
                return Ok(text_response(
                    r#"{"score": 0.9, "passed": true, "notes": "good answer"}"#,
                ));
            }

            // Candidate model behavior.
            if prompt.contains("weather in London") {
                return Ok(tool_response("get_weather", r#"{"city": "London"}"#));
            }
            if prompt.contains("calculator") {
                return Ok(tool_response("calculate", r#"{"expression": "37 * 43"}"#));
            }
            if prompt.contains("hello in French") {
                return Ok(text_response("Bonjour!"));
            }
            if prompt.contains("exactly the word OK") {
                return Ok(text_response("OK"));
            }
            if prompt.contains("JSON object with keys") {
                return Ok(text_response(r#"{"name": "Ada", "age": 36}"#));
            }
            if prompt.contains("without using the word") {
                return Ok(text_response("The sky is a brilliant azure expanse."));
            }
            if prompt.contains("codename") {
                return Ok(text_response("The codename is HELIOTROPE."));
            }
            if prompt.contains("days before the deadline") {
                return Ok(text_response("The review happens 3 days before."));
            }
            if prompt.contains("is_palindrome") {
                return Ok(text_response(
                    "def is_palindrome(s):\n    s = s.lower()\n    return s == s[::-1]",
                ));
            }
            if prompt.contains("train leaves") {
                return Ok(text_response("130"));
            }
            if prompt.contains("widgets") {
                return Ok(text_response("No, because no gadget is cheap."));
            }
            Ok(text_response("I don't know; that appears to be fictional."))
        }
    }

    fn sim_client() -> ChatClient {
        ChatClient::new(Arc::new(InterviewSim))
    }

    fn interviewer() -> Interviewer {
        Interviewer::new().with_interviewer_model("interviewer")
    }

    #[tokio::test]
    async fn full_interview_scores_well_for_good_model() {
        let client = sim_client();
        let profile = interviewer().interview(&client, "candidate").await;

        assert!(!profile.quick);
        assert_eq!(profile.interviewer_model, "interviewer");
        assert!(profile.capabilities.tool_calling_accuracy > 0.8);
        assert!(profile.capabilities.instruction_following > 0.8);
        assert!(profile.capabilities.reasoning_depth > 0.8);
        assert!(profile.overall_score() > 0.7);
        assert_eq!(profile.strengths, vec!["solid reasoning"]);
    }

    #[tokio::test]
    async fn derived_axes_scaled_from_parents() {
        let client = sim_client();
        let profile = interviewer().interview(&client, "candidate").await;
        let expected = profile.capabilities.instruction_following * 0.9;
        assert!((profile.capabilities.structured_output - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quick_assessment_flagged() {
        let client = sim_client();
        let profile = interviewer().quick_assessment(&client, "candidate").await;
        assert!(profile.quick);
        assert!(profile.overall_score() > 0.5);
    }

    #[tokio::test]
    async fn guardrails_follow_scores() {
        let strong = CapabilityScores {
            tool_calling_accuracy: 0.9,
            instruction_following: 0.9,
            context_utilization: 0.9,
            code_generation: 0.9,
            reasoning_depth: 0.9,
            hallucination_resistance: 0.9,
            structured_output: 0.81,
            long_context_handling: 0.81,
        };
        let guardrails = derive_guardrails(&strong, &[]);
        assert!(!guardrails.needs_structured_output);
        assert_eq!(guardrails.max_reliable_context, 128_000);
        assert_eq!(guardrails.tool_call_retry_limit, 3);
        assert!(!guardrails.avoid_parallel_tools);

        let weak = CapabilityScores {
            tool_calling_accuracy: 0.5,
            instruction_following: 0.5,
            context_utilization: 0.5,
            code_generation: 0.5,
            reasoning_depth: 0.5,
            hallucination_resistance: 0.5,
            structured_output: 0.45,
            long_context_handling: 0.45,
        };
        let guardrails = derive_guardrails(&weak, &[]);
        assert!(guardrails.needs_structured_output);
        assert_eq!(guardrails.max_reliable_context, 64_000);
        assert_eq!(guardrails.tool_call_retry_limit, 2);
        assert!(guardrails.avoid_parallel_tools);
        assert!(guardrails.needs_step_by_step);
    }

    #[test]
    fn fallback_synthesis_thresholds() {
        let weak = CapabilityScores {
            tool_calling_accuracy: 0.4,
            hallucination_resistance: 0.9,
            ..Default::default()
        };
        let synthesis = fallback_synthesis(&weak);
        assert!(synthesis
            .weaknesses
            .iter()
            .any(|w| w.contains("tool calling")));
        assert!(synthesis.strengths.iter().any(|s| s.contains("factual")));
    }

    #[test]
    fn extract_json_variants() {
        assert!(extract_json(r#"{"a": 1}"#).is_some());
        assert!(extract_json("prefix {\"a\": 1} suffix").is_some());
        assert_eq!(
            extract_json("Sure! {\"score\": 0.7, \"passed\": true}").unwrap()["score"],
            0.7
        );
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn extract_json_recovers_from_greedy_failure() {
        // Greedy span "{ not json } ... {\"ok\": true}" is invalid; the
        // innermost fallback finds the valid object.
        let text = "{ not json } then {\"ok\": true}";
        let json = extract_json(text).unwrap();
        assert_eq!(json["ok"], true);
    }
}
