//! Predefined decomposition patterns.
//!
//! Each pattern hard-codes a small task DAG with instruction templates
//! filled from the objective: research (search → analyze → summarize),
//! code (design → implement → review), review (analyze → critique →
//! suggest), brainstorm (generate → evaluate → develop).

use super::orchestrator::SwarmTask;

/// Names of the available patterns.
pub fn pattern_names() -> Vec<&'static str> {
    vec!["research", "code", "review", "brainstorm"]
}

/// Generate the task DAG for a named pattern; `None` for unknown names.
pub fn tasks_for_pattern(pattern: &str, objective: &str, context: &str) -> Option<Vec<SwarmTask>> {
    let context_note = if context.is_empty() {
        String::new()
    } else {
        format!("\n\nAdditional context: {context}")
    };

    let tasks = match pattern {
        "research" => vec![
            SwarmTask::new(
                "search",
                "Search for relevant information",
                format!(
                    "Search for information related to:\n{objective}\n\n\
                     Find key facts, recent developments, multiple perspectives, \
                     and credible sources.{context_note}\n\n\
                     Return a list of relevant findings with source references."
                ),
                &[],
            )
            .with_metadata("specialization", "research"),
            SwarmTask::new(
                "analyze",
                "Analyze and organize findings",
                "Analyze the search results: identify key themes, note \
                 contradictions or gaps, organize by relevance, and highlight \
                 the most important points. Create a structured analysis."
                    .to_string(),
                &["search"],
            )
            .with_metadata("specialization", "review"),
            SwarmTask::new(
                "summarize",
                "Create comprehensive summary",
                format!(
                    "Create a comprehensive summary addressing:\n{objective}\n\n\
                     Include an executive summary, key findings, supporting \
                     details, conclusions, and recommendations if applicable."
                ),
                &["analyze"],
            ),
        ],
        "code" => vec![
            SwarmTask::new(
                "design",
                "Design the implementation",
                format!(
                    "Design the implementation for:\n{objective}\n\n\
                     Provide an architecture overview, key components, data \
                     structures, API design if applicable, and edge cases to \
                     consider.{context_note}"
                ),
                &[],
            ),
            SwarmTask::new(
                "implement",
                "Write the code",
                "Based on the design, implement the code. Requirements: clean \
                 readable code, proper error handling, comments for complex \
                 logic. Return complete, working code."
                    .to_string(),
                &["design"],
            )
            .with_metadata("specialization", "code"),
            SwarmTask::new(
                "review",
                "Review and improve",
                "Review the implementation for bugs, performance issues, \
                 security concerns, style consistency, and missing edge cases. \
                 Provide the issues found, suggested fixes, and an improved \
                 version if needed."
                    .to_string(),
                &["implement"],
            )
            .with_metadata("specialization", "review"),
        ],
        "review" => vec![
            SwarmTask::new(
                "analyze",
                "Analyze the content",
                format!(
                    "Analyze:\n{objective}{context_note}\n\n\
                     Consider structure and organization, clarity, accuracy and \
                     completeness, audience fit, and overall quality. Provide a \
                     detailed analysis."
                ),
                &[],
            ),
            SwarmTask::new(
                "critique",
                "Identify issues and weaknesses",
                "Based on the analysis, identify errors or inaccuracies, \
                 unclear sections, missing information, and structural \
                 problems. Be constructive and specific."
                    .to_string(),
                &["analyze"],
            ),
            SwarmTask::new(
                "suggest",
                "Suggest improvements",
                "For each issue identified, provide a specific recommendation, \
                 an example of the improvement, and a priority. Make the \
                 suggestions actionable."
                    .to_string(),
                &["critique"],
            ),
        ],
        "brainstorm" => vec![
            SwarmTask::new(
                "generate",
                "Generate diverse ideas",
                format!(
                    "Brainstorm ideas for:\n{objective}{context_note}\n\n\
                     Generate at least 10 diverse ideas, conventional and \
                     unconventional. Do not filter at this stage. List each \
                     idea with a brief description."
                ),
                &[],
            )
            .with_metadata("specialization", "creative"),
            SwarmTask::new(
                "evaluate",
                "Evaluate and rank ideas",
                "Rate each generated idea on feasibility, impact, and \
                 originality (1-5 each). Identify the top 3 most promising \
                 with reasoning."
                    .to_string(),
                &["generate"],
            ),
            SwarmTask::new(
                "develop",
                "Develop top ideas",
                "For the top 3 ideas, provide a detailed description, \
                 implementation steps, required resources, potential \
                 challenges, and success metrics."
                    .to_string(),
                &["evaluate"],
            ),
        ],
        _ => return None,
    };
    Some(tasks)
}

/// Pick a pattern from a task label.
pub fn pattern_for_label(label: &str) -> &'static str {
    match label {
        "research" | "complex_analysis" => "research",
        "code" | "implement" | "debug" | "refactor" => "code",
        "brainstorm" | "creative" => "brainstorm",
        _ => "research",
    }
}
