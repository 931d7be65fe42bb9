//! SSE framing and tool-call accumulation for streamed completions.
//!
//! Streamed tool calls arrive fragmented: the first delta for an index
//! carries the id and name, later deltas append argument fragments. The
//! [`SseAccumulator`] reassembles them by index and emits each call as a
//! single [`StreamEvent::ToolCall`] before the terminal
//! [`StreamEvent::Done`].

use std::collections::BTreeMap;

use hivegate_types::provider::{StreamEvent, ToolInvocation, Usage};

use crate::error::{ProviderError, Result};
use crate::types::{StreamDelta, WireUsage};

/// A tool call under assembly.
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental parser for `data:` lines of a streamed completion.
pub struct SseAccumulator {
    partial_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
}

impl SseAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            partial_calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
            done: false,
        }
    }

    /// Feed one line; returns the events it produced.
    ///
    /// Non-`data:` lines (comments, blank keepalives) produce nothing.
    /// The `[DONE]` sentinel flushes assembled tool calls and emits the
    /// terminal event.
    pub fn push_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(self.flush_done());
        }

        let delta: StreamDelta = serde_json::from_str(data).map_err(|e| {
            ProviderError::InvalidResponse(format!("bad stream delta: {e}"))
        })?;

        let mut events = Vec::new();

        if let Some(usage) = delta.usage {
            self.usage = Some(convert_usage(usage));
        }

        for choice in delta.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                events.push(StreamEvent::Text(text));
            }
            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let partial = self.partial_calls.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    partial.id = id;
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name {
                        partial.name = name;
                    }
                    if let Some(fragment) = function.arguments {
                        partial.arguments.push_str(&fragment);
                    }
                }
            }
        }

        Ok(events)
    }

    /// Flush at end of stream even when the `[DONE]` sentinel never came.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done { Vec::new() } else { self.flush_done() }
    }

    fn flush_done(&mut self) -> Vec<StreamEvent> {
        self.done = true;
        let mut events = Vec::new();
        for (_, partial) in std::mem::take(&mut self.partial_calls) {
            let raw = serde_json::Value::String(partial.arguments);
            events.push(StreamEvent::ToolCall(ToolInvocation {
                id: partial.id,
                name: partial.name,
                arguments: ToolInvocation::parse_arguments(&raw),
            }));
        }
        events.push(StreamEvent::Done {
            finish_reason: self.finish_reason.take(),
            usage: self.usage.take(),
        });
        events
    }
}

impl Default for SseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_usage(u: WireUsage) -> Usage {
    Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(acc: &mut SseAccumulator, lines: &[&str]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in lines {
            events.extend(acc.push_line(line).unwrap());
        }
        events
    }

    #[test]
    fn text_deltas_stream_through() {
        let mut acc = SseAccumulator::new();
        let events = drain(
            &mut acc,
            &[
                r#"data: {"choices": [{"delta": {"content": "Hel"}}]}"#,
                r#"data: {"choices": [{"delta": {"content": "lo"}}]}"#,
                r#"data: {"choices": [{"delta": {}, "finish_reason": "stop"}]}"#,
                "data: [DONE]",
            ],
        );
        assert_eq!(events[0], StreamEvent::Text("Hel".into()));
        assert_eq!(events[1], StreamEvent::Text("lo".into()));
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::Done { finish_reason: Some(r), .. } if r == "stop"
        ));
    }

    #[test]
    fn tool_call_reassembled_across_deltas() {
        let mut acc = SseAccumulator::new();
        let events = drain(
            &mut acc,
            &[
                r#"data: {"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c1", "function": {"name": "exec", "arguments": "{\"comm"}}]}}]}"#,
                r#"data: {"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "and\": \"ls\"}"}}]}}]}"#,
                r#"data: {"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}"#,
                "data: [DONE]",
            ],
        );
        // Tool call must come before Done.
        let call_pos = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ToolCall(_)))
            .unwrap();
        let done_pos = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Done { .. }))
            .unwrap();
        assert!(call_pos < done_pos);

        if let StreamEvent::ToolCall(call) = &events[call_pos] {
            assert_eq!(call.id, "c1");
            assert_eq!(call.name, "exec");
            assert_eq!(call.arguments["command"], "ls");
        } else {
            panic!("expected tool call");
        }
    }

    #[test]
    fn two_tool_calls_by_index() {
        let mut acc = SseAccumulator::new();
        let events = drain(
            &mut acc,
            &[
                r#"data: {"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "a", "function": {"name": "one", "arguments": "{}"}}, {"index": 1, "id": "b", "function": {"name": "two", "arguments": "{}"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(c) => Some(c.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec!["a", "b"]);
    }

    #[test]
    fn malformed_arguments_wrapped_as_raw() {
        let mut acc = SseAccumulator::new();
        let events = drain(
            &mut acc,
            &[
                r#"data: {"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c", "function": {"name": "exec", "arguments": "{broken"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let call = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCall(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.arguments["raw"], "{broken");
    }

    #[test]
    fn usage_carried_into_done() {
        let mut acc = SseAccumulator::new();
        let events = drain(
            &mut acc,
            &[
                r#"data: {"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}}"#,
                "data: [DONE]",
            ],
        );
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::Done { usage: Some(u), .. } if u.total_tokens == 12
        ));
    }

    #[test]
    fn non_data_lines_ignored() {
        let mut acc = SseAccumulator::new();
        assert!(acc.push_line(": keepalive").unwrap().is_empty());
        assert!(acc.push_line("").unwrap().is_empty());
        assert!(acc.push_line("event: ping").unwrap().is_empty());
    }

    #[test]
    fn finish_without_done_sentinel_flushes() {
        let mut acc = SseAccumulator::new();
        acc.push_line(r#"data: {"choices": [{"delta": {"content": "x"}}]}"#)
            .unwrap();
        let events = acc.finish();
        assert!(matches!(events.last().unwrap(), StreamEvent::Done { .. }));
        // Second finish is a no-op.
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn bad_json_is_an_error() {
        let mut acc = SseAccumulator::new();
        assert!(acc.push_line("data: {nope").is_err());
    }
}
