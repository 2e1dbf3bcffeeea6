//! Turn assembly: folding the flat event log into a conversational transcript
//!
//! [`assemble`] is a pure function from an ordered event sequence to an
//! ordered sequence of [`Turn`]s. It keeps no state between calls; turns and
//! steps are rebuilt wholesale on every pass. Recomputation is cheap relative
//! to event volume and sidesteps incremental-update bugs entirely.
//!
//! ## Error Handling
//!
//! The assembler never fails. Malformed or missing payload fields degrade to
//! empty-string/"unknown" placeholders, unknown tools and status values are
//! ignored, and unmatched tool results are dropped. Any well-typed event
//! sequence renders *something*.

use std::collections::HashMap;

use crate::types::{Event, EventType, Step, StepType, Turn};

/// Maximum characters of a tool result kept as step detail.
const DETAIL_MAX_CHARS: usize = 600;

/// Turn id used when the log does not begin with a user message.
const INITIAL_TURN_ID: &str = "turn-initial";

/// Fold an ordered, deduplicated event sequence into turns.
///
/// `live` reflects whether the push channel is still open: the final turn of
/// a live log is forced open (more events may arrive), the final turn of a
/// closed log is forced shut.
///
/// Deterministic and idempotent: identical input always yields identical
/// output.
pub fn assemble(events: &[Event], live: bool) -> Vec<Turn> {
    let mut state = Assembly::default();

    for event in events {
        match event.event_type {
            EventType::UserMessage => state.start_turn(event),
            EventType::AgentMessage => state.on_agent_message(event),
            EventType::ToolCall => state.on_tool_call(event),
            EventType::ToolResult => state.on_tool_result(event),
            EventType::StatusChange => state.on_status_change(event),
            EventType::Error => state.on_error(event),
            // Keepalives are filtered at the channel boundary; anything the
            // assembler does not recognize produces no step.
            EventType::Keepalive | EventType::Unknown => {}
        }
    }

    let mut turns = state.turns;

    // Final-turn liveness: an open channel keeps the last turn working unless
    // it already concluded visibly; a closed log cannot have an open turn.
    if let Some(last) = turns.last_mut() {
        if live {
            let has_error_step = last.steps.iter().any(|s| s.step_type == StepType::Error);
            if last.answer.is_none() && !has_error_step && !last.was_interrupted {
                last.is_working = true;
            }
        } else {
            last.is_working = false;
        }
    }

    // A turn can conclude with the agent simply emitting final prose and no
    // explicit complete call; treat the trailing commentary as the answer.
    for turn in &mut turns {
        promote_trailing_thinking(turn);
    }

    turns
}

/// Fold state: the turns built so far plus the cross-event correlation table
/// mapping a tool call id to the step awaiting its result.
#[derive(Default)]
struct Assembly {
    turns: Vec<Turn>,
    /// Whether the last turn still accepts events. A closed turn stays closed
    /// until the next user message starts a fresh one.
    open: bool,
    /// call id -> (turn index, step index)
    calls: HashMap<String, (usize, usize)>,
}

impl Assembly {
    /// Start a new turn seeded from a user message, closing any open one.
    fn start_turn(&mut self, event: &Event) {
        self.close_current();
        self.turns.push(Turn {
            id: format!("turn-{}", event.id),
            user_message: Some(text_field(&event.data, "content")),
            user_message_ts: event.timestamp,
            steps: Vec::new(),
            answer: None,
            answer_ts: None,
            is_working: true,
            was_interrupted: false,
            had_error: false,
        });
        self.open = true;
    }

    /// Pre-existing logs may not begin with a user message; open an "initial"
    /// turn so those events are never dropped. Returns whether the last turn
    /// accepts events.
    fn ensure_open(&mut self) -> bool {
        if self.turns.is_empty() {
            self.turns.push(Turn {
                id: INITIAL_TURN_ID.to_string(),
                user_message: None,
                user_message_ts: None,
                steps: Vec::new(),
                answer: None,
                answer_ts: None,
                is_working: true,
                was_interrupted: false,
                had_error: false,
            });
            self.open = true;
        }
        // Once a terminal condition is recorded nothing more is appended to
        // that turn; the next user message starts a new one.
        self.open
    }

    /// The open turn, if any.
    fn current(&mut self) -> Option<&mut Turn> {
        if self.ensure_open() {
            self.turns.last_mut()
        } else {
            None
        }
    }

    fn close_current(&mut self) {
        if self.open {
            if let Some(turn) = self.turns.last_mut() {
                turn.is_working = false;
            }
            self.open = false;
        }
    }

    fn on_agent_message(&mut self, event: &Event) {
        let content = text_field(&event.data, "content");
        if content.is_empty() {
            return;
        }
        self.push_step(Step {
            id: event.id,
            step_type: StepType::Thinking,
            timestamp: event.timestamp,
            label: content,
            detail: None,
            expandable: false,
        });
    }

    fn on_tool_call(&mut self, event: &Event) {
        let tool = text_field(&event.data, "tool");
        let input = event.data.get("input").cloned().unwrap_or_default();

        if tool == "complete" {
            // The sole explicit "turn finished successfully" signal.
            let answer = match input.get("summary").and_then(|v| v.as_str()) {
                Some(summary) => summary.to_string(),
                None if input.is_null() => String::new(),
                None => input.to_string(),
            };
            let ts = event.timestamp;
            if let Some(turn) = self.current() {
                turn.answer = Some(answer);
                turn.answer_ts = ts;
            }
            self.close_current();
            return;
        }

        let Some(step) = tool_step(event, &tool, &input) else {
            // Unknown tool: forward compatible, no step.
            return;
        };

        let call_id = event
            .data
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(slot) = self.push_step(step) {
            if let Some(call_id) = call_id {
                self.calls.insert(call_id, slot);
            }
        }
    }

    fn on_tool_result(&mut self, event: &Event) {
        let Some(call_id) = event.data.get("id").and_then(|v| v.as_str()) else {
            return;
        };
        // Unmatched results are silently dropped.
        let Some(&(turn_idx, step_idx)) = self.calls.get(call_id) else {
            return;
        };
        let Some(result) = event.data.get("result") else {
            return;
        };
        let result = match result.as_str() {
            Some(s) => s.to_string(),
            None => result.to_string(),
        };
        if let Some(step) = self
            .turns
            .get_mut(turn_idx)
            .and_then(|t| t.steps.get_mut(step_idx))
        {
            step.detail = Some(truncate_detail(&result));
        }
    }

    fn on_status_change(&mut self, event: &Event) {
        let status = text_field(&event.data, "status");
        match status.as_str() {
            "orchestrator_completed" | "completed" => {
                // Success with no explicit answer required.
                self.close_current();
            }
            "interrupted" | "interrupt_requested" => {
                if let Some(turn) = self.current() {
                    turn.was_interrupted = true;
                }
                self.close_current();
            }
            "starting" | "cloning_repo" | "running" => {
                let label = match status.as_str() {
                    "starting" => "Starting agent",
                    "cloning_repo" => "Cloning repository",
                    _ => "Running",
                };
                self.push_step(Step {
                    id: event.id,
                    step_type: StepType::Status,
                    timestamp: event.timestamp,
                    label: label.to_string(),
                    detail: None,
                    expandable: false,
                });
            }
            _ => {}
        }
    }

    fn on_error(&mut self, event: &Event) {
        let message = match event.data.get("message").and_then(|v| v.as_str()) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => "Unknown error".to_string(),
        };
        let ts = event.timestamp;
        let id = event.id;
        if let Some(turn) = self.current() {
            turn.steps.push(Step {
                id,
                step_type: StepType::Error,
                timestamp: ts,
                label: message,
                detail: None,
                expandable: false,
            });
            turn.had_error = true;
        }
        self.close_current();
    }

    /// Append a step to the open turn, returning its slot for correlation.
    fn push_step(&mut self, step: Step) -> Option<(usize, usize)> {
        if !self.ensure_open() {
            return None;
        }
        let turn_idx = self.turns.len() - 1;
        let turn = &mut self.turns[turn_idx];
        turn.steps.push(step);
        Some((turn_idx, turn.steps.len() - 1))
    }
}

/// Build the typed step for a known tool call, or `None` for unknown tools.
fn tool_step(event: &Event, tool: &str, input: &serde_json::Value) -> Option<Step> {
    let path = || text_field_or(input, "path", "unknown");
    let chars = |field: &str| {
        input
            .get(field)
            .and_then(|v| v.as_str())
            .map(|s| s.chars().count())
            .unwrap_or(0)
    };

    let (step_type, label, detail) = match tool {
        "read_file" => (StepType::FileRead, format!("Reading {}", path()), None),
        "write_file" => (
            StepType::FileWrite,
            format!("Writing {}", path()),
            Some(format!("{} characters written", chars("content"))),
        ),
        "create_file" => (
            StepType::FileCreate,
            format!("Creating {}", path()),
            Some(format!("{} characters", chars("content"))),
        ),
        "delete_file" => (StepType::FileDelete, format!("Deleting {}", path()), None),
        "list_directory" => (StepType::Browse, format!("Listing {}", path()), None),
        "run_command" => (
            StepType::Command,
            format!("Running: {}", text_field_or(input, "command", "unknown")),
            None,
        ),
        "run_implementer" | "run_verifier" => {
            let label = if tool == "run_implementer" {
                "Implementer sub-agent"
            } else {
                "Verifier sub-agent"
            };
            let task = input.get("task").and_then(|v| v.as_str());
            (
                StepType::SubAgent,
                label.to_string(),
                task.map(str::to_string),
            )
        }
        "create_branch" => (
            StepType::Github,
            format!(
                "Creating branch {}",
                text_field_or(input, "branch_name", "unknown")
            ),
            None,
        ),
        "commit_and_push" => (
            StepType::Github,
            format!("Committing: {}", text_field_or(input, "message", "")),
            None,
        ),
        "create_pr" => (
            StepType::Github,
            format!("Creating PR: {}", text_field_or(input, "title", "")),
            None,
        ),
        _ => return None,
    };

    Some(Step {
        id: event.id,
        step_type,
        timestamp: event.timestamp,
        label,
        detail,
        expandable: true,
    })
}

/// Promote the last non-empty thinking step to the turn's answer when the
/// turn concluded without one. Interrupted, errored, and still-working turns
/// are excluded; at most one answer is ever promoted.
fn promote_trailing_thinking(turn: &mut Turn) {
    if turn.answer.is_some() || turn.is_working || turn.was_interrupted || turn.had_error {
        return;
    }
    if let Some(pos) = turn
        .steps
        .iter()
        .rposition(|s| s.step_type == StepType::Thinking && !s.label.is_empty())
    {
        let step = turn.steps.remove(pos);
        turn.answer_ts = step.timestamp;
        turn.answer = Some(step.label);
    }
}

fn text_field(data: &serde_json::Value, field: &str) -> String {
    data.get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn text_field_or(data: &serde_json::Value, field: &str, fallback: &str) -> String {
    match data.get(field).and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => fallback.to_string(),
    }
}

fn truncate_detail(s: &str) -> String {
    if s.chars().count() <= DETAIL_MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(DETAIL_MAX_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: i64, event_type: EventType, data: serde_json::Value) -> Event {
        Event {
            id,
            role: "agent".to_string(),
            event_type,
            data,
            timestamp: Some(
                chrono::DateTime::parse_from_rfc3339("2026-01-10T12:00:00Z")
                    .unwrap()
                    .with_timezone(&chrono::Utc),
            ),
        }
    }

    fn user(id: i64, content: &str) -> Event {
        let mut e = event(id, EventType::UserMessage, json!({"content": content}));
        e.role = "user".to_string();
        e
    }

    fn tool_call(id: i64, tool: &str, input: serde_json::Value) -> Event {
        event(id, EventType::ToolCall, json!({"tool": tool, "input": input}))
    }

    #[test]
    fn test_scenario_a_explicit_complete() {
        let events = vec![
            user(1, "add health endpoint"),
            tool_call(
                2,
                "write_file",
                json!({"path": "app.py", "content": "x".repeat(50)}),
            ),
            tool_call(3, "complete", json!({"summary": "Added /health"})),
        ];

        let turns = assemble(&events, false);
        assert_eq!(turns.len(), 1);
        let turn = &turns[0];
        assert_eq!(turn.user_message.as_deref(), Some("add health endpoint"));
        assert_eq!(turn.steps.len(), 1);
        assert_eq!(turn.steps[0].step_type, StepType::FileWrite);
        assert_eq!(turn.steps[0].label, "Writing app.py");
        assert_eq!(turn.steps[0].detail.as_deref(), Some("50 characters written"));
        assert_eq!(turn.answer.as_deref(), Some("Added /health"));
        assert!(!turn.is_working);
    }

    #[test]
    fn test_scenario_b_trailing_prose_promoted() {
        let events = vec![
            user(1, "add health endpoint"),
            tool_call(
                2,
                "write_file",
                json!({"path": "app.py", "content": "pass"}),
            ),
            event(
                3,
                EventType::AgentMessage,
                json!({"content": "Done, endpoint added."}),
            ),
        ];

        let turns = assemble(&events, false);
        assert_eq!(turns.len(), 1);
        let turn = &turns[0];
        assert_eq!(turn.answer.as_deref(), Some("Done, endpoint added."));
        // The promoted step is removed from the step list.
        assert!(turn
            .steps
            .iter()
            .all(|s| s.step_type != StepType::Thinking));
        assert!(!turn.is_working);
    }

    #[test]
    fn test_scenario_c_live_log_stays_working() {
        let events = vec![
            user(1, "add health endpoint"),
            tool_call(2, "run_command", json!({"command": "pytest"})),
        ];

        let turns = assemble(&events, true);
        assert_eq!(turns.len(), 1);
        assert!(turns[0].is_working);
        assert!(turns[0].answer.is_none());
    }

    #[test]
    fn test_scenario_e_interrupt_blocks_promotion() {
        let events = vec![
            user(1, "refactor everything"),
            event(
                2,
                EventType::AgentMessage,
                json!({"content": "Starting with the parser."}),
            ),
            event(
                3,
                EventType::StatusChange,
                json!({"status": "interrupted"}),
            ),
        ];

        let turns = assemble(&events, false);
        assert_eq!(turns.len(), 1);
        let turn = &turns[0];
        assert!(turn.was_interrupted);
        assert!(!turn.is_working);
        // No retroactive promotion for interrupted turns.
        assert!(turn.answer.is_none());
        assert_eq!(turn.steps.len(), 1);
        assert_eq!(turn.steps[0].step_type, StepType::Thinking);
    }

    #[test]
    fn test_idempotence() {
        let events = vec![
            user(1, "do things"),
            tool_call(2, "read_file", json!({"path": "src/main.rs"})),
            event(
                3,
                EventType::AgentMessage,
                json!({"content": "Looks fine."}),
            ),
        ];

        let first = assemble(&events, true);
        let second = assemble(&events, true);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_turn_boundaries() {
        let events = vec![
            event(1, EventType::StatusChange, json!({"status": "starting"})),
            user(2, "first"),
            event(3, EventType::AgentMessage, json!({"content": "ok"})),
            user(4, "second"),
            event(5, EventType::AgentMessage, json!({"content": "ok again"})),
        ];

        let turns = assemble(&events, false);
        // Leading initial turn plus one per user message.
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].id, "turn-initial");
        assert_eq!(turns[1].id, "turn-2");
        assert_eq!(turns[2].id, "turn-4");
        assert_eq!(turns[1].user_message.as_deref(), Some("first"));
        // Earlier turns are closed when a new one starts.
        assert!(!turns[0].is_working);
        assert!(!turns[1].is_working);
    }

    #[test]
    fn test_initial_turn_captures_leading_events() {
        let events = vec![
            event(1, EventType::StatusChange, json!({"status": "cloning_repo"})),
            event(2, EventType::AgentMessage, json!({"content": "cloning"})),
        ];

        let turns = assemble(&events, true);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].id, "turn-initial");
        assert_eq!(turns[0].steps[0].label, "Cloning repository");
    }

    #[test]
    fn test_tool_result_correlation_and_truncation() {
        let long_result = "y".repeat(700);
        let events = vec![
            user(1, "inspect"),
            event(
                2,
                EventType::ToolCall,
                json!({"tool": "read_file", "input": {"path": "big.txt"}, "id": "call_1"}),
            ),
            event(
                3,
                EventType::ToolResult,
                json!({"tool": "read_file", "id": "call_1", "result": long_result}),
            ),
        ];

        let turns = assemble(&events, true);
        let detail = turns[0].steps[0].detail.as_deref().unwrap();
        assert_eq!(detail.chars().count(), 601);
        assert!(detail.ends_with('…'));
    }

    #[test]
    fn test_unmatched_tool_result_dropped() {
        let events = vec![
            user(1, "inspect"),
            event(
                2,
                EventType::ToolResult,
                json!({"tool": "read_file", "id": "call_missing", "result": "gone"}),
            ),
        ];

        let turns = assemble(&events, false);
        assert_eq!(turns.len(), 1);
        assert!(turns[0].steps.is_empty());
    }

    #[test]
    fn test_unknown_tool_ignored() {
        let events = vec![
            user(1, "do it"),
            tool_call(2, "quantum_refactor", json!({"scope": "all"})),
        ];

        let turns = assemble(&events, false);
        assert!(turns[0].steps.is_empty());
    }

    #[test]
    fn test_error_closes_turn() {
        let events = vec![
            user(1, "break"),
            event(2, EventType::Error, json!({"message": "sandbox died"})),
            // Appended after a terminal condition: never reaches the turn.
            event(3, EventType::AgentMessage, json!({"content": "late"})),
        ];

        let turns = assemble(&events, true);
        let turn = &turns[0];
        assert!(turn.had_error);
        assert!(!turn.is_working);
        assert_eq!(turn.steps.len(), 1);
        assert_eq!(turn.steps[0].label, "sandbox died");
    }

    #[test]
    fn test_terminal_exclusivity() {
        // Error terminal even when the channel is still live.
        let events = vec![
            user(1, "break"),
            event(2, EventType::Error, json!({"message": "boom"})),
        ];
        for live in [false, true] {
            let turns = assemble(&events, live);
            for turn in &turns {
                assert!(!(turn.had_error && turn.is_working));
            }
        }
    }

    #[test]
    fn test_complete_without_summary_serializes_input() {
        let events = vec![
            user(1, "go"),
            tool_call(2, "complete", json!({"outcome": "merged"})),
        ];
        let turns = assemble(&events, false);
        assert_eq!(turns[0].answer.as_deref(), Some(r#"{"outcome":"merged"}"#));
    }

    #[test]
    fn test_github_and_sub_agent_labels() {
        let events = vec![
            user(1, "ship it"),
            tool_call(2, "create_branch", json!({"branch_name": "feature/x"})),
            tool_call(3, "commit_and_push", json!({"message": "add x"})),
            tool_call(4, "create_pr", json!({"title": "Add x"})),
            tool_call(5, "run_implementer", json!({"task": "wire the endpoint"})),
        ];

        let turns = assemble(&events, true);
        let steps = &turns[0].steps;
        assert_eq!(steps[0].label, "Creating branch feature/x");
        assert_eq!(steps[1].label, "Committing: add x");
        assert_eq!(steps[2].label, "Creating PR: Add x");
        assert_eq!(steps[3].label, "Implementer sub-agent");
        assert_eq!(steps[3].detail.as_deref(), Some("wire the endpoint"));
        assert_eq!(steps[3].step_type, StepType::SubAgent);
    }

    #[test]
    fn test_malformed_data_degrades_gracefully() {
        let events = vec![
            user(1, "go"),
            // No input at all.
            event(2, EventType::ToolCall, json!({"tool": "read_file"})),
            // Error with no message.
            event(3, EventType::Error, json!({})),
        ];

        let turns = assemble(&events, false);
        let turn = &turns[0];
        assert_eq!(turn.steps[0].label, "Reading unknown");
        assert_eq!(turn.steps[1].label, "Unknown error");
    }

    #[test]
    fn test_closed_log_forces_last_turn_shut() {
        let events = vec![
            user(1, "hang forever"),
            tool_call(2, "run_command", json!({"command": "sleep 1000"})),
        ];
        let turns = assemble(&events, false);
        assert!(!turns[0].is_working);
    }

    #[test]
    fn test_orchestrator_completed_closes_without_answer_requirement() {
        let events = vec![
            user(1, "go"),
            event(
                2,
                EventType::StatusChange,
                json!({"status": "orchestrator_completed"}),
            ),
        ];
        let turns = assemble(&events, false);
        assert!(!turns[0].is_working);
        assert!(!turns[0].had_error);
        assert!(!turns[0].was_interrupted);
    }
}
