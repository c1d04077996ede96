//! Telemetry span helpers, one pair per event: callers open a span with a
//! `*_start` helper and emit a paired event with the matching `*_stop`
//! helper, so stop fires exactly once per start along every code path.

use tracing::{info, info_span, Span};

pub fn agent_execution_start(agent: &str, session_id: &str, input_keys: &[String]) -> Span {
    let span = info_span!("agent_execution", agent, session_id, ?input_keys);
    let _enter = span.enter();
    info!(agent, session_id, ?input_keys, "agent_execution start");
    drop(_enter);
    span
}

pub fn agent_execution_stop(span: &Span, reason: &str, num_results: usize) {
    let _enter = span.enter();
    info!(reason, num_results, "agent_execution stop");
}

pub fn dag_planning_start(session_id: &str, completed_count: usize, total: usize) -> Span {
    let span = info_span!("dag_planning", session_id, completed_count, total);
    let _enter = span.enter();
    info!(session_id, completed_count, total, "dag_planning start");
    drop(_enter);
    span
}

pub fn dag_planning_stop(span: &Span, ready_from_dag: usize, planned: usize, status: &str) {
    let _enter = span.enter();
    info!(ready_from_dag, planned, status, "dag_planning stop");
}

pub fn stage_execution_start(session_id: &str, stage: &str) -> Span {
    let span = info_span!("stage_execution", session_id, stage);
    let _enter = span.enter();
    info!(session_id, stage, "stage_execution start");
    drop(_enter);
    span
}

pub fn stage_execution_stop(span: &Span, result_status: &str) {
    let _enter = span.enter();
    info!(result_status, "stage_execution stop");
}

pub fn llm_call_start(
    session_id: &str,
    stage: &str,
    model: &str,
    message_count: usize,
    tool_count: usize,
) -> Span {
    let span = info_span!("llm_call", session_id, stage, model, message_count, tool_count);
    let _enter = span.enter();
    info!(session_id, stage, model, message_count, tool_count, "llm_call start");
    drop(_enter);
    span
}

pub fn llm_call_stop(span: &Span, status: &str) {
    let _enter = span.enter();
    info!(status, "llm_call stop");
}

pub fn tool_execution_start(session_id: &str, stage: &str, tool_name: &str) -> Span {
    let span = info_span!("tool_execution", session_id, stage, tool_name);
    let _enter = span.enter();
    info!(session_id, stage, tool_name, "tool_execution start");
    drop(_enter);
    span
}

pub fn tool_execution_stop(span: &Span, status: &str) {
    let _enter = span.enter();
    info!(status, "tool_execution stop");
}
