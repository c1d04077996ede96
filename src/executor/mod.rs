//! DAG Executor — explicit state machine driving plan/dispatch/collect/replan
//! until every stage is completed or the session fails.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::assembly::assemble_initial_history;
use crate::dag::{Dag, StageNode};
use crate::error::AgentError;
use crate::llm::Provider;
use crate::memory::MemoryManager;
use crate::message::{Message, Part, Role};
use crate::processor::run_llm_processor;
use crate::session::{ExecutionContext, SessionState};
use crate::spec::AgentSpec;
use crate::stage::{AgentModule, ErrorPolicy, StageSpec};
use crate::telemetry;
use crate::tools::ToolCallContext;
use crate::tools::ToolRegistry;

/// Upper bound on `Retry`/`Restart` attempts for a single stage within one
/// session, enforced by the executor regardless of what a host's
/// `handle_error` requests.
const MAX_STAGE_RETRIES: u32 = 3;

/// States of the DAG Executor's driving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Initializing,
    Planning,
    Executing,
    Completed,
    Failed,
}

struct WorkerOutcome<S> {
    stage_name: String,
    outcome: Result<Value, AgentError>,
    updated_user_state: S,
}

async fn run_stage<S: Clone + Send + Sync + 'static>(
    stage: StageSpec,
    ctx: ExecutionContext<S>,
    provider: Arc<dyn Provider>,
    tool_registry: Arc<ToolRegistry>,
    mut local_state: S,
    max_tool_iterations: u32,
) -> WorkerOutcome<S> {
    ctx.agent_module
        .handle_stage_start(&ctx.stage_name, &mut local_state)
        .await;

    let span = telemetry::stage_execution_start(&ctx.session_id.to_string(), &ctx.stage_name);

    let prepared = match crate::stage::prepare_stage_input(
        &stage,
        &ctx.global_input,
        &ctx.dependency_results,
    ) {
        Ok(p) => p,
        Err(err) => {
            telemetry::stage_execution_stop(&span, "error");
            return WorkerOutcome {
                stage_name: ctx.stage_name,
                outcome: Err(err),
                updated_user_state: local_state,
            };
        }
    };

    let tool_ctx = ToolCallContext {
        memory_manager: ctx.memory_manager.clone(),
        session_id: ctx.session_id.to_string(),
        stage_name: ctx.stage_name.clone(),
    };

    let result = match &stage.llm_call {
        Some(call) => {
            let history = assemble_initial_history(&call.messages, &prepared);
            let llm_span = telemetry::llm_call_start(
                &ctx.session_id.to_string(),
                &ctx.stage_name,
                &call.model,
                history.len(),
                call.tools.len(),
            );
            let outcome = run_llm_processor(
                &call.model,
                &call.params,
                &call.tools,
                provider.as_ref(),
                tool_registry.as_ref(),
                history,
                ctx.agent_module.as_ref(),
                &mut local_state,
                &tool_ctx,
                max_tool_iterations,
            )
            .await;
            telemetry::llm_call_stop(&llm_span, if outcome.is_ok() { "ok" } else { "error" });
            outcome.map(|o| o.final_value)
        }
        // A stage without an LLMCall is a no-op pass-through of dependency
        // results.
        None => Ok(serde_json::to_value(&ctx.dependency_results).unwrap_or(Value::Null)),
    };

    if let Ok(value) = &result {
        ctx.agent_module
            .handle_stage_finish(&ctx.stage_name, value, &mut local_state)
            .await;
    }
    telemetry::stage_execution_stop(&span, if result.is_ok() { "ok" } else { "error" });

    WorkerOutcome {
        stage_name: ctx.stage_name,
        outcome: result,
        updated_user_state: local_state,
    }
}

/// Runs one agent session to completion, synchronously, and returns the
/// final results map. This drives the executor state machine
/// `initializing -> planning -> executing -> planning -> ... -> completed
/// | failed` as one in-process loop, since this crate's session-facing
/// async handle/channel machinery (`session::SessionHandle`) wraps this
/// same loop for the stateful case.
///
/// Equivalent to `run_sync_with_messages` with no incoming-message channel.
pub async fn run_sync<S: Clone + Send + Sync + 'static>(
    spec: &AgentSpec,
    input: HashMap<String, Value>,
    initial_user_state: S,
    provider: Arc<dyn Provider>,
    tool_registry: Arc<ToolRegistry>,
    agent_module: Arc<dyn AgentModule<S>>,
) -> Result<HashMap<String, Value>, AgentError> {
    run_sync_with_messages(
        spec,
        input,
        initial_user_state,
        provider,
        tool_registry,
        agent_module,
        None,
    )
    .await
}

/// Same as `run_sync`, but also drains `incoming_messages` at the top of
/// every planning cycle: each queued `Vec<Part>` becomes a new user message
/// appended to every `entrypoint` stage's declared history, and a
/// previously completed entrypoint is requeued to `pending` so it runs
/// again with the new turn. Used by `session::start` to back
/// `SessionHandle::send_message`.
pub async fn run_sync_with_messages<S: Clone + Send + Sync + 'static>(
    spec: &AgentSpec,
    input: HashMap<String, Value>,
    initial_user_state: S,
    provider: Arc<dyn Provider>,
    tool_registry: Arc<ToolRegistry>,
    agent_module: Arc<dyn AgentModule<S>>,
    mut incoming_messages: Option<mpsc::UnboundedReceiver<Vec<Part>>>,
) -> Result<HashMap<String, Value>, AgentError> {
    let mut state = ExecutorState::Initializing;
    let entrypoint_names: HashSet<String> = spec
        .stages
        .iter()
        .filter(|s| s.entrypoint)
        .map(|s| s.name.clone())
        .collect();

    let stage_nodes: Vec<StageNode> = spec
        .stages
        .iter()
        .map(|s| StageNode {
            name: s.name.clone(),
            depends_on: s.depends_on.clone(),
        })
        .collect();
    let dag = Dag::build(&stage_nodes);
    dag.validate()
        .map_err(|e| AgentError::execution_global(e.to_string()))?;

    let stages_by_name: HashMap<String, StageSpec> = spec
        .stages
        .iter()
        .map(|s| (s.name.clone(), s.clone()))
        .collect();

    let memory_manager = Arc::new(MemoryManager::new());
    for source in &spec.memory_sources {
        memory_manager
            .add_source(source.name.clone(), source.backend.clone())
            .await;
        if source.default {
            memory_manager.set_default_source(&source.name).await.ok();
        }
    }

    let mut session = SessionState::new(dag.stage_names().iter().cloned(), initial_user_state);
    let agent_exec_span =
        telemetry::agent_execution_start("agent", &session.session_id.to_string(), &[]);

    state = ExecutorState::Planning;

    loop {
        match state {
            ExecutorState::Initializing => unreachable!("transitioned before loop entry"),
            ExecutorState::Planning => {
                if let Some(rx) = incoming_messages.as_mut() {
                    while let Ok(parts) = rx.try_recv() {
                        session.pending_messages.push(parts);
                    }
                }
                if !session.pending_messages.is_empty() {
                    for name in &entrypoint_names {
                        if session.completed.remove(name) {
                            session.pending.insert(name.clone());
                        }
                    }
                }

                let plan_span = telemetry::dag_planning_start(
                    &session.session_id.to_string(),
                    session.completed.len(),
                    dag.stage_names().len(),
                );
                let ready = dag.find_ready(&session.completed);

                if session.completed.len() == dag.stage_names().len() {
                    telemetry::dag_planning_stop(&plan_span, ready.len(), 0, "completed");
                    state = ExecutorState::Completed;
                    continue;
                }
                if ready.is_empty() && session.in_flight.is_empty() {
                    telemetry::dag_planning_stop(&plan_span, 0, 0, "unreachable");
                    session.error = Some(AgentError::execution_global(
                        "no stage is ready and none are in flight: unreachable stages remain",
                    ));
                    state = ExecutorState::Failed;
                    continue;
                }

                for name in &ready {
                    session.pending.remove(name);
                    session.in_flight.insert(name.clone());
                }
                telemetry::dag_planning_stop(&plan_span, ready.len(), ready.len(), "dispatched");
                session.touch();

                let entrypoint_ready: HashSet<String> = ready
                    .iter()
                    .filter(|name| entrypoint_names.contains(*name))
                    .cloned()
                    .collect();
                let deliver_messages =
                    !session.pending_messages.is_empty() && !entrypoint_ready.is_empty();

                let futures = ready.iter().map(|name| {
                    let mut stage = stages_by_name.get(name).cloned().expect("stage in dag");
                    if deliver_messages && entrypoint_ready.contains(name) {
                        if let Some(call) = stage.llm_call.as_mut() {
                            for parts in &session.pending_messages {
                                call.messages.push(Message {
                                    role: Role::User,
                                    parts: parts.clone(),
                                });
                            }
                        }
                    }
                    let ctx = ExecutionContext {
                        global_input: input.clone(),
                        dependency_results: session.results.clone(),
                        memory_manager: memory_manager.clone(),
                        session_id: session.session_id,
                        stage_name: name.clone(),
                        agent_module: agent_module.clone(),
                    };
                    run_stage(
                        stage,
                        ctx,
                        provider.clone(),
                        tool_registry.clone(),
                        session.user_state.clone(),
                        spec.config.max_tool_iterations,
                    )
                });

                state = ExecutorState::Executing;
                let results = join_all(futures).await;
                if deliver_messages {
                    session.pending_messages.clear();
                }

                let mut should_fail = false;
                for WorkerOutcome {
                    stage_name,
                    outcome,
                    updated_user_state,
                } in results
                {
                    session.in_flight.remove(&stage_name);
                    match outcome {
                        Ok(value) => {
                            session.user_state = updated_user_state;
                            session.completed.insert(stage_name.clone());
                            session.results.insert(stage_name, value);
                        }
                        Err(reason) => {
                            session.user_state = updated_user_state;
                            let policy = agent_module
                                .handle_error(reason.class(), &mut session.user_state)
                                .await;
                            session.error = Some(reason);
                            match policy {
                                ErrorPolicy::Retry => {
                                    let attempts =
                                        session.retry_counts.entry(stage_name.clone()).or_insert(0);
                                    *attempts += 1;
                                    if *attempts > MAX_STAGE_RETRIES {
                                        should_fail = true;
                                    } else {
                                        session.pending.insert(stage_name);
                                        session.error = None;
                                    }
                                }
                                ErrorPolicy::Restart => {
                                    let attempts =
                                        session.retry_counts.entry(stage_name.clone()).or_insert(0);
                                    *attempts += 1;
                                    if *attempts > MAX_STAGE_RETRIES {
                                        should_fail = true;
                                    } else {
                                        session.user_state = session.initial_user_state.clone();
                                        session.pending.insert(stage_name);
                                        session.error = None;
                                    }
                                }
                                ErrorPolicy::Stop => {
                                    should_fail = true;
                                }
                            }
                        }
                    }
                }

                state = if should_fail {
                    ExecutorState::Failed
                } else {
                    ExecutorState::Planning
                };
            }
            ExecutorState::Executing => unreachable!("executing is folded into planning's dispatch"),
            ExecutorState::Completed => {
                agent_module
                    .handle_complete(&session.results, &mut session.user_state)
                    .await;
                telemetry::agent_execution_stop(&agent_exec_span, "completed", session.results.len());
                return Ok(session.results);
            }
            ExecutorState::Failed => {
                telemetry::agent_execution_stop(&agent_exec_span, "failed", session.results.len());
                return Err(session
                    .error
                    .unwrap_or_else(|| AgentError::execution_global("session failed")));
            }
        }
    }
}
