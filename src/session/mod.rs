//! Agent Session: per-run state, the host-facing handle, and the registry
//! that looks sessions up by id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::error::AgentError;
use crate::executor;
use crate::llm::Provider;
use crate::memory::MemoryManager;
use crate::message::Part;
use crate::spec::AgentSpec;
use crate::stage::AgentModule;
use crate::tools::ToolRegistry;

/// Per-run bookkeeping, owned by the DAG Executor for the session's
/// lifetime. Invariants: `pending ⊎ in_flight ⊎ completed`
/// partitions the DAG's stage set; a stage enters `in_flight` only once its
/// deps are all in `completed`; `results` keys are a subset of `completed`.
pub struct SessionState<S> {
    pub results: HashMap<String, Value>,
    pub pending: HashSet<String>,
    pub completed: HashSet<String>,
    pub in_flight: HashSet<String>,
    pub user_state: S,
    /// `user_state` as of session construction. `ErrorPolicy::Restart`
    /// resets `user_state` back to this rather than leaving it as whatever
    /// it was at failure time.
    pub initial_user_state: S,
    /// Per-stage retry/restart attempt count, consulted against the
    /// executor's retry budget so a host policy that always requests
    /// `Retry`/`Restart` can't loop a failing stage forever.
    pub retry_counts: HashMap<String, u32>,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    pub error: Option<AgentError>,
    /// User turns received via `send_message` and not yet spliced into an
    /// entrypoint stage's history.
    pub pending_messages: Vec<Vec<Part>>,
}

impl<S: Clone> SessionState<S> {
    pub fn new(stage_names: impl IntoIterator<Item = String>, user_state: S) -> Self {
        let now = Utc::now();
        SessionState {
            results: HashMap::new(),
            pending: stage_names.into_iter().collect(),
            completed: HashSet::new(),
            in_flight: HashSet::new(),
            initial_user_state: user_state.clone(),
            user_state,
            retry_counts: HashMap::new(),
            session_id: Uuid::new_v4(),
            started_at: now,
            last_transition_at: now,
            error: None,
            pending_messages: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_transition_at = Utc::now();
    }
}

/// Read-only snapshot handed to a stage invocation.
pub struct ExecutionContext<S> {
    pub global_input: HashMap<String, Value>,
    pub dependency_results: HashMap<String, Value>,
    pub memory_manager: Arc<MemoryManager>,
    pub session_id: Uuid,
    pub stage_name: String,
    pub agent_module: Arc<dyn AgentModule<S>>,
}

/// Terminal or in-progress status of a session, observed through a
/// `SessionHandle`.
#[derive(Debug, Clone)]
pub enum SessionStatus {
    InProgress,
    Completed(HashMap<String, Value>),
    Failed(String),
}

/// A handle to a running or finished session, returned by
/// `AgentSession::start`.
pub struct SessionHandle {
    pub session_id: Uuid,
    status: watch::Receiver<SessionStatus>,
    cancel: watch::Sender<bool>,
    /// For stateful agents: enqueues a new user turn to be processed after
    /// the current plan cycle.
    pub(crate) message_tx: mpsc::UnboundedSender<Vec<Part>>,
}

impl SessionHandle {
    /// `{ok, :completed, results} | {ok, :in_progress} | {error, cause}`
    /// rendered as a Rust enum.
    pub fn get_results(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn send_message(&self, parts: Vec<Part>) {
        let _ = self.message_tx.send(parts);
    }
}

/// Internals shared between a `SessionHandle` and the executor task driving
/// it; constructing one is the job of `AgentSession::start`.
pub struct SessionChannels {
    pub status_tx: watch::Sender<SessionStatus>,
    pub cancel_rx: watch::Receiver<bool>,
    pub message_rx: mpsc::UnboundedReceiver<Vec<Part>>,
}

/// Builds a linked `(SessionHandle, SessionChannels)` pair for a new session.
pub fn new_session_channels(session_id: Uuid) -> (SessionHandle, SessionChannels) {
    let (status_tx, status_rx) = watch::channel(SessionStatus::InProgress);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        session_id,
        status: status_rx,
        cancel: cancel_tx,
        message_tx,
    };
    let channels = SessionChannels {
        status_tx,
        cancel_rx,
        message_rx,
    };
    (handle, channels)
}

/// Process-wide registry mapping `session_id -> handle`, for hosts that want
/// to look sessions up by id rather than holding the handle themselves.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<RwLock<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions
            .insert(handle.session_id, Arc::new(RwLock::new(handle)));
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<RwLock<SessionHandle>>> {
        self.sessions.get(&session_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, session_id: Uuid) {
        self.sessions.remove(&session_id);
    }
}

/// Starts a session in the background and returns a handle to it.
/// Prefer `executor::run_sync` directly for the
/// common case of awaiting one session to completion; `start` is for hosts
/// running stateful agents that want to poll `get_results`/`send_message`
/// while it runs.
///
/// `send_message` on the returned handle enqueues a new user turn, drained
/// by the executor at the top of its next planning cycle and spliced into
/// the entrypoint stage(s)' history (see `executor::run_sync_with_messages`).
pub fn start<S: Clone + Send + Sync + 'static>(
    spec: AgentSpec,
    input: HashMap<String, Value>,
    initial_user_state: S,
    provider: Arc<dyn Provider>,
    tool_registry: Arc<ToolRegistry>,
    agent_module: Arc<dyn AgentModule<S>>,
) -> SessionHandle {
    let session_id = Uuid::new_v4();
    let (handle, channels) = new_session_channels(session_id);
    let SessionChannels {
        status_tx,
        mut cancel_rx,
        message_rx,
    } = channels;

    tokio::spawn(async move {
        let run = executor::run_sync_with_messages(
            &spec,
            input,
            initial_user_state,
            provider,
            tool_registry,
            agent_module,
            Some(message_rx),
        );
        tokio::select! {
            result = run => {
                let status = match result {
                    Ok(results) => SessionStatus::Completed(results),
                    Err(err) => SessionStatus::Failed(err.to_string()),
                };
                let _ = status_tx.send(status);
            }
            _ = cancel_rx.changed() => {
                let _ = status_tx.send(SessionStatus::Failed("cancelled".to_string()));
            }
        }
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A freshly built `SessionState` has every stage pending
    /// and nothing completed or in-flight — the partition invariant holds
    /// trivially at t=0.
    #[test]
    fn new_session_state_starts_with_all_stages_pending() {
        let state = SessionState::new(vec!["a".to_string(), "b".to_string()], ());
        assert_eq!(state.pending.len(), 2);
        assert!(state.in_flight.is_empty());
        assert!(state.completed.is_empty());
    }

    /// **Scenario**: `get_results` reflects the status pushed onto the
    /// paired channel.
    #[tokio::test]
    async fn handle_reflects_pushed_status() {
        let (handle, channels) = new_session_channels(Uuid::new_v4());
        assert!(matches!(handle.get_results(), SessionStatus::InProgress));
        channels
            .status_tx
            .send(SessionStatus::Completed(HashMap::new()))
            .unwrap();
        assert!(matches!(handle.get_results(), SessionStatus::Completed(_)));
    }

    /// **Scenario**: Stopping a handle is observable on the executor side's
    /// cancel receiver.
    #[tokio::test]
    async fn stop_signals_cancel_receiver() {
        let (handle, mut channels) = new_session_channels(Uuid::new_v4());
        handle.stop();
        assert!(*channels.cancel_rx.borrow_and_update());
    }

    /// **Scenario**: `start` drives a single-stage session in the
    /// background and the handle eventually observes `Completed`.
    #[tokio::test]
    async fn start_runs_session_to_completion() {
        use crate::llm::{CompletionParams, LlmUsage, Provider, ProviderError};
        use crate::message::{Message, Part};
        use crate::stage::{LLMCall, NoopModule, StageSpec};
        use crate::tools::ToolSpec;
        use async_trait::async_trait;

        struct StubProvider;
        #[async_trait]
        impl Provider for StubProvider {
            async fn completion(
                &self,
                _model: &str,
                _messages: &[Message],
                _params: &CompletionParams,
                _tools: &[ToolSpec],
            ) -> Result<(Vec<Part>, LlmUsage), ProviderError> {
                Ok((vec![Part::Text { text: "ok".into() }], LlmUsage::default()))
            }
        }

        let mut stage = StageSpec::new("only");
        stage.llm_call = Some(LLMCall {
            model: "m".to_string(),
            params: CompletionParams::default(),
            messages: vec![Message::user("hi")],
            tools: vec![],
        });
        let spec = AgentSpec::new(vec![stage]);

        let handle = start(
            spec,
            HashMap::new(),
            (),
            Arc::new(StubProvider),
            Arc::new(crate::tools::ToolRegistry::new()),
            Arc::new(NoopModule),
        );

        for _ in 0..100 {
            if matches!(handle.get_results(), SessionStatus::Completed(_)) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(handle.get_results(), SessionStatus::Completed(_)));
    }

    /// **Scenario**: The registry looks sessions up by the id they were
    /// inserted under.
    #[test]
    fn registry_roundtrips_by_session_id() {
        let registry = SessionRegistry::new();
        let (handle, _channels) = new_session_channels(Uuid::new_v4());
        let id = handle.session_id;
        registry.insert(handle);
        assert!(registry.get(id).is_some());
        registry.remove(id);
        assert!(registry.get(id).is_none());
    }
}
