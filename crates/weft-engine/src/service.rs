use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use weft_core::events::{AgentEvent, UserEvent};
use weft_core::ids::ThreadId;
use weft_core::messages::Role;
use weft_core::provider::ModelProvider;
use weft_store::messages::MessageRepo;
use weft_store::threads::ThreadRepo;
use weft_store::Database;

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::runner::{AgentRunner, RunnerConfig};

const EVENT_CAPACITY: usize = 1024;

/// One in-flight invocation.
struct ActiveTurn {
    cancel: CancellationToken,
    _started_at: Instant,
}

/// Long-lived façade over the runner. Owns the shared pieces, enforces the
/// one-invocation-per-thread rule, and fans events out to subscribers, who
/// filter by thread id.
pub struct AgentService {
    runner: Arc<AgentRunner>,
    threads: ThreadRepo,
    messages: MessageRepo,
    event_tx: broadcast::Sender<AgentEvent>,
    active: Arc<DashMap<ThreadId, ActiveTurn>>,
}

impl AgentService {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        db: Database,
        registry: Arc<ToolRegistry>,
        config: RunnerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let runner = AgentRunner::new(provider, registry, db.clone(), event_tx.clone(), config);
        Self {
            runner: Arc::new(runner),
            threads: ThreadRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            event_tx,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Accept a user event and drive the thread's turn in a background task.
    /// Rejects synchronously while the thread is already running or when the
    /// event would not survive the runner's own validation.
    #[instrument(skip(self, event), fields(thread_id = %event.thread_id(), event = event.event_type()))]
    pub fn submit(&self, event: UserEvent) -> Result<(), EngineError> {
        let thread_id = event.thread_id().clone();

        if self.active.contains_key(&thread_id) {
            return Err(EngineError::AlreadyRunning(thread_id));
        }
        self.validate(&event)?;
        self.threads.get_or_create(&thread_id)?;

        let cancel = CancellationToken::new();
        match self.active.entry(thread_id.clone()) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyRunning(thread_id)),
            Entry::Vacant(slot) => {
                slot.insert(ActiveTurn {
                    cancel: cancel.clone(),
                    _started_at: Instant::now(),
                });
            }
        }

        let runner = Arc::clone(&self.runner);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            match runner.run(event, &cancel).await {
                Ok(outcome) => debug!(thread_id = %thread_id, ?outcome, "run finished"),
                Err(e) => error!(thread_id = %thread_id, error = %e, "run failed"),
            }
            active.remove(&thread_id);
        });

        Ok(())
    }

    /// Cancel the thread's active invocation. Returns false when it was
    /// idle.
    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        if let Some((_, turn)) = self.active.remove(thread_id) {
            turn.cancel.cancel();
            info!(thread_id = %thread_id, "run cancelled");
            true
        } else {
            false
        }
    }

    /// Cancel every active invocation; returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let count = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel.cancel();
        }
        self.active.clear();
        if count > 0 {
            info!(count, "cancelled all active runs");
        }
        count
    }

    pub fn is_running(&self, thread_id: &ThreadId) -> bool {
        self.active.contains_key(thread_id)
    }

    /// The same admission checks the runner applies, run before anything is
    /// spawned so callers get a synchronous rejection.
    fn validate(&self, event: &UserEvent) -> Result<(), EngineError> {
        let message = event.message();
        if message.role != Role::User {
            return Err(EngineError::InvalidEvent(
                "events must carry a user-role message".into(),
            ));
        }
        if message.parts.is_empty() {
            return Err(EngineError::InvalidEvent("message has no parts".into()));
        }

        if let UserEvent::FunctionResponse { message } = event {
            let responses = message.function_responses();
            if responses.is_empty() || responses.len() != message.parts.len() {
                return Err(EngineError::InvalidEvent(
                    "function_response events may only carry functionResponse parts".into(),
                ));
            }
            let history = self.messages.list(&message.thread_id)?;
            let tail = history.last();
            let all_awaited = responses.iter().all(|r| {
                tail.is_some_and(|m| {
                    m.function_calls().iter().any(|c| c.id == r.id) && !m.has_response_for(&r.id)
                })
            });
            if !all_awaited {
                return Err(EngineError::InvalidEvent(
                    "no pending tool call awaits this response".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use weft_core::ids::ToolCallId;
    use weft_core::messages::{FunctionResponse, Message};
    use weft_llm::mock::{MockProvider, MockResponse};

    fn service(
        responses: Vec<MockResponse>,
        json: Vec<Result<serde_json::Value, weft_core::errors::ModelError>>,
    ) -> (AgentService, Database) {
        let db = Database::in_memory().unwrap();
        let provider = Arc::new(MockProvider::new(responses).with_json(json));
        let service = AgentService::new(
            provider,
            db.clone(),
            Arc::new(ToolRegistry::new()),
            RunnerConfig::default(),
        );
        (service, db)
    }

    fn oracle_user() -> Result<serde_json::Value, weft_core::errors::ModelError> {
        Ok(json!({"reasoning": "done", "next_speaker": "user"}))
    }

    fn text_event(thread_id: &ThreadId, text: &str) -> UserEvent {
        UserEvent::Text {
            message: Message::user_text(thread_id.clone(), text),
        }
    }

    /// Receive events until one matches the wanted type, or panic after 5s.
    async fn wait_for(
        rx: &mut broadcast::Receiver<AgentEvent>,
        wanted: &str,
    ) -> Vec<AgentEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {wanted} event"))
                .expect("event channel closed");
            let matched = event.event_type() == wanted;
            seen.push(event);
            if matched {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn submit_runs_to_completion() {
        let (service, db) = service(vec![MockResponse::text("hello")], vec![oracle_user()]);
        let thread_id = ThreadId::new();
        let mut rx = service.subscribe();

        service.submit(text_event(&thread_id, "hi")).unwrap();
        let events = wait_for(&mut rx, "complete").await;
        assert!(events.iter().all(|e| e.thread_id() == &thread_id));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!service.is_running(&thread_id));

        let history = MessageRepo::new(db).list(&thread_id).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn submit_creates_the_thread_row() {
        let (service, db) = service(vec![MockResponse::text("hi")], vec![oracle_user()]);
        let thread_id = ThreadId::new();
        let mut rx = service.subscribe();

        service.submit(text_event(&thread_id, "hello")).unwrap();
        wait_for(&mut rx, "complete").await;

        assert!(ThreadRepo::new(db).get(&thread_id).is_ok());
    }

    #[tokio::test]
    async fn second_submit_while_running_is_rejected() {
        let (service, _db) = service(vec![MockResponse::StreamThenHang(vec![])], vec![]);
        let thread_id = ThreadId::new();

        service.submit(text_event(&thread_id, "first")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = service.submit(text_event(&thread_id, "second"));
        assert!(matches!(result, Err(EngineError::AlreadyRunning(_))));

        assert!(service.cancel(&thread_id));
    }

    #[tokio::test]
    async fn different_threads_run_concurrently() {
        let (service, _db) = service(
            vec![
                MockResponse::StreamThenHang(vec![]),
                MockResponse::StreamThenHang(vec![]),
            ],
            vec![],
        );
        let a = ThreadId::new();
        let b = ThreadId::new();

        service.submit(text_event(&a, "one")).unwrap();
        service.submit(text_event(&b, "two")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(service.is_running(&a));
        assert!(service.is_running(&b));
        assert_eq!(service.cancel_all(), 2);
    }

    #[tokio::test]
    async fn cancel_idle_thread_returns_false() {
        let (service, _db) = service(vec![], vec![]);
        assert!(!service.cancel(&ThreadId::new()));
        assert_eq!(service.cancel_all(), 0);
    }

    #[tokio::test]
    async fn cancel_stops_an_active_run() {
        let (service, db) = service(vec![MockResponse::StreamThenHang(vec![])], vec![]);
        let thread_id = ThreadId::new();
        let mut rx = service.subscribe();

        service.submit(text_event(&thread_id, "hang")).unwrap();
        wait_for(&mut rx, "is_thinking").await;

        assert!(service.cancel(&thread_id));
        assert!(!service.is_running(&thread_id));

        // Only the admitted user row survives; cancellation emits nothing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = MessageRepo::new(db).list(&thread_id).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn invalid_event_is_rejected_synchronously() {
        let (service, _db) = service(vec![], vec![]);
        let thread_id = ThreadId::new();

        let event = UserEvent::FunctionResponse {
            message: Message::user_response(
                thread_id.clone(),
                FunctionResponse::ok(ToolCallId::new(), "confirm_action", json!({})),
            ),
        };
        let result = service.submit(event);
        assert!(matches!(result, Err(EngineError::InvalidEvent(_))));
        assert!(!service.is_running(&thread_id));
    }

    #[tokio::test]
    async fn model_role_message_is_rejected() {
        let (service, _db) = service(vec![], vec![]);
        let event = UserEvent::Text {
            message: Message::model_text(ThreadId::new(), "not yours"),
        };
        assert!(matches!(
            service.submit(event),
            Err(EngineError::InvalidEvent(_))
        ));
    }
}
