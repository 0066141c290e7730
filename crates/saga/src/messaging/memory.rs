//! In-process message bus for tests and the demo binary.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::client::{MessageClient, MessagingError};

type Handler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;
type Route = (String, String);

/// A request observed by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub service: String,
    pub action: String,
    pub payload: Value,
}

/// An event observed by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub event: String,
    pub payload: Value,
}

#[derive(Default)]
struct BusState {
    handlers: HashMap<Route, Handler>,
    delays: HashMap<Route, Duration>,
    sent: Vec<SentMessage>,
    emitted: Vec<EmittedEvent>,
}

/// Routes `(service, action)` requests to registered closures.
///
/// Every request is recorded, including ones that fail or time out, so tests
/// can assert on exactly what was sent. Latency can be injected per route to
/// exercise the timeout path.
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<RwLock<BusState>>,
}

impl InMemoryMessageBus {
    /// Creates a bus with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `service.action`, replacing any previous one.
    pub fn register<F>(&self, service: &str, action: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.write()
            .handlers
            .insert(route(service, action), Arc::new(handler));
    }

    /// Delays every reply from `service.action` by `delay`.
    pub fn set_delay(&self, service: &str, action: &str, delay: Duration) {
        self.write().delays.insert(route(service, action), delay);
    }

    /// Returns every request sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.read().sent.clone()
    }

    /// Returns the requests sent to `service.action`.
    pub fn sent_to(&self, service: &str, action: &str) -> Vec<SentMessage> {
        self.read()
            .sent
            .iter()
            .filter(|m| m.service == service && m.action == action)
            .cloned()
            .collect()
    }

    /// Returns every event emitted so far.
    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.read().emitted.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, BusState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BusState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("InMemoryMessageBus")
            .field("routes", &state.handlers.keys().collect::<Vec<_>>())
            .field("sent", &state.sent.len())
            .field("emitted", &state.emitted.len())
            .finish()
    }
}

#[async_trait]
impl MessageClient for InMemoryMessageBus {
    async fn send(
        &self,
        service: &str,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, MessagingError> {
        let key = route(service, action);
        let (handler, delay) = {
            let mut state = self.write();
            state.sent.push(SentMessage {
                service: service.to_string(),
                action: action.to_string(),
                payload: payload.clone(),
            });
            (
                state.handlers.get(&key).cloned(),
                state.delays.get(&key).copied(),
            )
        };

        let Some(handler) = handler else {
            return Err(MessagingError::NoHandler {
                service: service.to_string(),
                action: action.to_string(),
            });
        };

        let call = async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            handler(payload)
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(message)) => Err(MessagingError::Remote {
                service: service.to_string(),
                action: action.to_string(),
                message,
            }),
            Err(_) => Err(MessagingError::Timeout {
                service: service.to_string(),
                action: action.to_string(),
                timeout,
            }),
        }
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), MessagingError> {
        self.write().emitted.push(EmittedEvent {
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

fn route(service: &str, action: &str) -> Route {
    (service.to_string(), action.to_string())
}
