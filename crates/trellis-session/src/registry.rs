use crate::observer::SessionEvent;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to one open conversation session: the event channel its streaming
/// layer publishes to, and the token that cancels its in-flight work.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn publish(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow!("session {} observer loop closed", self.id))
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Explicit registry of open sessions, passed by reference to whoever needs
/// one. Sessions are opened and closed here; there is no ambient global map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session: returns its handle and the receiver the observer
    /// loop drains.
    pub fn open(&mut self, buffer: usize) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            events: tx,
            cancel: CancellationToken::new(),
        };
        self.sessions.insert(handle.id, handle.clone());
        (handle, rx)
    }

    pub fn get(&self, id: Uuid) -> Option<&SessionHandle> {
        self.sessions.get(&id)
    }

    /// Close a session: cancels its work and forgets the handle.
    /// Returns whether the session existed.
    pub fn close(&mut self, id: Uuid) -> bool {
        match self.sessions.remove(&id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        for (_, handle) in self.sessions.drain() {
            handle.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregatorOptions, CollectSink, DialogAggregator};
    use crate::interaction::{Agent, Interaction};
    use crate::observer::run_observer_loop;
    use std::time::Duration;

    #[tokio::test]
    async fn open_get_close_lifecycle() {
        let mut registry = SessionRegistry::new();
        let (handle, _rx) = registry.open(8);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(handle.id()).is_some());

        let token = handle.cancel_token();
        assert!(!token.is_cancelled());
        assert!(registry.close(handle.id()));
        assert!(token.is_cancelled());
        assert!(registry.get(handle.id()).is_none());
        assert!(!registry.close(handle.id()));
    }

    #[tokio::test]
    async fn close_all_cancels_every_session() {
        let mut registry = SessionRegistry::new();
        let (a, _rx_a) = registry.open(1);
        let (b, _rx_b) = registry.open(1);
        registry.close_all();
        assert!(registry.is_empty());
        assert!(a.cancel_token().is_cancelled());
        assert!(b.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn publish_fails_after_observer_loop_ends() {
        let mut registry = SessionRegistry::new();
        let (handle, rx) = registry.open(1);
        drop(rx);
        let err = handle
            .publish(SessionEvent::Started { turn_id: None })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("observer loop closed"));
    }

    #[tokio::test]
    async fn session_events_flow_into_dialog_state() {
        let mut registry = SessionRegistry::new();
        let (handle, rx) = registry.open(16);
        let turn = Some(Uuid::new_v4());

        handle
            .publish(SessionEvent::Started { turn_id: turn })
            .await
            .unwrap();
        for chunk in ["The ", "The answer", "The answer is 42."] {
            handle
                .publish(SessionEvent::Delta(Interaction::text(
                    Agent::Assistant,
                    turn,
                    chunk,
                )))
                .await
                .unwrap();
        }
        handle
            .publish(SessionEvent::Final(Interaction::text(
                Agent::Assistant,
                turn,
                "",
            )))
            .await
            .unwrap();
        registry.close(handle.id());
        drop(handle);

        let mut aggregator = DialogAggregator::with_options(
            CollectSink::new(),
            AggregatorOptions {
                throttle: Duration::ZERO,
                seed_len: 24,
            },
        );
        run_observer_loop(rx, &mut aggregator).await;

        let key = format!("turn:{}:assistant:seg0", turn.unwrap());
        assert_eq!(
            aggregator.sink().last(&key).unwrap().content(),
            Some("The answer is 42.")
        );
    }
}
