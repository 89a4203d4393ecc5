use crate::interaction::Interaction;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a turn ended abnormally. Cancellation is a distinguished outcome,
/// not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Cancelled,
    Failure(String),
}

/// Tagged stream of conversation events. The session/provider layer produces
/// these; a single aggregation loop consumes them, so all dialog state stays
/// single-writer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A turn began.
    Started { turn_id: Option<Uuid> },
    /// Incremental text chunk within the current message.
    Delta(Interaction),
    /// Snapshot of a message so far. May open a new message within the turn.
    Partial(Interaction),
    ToolCall(Interaction),
    ToolResult(Interaction),
    /// Authoritative end of a turn, carrying real metrics.
    Final(Interaction),
    /// The turn failed or was cancelled.
    Failed {
        turn_id: Option<Uuid>,
        error: SessionError,
    },
}

/// Callback contract the streaming layer drives. Methods take `&mut self`:
/// one consumer owns all mutation.
pub trait ConversationObserver: Send {
    fn on_start(&mut self, turn_id: Option<Uuid>);
    fn on_delta(&mut self, interaction: Interaction);
    fn on_partial(&mut self, interaction: Interaction);
    fn on_tool_call(&mut self, interaction: Interaction);
    fn on_tool_result(&mut self, interaction: Interaction);
    fn on_final(&mut self, interaction: Interaction);
    fn on_error(&mut self, turn_id: Option<Uuid>, error: SessionError);

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started { turn_id } => self.on_start(turn_id),
            SessionEvent::Delta(i) => self.on_delta(i),
            SessionEvent::Partial(i) => self.on_partial(i),
            SessionEvent::ToolCall(i) => self.on_tool_call(i),
            SessionEvent::ToolResult(i) => self.on_tool_result(i),
            SessionEvent::Final(i) => self.on_final(i),
            SessionEvent::Failed { turn_id, error } => self.on_error(turn_id, error),
        }
    }
}

/// Drain a session's event channel into an observer until the sender side
/// closes. This is the single aggregation loop; nothing else may mutate the
/// observer while it runs.
pub async fn run_observer_loop(
    mut events: mpsc::Receiver<SessionEvent>,
    observer: &mut dyn ConversationObserver,
) {
    while let Some(event) = events.recv().await {
        observer.handle(event);
    }
}
