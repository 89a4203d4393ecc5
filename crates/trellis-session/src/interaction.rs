use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who an interaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    User,
    Assistant,
    Tool,
    System,
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Agent::User => "user",
            Agent::Assistant => "assistant",
            Agent::Tool => "tool",
            Agent::System => "system",
        };
        f.write_str(s)
    }
}

/// Usage/cost metrics attached to an interaction once a turn completes.
/// While a stream is in flight these stay `None` so the UI never shows a
/// misleading zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// The message-like payload of an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionBody {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        name: String,
        output: String,
    },
    Error {
        message: String,
    },
}

/// One event in a conversation. Interactions sharing a turn id belong to one
/// logical AI exchange; the aggregator folds them into stable dialog entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub agent: Agent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<Uuid>,
    /// RFC3339 timestamp, as emitted by the session layer.
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    pub body: InteractionBody,
}

impl Interaction {
    pub fn text(agent: Agent, turn_id: Option<Uuid>, content: impl Into<String>) -> Self {
        Self {
            agent,
            turn_id,
            time: now_rfc3339(),
            metrics: None,
            body: InteractionBody::Text {
                content: content.into(),
                reasoning: None,
            },
        }
    }

    pub fn tool_call(
        turn_id: Option<Uuid>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            agent: Agent::Tool,
            turn_id,
            time: now_rfc3339(),
            metrics: None,
            body: InteractionBody::ToolCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn tool_result(
        turn_id: Option<Uuid>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            agent: Agent::Tool,
            turn_id,
            time: now_rfc3339(),
            metrics: None,
            body: InteractionBody::ToolResult {
                name: name.into(),
                output: output.into(),
            },
        }
    }

    pub fn error(turn_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            agent: Agent::Assistant,
            turn_id,
            time: now_rfc3339(),
            metrics: None,
            body: InteractionBody::Error {
                message: message.into(),
            },
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        if let InteractionBody::Text {
            reasoning: ref mut r,
            ..
        } = self.body
        {
            *r = Some(reasoning.into());
        }
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Visible text: message content or error message.
    pub fn content(&self) -> Option<&str> {
        match &self.body {
            InteractionBody::Text { content, .. } => Some(content),
            InteractionBody::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match &self.body {
            InteractionBody::Text { reasoning, .. } => reasoning.as_deref(),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, InteractionBody::Error { .. })
    }
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
