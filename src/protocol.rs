use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub const AUTH_REQUIRED: &str = "Authentication required";
pub const PARSE_FAILED: &str = "Failed to parse response";
pub const RESPONSE_TIMEOUT: &str = "Response timeout. Please try again.";
pub const RETRIES_EXHAUSTED: &str = "Connection failed after multiple attempts.";

/// One logical "send message" action. Built fresh per send and reused verbatim
/// by every reconnect of that send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub message: String,
    pub persona_id: Option<i64>,
    pub session_id: Option<String>,
    pub issued_at: Instant,
}

impl StreamRequest {
    pub fn new(message: impl Into<String>) -> Result<Self, ClientError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        Ok(Self {
            message,
            persona_id: None,
            session_id: None,
            issued_at: Instant::now(),
        })
    }

    pub fn with_persona(mut self, persona_id: Option<i64>) -> Self {
        self.persona_id = persona_id;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|value| !value.trim().is_empty());
        self
    }

    /// Query parameters for `GET /chat`, in the order the server documents them.
    pub fn query_pairs(&self, token: &str) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("message", self.message.clone())];
        if let Some(persona_id) = self.persona_id {
            pairs.push(("character_id", persona_id.to_string()));
        }
        if let Some(session_id) = &self.session_id {
            pairs.push(("chat_session", session_id.clone()));
        }
        pairs.push(("token", token.to_string()));
        pairs
    }
}

/// A frame as delivered to the caller.
///
/// Fragments carry only the incremental `text`; accumulation is the caller's job.
/// Exactly one frame per logical send has `done == true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "chat_session",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
}

impl StreamFrame {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn finished(session_id: Option<String>) -> Self {
        Self {
            done: true,
            session_id,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// JSON shape of one `data:` payload on the wire, shared by the server
/// (serialize) and the frame decoder (deserialize).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_session: Option<String>,
}

impl WireFrame {
    pub fn fragment(text: impl Into<String>, chat_session: &str) -> Self {
        Self {
            text: Some(text.into()),
            done: false,
            error: None,
            chat_session: Some(chat_session.to_string()),
        }
    }

    pub fn finished(chat_session: &str) -> Self {
        Self {
            text: Some(String::new()),
            done: true,
            error: None,
            chat_session: Some(chat_session.to_string()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            text: None,
            done: true,
            error: Some(error.into()),
            chat_session: None,
        }
    }
}
