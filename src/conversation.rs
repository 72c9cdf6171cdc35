use crate::protocol::{StreamFrame, StreamRequest};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    User(String),
    Assistant(String),
    Notice(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendRejected {
    #[error("message is empty")]
    Empty,
    #[error("a reply is still streaming")]
    Busy,
}

/// What a frame did to the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Fragment,
    Completed { reply: String },
    Failed { error: String, partial: String },
    Ignored,
}

/// Caller-side state of a chat: the transcript, the persona, and the server
/// session to continue.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    persona_id: Option<i64>,
    session_id: Option<String>,
    pending: Option<String>,
}

impl Conversation {
    pub fn new(persona_id: Option<i64>, session_id: Option<String>) -> Self {
        Self {
            persona_id,
            session_id,
            ..Self::default()
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn persona_id(&self) -> Option<i64> {
        self.persona_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Text of the reply currently streaming in.
    pub fn pending_reply(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Record the user's message and build its request. Sending is refused while
    /// a previous reply is still streaming.
    pub fn begin_send(&mut self, text: &str) -> Result<StreamRequest, SendRejected> {
        if self.is_streaming() {
            return Err(SendRejected::Busy);
        }

        let request = StreamRequest::new(text)
            .map_err(|_| SendRejected::Empty)?
            .with_persona(self.persona_id)
            .with_session(self.session_id.clone());

        self.turns.push(Turn::User(text.to_string()));
        self.pending = Some(String::new());
        Ok(request)
    }

    pub fn apply(&mut self, frame: StreamFrame) -> Applied {
        let Some(pending) = self.pending.as_mut() else {
            return Applied::Ignored;
        };

        if let Some(error) = frame.error {
            let partial = self.pending.take().unwrap_or_default();
            if !partial.is_empty() {
                self.turns.push(Turn::Assistant(partial.clone()));
            }
            self.turns.push(Turn::Notice(error.clone()));
            return Applied::Failed { error, partial };
        }

        pending.push_str(&frame.text);
        if !frame.done {
            return Applied::Fragment;
        }

        if frame.session_id.is_some() {
            self.session_id = frame.session_id;
        }
        let reply = self.pending.take().unwrap_or_default();
        self.turns.push(Turn::Assistant(reply.clone()));
        Applied::Completed { reply }
    }

    /// Abandon the streaming reply, keeping whatever text already arrived.
    pub fn abandon(&mut self) {
        if let Some(partial) = self.pending.take().filter(|p| !p.is_empty()) {
            self.turns.push(Turn::Assistant(partial));
        }
    }
}
