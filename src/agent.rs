use crate::error::ServerError;
use crate::sse::SseParser;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_COMPLETIONS_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a responder needs to produce one reply.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub persona: Option<String>,
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub message: String,
}

impl ChatPrompt {
    /// System prompt, prior turns, then the new user message.
    pub fn messages(&self) -> Vec<ChatTurn> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatTurn {
            role: Role::System,
            content: self.system.clone(),
        });
        messages.extend(self.history.iter().cloned());
        messages.push(ChatTurn::user(self.message.clone()));
        messages
    }
}

pub type TextStream = BoxStream<'static, Result<String, ServerError>>;

/// Produces the streamed reply text for a prompt.
pub trait Responder: Send + Sync {
    fn respond(&self, prompt: ChatPrompt) -> TextStream;
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatTurn>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: CompletionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionDelta {
    content: Option<String>,
}

impl CompletionChunk {
    fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
    }
}

/// Streams replies from an OpenAI-compatible chat completions endpoint.
pub struct CompletionAgent {
    client: Client,
    api_key: String,
    url: String,
    model: String,
}

impl CompletionAgent {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            url: DEFAULT_COMPLETIONS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Responder for CompletionAgent {
    fn respond(&self, prompt: ChatPrompt) -> TextStream {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: prompt.messages(),
            stream: true,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        debug!(model = %request.model, turns = request.messages.len(), "requesting completion");

        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request);
        stream::once(open_completion(request)).try_flatten().boxed()
    }
}

async fn open_completion(request: RequestBuilder) -> Result<TextStream, ServerError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ServerError::Upstream { status, body });
    }

    let state = CompletionState {
        body: Box::pin(response.bytes_stream()),
        parser: SseParser::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    Ok(stream::unfold(state, next_delta).boxed())
}

struct CompletionState<S> {
    body: S,
    parser: SseParser,
    pending: VecDeque<String>,
    finished: bool,
}

async fn next_delta<S, B>(
    mut state: CompletionState<S>,
) -> Option<(Result<String, ServerError>, CompletionState<S>)>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    loop {
        if state.finished {
            return None;
        }

        if let Some(payload) = state.pending.pop_front() {
            if payload == "[DONE]" {
                state.finished = true;
                continue;
            }
            match serde_json::from_str::<CompletionChunk>(&payload) {
                Ok(chunk) => match chunk.into_text() {
                    Some(text) => return Some((Ok(text), state)),
                    None => continue,
                },
                Err(err) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
            }
        }

        match state.body.next().await {
            Some(Ok(bytes)) => {
                let payloads = state.parser.feed(bytes.as_ref());
                state.pending.extend(payloads);
            }
            Some(Err(err)) => {
                state.finished = true;
                return Some((Err(err.into()), state));
            }
            None => return None,
        }
    }
}

/// Offline responder: answers in the persona's name by echoing the message,
/// one word per chunk.
#[derive(Debug, Default, Clone)]
pub struct EchoResponder;

impl EchoResponder {
    pub fn reply_for(prompt: &ChatPrompt) -> String {
        match &prompt.persona {
            Some(name) => format!("{name} here. You said: {}", prompt.message),
            None => format!("You said: {}", prompt.message),
        }
    }
}

impl Responder for EchoResponder {
    fn respond(&self, prompt: ChatPrompt) -> TextStream {
        let reply = Self::reply_for(&prompt);
        let chunks: Vec<Result<String, ServerError>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        stream::iter(chunks).boxed()
    }
}
