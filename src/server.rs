use crate::agent::{ChatPrompt, ChatTurn, Responder, Role, TextStream};
use crate::personas::{PersonaCatalog, system_prompt};
use crate::protocol::WireFrame;
use axum::extract::{Query, State};
use axum::http::header::CACHE_CONTROL;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const INVALID_TOKEN: &str = "Invalid authentication token";
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

pub struct ServerConfig {
    pub listen: String,
    pub auth_token: String,
    pub chunk_delay: Duration,
    pub max_sessions: usize,
}

pub struct AppState {
    responder: Arc<dyn Responder>,
    personas: PersonaCatalog,
    sessions: Mutex<SessionStore>,
    auth_token: String,
    chunk_delay: Duration,
}

impl AppState {
    pub fn new(
        responder: Arc<dyn Responder>,
        personas: PersonaCatalog,
        auth_token: String,
        chunk_delay: Duration,
        max_sessions: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder,
            personas,
            sessions: Mutex::new(SessionStore::new(max_sessions)),
            auth_token,
            chunk_delay,
        })
    }

    /// Turns recorded so far for a session.
    pub async fn history(&self, session_id: &str) -> Option<Vec<ChatTurn>> {
        self.sessions.lock().await.history(session_id)
    }
}

struct Session {
    turns: Vec<ChatTurn>,
    touched: u64,
}

/// Chat histories keyed by session id. Holds at most `capacity` sessions and
/// evicts the least recently used one to make room.
struct SessionStore {
    sessions: HashMap<String, Session>,
    capacity: usize,
    clock: u64,
}

impl SessionStore {
    fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn history(&self, session_id: &str) -> Option<Vec<ChatTurn>> {
        self.sessions.get(session_id).map(|session| session.turns.clone())
    }

    /// Record a user message and return its session id with the turns before it.
    ///
    /// An unknown or missing session id starts a new session. A trailing user
    /// turn that never got a reply is replaced, so a reconnect that re-sends the
    /// same message does not stack duplicates.
    fn begin_turn(&mut self, requested: Option<&str>, message: &str) -> (String, Vec<ChatTurn>) {
        self.clock += 1;
        let requested = requested.filter(|id| !id.is_empty());
        let session_id = match requested {
            Some(id) if self.sessions.contains_key(id) => id.to_string(),
            _ => {
                if let Some(id) = requested {
                    warn!(session = %id, "unknown chat session; starting a new one");
                }
                self.make_room();
                Uuid::new_v4().to_string()
            }
        };

        let clock = self.clock;
        let session = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| Session {
                turns: Vec::new(),
                touched: clock,
            });
        session.touched = clock;
        if session.turns.last().is_some_and(|turn| turn.role == Role::User) {
            session.turns.pop();
        }
        let history = session.turns.clone();
        session.turns.push(ChatTurn::user(message));
        (session_id, history)
    }

    fn record_reply(&mut self, session_id: &str, reply: String) {
        self.clock += 1;
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.turns.push(ChatTurn::assistant(reply));
                session.touched = self.clock;
            }
            None => debug!(session = %session_id, "session evicted before its reply finished"),
        }
    }

    fn make_room(&mut self) {
        while self.sessions.len() >= self.capacity {
            let Some(oldest) = self
                .sessions
                .iter()
                .min_by_key(|(_, session)| session.touched)
                .map(|(id, _)| id.clone())
            else {
                return;
            };
            self.sessions.remove(&oldest);
            debug!(session = %oldest, "evicted least recently used chat session");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub message: String,
    pub token: String,
    pub chat_session: Option<String>,
    pub character_id: Option<i64>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", get(chat_stream))
        .with_state(state)
}

pub async fn run(
    config: ServerConfig,
    responder: Arc<dyn Responder>,
    personas: PersonaCatalog,
) -> std::io::Result<()> {
    let state = AppState::new(
        responder,
        personas,
        config.auth_token,
        config.chunk_delay,
        config.max_sessions,
    );
    let listener = TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "persona chat server listening");
    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Welcome to the persona chat API!",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "healthy",
    }))
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> impl IntoResponse {
    let events = chat_frames(state, query).map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    (
        [(CACHE_CONTROL, "no-cache")],
        Sse::new(events).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        ),
    )
}

/// Frames for one `/chat` request. Every failure is reported in-band as a single
/// error frame, never as an HTTP error status.
fn chat_frames(state: Arc<AppState>, query: ChatQuery) -> BoxStream<'static, WireFrame> {
    if query.token != state.auth_token {
        warn!("rejected chat stream with invalid token");
        return stream::iter([WireFrame::failed(INVALID_TOKEN)]).boxed();
    }

    let persona = match query.character_id {
        Some(id) => match state.personas.get(id) {
            Some(persona) => Some(persona.clone()),
            None => {
                warn!(character_id = id, "chat stream for unknown persona");
                return stream::iter([WireFrame::failed(format!(
                    "Character with id {id} not found"
                ))])
                .boxed();
            }
        },
        None => None,
    };

    stream::once(async move {
        let (session_id, history) = state
            .sessions
            .lock()
            .await
            .begin_turn(query.chat_session.as_deref(), &query.message);

        info!(
            session = %session_id,
            persona = ?persona.as_ref().map(|p| p.id),
            turns = history.len(),
            "streaming reply"
        );
        let prompt = ChatPrompt {
            persona: persona.as_ref().map(|p| p.name.clone()),
            system: system_prompt(persona.as_ref()),
            history,
            message: query.message,
        };
        let reply = Reply {
            chunks: state.responder.respond(prompt),
            state,
            session_id,
            full: String::new(),
            delayed: false,
            finished: false,
        };
        stream::unfold(reply, next_frame)
    })
    .flatten()
    .boxed()
}

struct Reply {
    state: Arc<AppState>,
    chunks: TextStream,
    session_id: String,
    full: String,
    delayed: bool,
    finished: bool,
}

async fn next_frame(mut reply: Reply) -> Option<(WireFrame, Reply)> {
    if reply.finished {
        return None;
    }

    loop {
        match reply.chunks.next().await {
            Some(Ok(text)) if text.is_empty() => continue,
            Some(Ok(text)) => {
                if reply.delayed && !reply.state.chunk_delay.is_zero() {
                    tokio::time::sleep(reply.state.chunk_delay).await;
                }
                reply.delayed = true;
                reply.full.push_str(&text);
                let frame = WireFrame::fragment(text, &reply.session_id);
                return Some((frame, reply));
            }
            Some(Err(err)) => {
                error!(session = %reply.session_id, error = %err, "reply failed");
                reply.finished = true;
                return Some((WireFrame::failed(err.to_string()), reply));
            }
            None => {
                reply
                    .state
                    .sessions
                    .lock()
                    .await
                    .record_reply(&reply.session_id, std::mem::take(&mut reply.full));
                reply.finished = true;
                let frame = WireFrame::finished(&reply.session_id);
                return Some((frame, reply));
            }
        }
    }
}
