mod support;

use futures::stream::{self, StreamExt};
use persona_chat::agent::{ChatPrompt, ChatTurn, EchoResponder, Responder, Role, TextStream};
use persona_chat::conversation::{Applied, Conversation, Turn};
use persona_chat::error::ServerError;
use persona_chat::server::INVALID_TOKEN;
use persona_chat::{StreamFrame, StreamRequest};
use std::sync::{Arc, Mutex};
use support::{TOKEN, client, collect, fast_policy, spawn_server, text_of};

#[tokio::test]
async fn echo_reply_streams_end_to_end() {
    let (base_url, state) = spawn_server(Arc::new(EchoResponder)).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());

    let request = StreamRequest::new("Hello!").unwrap().with_persona(Some(2));
    let frames = collect(client.stream(request)).await;

    assert!(frames.len() > 2);
    assert_eq!(text_of(&frames), "Yoda here. You said: Hello!");
    assert!(frames[..frames.len() - 1].iter().all(|f| !f.done && f.session_id.is_none()));

    let last = frames.last().unwrap();
    assert!(last.done);
    assert_eq!(last.error, None);
    let session = last.session_id.clone().expect("server assigns a session");

    let history = state.history(&session).await.unwrap();
    assert_eq!(
        history,
        vec![
            ChatTurn::user("Hello!"),
            ChatTurn::assistant("Yoda here. You said: Hello!"),
        ]
    );
}

#[tokio::test]
async fn known_session_is_continued() {
    let (base_url, state) = spawn_server(Arc::new(EchoResponder)).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());

    let first = collect(client.stream(StreamRequest::new("one").unwrap())).await;
    let session = first.last().unwrap().session_id.clone().unwrap();

    let request = StreamRequest::new("two")
        .unwrap()
        .with_session(Some(session.clone()));
    let second = collect(client.stream(request)).await;

    assert_eq!(second.last().unwrap().session_id.as_deref(), Some(session.as_str()));
    assert_eq!(state.history(&session).await.unwrap().len(), 4);
}

#[tokio::test]
async fn unknown_session_starts_a_new_one() {
    let (base_url, _state) = spawn_server(Arc::new(EchoResponder)).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());

    let request = StreamRequest::new("hi")
        .unwrap()
        .with_session(Some("does-not-exist".to_string()));
    let frames = collect(client.stream(request)).await;

    let session = frames.last().unwrap().session_id.clone().unwrap();
    assert_ne!(session, "does-not-exist");
}

#[tokio::test]
async fn wrong_token_is_reported_in_band() {
    let (base_url, _state) = spawn_server(Arc::new(EchoResponder)).await;
    let client = client(&base_url, Some("wrong"), fast_policy());

    let frames = collect(client.stream(StreamRequest::new("hi").unwrap())).await;

    assert_eq!(frames, vec![StreamFrame::failed(INVALID_TOKEN)]);
}

#[tokio::test]
async fn unknown_persona_is_reported_in_band() {
    let (base_url, _state) = spawn_server(Arc::new(EchoResponder)).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());

    let request = StreamRequest::new("hi").unwrap().with_persona(Some(99));
    let frames = collect(client.stream(request)).await;

    assert_eq!(
        frames,
        vec![StreamFrame::failed("Character with id 99 not found")]
    );
}

struct FailingResponder;

impl Responder for FailingResponder {
    fn respond(&self, _prompt: ChatPrompt) -> TextStream {
        stream::iter(vec![
            Ok("partial".to_string()),
            Err(ServerError::InvalidCatalog("upstream went away".to_string())),
        ])
        .boxed()
    }
}

#[tokio::test]
async fn responder_failure_ends_the_stream_with_an_error() {
    let (base_url, _state) = spawn_server(Arc::new(FailingResponder)).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());

    let frames = collect(client.stream(StreamRequest::new("hi").unwrap())).await;

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], StreamFrame::fragment("partial"));
    assert!(frames[1].done);
    assert!(frames[1].error.as_deref().unwrap().contains("upstream went away"));
}

/// Records the prompt it was asked to answer.
struct CapturingResponder {
    prompts: Mutex<Vec<ChatPrompt>>,
}

impl Responder for CapturingResponder {
    fn respond(&self, prompt: ChatPrompt) -> TextStream {
        self.prompts.lock().unwrap().push(prompt);
        stream::iter(vec![Ok("ok".to_string())]).boxed()
    }
}

#[tokio::test]
async fn prompt_carries_persona_system_prompt_and_history() {
    let responder = Arc::new(CapturingResponder {
        prompts: Mutex::new(Vec::new()),
    });
    let (base_url, _state) = spawn_server(responder.clone()).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());

    let first = collect(client.stream(StreamRequest::new("first").unwrap().with_persona(Some(1)))).await;
    let session = first.last().unwrap().session_id.clone();
    collect(
        client.stream(
            StreamRequest::new("second")
                .unwrap()
                .with_persona(Some(1))
                .with_session(session),
        ),
    )
    .await;

    let prompts = responder.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    let second = &prompts[1];
    assert_eq!(second.persona.as_deref(), Some("Sherlock Holmes"));
    assert!(second.system.starts_with("You are Sherlock Holmes from Sherlock."));
    assert_eq!(second.history, vec![ChatTurn::user("first"), ChatTurn::assistant("ok")]);

    let roles: Vec<Role> = second.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
}

#[tokio::test]
async fn health_endpoint_reports_status() {
    let (base_url, _state) = spawn_server(Arc::new(EchoResponder)).await;

    let body: serde_json::Value = reqwest::get(format!("{base_url}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn conversation_accumulates_a_streamed_reply() {
    let (base_url, _state) = spawn_server(Arc::new(EchoResponder)).await;
    let client = client(&base_url, Some(TOKEN), fast_policy());
    let mut conversation = Conversation::new(None, None);

    let request = conversation.begin_send("ping").unwrap();
    let mut frames = client.stream(request);
    let mut outcome = None;
    while let Some(frame) = frames.next().await {
        match conversation.apply(frame) {
            Applied::Fragment => assert!(conversation.is_streaming()),
            applied => outcome = Some(applied),
        }
    }

    assert_eq!(
        outcome,
        Some(Applied::Completed {
            reply: "You said: ping".to_string()
        })
    );
    assert!(!conversation.is_streaming());
    assert!(conversation.session_id().is_some());
    assert_eq!(
        conversation.turns(),
        &[
            Turn::User("ping".to_string()),
            Turn::Assistant("You said: ping".to_string()),
        ]
    );
}
