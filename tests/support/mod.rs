#![allow(dead_code)]

use futures::StreamExt;
use persona_chat::agent::Responder;
use persona_chat::auth::StaticToken;
use persona_chat::personas::PersonaCatalog;
use persona_chat::server::{self, AppState};
use persona_chat::{ChatClient, ClientConfig, FrameStream, RetryPolicy, StreamFrame};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TOKEN: &str = "test-token";

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        chunk_timeout: Duration::from_secs(10),
    }
}

pub fn client(base_url: &str, token: Option<&str>, policy: RetryPolicy) -> ChatClient {
    ChatClient::new(
        ClientConfig {
            base_url: base_url.to_string(),
            policy,
        },
        Arc::new(StaticToken::new(token.map(str::to_string))),
    )
    .expect("valid client config")
}

pub async fn collect(frames: FrameStream) -> Vec<StreamFrame> {
    tokio::time::timeout(Duration::from_secs(10), frames.collect::<Vec<_>>())
        .await
        .expect("stream should finish")
}

pub fn text_of(frames: &[StreamFrame]) -> String {
    frames.iter().map(|frame| frame.text.as_str()).collect()
}

/// Recording callback for `ChatClient::open`.
pub fn recorder() -> (
    Arc<Mutex<Vec<StreamFrame>>>,
    impl FnMut(StreamFrame) + Send + 'static,
) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    (frames, move |frame| sink.lock().unwrap().push(frame))
}

/// Start the real chat server on an ephemeral port.
pub async fn spawn_server(responder: Arc<dyn Responder>) -> (String, Arc<AppState>) {
    let state = AppState::new(
        responder,
        PersonaCatalog::builtin(),
        TOKEN.to_string(),
        Duration::ZERO,
        server::DEFAULT_MAX_SESSIONS,
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, Arc::clone(&state)));
    (format!("http://{addr}"), state)
}

/// What a scripted connection does after reading the request head.
#[derive(Debug, Clone)]
pub enum Script {
    /// 200 event-stream response with these body chunks, then close.
    Respond(Vec<&'static str>),
    /// 200 event-stream response with these body chunks, then hold the
    /// connection open without sending anything else.
    RespondThenStall(Vec<&'static str>),
    /// Close without responding.
    Drop,
    /// Wait, then close without responding.
    DelayThenDrop(Duration),
    /// Respond with an empty body and this status.
    Status(u16),
}

/// A raw HTTP server that plays one script per accepted connection; the last
/// script repeats once the list runs out.
pub struct ScriptedServer {
    pub base_url: String,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    pub async fn start(scripts: Vec<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&connections);
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let script = scripts
                    .get(index)
                    .or_else(|| scripts.last())
                    .cloned()
                    .unwrap_or(Script::Drop);
                let seen = Arc::clone(&seen);
                tokio::spawn(play(socket, script, seen));
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            connections,
            requests,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected connections to arrive");
    }
}

async fn play(mut socket: TcpStream, script: Script, seen: Arc<Mutex<Vec<String>>>) {
    let head = read_head(&mut socket).await;
    if let Some(line) = head.lines().next() {
        seen.lock().unwrap().push(line.to_string());
    }

    match script {
        Script::Respond(chunks) => {
            if write_event_stream(&mut socket, &chunks).await {
                let _ = socket.shutdown().await;
            }
        }
        Script::RespondThenStall(chunks) => {
            if write_event_stream(&mut socket, &chunks).await {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
        Script::Drop => {}
        Script::DelayThenDrop(delay) => {
            tokio::time::sleep(delay).await;
        }
        Script::Status(code) => {
            let response = format!(
                "HTTP/1.1 {code} Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    }
}

/// Write the response head and every chunk; false once the peer has gone.
async fn write_event_stream(socket: &mut TcpStream, chunks: &[&str]) -> bool {
    let header = "HTTP/1.1 200 OK\r\n\
                  content-type: text/event-stream\r\n\
                  cache-control: no-cache\r\n\
                  connection: close\r\n\r\n";
    if socket.write_all(header.as_bytes()).await.is_err() {
        return false;
    }
    for chunk in chunks {
        if socket.write_all(chunk.as_bytes()).await.is_err() {
            return false;
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}
