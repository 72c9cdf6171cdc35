//! Stream initiator: one server-push connection per logical send, wrapped in the
//! bounded reconnect loop.
//!
//! Every outcome, including transport failures, reaches the caller as a
//! [`StreamFrame`]. The caller sees zero or more fragments followed by exactly
//! one terminal frame, unless it disposes the stream first.

pub mod decoder;
pub mod policy;

use crate::error::ClientError;
use crate::protocol::{StreamFrame, StreamRequest};
use crate::sse::SseParser;
use decoder::decode;
use futures::{Stream, StreamExt};
use policy::{ConnectionAttempt, ConnectionState, Recovery, RetryPolicy};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client as HttpClient, Url};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

type FrameCallback = Box<dyn FnMut(StreamFrame) + Send>;

/// Serialises callback invocations and lets disposal revoke the callback.
///
/// The callback slot is emptied after a terminal frame or on dispose, so no
/// invocation can follow either.
struct Delivery {
    callback: Mutex<Option<FrameCallback>>,
}

impl Delivery {
    fn new(callback: FrameCallback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<FrameCallback>> {
        self.callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` once the stream is closed to the caller.
    fn deliver(&self, frame: StreamFrame) -> bool {
        let mut slot = self.slot();
        let Some(callback) = slot.as_mut() else {
            return false;
        };

        let terminal = frame.is_terminal();
        callback(frame);
        if terminal {
            slot.take();
        }
        !terminal
    }

    fn close(&self) {
        self.slot().take();
    }

    fn is_open(&self) -> bool {
        self.slot().is_some()
    }
}

/// Disposer for an open stream.
///
/// Dropping the handle disposes the stream. Must not be disposed from inside the
/// frame callback itself.
#[must_use = "dropping a StreamHandle closes the stream"]
pub struct StreamHandle {
    delivery: Arc<Delivery>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Close the connection, cancel any pending reconnect, and guarantee no
    /// further callback invocations once this returns.
    pub fn dispose(&mut self) {
        self.delivery.close();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("chat stream disposed");
        }
    }

    /// True once a terminal frame has been delivered or the handle was disposed.
    pub fn is_closed(&self) -> bool {
        !self.delivery.is_open()
    }

    /// Wait for the stream to reach its terminal frame.
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Frames of one logical send as an async sequence. Ends after the terminal
/// frame; dropping it disposes the underlying stream.
pub struct FrameStream {
    frames: UnboundedReceiverStream<StreamFrame>,
    _handle: StreamHandle,
}

impl Stream for FrameStream {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

/// Everything a connection needs besides the request itself.
#[derive(Clone)]
pub(crate) struct StreamTarget {
    pub(crate) http: HttpClient,
    pub(crate) url: Url,
    pub(crate) policy: RetryPolicy,
}

/// Deliver a single terminal frame synchronously without touching the network.
pub(crate) fn reject<F>(frame: StreamFrame, on_frame: F) -> StreamHandle
where
    F: FnMut(StreamFrame) + Send + 'static,
{
    let delivery = Arc::new(Delivery::new(Box::new(on_frame)));
    delivery.deliver(frame);
    StreamHandle {
        delivery,
        task: None,
    }
}

/// Spawn the connection loop on the current tokio runtime.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub(crate) fn spawn<F>(target: StreamTarget, request: StreamRequest, on_frame: F) -> StreamHandle
where
    F: FnMut(StreamFrame) + Send + 'static,
{
    let delivery = Arc::new(Delivery::new(Box::new(on_frame)));
    let task = tokio::spawn(run(target, request, Arc::clone(&delivery)));
    StreamHandle {
        delivery,
        task: Some(task),
    }
}

pub(crate) fn channel<F>(open: F) -> FrameStream
where
    F: FnOnce(Box<dyn FnMut(StreamFrame) + Send>) -> StreamHandle,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let handle = open(Box::new(move |frame| {
        let _ = sender.send(frame);
    }));
    FrameStream {
        frames: UnboundedReceiverStream::new(receiver),
        _handle: handle,
    }
}

enum AttemptEnd {
    Closed,
    TransportError(ClientError),
}

async fn run(target: StreamTarget, request: StreamRequest, delivery: Arc<Delivery>) {
    let mut attempt = ConnectionAttempt::new(request.issued_at);
    info!(
        persona = ?request.persona_id,
        session = ?request.session_id,
        "opening chat stream"
    );

    loop {
        let err = match connect_once(&target, &mut attempt, &delivery).await {
            AttemptEnd::Closed => {
                attempt.close();
                debug!(received = attempt.buffer().len(), "chat stream closed");
                return;
            }
            AttemptEnd::TransportError(err) => err,
        };

        match target.policy.on_transport_error(&attempt, Instant::now()) {
            Recovery::Retry { delay } => {
                let phase = match attempt.state() {
                    ConnectionState::Streaming => "dropped mid-reply",
                    _ => "failed before any frame",
                };
                warn!(
                    error = %err,
                    phase,
                    retry = attempt.retry_count() + 1,
                    max_retries = target.policy.max_retries,
                    "chat stream transport error; reconnecting"
                );
                if !attempt.buffer().is_empty() {
                    warn!(
                        received = attempt.buffer().len(),
                        "reconnect restarts the response; the caller may see repeated text"
                    );
                }
                attempt.begin_retry();
                tokio::time::sleep(delay).await;
                attempt.reconnect();
            }
            Recovery::GiveUp(frame) => {
                warn!(
                    error = %err,
                    retries = attempt.retry_count(),
                    reason = frame.error.as_deref().unwrap_or_default(),
                    "chat stream failed"
                );
                attempt.close();
                delivery.deliver(frame);
                return;
            }
        }
    }
}

async fn connect_once(
    target: &StreamTarget,
    attempt: &mut ConnectionAttempt,
    delivery: &Delivery,
) -> AttemptEnd {
    let stalled = || AttemptEnd::TransportError(ClientError::Stalled(target.policy.chunk_timeout));

    let request = target
        .http
        .get(target.url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send();
    let response = match timeout_at(read_deadline(target, attempt), request).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => return AttemptEnd::TransportError(err.into()),
        Err(_) => return stalled(),
    };

    let status = response.status();
    if !status.is_success() {
        return AttemptEnd::TransportError(ClientError::Status(status));
    }

    let mut body = response.bytes_stream();
    let mut parser = SseParser::default();

    loop {
        let chunk = match timeout_at(read_deadline(target, attempt), body.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => return AttemptEnd::TransportError(err.into()),
            Ok(None) => return AttemptEnd::TransportError(ClientError::UnexpectedEof),
            Err(_) => return stalled(),
        };

        for payload in parser.feed(&chunk) {
            let decoded = decode(&payload, attempt, Instant::now());

            if let Some(fragment) = decoded.fragment {
                if !delivery.deliver(fragment) {
                    return AttemptEnd::Closed;
                }
            }
            if let Some(terminal) = decoded.terminal {
                delivery.deliver(terminal);
                return AttemptEnd::Closed;
            }
        }
    }
}

/// Reads give up once the stream has been silent for the whole chunk timeout.
/// Keep-alive comments do not count as frames.
fn read_deadline(target: &StreamTarget, attempt: &ConnectionAttempt) -> Instant {
    attempt.last_frame_at() + target.policy.chunk_timeout
}
