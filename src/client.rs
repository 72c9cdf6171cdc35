use crate::auth::TokenSource;
use crate::error::ClientError;
use crate::protocol::{AUTH_REQUIRED, StreamFrame, StreamRequest};
use crate::stream::policy::RetryPolicy;
use crate::stream::{self, FrameStream, StreamHandle, StreamTarget};
use reqwest::{Client as HttpClient, Url};
use std::sync::Arc;
use tracing::warn;

pub struct ClientConfig {
    pub base_url: String,
    pub policy: RetryPolicy,
}

#[derive(Clone)]
pub struct ChatClient {
    endpoint: Url,
    http: HttpClient,
    tokens: Arc<dyn TokenSource>,
    policy: RetryPolicy,
}

impl ChatClient {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&config.base_url);
        let endpoint = Url::parse(&format!("{}/chat", base_url)).map_err(|err| {
            ClientError::InvalidUrl {
                url: config.base_url.clone(),
                reason: err.to_string(),
            }
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: config.base_url,
                reason: "expected an http or https URL".to_string(),
            });
        }

        Ok(Self {
            endpoint,
            http: HttpClient::new(),
            tokens,
            policy: config.policy,
        })
    }

    /// `GET /chat` URL for a request, with the bearer token as a query parameter.
    pub fn chat_url(&self, request: &StreamRequest, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(request.query_pairs(token));
        url
    }

    /// Open a stream for one logical send and deliver frames to `on_frame`.
    ///
    /// Without a token the callback receives `Authentication required` before this
    /// returns and no connection is made.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn open<F>(&self, request: StreamRequest, on_frame: F) -> StreamHandle
    where
        F: FnMut(StreamFrame) + Send + 'static,
    {
        let Some(token) = self.tokens.token() else {
            warn!("no auth token available; not opening chat stream");
            return stream::reject(StreamFrame::failed(AUTH_REQUIRED), on_frame);
        };

        let target = StreamTarget {
            http: self.http.clone(),
            url: self.chat_url(&request, &token),
            policy: self.policy,
        };
        stream::spawn(target, request, on_frame)
    }

    /// Like [`ChatClient::open`], exposed as an async sequence of frames.
    pub fn stream(&self, request: StreamRequest) -> FrameStream {
        stream::channel(|on_frame| self.open(request, on_frame))
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}
