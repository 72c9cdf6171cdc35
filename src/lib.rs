//! Persona chat: a streaming chat server and the client transport that talks to it.
//!
//! The client opens one server-sent-events connection per message, decodes each
//! `data:` payload into a [`StreamFrame`], and reconnects a bounded number of
//! times on transport failures. Callers observe every outcome through frames:
//! zero or more text fragments, then exactly one terminal frame.

pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod personas;
pub mod protocol;
pub mod server;
pub mod sse;
pub mod stream;
pub mod ui;

pub use client::{ChatClient, ClientConfig};
pub use conversation::Conversation;
pub use error::{ClientError, ServerError};
pub use protocol::{StreamFrame, StreamRequest};
pub use stream::policy::RetryPolicy;
pub use stream::{FrameStream, StreamHandle};
