use crate::agent::{DEFAULT_COMPLETIONS_URL, DEFAULT_MODEL};
use crate::client::ClientConfig;
use crate::server::DEFAULT_MAX_SESSIONS;
use crate::stream::policy::RetryPolicy;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "persona-chat",
    version,
    about = "Chat with AI personas over a streaming connection"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the chat server.
    Serve(ServeArgs),
    /// Send one message and print the streamed reply.
    Send(SendArgs),
    /// Interactive chat in the terminal.
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "PERSONA_CHAT_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: String,

    /// Shared bearer token; generated and stored when omitted.
    #[arg(long, env = "PERSONA_CHAT_TOKEN")]
    pub token: Option<String>,

    /// JSON file with the persona catalog; built-in personas are used otherwise.
    #[arg(long, env = "PERSONA_CHAT_PERSONAS")]
    pub personas: Option<PathBuf>,

    /// Answer with the offline echo responder instead of a completion API.
    #[arg(long)]
    pub offline: bool,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "PERSONA_CHAT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "PERSONA_CHAT_COMPLETIONS_URL", default_value = DEFAULT_COMPLETIONS_URL)]
    pub completions_url: String,

    /// Pause between streamed chunks.
    #[arg(long, default_value_t = 50)]
    pub chunk_delay_ms: u64,

    /// Chat histories kept in memory; the least recently used is dropped first.
    #[arg(long, env = "PERSONA_CHAT_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,
}

impl ServeArgs {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    #[arg(long, env = "PERSONA_CHAT_URL", default_value = "http://127.0.0.1:8000")]
    pub url: String,

    /// Bearer token; read from the server's token file when omitted.
    #[arg(long, env = "PERSONA_CHAT_TOKEN")]
    pub token: Option<String>,

    /// Persona (character) id to talk to.
    #[arg(long)]
    pub persona: Option<i64>,

    /// Continue an existing chat session.
    #[arg(long)]
    pub session: Option<String>,

    #[command(flatten)]
    pub retry: RetryArgs,
}

impl ConnectArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.url.clone(),
            policy: self.retry.policy(),
        }
    }
}

#[derive(Debug, Args)]
pub struct RetryArgs {
    #[arg(long, default_value_t = crate::stream::policy::MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub chunk_timeout_ms: u64,
}

impl RetryArgs {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
        }
    }
}

#[derive(Debug, Args)]
pub struct SendArgs {
    pub message: String,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}
