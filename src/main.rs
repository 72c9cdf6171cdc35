use anyhow::{Context, bail};
use clap::Parser;
use futures::StreamExt;
use persona_chat::agent::{CompletionAgent, EchoResponder, Responder};
use persona_chat::auth::{client_token_source, resolve_server_token, token_path};
use persona_chat::config::{ChatArgs, Cli, Command, SendArgs, ServeArgs};
use persona_chat::logging::{self, LogTarget};
use persona_chat::personas::PersonaCatalog;
use persona_chat::server::{self, ServerConfig};
use persona_chat::{ChatClient, Conversation, StreamRequest, ui};
use std::io::Write;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let verbosity = cli.verbose;

    match cli.command {
        Command::Serve(args) => {
            let _guard = logging::init(verbosity, LogTarget::Stderr)?;
            serve(args).await
        }
        Command::Send(args) => {
            let _guard = logging::init(verbosity, LogTarget::Stderr)?;
            send(args).await
        }
        Command::Chat(args) => {
            let _guard = logging::init(verbosity, LogTarget::File(logging::default_log_path()))?;
            chat(args)
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let path = token_path();
    let auth_token = resolve_server_token(args.token.clone(), &path)
        .with_context(|| format!("failed to resolve auth token at {}", path.display()))?;
    info!(path = %path.display(), "auth token stored");

    let personas = match &args.personas {
        Some(file) => PersonaCatalog::load(file)?,
        None => PersonaCatalog::builtin(),
    };
    info!(personas = personas.len(), "persona catalog loaded");

    let responder: Arc<dyn Responder> = if args.offline {
        Arc::new(EchoResponder)
    } else {
        let Some(api_key) = args.api_key.clone() else {
            return Err(persona_chat::ServerError::MissingApiKey.into());
        };
        Arc::new(
            CompletionAgent::new(api_key)
                .with_url(args.completions_url.clone())
                .with_model(args.model.clone()),
        )
    };

    let config = ServerConfig {
        listen: args.listen.clone(),
        auth_token,
        chunk_delay: args.chunk_delay(),
        max_sessions: args.max_sessions,
    };
    server::run(config, responder, personas).await?;
    Ok(())
}

async fn send(args: SendArgs) -> anyhow::Result<()> {
    let connect = args.connect;
    let client = ChatClient::new(
        connect.client_config(),
        client_token_source(connect.token.clone()),
    )?;
    let request = StreamRequest::new(args.message)?
        .with_persona(connect.persona)
        .with_session(connect.session.clone());

    let mut frames = client.stream(request);
    let mut stdout = std::io::stdout();
    while let Some(frame) = frames.next().await {
        if let Some(error) = frame.error {
            writeln!(stdout)?;
            bail!(error);
        }

        write!(stdout, "{}", frame.text)?;
        stdout.flush()?;

        if frame.done {
            writeln!(stdout)?;
            if let Some(session) = frame.session_id {
                eprintln!("chat_session: {session}");
            }
        }
    }

    Ok(())
}

fn chat(args: ChatArgs) -> anyhow::Result<()> {
    let connect = args.connect;
    let client = ChatClient::new(
        connect.client_config(),
        client_token_source(connect.token.clone()),
    )?;
    let conversation = Conversation::new(connect.persona, connect.session.clone());

    let session = ui::run_tui(client, conversation).map_err(|err| anyhow::anyhow!(err))?;
    if let Some(session) = session {
        println!("Resume this chat with --session {session}");
    }
    Ok(())
}
