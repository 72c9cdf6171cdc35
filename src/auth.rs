use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Synchronous bearer-token accessor. Returns `None` when no usable token exists;
/// expiry and refresh are the source's concern.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A token fixed at startup, e.g. from `--token` or `PERSONA_CHAT_TOKEN`.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token file on every access so a restarted server's new token is
/// picked up without restarting the client.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSource for TokenFile {
    fn token(&self) -> Option<String> {
        let token = std::fs::read_to_string(&self.path).ok()?;
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

pub fn client_token_source(explicit: Option<String>) -> Arc<dyn TokenSource> {
    match explicit {
        Some(token) => Arc::new(StaticToken::new(Some(token))),
        None => Arc::new(TokenFile::new(token_path())),
    }
}

/// Resolve the server's shared token: an explicit value is persisted for local
/// clients, otherwise the stored token is reused or a fresh one is minted.
pub fn resolve_server_token(explicit: Option<String>, path: &Path) -> std::io::Result<String> {
    if let Some(token) = explicit {
        write_token_file(path, &token)?;
        return Ok(token);
    }

    if let Some(token) = TokenFile::new(path).token() {
        return Ok(token);
    }

    let token = Uuid::new_v4().to_string();
    write_token_file(path, &token)?;
    Ok(token)
}

pub fn write_token_file(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(token.as_bytes())?;
    Ok(())
}

pub fn state_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".persona_chat");
    }

    PathBuf::from(".persona_chat")
}

pub fn token_path() -> PathBuf {
    state_dir().join("server.token")
}
