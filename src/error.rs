use std::{io, path::PathBuf};
use thiserror::Error;

/// Failures while establishing who this device is.  Always fatal.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("credentials in {0} are not of the form PREFIX.SECRET")]
    MalformedCredentials(PathBuf),
    #[error("{0} is empty")]
    Empty(PathBuf),
}

/// Control-plane failures.  Recovered by retrying on the next tick.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid url {0}")]
    Url(String),
    #[error("invalid value for header {0}")]
    Header(&'static str),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no frame received for {0:?}")]
    Idle(std::time::Duration),
    #[error("session closed by peer")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("dbus: {0}")]
    DBus(#[from] dbus::Error),
    #[error("job for {unit} finished with result {result:?}")]
    JobFailed { unit: String, result: String },
    #[error("supervisor worker for {0} went away")]
    Worker(String),
}

/// A subprocess that could not be run or exited unsuccessfully
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected line {0:?}")]
    Line(String),
    #[error("bad number {0:?}")]
    Number(String),
}

/// Errors that abort a config application pass.  The applicator treats
/// every one of these as fatal.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("jack: {0}")]
    Jack(#[from] jack::Error),
}
