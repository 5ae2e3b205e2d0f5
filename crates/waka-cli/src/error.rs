use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot read token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no token given and no default token file location")]
    NoToken,

    #[error("token contains characters not allowed in a header")]
    InvalidToken,

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("output: {0}")]
    Output(#[from] std::io::Error),
}

impl ClientError {
    /// Process exit code for failures that never reached a run.
    pub fn exit_code(&self) -> i32 {
        3
    }
}
