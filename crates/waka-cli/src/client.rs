use std::{future::Future, io::Write, str::FromStr};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::CloseFrame,
    },
};
use waka_model::{ExecStatus, STOP_MESSAGE, TOKEN_HEADER};

use crate::{config::CliConfig, error::ClientError};

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The run finished with this status.
    Finished(ExecStatus),
    /// The service refused the submission.
    Rejected { status: u16, body: String },
    /// The service closed the stream without a numeric status.
    Aborted(String),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Finished(status) => status.code(),
            Outcome::Rejected { .. } => 255,
            Outcome::Aborted(_) => 1,
        }
    }

    fn from_close(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => match ExecStatus::from_str(frame.reason.as_str()) {
                Ok(status) => Outcome::Finished(status),
                Err(_) => Outcome::Aborted(frame.reason.to_string()),
            },
            None => Outcome::Aborted("connection closed without a status".into()),
        }
    }
}

/// Submit `cfg`'s command, copy its output to `out` and wait for the status.
///
/// The stream is opened before the submission so the final status cannot be
/// missed. When `interrupt` resolves, a single `STOP` is sent.
pub async fn run<W, I>(cfg: &CliConfig, out: &mut W, interrupt: I) -> Result<Outcome, ClientError>
where
    W: Write,
    I: Future<Output = ()>,
{
    let token = cfg.resolve_token()?;
    let header = HeaderValue::from_str(&token).map_err(|_| ClientError::InvalidToken)?;

    let mut req = cfg.stream_url().into_client_request()?;
    req.headers_mut().insert(TOKEN_HEADER, header);
    let (mut ws, _) = connect_async(req).await?;

    let resp = reqwest::Client::new()
        .post(cfg.exec_url())
        .header(TOKEN_HEADER, &token)
        .body(cfg.command_line())
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let _ = ws.close(None).await;
        return Ok(Outcome::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    tokio::pin!(interrupt);
    let mut stop_sent = false;
    loop {
        tokio::select! {
            _ = &mut interrupt, if !stop_sent => {
                stop_sent = true;
                ws.send(Message::Text(STOP_MESSAGE.into())).await?;
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(line))) => {
                    writeln!(out, "{}", line.as_str())?;
                    out.flush()?;
                }
                Some(Ok(Message::Close(frame))) => return Ok(Outcome::from_close(frame)),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(Outcome::from_close(None)),
            },
        }
    }
}
