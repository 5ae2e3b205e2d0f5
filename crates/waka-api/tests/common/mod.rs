#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};
use waka_api::{ApiState, HttpApi};
use waka_core::{
    CommandRunner, CompletionRegistry, ExecutionCoordinator, LogBroadcast, RunnerError,
    StopSignal, TokenAuthenticator,
};
use waka_model::{CommandLine, EXEC_PATH, EXEC_STREAM_PATH, ExecStatus, HEALTH_PATH, TOKEN_HEADER};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Publishes `$ <command>` and returns the code from `exit N` (default 0).
/// While held, blocks until released or stopped.
pub struct FakeRunner {
    logs: Arc<LogBroadcast>,
    held: Mutex<bool>,
    cv: Condvar,
    pub stops: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn new(logs: Arc<LogBroadcast>) -> Arc<Self> {
        Arc::new(Self {
            logs,
            held: Mutex::new(false),
            cv: Condvar::new(),
            stops: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.cv.notify_all();
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &CommandLine, signal: &StopSignal) -> Result<ExecStatus, RunnerError> {
        self.commands.lock().unwrap().push(command.to_string());
        self.logs.publish(format!("$ {command}"));

        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.cv.wait(held).unwrap();
        }
        drop(held);

        if signal.is_raised() {
            return Ok(ExecStatus::CANCELLED);
        }
        if command.as_str() == "fail" {
            return Err(RunnerError::Other("runner blew up".into()));
        }
        let code = command
            .as_str()
            .strip_prefix("exit ")
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(0);
        Ok(ExecStatus::new(code))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.release();
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub token: String,
    pub runner: Arc<FakeRunner>,
    pub coordinator: ExecutionCoordinator,
    http: reqwest::Client,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let auth = Arc::new(TokenAuthenticator::new(dir.path()));
        auth.initialize().unwrap();
        let token = auth.token().unwrap().to_string();

        let logs = Arc::new(LogBroadcast::new());
        let runner = FakeRunner::new(Arc::clone(&logs));
        let coordinator = ExecutionCoordinator::new(
            runner.clone(),
            logs,
            Arc::new(CompletionRegistry::new()),
        );

        let app = HttpApi::new(ApiState::new(coordinator.clone(), auth)).router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            token,
            runner,
            coordinator,
            http: reqwest::Client::new(),
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn submit(&self, command: &str) -> reqwest::Response {
        self.submit_with(Some(&self.token), command).await
    }

    pub async fn submit_with(&self, token: Option<&str>, command: &str) -> reqwest::Response {
        let mut req = self.http.post(self.url(EXEC_PATH)).body(command.to_string());
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        req.send().await.unwrap()
    }

    pub async fn health(&self) -> serde_json::Value {
        self.http
            .get(self.url(HEALTH_PATH))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    pub async fn connect(&self) -> Ws {
        self.connect_with(Some(&self.token)).await.unwrap()
    }

    pub async fn connect_with(
        &self,
        token: Option<&str>,
    ) -> Result<Ws, tokio_tungstenite::tungstenite::Error> {
        let url = format!("ws://{}{}", self.addr, EXEC_STREAM_PATH);
        let mut req = url.into_client_request()?;
        if let Some(token) = token {
            req.headers_mut().insert(TOKEN_HEADER, token.parse().unwrap());
        }
        connect_async(req).await.map(|(ws, _)| ws)
    }

    pub async fn wait_for_state(&self, want: &str) {
        within(async {
            loop {
                if self.health().await["execution"] == want {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Text(String),
    Closed { code: u16, reason: String },
}

/// Read until the server closes; text frames in order, then the close frame.
pub async fn drain(ws: &mut Ws) -> Vec<Received> {
    within(async {
        let mut out = Vec::new();
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(t)) => out.push(Received::Text(t.to_string())),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    out.push(Received::Closed { code, reason });
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        out
    })
    .await
}

pub async fn next_text(ws: &mut Ws) -> String {
    within(async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return t.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
    .await
}

pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}
