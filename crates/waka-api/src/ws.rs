//! The streaming channel.
//!
//! Each socket gets a writer task that owns the sink and drains a queue.
//! [`WsConnection`] only ever pushes onto that queue, so sends never block and
//! never overlap on one socket. At most [`MAX_PENDING_LINES`] lines may wait in
//! it; a client that falls further behind is closed with [`OVERFLOW_REASON`].
//!
//! Registration with the broadcast and completion registries happens in the
//! upgrade handler, before the `101` response leaves. A client that has seen
//! the handshake complete can therefore not miss the final status.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use waka_core::{CloseReason, Connection, ConnectionId, DeliveryError};
use waka_model::STOP_MESSAGE;

use crate::http::ApiState;

/// Max close-reason payload: 125-byte control frame minus the 2-byte code.
const MAX_CLOSE_REASON: usize = 123;

/// How long to wait for the peer's close reply after we closed.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Lines queued for one socket but not yet written.
pub(crate) const MAX_PENDING_LINES: usize = 4096;

pub(crate) const OVERFLOW_REASON: &str = "Output backlog exceeded";

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

pub(crate) struct WsConnection {
    id: ConnectionId,
    open: Arc<AtomicBool>,
    /// Text frames queued and not yet taken by the writer. Close frames are not counted.
    pending: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsConnection {
    fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: ConnectionId::new(),
            open: Arc::new(AtomicBool::new(true)),
            pending: Arc::new(AtomicUsize::new(0)),
            tx,
        }
    }

    fn shut(&self, code: u16, reason: String) -> Result<(), DeliveryError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Err(DeliveryError::Closed);
        }
        self.tx
            .send(Outbound::Close {
                code,
                reason: truncate_reason(reason),
            })
            .map_err(|_| DeliveryError::Closed)
    }
}

impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        if self.pending.fetch_add(1, Ordering::AcqRel) >= MAX_PENDING_LINES {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(connection = %self.id, limit = MAX_PENDING_LINES, "stream client fell behind; closing");
            if let Err(e) = self.shut(close_code::POLICY, OVERFLOW_REASON.to_string()) {
                debug!(connection = %self.id, error = %e, "overflow close failed");
            }
            return Err(DeliveryError::Overflow);
        }
        self.tx.send(Outbound::Text(text.to_string())).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            DeliveryError::Closed
        })
    }

    fn close(&self, reason: CloseReason) -> Result<(), DeliveryError> {
        let (code, reason) = match reason {
            CloseReason::Completed(status) => (close_code::NORMAL, status.to_string()),
            CloseReason::Rejected(why) => (close_code::UNSUPPORTED, why),
        };
        self.shut(code, reason)
    }
}

/// Drops the connection from both registries however the session ends,
/// including an upgrade that never completes.
struct Registration {
    state: ApiState,
    conn: Arc<WsConnection>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.conn.open.store(false, Ordering::Release);
        let c = &self.state.coordinator;
        c.logs().unsubscribe(self.conn.id);
        c.completion().remove_observer(self.conn.id);
        debug!(connection = %self.conn.id, "stream client detached");
    }
}

/// GET /exec/out
pub(crate) async fn stream_output(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Arc::new(WsConnection::new(tx));

    let c = &state.coordinator;
    c.logs().subscribe(conn.clone());
    c.completion().add_observer(conn.clone());
    info!(connection = %conn.id, "stream client attached");

    let registration = Registration { state, conn };
    ws.on_upgrade(move |socket| session(socket, rx, registration))
}

async fn session(socket: WebSocket, rx: mpsc::UnboundedReceiver<Outbound>, reg: Registration) {
    let (sink, mut inbound) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        sink,
        rx,
        Arc::clone(&reg.conn.open),
        Arc::clone(&reg.conn.pending),
    ));

    loop {
        tokio::select! {
            _ = &mut writer => {
                linger(&mut inbound).await;
                break;
            }
            msg = inbound.next() => match msg {
                Some(Ok(Message::Text(text))) => on_text(&reg, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => trace!(connection = %reg.conn.id, "ignoring non-text frame"),
                Some(Err(e)) => {
                    debug!(connection = %reg.conn.id, error = %e, "stream read failed");
                    break;
                }
            },
        }
    }
    drop(reg);
    writer.abort();
}

fn on_text(reg: &Registration, text: &str) {
    if text == STOP_MESSAGE {
        info!(connection = %reg.conn.id, "stop requested by client");
        reg.state.coordinator.stop();
        return;
    }
    warn!(connection = %reg.conn.id, message = %text, "invalid message received");
    let reason = CloseReason::Rejected(format!("Invalid message received: {text}"));
    if let Err(e) = reg.conn.close(reason) {
        debug!(connection = %reg.conn.id, error = %e, "close after invalid message failed");
    }
}

/// Sole owner of the sink. Stops after the close frame, so nothing can follow it.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(out) = rx.recv().await {
        let frame = match out {
            Outbound::Text(text) => {
                pending.fetch_sub(1, Ordering::AcqRel);
                Message::Text(text.into())
            }
            Outbound::Close { code, reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                if let Err(e) = sink.send(close).await {
                    debug!(error = %e, "close frame not delivered");
                }
                break;
            }
        };
        if let Err(e) = sink.send(frame).await {
            debug!(error = %e, "stream write failed");
            break;
        }
    }
    open.store(false, Ordering::Release);
}

/// Give the peer a moment to answer our close frame.
async fn linger(inbound: &mut SplitStream<WebSocket>) {
    let _ = tokio::time::timeout(CLOSE_LINGER, async {
        while let Some(Ok(msg)) = inbound.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await;
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use waka_core::LogBroadcast;
    use waka_model::ExecStatus;

    #[test]
    fn short_reason_is_untouched() {
        assert_eq!(truncate_reason("0".into()), "0");
    }

    #[test]
    fn long_reason_is_cut_on_char_boundary() {
        let ascii = "x".repeat(200);
        assert_eq!(truncate_reason(ascii).len(), MAX_CLOSE_REASON);

        // 'é' is two bytes; 62 of them straddle the limit
        let wide = "é".repeat(62);
        let cut = truncate_reason(wide);
        assert_eq!(cut.len(), 122);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn connection_queues_text_then_close_and_nothing_after() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new(tx);

        conn.send_text("line").unwrap();
        conn.close(CloseReason::Completed(ExecStatus::new(2))).unwrap();
        assert_eq!(conn.send_text("late"), Err(DeliveryError::Closed));
        assert_eq!(
            conn.close(CloseReason::Completed(ExecStatus::SUCCESS)),
            Err(DeliveryError::Closed)
        );

        assert!(matches!(rx.recv().await, Some(Outbound::Text(t)) if t == "line"));
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code, reason }) if code == close_code::NORMAL && reason == "2"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_close_uses_unsupported_code() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new(tx);
        conn.close(CloseReason::Rejected("Invalid message received: hi".into()))
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code, reason })
                if code == close_code::UNSUPPORTED && reason == "Invalid message received: hi"
        ));
    }

    #[test]
    fn stalled_reader_is_closed_at_the_backlog_limit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new(tx);

        for i in 0..MAX_PENDING_LINES {
            conn.send_text(&format!("line {i}")).unwrap();
        }
        assert_eq!(conn.send_text("one too many"), Err(DeliveryError::Overflow));
        assert!(!conn.is_open());
        assert_eq!(conn.send_text("later"), Err(DeliveryError::Closed));
        assert_eq!(
            conn.close(CloseReason::Completed(ExecStatus::SUCCESS)),
            Err(DeliveryError::Closed)
        );

        let mut texts = 0;
        let close = loop {
            match rx.try_recv() {
                Ok(Outbound::Text(_)) => texts += 1,
                Ok(Outbound::Close { code, reason }) => break (code, reason),
                Err(e) => panic!("queue ended without a close frame: {e:?}"),
            }
        };
        assert_eq!(texts, MAX_PENDING_LINES);
        assert_eq!(close, (close_code::POLICY, OVERFLOW_REASON.to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stalled_subscriber_does_not_hold_back_the_broadcast() {
        let logs = LogBroadcast::new();
        let (stalled_tx, mut stalled_rx) = mpsc::unbounded_channel();
        let stalled = Arc::new(WsConnection::new(stalled_tx));
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let live = Arc::new(WsConnection::new(live_tx));
        logs.subscribe(stalled.clone());
        logs.subscribe(live.clone());

        let total = MAX_PENDING_LINES * 2;
        let mut live_seen = 0;
        for i in 0..total {
            logs.publish(format!("line {i}"));
            // the live client keeps up, as its writer task would
            while let Ok(Outbound::Text(_)) = live_rx.try_recv() {
                live.pending.fetch_sub(1, Ordering::AcqRel);
                live_seen += 1;
            }
        }

        assert_eq!(live_seen, total);
        assert!(live.is_open());
        assert!(!stalled.is_open());

        let mut queued = 0;
        while let Ok(out) = stalled_rx.try_recv() {
            queued += 1;
            if let Outbound::Close { code, .. } = out {
                assert_eq!(code, close_code::POLICY);
            }
        }
        assert_eq!(queued, MAX_PENDING_LINES + 1);
    }

    #[test]
    fn dropped_receiver_reads_as_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new(tx);
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.send_text("x"), Err(DeliveryError::Closed));
    }
}
