//! Connection management
//!
//! The charge point is a WebSocket client. A connection is an unbounded
//! outbox drained by a writer task plus a reader task that parses inbound
//! frames into the correlation layer. Transport errors are reported but only
//! a close tears the connection down; a non-manual close reconnects with a
//! fixed backoff, boots again and replays every pending call.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::params::keys;
use crate::domain::OcppVersion;
use crate::error::SimulatorError;
use crate::notifications::Notice;
use crate::support::Frame;

use super::timers::TimerKind;
use super::ChargePoint;

impl ChargePoint {
    /// Open an authenticated connection to the central system.
    ///
    /// With `retry_delay > 0` failures are retried every `retry_delay`
    /// seconds until the connection is up or a manual close aborts the
    /// attempt; with `retry_delay == 0` the first failure is returned.
    pub fn connect(&self, retry_delay: u64) -> BoxFuture<'_, Result<(), SimulatorError>> {
        // Returns a boxed future: connect -> open_socket -> reader task ->
        // on_connection_closed -> connect forms an async opaque-type cycle,
        // and boxing this edge breaks it.
        async move {
            self.set_manual_close(false);

            loop {
                self.notify(Notice::message("Trying to connect..."));
                match self.open_socket().boxed().await {
                    Ok(()) => {
                        self.notify(Notice::success(format!(
                            "CP #{} has successfully connected to the backend",
                            self.serial()
                        )));
                        return Ok(());
                    }
                    Err(e) => {
                        self.notify(Notice::err(format!("Connection error: {e}")));
                        if retry_delay == 0 {
                            return Err(e);
                        }
                        self.notify(Notice::err(format!(
                            "Unable to connect to backend. Will retry after {retry_delay}s"
                        )));
                        tokio::time::sleep(std::time::Duration::from_secs(retry_delay)).await;
                        if self.manual_close() {
                            return Err(SimulatorError::ConnectAborted);
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Request a graceful close and suppress auto-reconnect. Reported as a
    /// no-op when there is no connection.
    pub fn disconnect(&self) {
        match self.router().outbox() {
            Some(outbox) => {
                self.set_manual_close(true);
                self.notify(Notice::message("Gracefully closing the connection..."));
                // The writer task turns the closed channel into a Close frame.
                drop(outbox);
                self.router().detach();
            }
            None => self.notify(Notice::err("Already disconnected")),
        }
    }

    async fn open_socket(&self) -> Result<(), SimulatorError> {
        let backend = self.backend().clone();
        let url = format!(
            "{}/{}",
            backend.url.trim_end_matches('/'),
            self.serial()
        );

        // Basic credentials: serial number + hex-decoded shared secret.
        let key_bytes = hex::decode(backend.auth_key.trim())?;
        let key = String::from_utf8_lossy(&key_bytes);
        let credentials = BASE64.encode(format!("{}:{}", self.serial(), key));
        let subprotocol = self.get_param(keys::OCPP_VERSION, OcppVersion::V15.as_tag());

        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            subprotocol
                .parse()
                .map_err(|_| SimulatorError::InvalidHeader(subprotocol.clone()))?,
        );
        request.headers_mut().insert(
            "Authorization",
            format!("Basic {credentials}")
                .parse()
                .map_err(|_| SimulatorError::InvalidHeader("Authorization".into()))?,
        );

        let (socket, response) = connect_async(request).await?;
        debug!(serial = %self.serial(), status = %response.status(), "websocket established");
        let (mut sink, mut stream) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.router().attach(tx);

        // Writer: drain the outbox; once it closes, say goodbye.
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("websocket send failed: {e}");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.flush().await;
        });

        // Reader: parse frames until the peer closes or the stream dies.
        let cp = self.handle();
        tokio::spawn(async move {
            let mut close_reason = String::from("connection lost");
            while let Some(item) = stream.next().await {
                match item {
                    Ok(Message::Text(text)) => cp.handle_incoming(&text),
                    Ok(Message::Close(frame)) => {
                        close_reason = frame
                            .map(|f| format!("({}) {}", f.code, f.reason))
                            .unwrap_or_else(|| "(no close frame)".to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        cp.notify(Notice::err(format!(
                            "Connection error: it did connect earlier: {e}"
                        )));
                        if is_fatal_ws_error(&e) {
                            close_reason = e.to_string();
                            break;
                        }
                    }
                }
            }
            cp.on_connection_closed(&close_reason).boxed().await;
        });

        Ok(())
    }

    /// Parse one inbound message and hand it to the correlation layer.
    pub fn handle_incoming(&self, text: &str) {
        match Frame::parse(text) {
            Ok(frame) => {
                let cp = self.handle();
                self.router().dispatch(&cp, frame);
            }
            Err(e) => {
                warn!(serial = %self.serial(), "unparseable frame: {e}");
            }
        }
    }

    /// Close handling: drop the connection, stop heartbeats and, unless the
    /// close was user-requested, reconnect, boot and replay pending calls.
    pub(crate) async fn on_connection_closed(&self, reason: &str) {
        self.notify(Notice::err(format!(
            "WebSocket connection closed: {reason}"
        )));
        self.router().detach();
        self.timers().cancel(TimerKind::Heartbeat);

        if self.manual_close() {
            return;
        }

        let cp = self.handle();
        let delay = self.backend().reconnect_delay_secs;
        self.timers().register(
            TimerKind::Reconnect,
            tokio::spawn(async move {
                if cp.connect(delay).await.is_ok() {
                    cp.boot().await;
                    // The gap must not lose callers: replay what is pending.
                    cp.resend_pending().await;
                }
            }),
        );
    }
}

/// Read errors after which the stream is not worth polling again.
fn is_fatal_ws_error(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Tls(_)
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use crate::notifications::Notice;

    #[tokio::test]
    async fn disconnect_without_connection_is_a_reported_noop() {
        let cp = charge_point(&["AA11"], &[]);
        let mut sub = cp.events().subscribe();

        cp.disconnect();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.notice.kind(), "err");
        match event.notice {
            Notice::Err(text) => assert_eq!(text, "Already disconnected"),
            other => panic!("unexpected notice {other:?}"),
        }
        assert!(!cp.manual_close(), "a no-op disconnect must not set manual close");
    }

    #[tokio::test]
    async fn disconnect_sets_manual_close_and_detaches() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);

        cp.disconnect();

        assert!(cp.manual_close());
        assert!(!cp.is_connected());
    }

    #[tokio::test]
    async fn close_cancels_heartbeat_and_schedules_reconnect() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);
        cp.set_accepted(true);

        cp.on_connection_closed("(1006) abnormal").await;

        assert!(!cp.is_connected());
        assert!(cp.timers().is_armed(super::super::timers::TimerKind::Reconnect));
        cp.destroy();
    }

    #[tokio::test]
    async fn manual_close_suppresses_reconnect() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);
        cp.set_manual_close(true);

        cp.on_connection_closed("(1000) normal").await;

        assert!(!cp.timers().is_armed(super::super::timers::TimerKind::Reconnect));
    }
}
