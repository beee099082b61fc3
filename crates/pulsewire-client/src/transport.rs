//! One WebSocket connection, reported back as session events.

use futures_util::{SinkExt, StreamExt};
use pulsewire_core::{ABNORMAL_CLOSURE, Event, Frame, NORMAL_CLOSURE, TransportId, now_millis};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Instructions from the driver to a transport task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close(u16),
}

/// Select the process-wide rustls crypto provider for `wss://` endpoints.
///
/// A provider installed earlier by the embedding application is kept.
pub(crate) fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Open `url` and pump frames until either side closes.
///
/// Always ends by reporting exactly one `Closed` event for `id`.
pub(crate) async fn run(
    id: TransportId,
    url: String,
    events: mpsc::UnboundedSender<Event>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let code = pump(id, &url, &events, &mut outbound).await;
    let _ = events.send(Event::Closed {
        transport: id,
        code: Some(code),
    });
}

async fn pump(
    id: TransportId,
    url: &str,
    events: &mpsc::UnboundedSender<Event>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> u16 {
    let report_error = |error: String| {
        let _ = events.send(Event::TransportError {
            transport: id,
            error,
        });
    };

    let ws = tokio::select! {
        result = tokio_tungstenite::connect_async(url) => match result {
            Ok((ws, _)) => ws,
            Err(e) => {
                report_error(format!("failed to connect to {url}: {e}"));
                return ABNORMAL_CLOSURE;
            }
        },
        instruction = outbound.recv() => {
            // Abandoned before the handshake finished.
            tracing::debug!(%id, ?instruction, "connect abandoned");
            return NORMAL_CLOSURE;
        }
    };

    let _ = events.send(Event::Opened { transport: id });
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        report_error(e.to_string());
                        return ABNORMAL_CLOSURE;
                    }
                    None => return ABNORMAL_CLOSURE,
                };

                let frame = match msg {
                    Message::Text(text) => Frame::Text(text.as_str().to_owned()),
                    Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
                    Message::Close(frame) => {
                        let code = frame.map_or(ABNORMAL_CLOSURE, |f| u16::from(f.code));
                        tracing::debug!(%id, code, "closed by server");
                        let _ = sink.close().await;
                        return code;
                    }
                    // Protocol-level ping/pong is answered by tungstenite.
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                };
                let _ = events.send(Event::Frame {
                    transport: id,
                    frame,
                    received_at: now_millis(),
                });
            }

            instruction = outbound.recv() => match instruction {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        report_error(e.to_string());
                        return ABNORMAL_CLOSURE;
                    }
                }
                Some(Outbound::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(%id, error = %e, "close frame not delivered");
                    }
                    return code;
                }
                None => {
                    let _ = sink.close().await;
                    return NORMAL_CLOSURE;
                }
            }
        }
    }
}
