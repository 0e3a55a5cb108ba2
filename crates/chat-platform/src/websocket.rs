use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use chat_core::{ReadyState, SessionId};

use crate::{
    PushTransport, SharedReadyState, TransportError, TransportEvent, TransportEventSender,
    TransportHandle, TransportSignal,
};

/// Push transport over a websocket; the channel token travels as the
/// `token` query parameter.
#[derive(Debug, Clone)]
pub struct WebSocketPushTransport {
    endpoint: Url,
}

impl WebSocketPushTransport {
    pub fn new(endpoint: Url) -> Result<Self, TransportError> {
        match endpoint.scheme() {
            "ws" | "wss" => Ok(Self { endpoint }),
            other => Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme {other}"
            ))),
        }
    }

    fn session_url(&self, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

impl PushTransport for WebSocketPushTransport {
    fn open(
        &self,
        session: SessionId,
        token: &str,
        events: TransportEventSender,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let handle = WebSocketHandle {
            session,
            state: SharedReadyState::new(ReadyState::Connecting),
            stop: CancellationToken::new(),
        };
        let url = self.session_url(token);
        let state = handle.state.clone();
        let stop = handle.stop.clone();
        tokio::spawn(async move {
            drive_session(session, url, state.clone(), stop, &events).await;
            state.set(ReadyState::Closed);
            let _ = events.send(TransportEvent {
                session,
                signal: TransportSignal::Closed,
            });
        });
        Ok(Box::new(handle))
    }
}

async fn drive_session(
    session: SessionId,
    url: Url,
    state: SharedReadyState,
    stop: CancellationToken,
    events: &TransportEventSender,
) {
    let emit = |signal| {
        let _ = events.send(TransportEvent { session, signal });
    };
    // terminal errors: the handle must already read Closed when the error lands
    let fail = |code, description| {
        state.set(ReadyState::Closed);
        emit(TransportSignal::Error { code, description });
    };

    let connected = tokio::select! {
        _ = stop.cancelled() => return,
        connected = connect_async(url.as_str()) => connected,
    };
    let stream = match connected {
        Ok((stream, _)) => stream,
        Err(WsError::Http(response)) => {
            let code = response.status().as_u16();
            warn!(%session, code, "websocket handshake rejected");
            fail(code, format!("handshake rejected with status {code}"));
            return;
        }
        Err(err) => {
            warn!(%session, error = %err, "websocket connect failed");
            fail(0, err.to_string());
            return;
        }
    };

    state.set(ReadyState::Open);
    debug!(%session, "websocket open");
    emit(TransportSignal::Opened);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportSignal::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%session, error = %err, "websocket read failed");
                    fail(0, err.to_string());
                    break;
                }
            },
        }
    }
}

#[derive(Debug)]
struct WebSocketHandle {
    session: SessionId,
    state: SharedReadyState,
    stop: CancellationToken,
}

impl TransportHandle for WebSocketHandle {
    fn session(&self) -> SessionId {
        self.session
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn close(&self) {
        self.stop.cancel();
    }
}

impl Drop for WebSocketHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
