//! Websocket implementation of the [`EventStream`] collaborator.
//!
//! Events arrive as JSON text frames. Control frames are skipped, a close
//! frame or end of stream surfaces as `Ok(None)`, and protocol errors end
//! the stream with a transport error.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::EventStream;
use crate::types::Event;

/// [`EventStream`] backed by a tokio-tungstenite websocket.
pub struct WsEventStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsEventStream {
    /// Dials the event endpoint and completes the websocket handshake.
    pub async fn connect(url: Url) -> Result<Self> {
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        tracing::debug!(%url, "connected to event stream");
        Ok(Self { socket })
    }
}

impl std::fmt::Debug for WsEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsEventStream").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStream for WsEventStream {
    async fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.socket.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(serde_json::from_str(text.as_str())?));
                },
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/binary frames carry no events
                Some(Err(err)) => return Err(Error::Transport(err.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.socket
            .close(None)
            .await
            .map_err(|err| Error::Transport(err.to_string()))
    }
}
