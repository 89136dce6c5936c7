use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use super::codec::Frame;
use super::constants::CONNECTION_TIMEOUT;
use super::error::{GatewayError, GatewayResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

/// One open duplex connection. Never reused after it closes.
#[async_trait]
pub trait GatewayTransport: Send {
    async fn send(&mut self, frame: Frame) -> GatewayResult<()>;

    /// Waits for the next data frame. A peer close surfaces as
    /// `GatewayError::ConnectionClosed` (or its fatal classification).
    async fn receive(&mut self) -> GatewayResult<Frame>;

    async fn close(&mut self, code: u16) -> GatewayResult<()>;
}

/// Opens fresh transports; a reconnect always asks for a new one.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayTransport>>;
}

pub struct WebSocketTransport {
    writer: WsWriter,
    reader: WsReader,
    closed: bool,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(stream: WsStream) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer,
            reader,
            closed: false,
        }
    }
}

#[async_trait]
impl GatewayTransport for WebSocketTransport {
    async fn send(&mut self, frame: Frame) -> GatewayResult<()> {
        if self.closed {
            return Err(GatewayError::NotConnected);
        }

        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data.into()),
        };

        self.writer
            .send(message)
            .await
            .map_err(|e| GatewayError::websocket(e.to_string()))
    }

    async fn receive(&mut self) -> GatewayResult<Frame> {
        loop {
            match self.reader.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(Frame::Binary(data.to_vec())),
                Some(Ok(WsMessage::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Ok(WsMessage::Close(frame))) => {
                    self.closed = true;
                    let (code, reason) = frame.map_or_else(
                        || (1000, "Normal closure".to_string()),
                        |f| (f.code.into(), f.reason.to_string()),
                    );

                    return Err(GatewayError::from_close(code, reason));
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    trace!("Answering websocket ping");
                    let _ = self.writer.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(GatewayError::websocket(e.to_string()));
                }
                None => {
                    self.closed = true;
                    return Err(GatewayError::ConnectionClosed {
                        code: 1006,
                        reason: "Stream ended".to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self, code: u16) -> GatewayResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: String::new().into(),
        };
        let _ = self.writer.send(WsMessage::Close(Some(frame))).await;
        let _ = self.writer.close().await;
        debug!(code, "WebSocket connection closed");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(CONNECTION_TIMEOUT)
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayTransport>> {
        let (stream, _) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| GatewayError::timeout("connection"))?
            .map_err(|e| GatewayError::connection_failed(e.to_string()))?;

        debug!(url, "WebSocket connection established");
        Ok(Box::new(WebSocketTransport::new(stream)))
    }
}
