use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use murmur_core::VoiceError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Clean user-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal close used when the liveness check finds the stream dead.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One frame on the underlying stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketFrame {
    Binary(Vec<u8>),
    Text(String),
    Ping,
    Pong,
    Close(Option<u16>),
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: SocketFrame) -> Result<(), VoiceError>;
    async fn close(&mut self, code: u16);
}

/// Read half of a connection. `None` means the stream is closed; read
/// errors collapse to `None`.
#[async_trait]
pub trait FrameStream: Send {
    async fn next(&mut self) -> Option<SocketFrame>;
}

/// A connected bidirectional frame stream, split into halves so reads
/// and writes proceed independently.
pub trait FrameSocket: Send {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>);
}

/// Dialer seam: the transport state machine is generic over how a
/// connection is opened, so tests can script connections in memory.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSocket>, VoiceError>;
}

/// Production connector over tokio-tungstenite.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSocket>, VoiceError> {
        match connect_async(url).await {
            Ok((stream, _response)) => Ok(Box::new(WsSocket { stream })),
            Err(e) => {
                tracing::debug!(url, error = %e, "WebSocket open failed");
                Err(VoiceError::NetworkUnavailable)
            }
        }
    }
}

type WsInner = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct WsSocket {
    stream: WsInner,
}

impl FrameSocket for WsSocket {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        let (sink, stream) = self.stream.split();
        (Box::new(WsSink { sink }), Box::new(WsStream { stream }))
    }
}

struct WsSink {
    sink: SplitSink<WsInner, Message>,
}

fn close_frame(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: SocketFrame) -> Result<(), VoiceError> {
        let msg = match frame {
            SocketFrame::Binary(bytes) => Message::Binary(bytes),
            SocketFrame::Text(text) => Message::Text(text),
            SocketFrame::Ping => Message::Ping(Vec::new()),
            SocketFrame::Pong => Message::Pong(Vec::new()),
            SocketFrame::Close(code) => match code {
                Some(code) => close_frame(code),
                None => Message::Close(None),
            },
        };
        self.sink
            .send(msg)
            .await
            .map_err(|e| VoiceError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, code: u16) {
        let _ = self.sink.send(close_frame(code)).await;
        let _ = self.sink.close().await;
    }
}

struct WsStream {
    stream: SplitStream<WsInner>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next(&mut self) -> Option<SocketFrame> {
        loop {
            match self.stream.next().await? {
                // Binary payloads arrive as one contiguous buffer; any
                // fragmentation is reassembled below this layer.
                Ok(Message::Binary(bytes)) => return Some(SocketFrame::Binary(bytes)),
                Ok(Message::Text(text)) => return Some(SocketFrame::Text(text)),
                Ok(Message::Ping(_)) => return Some(SocketFrame::Ping),
                Ok(Message::Pong(_)) => return Some(SocketFrame::Pong),
                Ok(Message::Close(frame)) => {
                    return Some(SocketFrame::Close(frame.map(|f| f.code.into())))
                }
                Ok(Message::Frame(_)) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket read error");
                    return None;
                }
            }
        }
    }
}
