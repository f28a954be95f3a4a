pub mod client;
pub mod connector;
pub mod mock;
pub mod monitor;

pub use client::{Transport, TransportConfig};
pub use connector::{
    Connector, FrameSink, FrameSocket, FrameStream, SocketFrame, WsConnector, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
pub use monitor::NetworkMonitor;
