//! Live scan events over an auto-reconnecting WebSocket

pub mod events;
#[cfg(test)]
pub mod mock;
pub mod reconnector;
pub mod transport;

pub use events::{Connected, FindingCreated, ScanComplete, ScanFailed, ScanProgress, SocketEvent};
pub use reconnector::{SocketOptions, SocketReconnector, SocketState, reconnect_delay};
pub use transport::{
    Frame, SocketConnection, SocketConnector, TungsteniteConnector, ws_url_from_api_base,
};
