mod message;
mod transport;

pub use message::{ClientFrame, InboundMessage, ServerFrame};
pub use transport::{Connector, TransportEvent, TransportLink, WebSocketConnector};
