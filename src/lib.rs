// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Connection layer
pub mod connection_manager;
pub mod dispatcher;
pub mod websocket;

// Application layer
pub mod realtime;

// Supporting modules
pub mod telemetry;

pub use connection_manager::{
    CloseReason, ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStats, EventKind,
    SubscriptionHandle,
};
pub use error::{ClientError, TransportError};
pub use realtime::RealtimeDataManager;
