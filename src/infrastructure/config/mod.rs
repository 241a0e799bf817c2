mod settings;

pub use settings::{LoggingConfig, RealtimeConfig, Settings};
