//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Client configuration and settings loading
//! - `error`: Unified error types
//! - `metrics`: Prometheus metrics helpers

pub mod config;
pub mod error;
pub mod metrics;
