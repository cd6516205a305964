//! Observability infrastructure for Ride Dispatch
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - Connection-level metric helpers for the driver socket server
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("dispatchd", LogFormat::Pretty, "info")?;
//!
//! // Optional Prometheus exporter
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, ServerMetrics};
