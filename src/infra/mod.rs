//! Runtime bootstrap for the binary: telemetry and process signals.

pub mod error;
pub mod shutdown;
pub mod telemetry;
