//! Structured logging setup for binaries embedding the client.

mod tracing_init;

pub use tracing_init::*;
