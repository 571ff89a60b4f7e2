//! Backend-independent client tests
//!
//! The same test functions run against every store backend:
//!
//! - **Memory**: runs with every `cargo test`
//! - **Redis**: testcontainers-based, run with `cargo test -- --ignored`
//!
//! ```bash
//! cargo test                       # Memory store only
//! cargo test -- --ignored          # Redis integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

pub mod harness;
mod store_contract;
