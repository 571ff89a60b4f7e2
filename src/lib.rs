//! Client for the key-value store behind the document intelligence service:
//! caching, sessions, work queues, rate limiting and document status tracking.

pub mod cache;
pub mod config;
pub mod observability;

#[cfg(test)]
mod tests;
