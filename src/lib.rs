//! fotcache library
//!
//! Football statistics client with a local snapshot cache. Exposed as a
//! library for the binary and for integration tests.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod data;

#[cfg(test)]
mod test_support;
