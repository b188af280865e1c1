//! Sink integration tests.

mod batching;
mod transactions;
