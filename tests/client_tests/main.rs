//! Client Tests
//!
//! Queues, backoff, the connection manager state machine and the public
//! client, all driven through a scripted transport.

#[path = "../common/mod.rs"]
mod common;

mod manager_tests;
