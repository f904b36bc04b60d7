//! Test utilities shared across unit tests.

pub mod http;

pub use http::mock_server;
