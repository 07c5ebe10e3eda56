//! Test infrastructure shared by the Hookline crates.
//!
//! Provides message fixtures, wiremock-backed webhook endpoints and a log
//! capture subscriber for asserting on structured logs.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod fixtures;
pub mod http;
pub mod logs;

pub use fixtures::MessageBuilder;
pub use hookline_core::{
    models::{EndpointId, MessageId},
    Clock, TestClock,
};
pub use http::MockEndpoint;
pub use logs::LogCapture;
