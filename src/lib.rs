//! `lambda-backend` lets an HTTP gateway serve routes from AWS Lambda functions.
//!
//! Each route of the routes document may carry an `io.gateway.backend.lambda` block. For those
//! routes every request is translated into one synchronous Lambda invocation, and the function's
//! JSON object result becomes the response. Routes without the block are handed to a fallback.
//!
//! Core modules:
//! - [`options`]: per-route adapter options
//! - [`payload`]: invocation payload formats
//! - [`lambda`]: AWS Lambda invocation
//! - [`backend`]: request → invocation → response orchestration
//! - [`formatter`]: response field filtering
//! - [`spec`]: OpenAPI-ish routes document + matcher
//! - [`server`]: axum server wiring

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod formatter;
pub mod lambda;
pub mod options;
pub mod payload;
pub mod proxy;
pub mod server;
pub mod spec;
pub mod template;
