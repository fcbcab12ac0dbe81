//! Core types and traits for the courier HTTP client.
//!
//! This crate provides the transport-independent building blocks:
//! - [`Method`] - HTTP method enum
//! - [`Endpoint`] and [`EndpointInfo`] - description of one server call
//! - [`EndpointParameter`] and [`RequestEncoder`] - parameter encoding
//! - [`TransportRequest`] and [`RequestId`] - encoded, transport-ready requests
//! - [`Response`] and [`ResponseMeta`] - received responses
//! - [`Error`], [`RequestFailure`] and [`Result`] - error handling
//! - [`Transport`] - the seam to the network
//! - [`StatusCode`] - HTTP status codes (re-exported from `http` crate)

mod client;
mod endpoint;
mod error;
mod method;
mod parameter;
pub mod prelude;
mod request;
mod response;

pub use client::{Transport, TransportExt, TransportFuture};
pub use endpoint::{Endpoint, EndpointInfo};
pub use error::{Error, RequestFailure, Result};
pub use method::Method;
pub use parameter::{
    ContentType, EndpointParameter, JsonObject, JsonOptions, Model, RequestEncoder, to_json,
    to_query_string,
};
pub use request::{RequestId, TransportRequest, TransportRequestBuilder};
pub use response::{Response, ResponseMeta, from_json};

// Re-export http crate types for status codes
pub use http::StatusCode;
