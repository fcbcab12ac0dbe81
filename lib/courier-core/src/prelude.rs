//! Prelude module for convenient imports.
//!
//! ```ignore
//! use courier_core::prelude::*;
//! ```

pub use crate::{
    ContentType, Endpoint, EndpointInfo, EndpointParameter, Error, JsonObject, JsonOptions,
    Method, RequestEncoder, RequestFailure, Response, ResponseMeta, Result, Transport,
    TransportExt, TransportRequest, from_json, to_json,
};
