//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types for easy glob
//! importing:
//!
//! ```
//! use courier::prelude::*;
//! ```

pub use crate::{
    BasicRequestInterceptor, Client, Completion, Configuration, Endpoint, EndpointInfo,
    EndpointParameter, Error, FromResponse, Image, Json, LogLevel, Method,
    MultiRequestInterceptor, Request, RequestFailure, RequestInterceptor, RequestLogger,
    RequestSuccess, ResponseMeta, Result, StatusCode, TransportRequest, from_json, to_json,
};
pub use serde::{Deserialize, Serialize};
