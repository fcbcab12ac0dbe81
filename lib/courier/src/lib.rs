//! Promise-based HTTP client for Rust.
//!
//! Describe server calls as [`Endpoint`]s, issue them with a [`Client`] and get
//! a [`Request`] promise back. Interceptors observe every call and can recover
//! failures, for instance by renewing an expired session and replaying the
//! queued calls.
//!
//! # Example
//!
//! ```no_run
//! use courier::prelude::*;
//!
//! #[derive(Debug, Deserialize)]
//! pub struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # async fn example() -> courier::Result<()> {
//! let client = Client::builder()
//!     .configuration(Configuration::parse("https://api.example.com/")?)
//!     .interceptor(RequestLogger::new(LogLevel::Verbose))
//!     .build()?;
//!
//! let endpoint = Endpoint::<Json<User>>::new(Method::Get, "users/42");
//! let user = client.task(&endpoint).retry(3).await?;
//! println!("{} is #{}", user.data().name, user.data().id);
//! # Ok(())
//! # }
//! ```
//!
//! Requests can also be consumed with continuations, without `async`:
//!
//! ```no_run
//! # use courier::prelude::*;
//! # fn example(client: &Client) {
//! client
//!     .task(&Endpoint::<String>::new(Method::Get, "status"))
//!     .then(|success| tracing::info!(status = %success.data(), "server status"))
//!     .catch(|error| tracing::warn!(%error, "status check failed"));
//! # }
//! ```

mod client;
mod config;
mod connector;
pub mod interceptor;
mod observable;
pub mod prelude;
mod promise;
mod serializer;
mod transport;
mod trust;

pub use client::{Client, ClientBuilder, WeakClient};
pub use config::{Configuration, TransportConfig, TransportConfigBuilder};
pub use connector::https_connector;
pub use interceptor::{
    BasicRequestInterceptor, Completion, LogLevel, LogSink, MultiRequestInterceptor,
    RenewalState, RequestInterceptor, RequestLogger, RequestPacket, TracingSink,
};
pub use observable::{Observable, Subscription};
pub use promise::{CallbackQueue, Request, RequestState, RequestSuccess, Resolver};
pub use serializer::{FromResponse, Image, ImageFormat, Json, decode};
pub use transport::{BoxedService, HyperTransport, HyperTransportBuilder};
pub use trust::{
    CertificateEvaluator, ClientTrustManager, PublicKeyEvaluator, TrustEvaluator, TrustManagerVerifier,
};

// Re-export tower for transport layers
pub use tower;

// Re-export core types
pub use courier_core::{
    ContentType, Endpoint, EndpointInfo, EndpointParameter, Error, JsonObject, JsonOptions,
    Method, Model, RequestEncoder, RequestFailure, RequestId, Response, ResponseMeta, Result,
    StatusCode, Transport, TransportExt, TransportFuture, TransportRequest,
    TransportRequestBuilder, from_json, to_json, to_query_string,
};

// Re-export rustls types used by trust evaluators
pub use rustls::pki_types::{CertificateDer, ServerName, SubjectPublicKeyInfoDer, UnixTime};
