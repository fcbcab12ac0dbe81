//! Endpoint parameters and their encoders.
//!
//! An [`EndpointParameter`] says how the parameters of a call are materialized
//! on the [`TransportRequest`]: as a JSON body, a raw body, URL query pairs, or
//! through a caller-provided [`RequestEncoder`]. Query encoders never touch the
//! body and body encoders never touch the URL.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use derive_more::Display;
use serde_json::Value;

use crate::{Result, TransportRequest};

/// A JSON object, as used by the map-based parameter variants.
pub type JsonObject = serde_json::Map<String, Value>;

type BodyFn = Arc<dyn Fn() -> Result<Bytes> + Send + Sync>;
type ObjectFn = Arc<dyn Fn() -> Result<JsonObject> + Send + Sync>;

// ============================================================================
// Request Encoder
// ============================================================================

/// Custom encoding of a request's parameters.
///
/// The encoder owns whatever parameters it needs and rewrites the request.
/// Closures with the matching signature implement it.
///
/// ```
/// use courier_core::{EndpointParameter, Error, TransportRequest};
///
/// let encoder = |mut request: TransportRequest| {
///     request.set_header("X-Signature", "abc");
///     Ok::<_, Error>(request)
/// };
/// let parameter = EndpointParameter::custom(encoder);
/// ```
pub trait RequestEncoder: Send + Sync {
    /// Returns the request with the parameters encoded.
    ///
    /// # Errors
    ///
    /// Any error rejects the call before it reaches the transport.
    fn encode(&self, request: TransportRequest) -> Result<TransportRequest>;
}

impl<F> RequestEncoder for F
where
    F: Fn(TransportRequest) -> Result<TransportRequest> + Send + Sync,
{
    fn encode(&self, request: TransportRequest) -> Result<TransportRequest> {
        self(request)
    }
}

// ============================================================================
// Serializable models
// ============================================================================

/// Options for JSON bodies produced from models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    pretty: bool,
}

impl JsonOptions {
    /// Pretty-printed output.
    #[must_use]
    pub const fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Whether the output is pretty-printed.
    #[must_use]
    pub const fn is_pretty(&self) -> bool {
        self.pretty
    }
}

// ============================================================================
// Body and query serialization
// ============================================================================

/// The `Content-Type` set along with an encoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContentType {
    /// JSON objects and serializable models.
    #[display("application/json")]
    Json,
    /// Raw bytes and custom bodies.
    #[display("application/octet-stream")]
    OctetStream,
}

impl ContentType {
    /// The header value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::OctetStream => "application/octet-stream",
        }
    }
}

/// Serializes a JSON request body.
///
/// # Errors
///
/// Returns [`Error::JsonSerialization`](crate::Error::JsonSerialization) when
/// the value cannot be represented as JSON.
///
/// ```
/// use courier_core::{JsonOptions, to_json};
///
/// let body = to_json(&serde_json::json!({"name": "Alice"}), JsonOptions::default()).unwrap();
/// assert_eq!(body.as_ref(), br#"{"name":"Alice"}"#);
/// ```
pub fn to_json<T: serde::Serialize + ?Sized>(value: &T, options: JsonOptions) -> Result<Bytes> {
    let encoded = if options.pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    };
    encoded.map(Bytes::from).map_err(Into::into)
}

/// Serializes a model as URL query pairs.
///
/// Sequences become repeated keys (`tags=a&tags=b`) and `None` fields are
/// left out.
///
/// # Errors
///
/// Returns an error for values that have no flat key/value form, such as
/// nested structs.
pub fn to_query_string<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_html_form::to_string(value).map_err(Into::into)
}

trait ErasedModel: Send + Sync {
    fn to_json(&self, options: JsonOptions) -> Result<Bytes>;
    fn to_query(&self) -> Result<String>;
}

impl<M> ErasedModel for M
where
    M: serde::Serialize + Send + Sync,
{
    fn to_json(&self, options: JsonOptions) -> Result<Bytes> {
        to_json(self, options)
    }

    fn to_query(&self) -> Result<String> {
        to_query_string(self)
    }
}

/// A serializable value captured by an [`EndpointParameter`].
///
/// Serialization happens lazily, each time the endpoint is encoded.
#[derive(Clone)]
pub struct Model {
    inner: Arc<dyn ErasedModel>,
    type_name: &'static str,
}

impl Model {
    /// Captures a model.
    pub fn new<M>(model: M) -> Self
    where
        M: serde::Serialize + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(model),
            type_name: std::any::type_name::<M>(),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Model").field(&self.type_name).finish()
    }
}

// ============================================================================
// Endpoint Parameter
// ============================================================================

/// How the parameters of an endpoint are encoded.
#[derive(Clone)]
pub enum EndpointParameter {
    /// JSON object in the body.
    Json(JsonObject),
    /// Raw bytes in the body.
    Raw(Bytes),
    /// Key/value pairs appended to the URL query.
    Query(JsonObject),
    /// Serializable model as JSON in the body.
    CodableJson(Model, JsonOptions),
    /// Serializable model as URL query pairs.
    CodableQuery(Model),
    /// Body bytes produced on demand.
    CustomBody(BodyFn),
    /// Query object produced on demand.
    CustomQuery(ObjectFn),
    /// JSON object produced on demand.
    CustomJson(ObjectFn),
    /// Caller-provided encoder.
    Custom(Arc<dyn RequestEncoder>),
}

impl EndpointParameter {
    /// JSON body from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonSerialization`](crate::Error::JsonSerialization)
    /// if the value is not an object.
    pub fn json(value: Value) -> Result<Self> {
        into_object(value).map(Self::Json)
    }

    /// URL query pairs from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuerySerialization`](crate::Error::QuerySerialization)
    /// if the value is not an object.
    pub fn query(value: Value) -> Result<Self> {
        match value {
            Value::Object(object) => Ok(Self::Query(object)),
            other => Err(crate::Error::QuerySerialization(format!(
                "query parameters must be an object, got {other}"
            ))),
        }
    }

    /// Raw body.
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::Raw(bytes.into())
    }

    /// Serializable model as a compact JSON body.
    pub fn codable_json<M>(model: M) -> Self
    where
        M: serde::Serialize + Send + Sync + 'static,
    {
        Self::CodableJson(Model::new(model), JsonOptions::default())
    }

    /// Serializable model as a JSON body with explicit options.
    pub fn codable_json_with<M>(model: M, options: JsonOptions) -> Self
    where
        M: serde::Serialize + Send + Sync + 'static,
    {
        Self::CodableJson(Model::new(model), options)
    }

    /// Serializable model as URL query pairs.
    pub fn codable_query<M>(model: M) -> Self
    where
        M: serde::Serialize + Send + Sync + 'static,
    {
        Self::CodableQuery(Model::new(model))
    }

    /// Body bytes produced on demand.
    pub fn custom_body<F>(encoder: F) -> Self
    where
        F: Fn() -> Result<Bytes> + Send + Sync + 'static,
    {
        Self::CustomBody(Arc::new(encoder))
    }

    /// Query object produced on demand.
    pub fn custom_query<F>(encoder: F) -> Self
    where
        F: Fn() -> Result<JsonObject> + Send + Sync + 'static,
    {
        Self::CustomQuery(Arc::new(encoder))
    }

    /// JSON object produced on demand.
    pub fn custom_json<F>(encoder: F) -> Self
    where
        F: Fn() -> Result<JsonObject> + Send + Sync + 'static,
    {
        Self::CustomJson(Arc::new(encoder))
    }

    /// Caller-provided encoder.
    pub fn custom(encoder: impl RequestEncoder + 'static) -> Self {
        Self::Custom(Arc::new(encoder))
    }

    /// Encodes the parameters onto the request.
    ///
    /// # Errors
    ///
    /// Returns the serialization error of the model or custom encoder.
    pub fn encode(&self, request: TransportRequest) -> Result<TransportRequest> {
        match self {
            Self::Json(object) => {
                let body = to_json(object, JsonOptions::default())?;
                Ok(with_body(request, ContentType::Json, body))
            }
            Self::Raw(bytes) => Ok(with_body(request, ContentType::OctetStream, bytes.clone())),
            Self::Query(object) => Ok(with_query_object(request, object)),
            Self::CodableJson(model, options) => {
                let body = model.inner.to_json(*options)?;
                Ok(with_body(request, ContentType::Json, body))
            }
            Self::CodableQuery(model) => {
                let query = model.inner.to_query()?;
                Ok(with_query_string(request, &query))
            }
            Self::CustomBody(encoder) => {
                let body = encoder()?;
                Ok(with_body(request, ContentType::OctetStream, body))
            }
            Self::CustomQuery(encoder) => {
                let object = encoder()?;
                Ok(with_query_object(request, &object))
            }
            Self::CustomJson(encoder) => {
                let body = to_json(&encoder()?, JsonOptions::default())?;
                Ok(with_body(request, ContentType::Json, body))
            }
            Self::Custom(encoder) => encoder.encode(request),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "Json",
            Self::Raw(_) => "Raw",
            Self::Query(_) => "Query",
            Self::CodableJson(..) => "CodableJson",
            Self::CodableQuery(_) => "CodableQuery",
            Self::CustomBody(_) => "CustomBody",
            Self::CustomQuery(_) => "CustomQuery",
            Self::CustomJson(_) => "CustomJson",
            Self::Custom(_) => "Custom",
        }
    }
}

impl fmt::Debug for EndpointParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(object) | Self::Query(object) => {
                f.debug_tuple(self.kind()).field(object).finish()
            }
            Self::Raw(bytes) => f.debug_tuple(self.kind()).field(&bytes.len()).finish(),
            Self::CodableJson(model, options) => f
                .debug_tuple(self.kind())
                .field(model)
                .field(options)
                .finish(),
            Self::CodableQuery(model) => f.debug_tuple(self.kind()).field(model).finish(),
            _ => f.debug_tuple(self.kind()).finish_non_exhaustive(),
        }
    }
}

impl From<JsonObject> for EndpointParameter {
    fn from(object: JsonObject) -> Self {
        Self::Json(object)
    }
}

impl From<Bytes> for EndpointParameter {
    fn from(bytes: Bytes) -> Self {
        Self::Raw(bytes)
    }
}

fn into_object(value: Value) -> Result<JsonObject> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(crate::Error::JsonSerialization(format!(
            "JSON parameters must be an object, got {other}"
        ))),
    }
}

fn with_body(mut request: TransportRequest, content_type: ContentType, body: Bytes) -> TransportRequest {
    request.set_header("Content-Type", content_type.as_str());
    request.set_body(Some(body));
    request
}

/// Strings go verbatim, `null` is skipped, anything else is sent as JSON text.
fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn with_query_object(mut request: TransportRequest, object: &JsonObject) -> TransportRequest {
    let pairs: Vec<(&String, String)> = object
        .iter()
        .filter_map(|(key, value)| query_value(value).map(|value| (key, value)))
        .collect();

    if !pairs.is_empty() {
        let mut query = request.url_mut().query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, &value);
        }
    }
    request
}

fn with_query_string(mut request: TransportRequest, encoded: &str) -> TransportRequest {
    if encoded.is_empty() {
        return request;
    }
    let url = request.url_mut();
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
        _ => encoded.to_string(),
    };
    url.set_query(Some(&query));
    request
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};
    use serde_json::json;

    use super::*;
    use crate::{Error, Method};

    fn request(url: &str) -> TransportRequest {
        let url = url::Url::parse(url).expect("valid URL");
        TransportRequest::builder(Method::Post, url).build()
    }

    fn body_text(request: &TransportRequest) -> &str {
        std::str::from_utf8(request.body().expect("body")).expect("utf8")
    }

    #[test]
    fn json_sets_body_and_content_type() {
        let parameter = EndpointParameter::json(json!({"name": "Alice", "age": 30})).expect("object");
        let encoded = parameter.encode(request("https://api.example.com/users")).expect("encode");

        check!(encoded.header("content-type") == Some("application/json"));
        let body: Value = serde_json::from_str(body_text(&encoded)).expect("json");
        check!(body == json!({"name": "Alice", "age": 30}));
        check!(encoded.url().query().is_none());
    }

    #[test]
    fn json_rejects_non_objects() {
        let_assert!(Err(Error::JsonSerialization(_)) = EndpointParameter::json(json!([1, 2])));
    }

    #[test]
    fn raw_sets_octet_stream() {
        let parameter = EndpointParameter::raw(Bytes::from_static(&[0, 1, 2]));
        let encoded = parameter.encode(request("https://api.example.com/upload")).expect("encode");

        check!(encoded.header("Content-Type") == Some("application/octet-stream"));
        check!(encoded.body().map(Bytes::as_ref) == Some(&[0_u8, 1, 2][..]));
    }

    #[test]
    fn query_appends_pairs_without_body() {
        let parameter = EndpointParameter::query(json!({
            "q": "rust lang",
            "page": 2,
            "exact": true,
            "skip": null,
        }))
        .expect("object");
        let encoded = parameter
            .encode(request("https://api.example.com/search?lang=en"))
            .expect("encode");

        let pairs: Vec<(String, String)> = encoded.url().query_pairs().into_owned().collect();
        check!(pairs.first() == Some(&("lang".to_string(), "en".to_string())));
        check!(pairs.len() == 4);
        check!(pairs.contains(&("q".to_string(), "rust lang".to_string())));
        check!(pairs.contains(&("page".to_string(), "2".to_string())));
        check!(pairs.contains(&("exact".to_string(), "true".to_string())));
        check!(encoded.body().is_none());
        check!(encoded.header("Content-Type").is_none());
    }

    #[test]
    fn empty_query_leaves_url_untouched() {
        let parameter = EndpointParameter::Query(JsonObject::new());
        let encoded = parameter.encode(request("https://api.example.com/search")).expect("encode");

        check!(encoded.url().as_str() == "https://api.example.com/search");
    }

    #[test]
    fn codable_json_serializes_model() {
        #[derive(serde::Serialize)]
        struct Login {
            username: String,
        }

        let parameter = EndpointParameter::codable_json(Login {
            username: "alice".to_string(),
        });
        let encoded = parameter.encode(request("https://api.example.com/login")).expect("encode");

        check!(body_text(&encoded) == r#"{"username":"alice"}"#);
        check!(encoded.header("Content-Type") == Some("application/json"));
    }

    #[test]
    fn codable_json_pretty() {
        let parameter = EndpointParameter::codable_json_with(json!({"a": 1}), JsonOptions::pretty());
        let encoded = parameter.encode(request("https://api.example.com/")).expect("encode");

        check!(body_text(&encoded) == "{\n  \"a\": 1\n}");
    }

    #[test]
    fn codable_query_appends_to_existing_query() {
        #[derive(serde::Serialize)]
        struct Search {
            q: String,
            tags: Vec<String>,
        }

        let parameter = EndpointParameter::codable_query(Search {
            q: "rust".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
        });
        let encoded = parameter
            .encode(request("https://api.example.com/search?page=1"))
            .expect("encode");

        check!(encoded.url().query() == Some("page=1&q=rust&tags=a&tags=b"));
        check!(encoded.body().is_none());
    }

    #[test]
    fn custom_closures_are_called_at_encode_time() {
        let body = EndpointParameter::custom_body(|| Ok(Bytes::from_static(b"raw")));
        let encoded = body.encode(request("https://api.example.com/")).expect("encode");
        check!(body_text(&encoded) == "raw");
        check!(encoded.header("Content-Type") == Some("application/octet-stream"));

        let query = EndpointParameter::custom_query(|| {
            let mut object = JsonObject::new();
            object.insert("id".to_string(), json!(7));
            Ok(object)
        });
        let encoded = query.encode(request("https://api.example.com/")).expect("encode");
        check!(encoded.url().query() == Some("id=7"));

        let json_body = EndpointParameter::custom_json(|| {
            let mut object = JsonObject::new();
            object.insert("ok".to_string(), json!(true));
            Ok(object)
        });
        let encoded = json_body.encode(request("https://api.example.com/")).expect("encode");
        check!(body_text(&encoded) == r#"{"ok":true}"#);
    }

    #[test]
    fn custom_encoder_errors_propagate() {
        let parameter = EndpointParameter::custom_body(|| Err(Error::serialization("boom")));
        let_assert!(Err(Error::Serialization(message)) = parameter.encode(request("https://api.example.com/")));
        check!(message == "boom");
    }

    #[test]
    fn custom_request_encoder() {
        let parameter = EndpointParameter::custom(|mut request: TransportRequest| {
            request.set_header("X-Signature", "abc");
            Ok::<_, Error>(request)
        });
        let encoded = parameter.encode(request("https://api.example.com/")).expect("encode");

        check!(encoded.header("x-signature") == Some("abc"));
        check!(encoded.body().is_none());
    }

    #[test]
    fn codable_query_rejects_nested_models() {
        #[derive(serde::Serialize)]
        struct Page {
            size: u32,
        }
        #[derive(serde::Serialize)]
        struct Search {
            page: Page,
        }

        let parameter = EndpointParameter::codable_query(Search { page: Page { size: 10 } });
        let_assert!(Err(Error::QuerySerialization(_)) = parameter.encode(request("https://api.example.com/")));
    }

    #[test]
    fn content_type_renders_the_header_value() {
        check!(ContentType::Json.to_string() == ContentType::Json.as_str());
        check!(ContentType::OctetStream.to_string() == "application/octet-stream");
    }

    #[test]
    fn debug_names_the_variant() {
        let parameter = EndpointParameter::raw(Bytes::from_static(b"abc"));
        check!(format!("{parameter:?}") == "Raw(3)");
    }
}
