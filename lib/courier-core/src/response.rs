//! HTTP response handling.
//!
//! A [`Transport`](crate::Transport) returns a buffered [`Response`]; once the
//! client has validated it, the status, headers and final URL travel on as
//! [`ResponseMeta`] next to the raw bytes.

use std::collections::HashMap;

use bytes::Bytes;

// ============================================================================
// Buffered Response
// ============================================================================

/// HTTP response with status, headers, and body.
#[derive(Debug, Clone)]
pub struct Response<B = Bytes> {
    status: u16,
    headers: HashMap<String, String>,
    body: B,
}

impl<B> Response<B> {
    /// Creates a new response.
    #[must_use]
    pub fn new(status: u16, headers: HashMap<String, String>, body: B) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Single header value by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Response body.
    #[must_use]
    pub const fn body(&self) -> &B {
        &self.body
    }

    /// Consume into (metadata, body), attaching the URL the response came from.
    #[must_use]
    pub fn into_parts(self, url: url::Url) -> (ResponseMeta, B) {
        let meta = ResponseMeta::new(self.status, self.headers, url);
        (meta, self.body)
    }

    /// Status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

impl Response<Bytes> {
    /// Deserialize the response body as JSON.
    ///
    /// # Errors
    ///
    /// See [`from_json`].
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        from_json(&self.body)
    }
}

/// Decodes a JSON response body.
///
/// # Errors
///
/// Returns [`Error::JsonDeserialization`](crate::Error::JsonDeserialization)
/// carrying the path of the field that did not match, such as
/// `items[2].owner.id`, or an empty path for malformed JSON.
pub fn from_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> crate::Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
        crate::Error::json_deserialization(error.path().to_string(), error.inner().to_string())
    })
}

// ============================================================================
// Response Metadata
// ============================================================================

/// Status, headers and URL of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    status: u16,
    headers: HashMap<String, String>,
    url: url::Url,
}

impl ResponseMeta {
    /// Creates response metadata.
    #[must_use]
    pub fn new(status: u16, headers: HashMap<String, String>, url: url::Url) -> Self {
        Self {
            status,
            headers,
            url,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Single header value by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// URL the response was received from.
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Status is 401.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_basic() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        let response = Response::new(200, headers, Bytes::from(r#"{"id":1}"#));

        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert!(response.is_success());
    }

    #[test]
    fn response_json() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct User {
            id: u64,
            name: String,
        }

        let body = Bytes::from(r#"{"id":1,"name":"test"}"#);
        let response = Response::new(200, HashMap::new(), body);

        let user: User = response.json().expect("deserialize");
        assert_eq!(
            user,
            User {
                id: 1,
                name: "test".to_string()
            }
        );
    }

    #[test]
    fn decode_errors_name_the_field_path() {
        #[derive(Debug, serde::Deserialize)]
        struct Owner {
            #[allow(dead_code)]
            id: u64,
        }
        #[derive(Debug, serde::Deserialize)]
        struct Repository {
            #[allow(dead_code)]
            owner: Owner,
        }

        let body = br#"[{"owner":{"id":1}},{"owner":{"id":"two"}}]"#;
        let error = from_json::<Vec<Repository>>(body).expect_err("second id is a string");
        let message = error.to_string();

        assert!(message.contains("[1].owner.id"), "unexpected message: {message}");
    }

    #[test]
    fn malformed_bodies_fail_to_decode() {
        let response = Response::new(200, HashMap::new(), Bytes::from_static(b"<html>"));

        let result: crate::Result<serde_json::Value> = response.json();
        assert!(result.is_err());
    }

    #[test]
    fn into_parts_keeps_status_and_url() {
        let url = url::Url::parse("https://api.example.com/me").expect("valid URL");
        let response = Response::new(401, HashMap::new(), Bytes::from("denied"));

        let (meta, body) = response.into_parts(url.clone());

        assert_eq!(meta.status(), 401);
        assert!(meta.is_unauthorized());
        assert!(!meta.is_success());
        assert_eq!(meta.url(), &url);
        assert_eq!(body, Bytes::from("denied"));
    }
}
