//! Response serializers.
//!
//! The response type of an [`Endpoint<T>`](crate::Endpoint) picks how the body
//! of a successful response becomes a value: `T` implements [`FromResponse`].
//!
//! | Type | Body |
//! |------|------|
//! | [`Json<M>`] | JSON decoded into `M` |
//! | [`serde_json::Value`] | any JSON document |
//! | [`Bytes`] | raw bytes, may be empty |
//! | [`String`] | UTF-8 text (lossy), may be empty |
//! | [`Image`] | a PNG, JPEG, GIF, WebP or BMP image |
//! | `()` | ignored |

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{Error, ResponseMeta, Result, from_json};

/// Turns the body of a successful response into a value.
pub trait FromResponse: Sized + Send + Sync + 'static {
    /// Whether an empty body is a valid response.
    ///
    /// When `false`, an empty body fails with [`Error::NoResponse`] before
    /// [`from_response`](Self::from_response) is called.
    const ALLOWS_EMPTY: bool = false;

    /// Decodes the body.
    fn from_response(body: &Bytes, response: &ResponseMeta) -> Result<Self>;
}

/// Decodes a response body, enforcing [`FromResponse::ALLOWS_EMPTY`].
pub fn decode<T: FromResponse>(body: &Bytes, response: &ResponseMeta) -> Result<T> {
    if body.is_empty() && !T::ALLOWS_EMPTY {
        return Err(Error::NoResponse);
    }
    T::from_response(body, response)
}

impl FromResponse for () {
    const ALLOWS_EMPTY: bool = true;

    fn from_response(_body: &Bytes, _response: &ResponseMeta) -> Result<Self> {
        Ok(())
    }
}

impl FromResponse for Bytes {
    const ALLOWS_EMPTY: bool = true;

    fn from_response(body: &Bytes, _response: &ResponseMeta) -> Result<Self> {
        Ok(body.clone())
    }
}

impl FromResponse for String {
    const ALLOWS_EMPTY: bool = true;

    fn from_response(body: &Bytes, _response: &ResponseMeta) -> Result<Self> {
        Ok(String::from_utf8_lossy(body).into_owned())
    }
}

impl FromResponse for serde_json::Value {
    fn from_response(body: &Bytes, _response: &ResponseMeta) -> Result<Self> {
        from_json(body)
    }
}

// ============================================================================
// JSON models
// ============================================================================

/// A JSON response decoded into `M`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<M>(pub M);

impl<M> Json<M> {
    /// The decoded model.
    pub fn into_inner(self) -> M {
        self.0
    }
}

impl<M> Deref for Json<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.0
    }
}

impl<M> FromResponse for Json<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    fn from_response(body: &Bytes, _response: &ResponseMeta) -> Result<Self> {
        from_json(body).map(Json)
    }
}

// ============================================================================
// Images
// ============================================================================

/// Image container formats recognized from their signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ImageFormat {
    /// Portable Network Graphics.
    #[display("png")]
    Png,
    /// JPEG.
    #[display("jpeg")]
    Jpeg,
    /// Graphics Interchange Format.
    #[display("gif")]
    Gif,
    /// WebP.
    #[display("webp")]
    WebP,
    /// Windows bitmap.
    #[display("bmp")]
    Bmp,
}

impl ImageFormat {
    /// Detects the format from the leading bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }

    /// The MIME type of the format.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

/// An image response.
///
/// The bytes are kept encoded; only the container signature is checked.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Bytes,
    format: ImageFormat,
}

impl Image {
    /// The encoded image.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The detected container format.
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FromResponse for Image {
    fn from_response(body: &Bytes, _response: &ResponseMeta) -> Result<Self> {
        let format = ImageFormat::sniff(body)
            .ok_or_else(|| Error::serialization("response body is not a supported image"))?;
        Ok(Self {
            bytes: body.clone(),
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert2::{check, let_assert};

    use super::*;

    fn meta() -> ResponseMeta {
        let url = url::Url::parse("https://api.example.com/resource").expect("valid URL");
        ResponseMeta::new(200, HashMap::new(), url)
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn json_model() {
        let body = Bytes::from_static(br#"{"id": 1, "name": "Ada"}"#);
        let user: Json<User> = decode(&body, &meta()).expect("decodes");

        check!(user.name == "Ada");
        check!(user.into_inner() == User { id: 1, name: "Ada".to_string() });
    }

    #[test]
    fn json_mismatch_reports_the_path() {
        let body = Bytes::from_static(br#"{"id": "one", "name": "Ada"}"#);
        let_assert!(Err(Error::JsonDeserialization { path, .. }) = decode::<Json<User>>(&body, &meta()));
        check!(path == "id");
    }

    #[test]
    fn empty_body_needs_an_allowing_kind() {
        let empty = Bytes::new();

        let_assert!(Err(Error::NoResponse) = decode::<Json<User>>(&empty, &meta()));
        let_assert!(Err(Error::NoResponse) = decode::<serde_json::Value>(&empty, &meta()));
        let_assert!(Err(Error::NoResponse) = decode::<Image>(&empty, &meta()));

        check!(decode::<Bytes>(&empty, &meta()).expect("allowed").is_empty());
        check!(decode::<String>(&empty, &meta()).expect("allowed").is_empty());
        let_assert!(Ok(()) = decode::<()>(&empty, &meta()));
    }

    #[test]
    fn text_is_decoded_lossily() {
        let body = Bytes::from_static(b"caf\xC3\xA9 \xFF");
        let text: String = decode(&body, &meta()).expect("decodes");
        check!(text == "café \u{FFFD}");
    }

    #[test]
    fn images_are_sniffed() {
        let png = Bytes::from_static(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR");
        let image: Image = decode(&png, &meta()).expect("png");
        check!(image.format() == ImageFormat::Png);
        check!(image.format().mime_type() == "image/png");

        let webp = Bytes::from_static(b"RIFF\x10\0\0\0WEBPVP8 ");
        check!(ImageFormat::sniff(&webp) == Some(ImageFormat::WebP));
        check!(ImageFormat::sniff(b"\xFF\xD8\xFF\xE0") == Some(ImageFormat::Jpeg));
        check!(ImageFormat::sniff(b"GIF89a") == Some(ImageFormat::Gif));

        let_assert!(Err(Error::Serialization(_)) = decode::<Image>(&Bytes::from_static(b"<html>"), &meta()));
    }
}
