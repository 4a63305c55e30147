//! Minimal response model produced by handlers and file helpers.

use crate::context::current_app;
use crate::errors::ScopeError;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use http::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
    ETAG, EXPIRES, LAST_MODIFIED,
};
use http::StatusCode;
use std::time::SystemTime;

/// Mimetype given to string bodies.
pub const DEFAULT_MIMETYPE: &str = "text/html; charset=utf-8";

/// A streamed body.
pub type BodyStream = BoxStream<'static, Result<Bytes, ScopeError>>;

/// A response body, either complete or produced lazily.
pub enum Body {
    /// The whole body.
    Full(Bytes),
    /// Chunks produced on demand.
    Stream(BodyStream),
}

impl Body {
    /// Creates an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    /// Creates a streamed body.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ScopeError>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Returns the length if the body is complete.
    #[must_use]
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Self::Full(bytes) => Some(bytes.len()),
            Self::Stream(_) => None,
        }
    }

    /// Collects the whole body.
    pub async fn collect(self) -> Result<Bytes, ScopeError> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Full(Bytes::from_static(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Full(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Full(Bytes::from_static(text.as_bytes()))
    }
}

/// A response: status, headers, and a body that may still be streaming.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    /// Creates a `200 OK` response with the default mimetype.
    pub fn new(body: impl Into<Body>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_MIMETYPE));
        Self {
            status: StatusCode::OK,
            headers,
            body: body.into(),
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the `Content-Type` value.
    #[must_use]
    pub fn mimetype(&self) -> Option<&str> {
        self.header_str(CONTENT_TYPE)
    }

    /// Sets the `Content-Type` value.
    pub fn set_mimetype(&mut self, mimetype: &str) -> Result<(), ScopeError> {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_str(mimetype)?);
        Ok(())
    }

    /// Returns the `Content-Length` value.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header_str(CONTENT_LENGTH).and_then(|v| v.parse().ok())
    }

    /// Sets the `Content-Length` value.
    pub fn set_content_length(&mut self, length: u64) {
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    /// Returns the `Content-Disposition` value.
    #[must_use]
    pub fn content_disposition(&self) -> Option<&str> {
        self.header_str(CONTENT_DISPOSITION)
    }

    /// Sets the `Content-Disposition` value.
    pub fn set_content_disposition(&mut self, value: &str) -> Result<(), ScopeError> {
        self.headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(value)?);
        Ok(())
    }

    /// Returns `Last-Modified`, which has whole-second precision.
    #[must_use]
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.http_date(LAST_MODIFIED)
    }

    /// Sets `Last-Modified`; sub-second precision is dropped.
    pub fn set_last_modified(&mut self, when: DateTime<Utc>) -> Result<(), ScopeError> {
        self.set_http_date(LAST_MODIFIED, when)
    }

    /// Returns `Expires`.
    #[must_use]
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.http_date(EXPIRES)
    }

    /// Sets `Expires`.
    pub fn set_expires(&mut self, when: DateTime<Utc>) -> Result<(), ScopeError> {
        self.set_http_date(EXPIRES, when)
    }

    /// Returns the `max-age` directive of `Cache-Control`, in seconds.
    #[must_use]
    pub fn cache_max_age(&self) -> Option<u64> {
        self.header_str(CACHE_CONTROL)?
            .split(',')
            .filter_map(|directive| directive.trim().strip_prefix("max-age="))
            .find_map(|value| value.parse().ok())
    }

    /// Returns true if `Cache-Control` carries `public`.
    #[must_use]
    pub fn cache_public(&self) -> bool {
        self.header_str(CACHE_CONTROL)
            .is_some_and(|v| v.split(',').any(|d| d.trim() == "public"))
    }

    /// Sets `Cache-Control: public` with an optional max-age.
    pub fn set_public_cache(&mut self, max_age_secs: Option<u64>) {
        let value = match max_age_secs {
            Some(secs) => format!("public, max-age={secs}"),
            None => "public".to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.headers.insert(CACHE_CONTROL, value);
        }
    }

    /// Returns the unquoted `ETag`.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.header_str(ETAG).map(|v| v.trim_matches('"'))
    }

    /// Sets a strong `ETag`.
    pub fn set_etag(&mut self, etag: &str) -> Result<(), ScopeError> {
        self.headers.insert(ETAG, HeaderValue::from_str(&format!("\"{etag}\""))?);
        Ok(())
    }

    /// Consumes the response, returning its body.
    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Consumes the response, collecting the whole body.
    pub async fn get_data(self) -> Result<Bytes, ScopeError> {
        self.body.collect().await
    }

    /// Consumes the response, collecting the body as UTF-8 text.
    pub async fn get_text(self) -> Result<String, ScopeError> {
        let bytes = self.get_data().await?;
        String::from_utf8(bytes.to_vec()).map_err(ScopeError::handler)
    }

    fn header_str(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn http_date(&self, name: http::header::HeaderName) -> Option<DateTime<Utc>> {
        self.header_str(name)
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .map(DateTime::<Utc>::from)
    }

    fn set_http_date(&mut self, name: http::header::HeaderName, when: DateTime<Utc>) -> Result<(), ScopeError> {
        let value = httpdate::fmt_http_date(SystemTime::from(when));
        self.headers.insert(name, HeaderValue::from_str(&value)?);
        Ok(())
    }
}

/// Builds a response from a body and status within an application context.
pub fn make_response(body: impl Into<Body>, status: StatusCode) -> Result<Response, ScopeError> {
    current_app()?;
    let body = body.into();
    let length = body.known_len();
    let mut response = Response::new(body).with_status(status);
    if let Some(length) = length {
        response.set_content_length(length as u64);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use chrono::TimeZone;
    use futures::stream;

    #[tokio::test]
    async fn test_make_response_requires_app_context() {
        let err = make_response("foo", StatusCode::ACCEPTED).unwrap_err();
        assert!(matches!(err, ScopeError::OutsideAppContext));

        let app = App::new("demo").into_shared();
        let response = app
            .app_context()
            .run(async { make_response("foo", StatusCode::ACCEPTED) })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.content_length(), Some(3));
        assert_eq!(&response.get_data().await.unwrap()[..], b"foo");
    }

    #[tokio::test]
    async fn test_streamed_body_collects_in_order() {
        let chunks = vec![Ok(Bytes::from("a")), Ok(Bytes::from("b")), Ok(Bytes::from("c"))];
        let response = Response::new(Body::from_stream(stream::iter(chunks)));
        assert!(response.body().known_len().is_none());
        assert_eq!(response.get_text().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_streamed_body_error_propagates() {
        let chunks = vec![Ok(Bytes::from("a")), Err(ScopeError::handler("broken pipe"))];
        let err = Body::from_stream(stream::iter(chunks)).collect().await.unwrap_err();
        assert!(matches!(err, ScopeError::Handler(_)));
    }

    #[test]
    fn test_last_modified_truncates_to_seconds() {
        let mut response = Response::new(Body::empty());
        let when = Utc.with_ymd_and_hms(2015, 10, 10, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(750);
        response.set_last_modified(when).unwrap();

        assert_eq!(
            response.last_modified(),
            Some(Utc.with_ymd_and_hms(2015, 10, 10, 12, 30, 5).unwrap())
        );
    }

    #[test]
    fn test_cache_control_round_trip() {
        let mut response = Response::new(Body::empty());
        assert_eq!(response.cache_max_age(), None);
        response.set_public_cache(Some(600));
        assert_eq!(response.cache_max_age(), Some(600));
        assert!(response.cache_public());
    }

    #[test]
    fn test_etag_is_quoted() {
        let mut response = Response::new(Body::empty());
        response.set_etag("abc123").unwrap();
        assert_eq!(response.headers().get(ETAG).unwrap(), "\"abc123\"");
        assert_eq!(response.etag(), Some("abc123"));
    }
}
