//! Request and response envelopes exchanged on the broker.
//!
//! Both envelopes serialize to named `MsgPack` maps via
//! `rmp_serde::to_vec_named()` with camelCase keys, so every record on a
//! topic is self-describing. Bodies are encoded as `MsgPack` binary and are
//! never inspected by the bridge.
//!
//! Envelopes are immutable once built: fields are private and only readable
//! through accessors. A [`Response`] can only take its correlation id from a
//! [`Request`] (or from the wire), which keeps workers from inventing ids.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Opaque header map carried by both envelopes.
pub type Headers = HashMap<String, String>;

/// Header used by synthesized replies to describe their body.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Content type of every body synthesized by the bridge itself.
pub const APPLICATION_JSON: &str = "application/json";

/// Status codes the bridge and the dispatch table synthesize.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Failure to turn an envelope into bytes or back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// CorrelationId
// ---------------------------------------------------------------------------

/// Token linking a response to the request that produced it.
///
/// Generated ids are random UUID v4 values in simple (32 hex digit) form, so
/// they are both unique per call and unpredictable. Ids read from the wire
/// are kept verbatim; the bridge only ever compares them for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes used as the broker record key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A unit of work published by the gateway on a service's request topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    correlation_id: CorrelationId,
    verb: String,
    path: String,
    #[serde(default)]
    headers: Headers,
    #[serde(with = "serde_bytes", default)]
    body: Vec<u8>,
    /// Fully-qualified external path, kept for auditing only.
    #[serde(default)]
    service_path: String,
}

impl Request {
    /// Starts a request with a freshly generated correlation id.
    #[must_use]
    pub fn builder(verb: impl Into<String>, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            correlation_id: CorrelationId::generate(),
            verb: verb.into(),
            path: path.into(),
            headers: Headers::new(),
            body: Vec::new(),
            service_path: String::new(),
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    #[must_use]
    pub fn verb(&self) -> &str {
        &self.verb
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Looks up a header, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    /// Serializes the request into its broker record form.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if `MsgPack` encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    /// Parses a broker record into a request.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes are not a request envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

/// Builder for [`Request`]. The built request cannot be modified afterwards.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    correlation_id: CorrelationId,
    verb: String,
    path: String,
    headers: Headers,
    body: Vec<u8>,
    service_path: String,
}

impl RequestBuilder {
    /// Overrides the generated correlation id.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = id.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn service_path(mut self, service_path: impl Into<String>) -> Self {
        self.service_path = service_path.into();
        self
    }

    #[must_use]
    pub fn build(self) -> Request {
        Request {
            correlation_id: self.correlation_id,
            verb: self.verb,
            path: self.path,
            headers: self.headers,
            body: self.body,
            service_path: self.service_path,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// The reply a worker publishes on a service's response topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    correlation_id: CorrelationId,
    status_code: u16,
    #[serde(default)]
    headers: Headers,
    #[serde(with = "serde_bytes", default)]
    body: Vec<u8>,
}

impl Response {
    /// Creates an empty reply to `request` with the given status.
    #[must_use]
    pub fn reply(request: &Request, status_code: u16) -> Self {
        Self::new(request.correlation_id.clone(), status_code)
    }

    /// Creates an empty response for an explicit correlation id.
    ///
    /// Workers should prefer [`Response::reply`]; this constructor exists for
    /// code that replays ids it read from the wire.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, status_code: u16) -> Self {
        Self {
            correlation_id,
            status_code,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Creates a JSON reply. Falls back to a 500 if `value` cannot be serialized.
    #[must_use]
    pub fn json<T: Serialize>(request: &Request, status_code: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::reply(request, status_code)
                .with_header(CONTENT_TYPE, APPLICATION_JSON)
                .with_body(body),
            Err(e) => Self::error(
                request,
                status::INTERNAL_SERVER_ERROR,
                &format!("failed to serialize response: {e}"),
            ),
        }
    }

    /// Creates a `{"error": message}` reply, the shape of every synthesized failure.
    #[must_use]
    pub fn error(request: &Request, status_code: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string().into_bytes();
        Self::reply(request, status_code)
            .with_header(CONTENT_TYPE, APPLICATION_JSON)
            .with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Re-addresses this response to `request`, copying its correlation id.
    #[must_use]
    pub fn answering(mut self, request: &Request) -> Self {
        self.correlation_id = request.correlation_id.clone();
        self
    }

    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the response, returning status, headers and body.
    #[must_use]
    pub fn into_parts(self) -> (u16, Headers, Vec<u8>) {
        (self.status_code, self.headers, self.body)
    }

    /// Serializes the response into its broker record form.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if `MsgPack` encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    /// Parses a broker record into a response.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes are not a response envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
