//! Call kinds and the transport-independent part of a raw call.

use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// The four RPC call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Single request, single response.
    Unary,
    /// Single request, streamed responses.
    ServerStream,
    /// Streamed requests, single response.
    ClientStream,
    /// Streamed requests and responses.
    BidiStream,
}

impl CallKind {
    /// Whether the caller sends a stream of requests.
    #[must_use]
    pub const fn streams_requests(self) -> bool {
        matches!(self, Self::ClientStream | Self::BidiStream)
    }

    /// Whether the handler writes a stream of responses.
    #[must_use]
    pub const fn streams_responses(self) -> bool {
        matches!(self, Self::ServerStream | Self::BidiStream)
    }

    /// Derive the kind from the two streaming flags of a method definition.
    #[must_use]
    pub const fn from_streaming(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => Self::Unary,
            (false, true) => Self::ServerStream,
            (true, false) => Self::ClientStream,
            (true, true) => Self::BidiStream,
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unary => "unary",
            Self::ServerStream => "server_stream",
            Self::ClientStream => "client_stream",
            Self::BidiStream => "bidi_stream",
        };
        f.write_str(name)
    }
}

/// Call metadata: lower-cased keys mapped to ordered values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    /// Create empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`, keeping earlier values.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace every value under `key` with `value`.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// Builder-style [`append`](Self::append).
    #[must_use]
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.append(key, value);
        self
    }

    /// First value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// All values stored under `key`, in insertion order.
    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map_or(&[][..], Vec::as_slice)
    }

    /// Remove and return the values under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    /// Iterate over `(key, values)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no metadata is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Path, metadata and cancellation signal of one raw call.
///
/// This is what base injectors see and what every call adapter exposes.
#[derive(Debug, Clone, Default)]
pub struct CallHead {
    path: String,
    metadata: Metadata,
    cancellation: CancellationToken,
}

impl CallHead {
    /// Create a head for the given method path, e.g. `/greeter.Greeter/SayHello`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            metadata: Metadata::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Use a cancellation token owned by the transport.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Full method path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment (the method name).
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Call metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Token tripped when the transport cancels the call.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the transport has cancelled the call.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
