//! The in-flight HTTP request.
//!
//! A [`Request`] is created by the connection layer on the reactor thread
//! that owns its connection and is populated incrementally as bytes arrive.
//! Derived views (query parameters, content type, the JSON body) are
//! computed lazily, at most once per instance.
//!
//! # Single-writer invariant
//!
//! A request is mutated exclusively by one execution context until it is
//! explicitly handed to the dispatch collaborator. The lazy caches rely on
//! this: they use [`Lazy`] cells that are `Send` but not `Sync`, so the
//! compiler rejects sharing a request across threads without a hand-off.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use percent_encoding::percent_decode_str;
use riptide_core::{ConnRef, DEFAULT_DECOMPRESS_LIMIT, DEFAULT_SPILL_THRESHOLD};

use crate::body::{BodyError, BodyStore};
use crate::cached::Lazy;
use crate::content_type::{ContentKind, strip_header_decoration};
use crate::decompress::{self, DecompressStatus, Decoded};
use crate::headers::{CookieJar, HeaderMap};
use crate::method::{Method, Version};
use crate::stream::{BodyStreamReader, StreamController, StreamFault, StreamStatus};

/// Typed, opaque per-request attribute store.
///
/// Populated by external collaborators (middleware, filters); nothing in
/// this crate interprets the contents.
#[derive(Default)]
pub struct Attributes {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attributes")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Attributes {
    /// Insert or overwrite an attribute.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Get an attribute downcast to `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref())
    }

    /// Whether an attribute exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

/// Cached result of the lazy JSON parse, including the no-JSON case.
#[derive(Debug, Default)]
struct JsonCache {
    value: Option<serde_json::Value>,
    error: Option<String>,
}

/// A mutable, single-owner representation of one inbound HTTP request.
pub struct Request {
    // Identity — immutable after receipt.
    created_at: SystemTime,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    peer_certificate: Option<Bytes>,
    conn: ConnRef,
    secure: bool,

    // Request line.
    method: Method,
    previous_method: Method,
    version: Version,
    keep_alive: bool,

    // Path & query.
    path: String,
    /// Wire form of the path, retained only when percent-decoding was
    /// required. Empty means "identical to `path`" — no duplicate copy.
    original_path: String,
    path_encode: bool,
    matched_path_pattern: String,
    query: String,
    routing_params: Vec<String>,

    // Headers & derived metadata.
    headers: HeaderMap,
    cookies: CookieJar,
    content_length: Option<u64>,
    real_content_length: u64,

    // Lazy derivations, each computed at most once.
    parameters: Lazy<HashMap<String, String>>,
    content_type: Lazy<(ContentKind, String)>,
    json: Lazy<JsonCache>,

    // Body.
    body: BodyStore,
    stream: StreamController,
    spill_threshold: usize,
    decompress_limit: usize,

    // Collaborator handles & lifecycle flags.
    session: Option<Arc<dyn Any + Send + Sync>>,
    attributes: Option<Box<Attributes>>,
    pass_through: bool,
    processing_started: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("version", &self.version)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("peer_addr", &self.peer_addr)
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.len())
            .field("stream_status", &self.stream.status())
            .field("processing_started", &self.processing_started)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Create an empty request stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: SystemTime::now(),
            peer_addr: None,
            local_addr: None,
            peer_certificate: None,
            conn: ConnRef::detached(),
            secure: false,
            method: Method::Invalid,
            previous_method: Method::Invalid,
            version: Version::Unknown,
            keep_alive: true,
            path: String::new(),
            original_path: String::new(),
            path_encode: true,
            matched_path_pattern: String::new(),
            query: String::new(),
            routing_params: Vec::new(),
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            content_length: None,
            real_content_length: 0,
            parameters: Lazy::new(),
            content_type: Lazy::new(),
            json: Lazy::new(),
            body: BodyStore::default(),
            stream: StreamController::new(),
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            decompress_limit: DEFAULT_DECOMPRESS_LIMIT,
            session: None,
            attributes: None,
            pass_through: false,
            processing_started: false,
        }
    }

    /// Reset every field back to its default so the instance can be
    /// reused for the next request on the same connection.
    pub fn reset(&mut self) {
        let spill_threshold = self.spill_threshold;
        let decompress_limit = self.decompress_limit;
        *self = Self::new();
        self.spill_threshold = spill_threshold;
        self.decompress_limit = decompress_limit;
    }

    /// Configure the body spill threshold and decompression bound.
    pub fn set_body_limits(&mut self, spill_threshold: usize, decompress_limit: usize) {
        self.spill_threshold = spill_threshold;
        self.decompress_limit = decompress_limit;
    }

    // -----------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------

    /// Time this request object was created.
    #[must_use]
    pub fn creation_time(&self) -> SystemTime {
        self.created_at
    }

    /// Remote peer address, once set by the connection layer.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Set the remote peer address.
    pub fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = Some(addr);
    }

    /// Local address the connection arrived on.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Set the local address.
    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(addr);
    }

    /// DER-encoded peer certificate, when the client authenticated.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<&Bytes> {
        self.peer_certificate.as_ref()
    }

    /// Set the peer certificate.
    pub fn set_peer_certificate(&mut self, der: Bytes) {
        self.peer_certificate = Some(der);
    }

    /// Attach the weak back-reference to the owning connection.
    pub fn set_conn_ref(&mut self, conn: ConnRef) {
        self.conn = conn;
    }

    /// The weak back-reference to the owning connection.
    #[must_use]
    pub fn conn_ref(&self) -> &ConnRef {
        &self.conn
    }

    /// Whether the owning connection is still open. Never extends the
    /// connection's lifetime.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Mark the request as arriving over TLS.
    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    /// Whether the request arrived over TLS.
    #[must_use]
    pub fn is_on_secure_connection(&self) -> bool {
        self.secure
    }

    // -----------------------------------------------------------------
    // Request line
    // -----------------------------------------------------------------

    /// Set the method, remembering the previous one.
    ///
    /// The previous method exists solely to disambiguate a HEAD request
    /// rewritten internally as GET — see [`is_head`](Self::is_head).
    pub fn set_method(&mut self, method: Method) {
        self.previous_method = self.method;
        self.method = method;
    }

    /// Parse and set the method from a wire token. Returns `false` (and
    /// stores [`Method::Invalid`]) for unrecognized tokens.
    pub fn set_method_token(&mut self, token: &[u8]) -> bool {
        let method = Method::from_token(token);
        self.set_method(method);
        method != Method::Invalid
    }

    /// Current request method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Whether this is semantically a HEAD request, including the case
    /// where it was rewritten as GET for internal handling.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == Method::Head
            || (self.method == Method::Get && self.previous_method == Method::Head)
    }

    /// Set the protocol version. HTTP/1.0 turns keep-alive off unless a
    /// later `Connection: keep-alive` header overrides it.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
        if version == Version::Http10 {
            self.keep_alive = false;
        }
    }

    /// Protocol version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the connection should be kept open after this request.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    // -----------------------------------------------------------------
    // Path & query
    // -----------------------------------------------------------------

    /// Set the path from its wire form, percent-decoding if needed.
    ///
    /// The encoded original is retained only when decoding actually
    /// changed something, so unencoded paths are never stored twice.
    pub fn set_path_raw(&mut self, raw: &str) {
        if raw.contains('%') {
            self.original_path = raw.to_owned();
            self.path = percent_decode_str(raw).decode_utf8_lossy().into_owned();
        } else {
            self.path = raw.to_owned();
            self.original_path.clear();
        }
    }

    /// Set an already-decoded path directly (router rewrites).
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Decoded request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path as it appeared on the wire. Identical to [`path`](Self::path)
    /// when no decoding was necessary.
    #[must_use]
    pub fn original_path(&self) -> &str {
        if self.original_path.is_empty() {
            &self.path
        } else {
            &self.original_path
        }
    }

    /// Control whether the path may be re-encoded downstream.
    pub fn set_path_encode(&mut self, encode: bool) {
        self.path_encode = encode;
    }

    /// Whether re-encoding the path is permitted.
    #[must_use]
    pub fn path_encode(&self) -> bool {
        self.path_encode
    }

    /// Record the route pattern the external router matched.
    pub fn set_matched_path_pattern(&mut self, pattern: impl Into<String>) {
        self.matched_path_pattern = pattern.into();
    }

    /// The route pattern the external router matched, if any.
    #[must_use]
    pub fn matched_path_pattern(&self) -> &str {
        &self.matched_path_pattern
    }

    /// Set the raw query string.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// Raw query string.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Replace the routing parameters produced by the external router.
    pub fn set_routing_parameters(&mut self, params: Vec<String>) {
        self.routing_params = params;
    }

    /// Routing parameters, in route-pattern order. Opaque to this crate.
    #[must_use]
    pub fn routing_parameters(&self) -> &[String] {
        &self.routing_params
    }

    // -----------------------------------------------------------------
    // Headers & cookies
    // -----------------------------------------------------------------

    /// Insert a header, normalizing the key to lowercase.
    ///
    /// `Content-Length`, `Cookie`, and `Connection` get side effects: the
    /// declared length, the cookie jar, and the keep-alive flag are kept
    /// in sync with the header stream.
    pub fn add_header(&mut self, key: &str, value: &str) {
        let lower = key.to_ascii_lowercase();
        match lower.as_str() {
            "content-length" => {
                self.content_length = value.trim().parse::<u64>().ok();
            }
            "cookie" => {
                self.parse_cookie_header(value);
            }
            "connection" => {
                if value.eq_ignore_ascii_case("close") {
                    self.keep_alive = false;
                } else if value.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
            _ => {}
        }
        self.headers.insert_lower(lower, value);
    }

    /// Look up a header case-insensitively; empty string when absent.
    #[must_use]
    pub fn get_header(&self, key: &str) -> &str {
        self.headers.get(key)
    }

    /// Remove a header case-insensitively.
    pub fn remove_header(&mut self, key: &str) {
        self.headers.remove(key);
    }

    /// All headers, keys lowercased.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Insert a cookie (case-sensitive name).
    pub fn add_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name, value);
    }

    /// Look up a cookie; empty string when absent.
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> &str {
        self.cookies.get(name)
    }

    /// All cookies.
    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// The value of the `Expect` header; empty when absent.
    #[must_use]
    pub fn expect(&self) -> &str {
        self.headers.get_lower("expect")
    }

    fn parse_cookie_header(&mut self, value: &str) {
        for pair in value.split(';') {
            if let Some((name, val)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.cookies.insert(name, val.trim());
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Content metadata
    // -----------------------------------------------------------------

    /// The declared `Content-Length`, when the header was present and
    /// parsable.
    #[must_use]
    pub fn content_length_header(&self) -> Option<u64> {
        self.content_length
    }

    /// Bytes actually received for the body so far. Under chunked
    /// transfer this can exceed the declared value.
    #[must_use]
    pub fn real_content_length(&self) -> u64 {
        self.real_content_length
    }

    fn resolved_content_type(&self) -> &(ContentKind, String) {
        self.content_type.get_or_compute(|| {
            let raw = self.headers.get_lower("content-type");
            if raw.trim().is_empty() {
                (ContentKind::None, String::new())
            } else {
                (ContentKind::resolve(raw), raw.to_owned())
            }
        })
    }

    /// Resolved media-type kind, computed once from the headers.
    #[must_use]
    pub fn content_kind(&self) -> ContentKind {
        self.resolved_content_type().0
    }

    /// The raw content-type string, preserved verbatim.
    #[must_use]
    pub fn content_type_string(&self) -> &str {
        &self.resolved_content_type().1
    }

    /// Force the content type to a known kind, bypassing header
    /// resolution.
    pub fn set_content_kind(&mut self, kind: ContentKind) {
        self.content_type.reset();
        let raw = kind.canonical().unwrap_or_default().to_owned();
        let _ = self.content_type.set((kind, raw));
    }

    /// Set a custom content-type string, tolerating a pasted header line
    /// (a `content-type:` prefix and trailing CRLF are stripped,
    /// case-insensitively).
    pub fn set_custom_content_type(&mut self, raw: &str) {
        let stripped = strip_header_decoration(raw);
        self.content_type.reset();
        let _ = self
            .content_type
            .set((ContentKind::resolve(stripped), stripped.to_owned()));
    }

    // -----------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------

    /// Query/body parameters, parsed once on first access.
    ///
    /// Combines the URL query string with the body for form-urlencoded
    /// content. Duplicate keys resolve last-write-wins.
    #[must_use]
    pub fn parameters(&self) -> &HashMap<String, String> {
        self.parameters.get_or_compute(|| {
            let mut params = HashMap::new();
            for (k, v) in form_urlencoded::parse(self.query.as_bytes()) {
                params.insert(k.into_owned(), v.into_owned());
            }
            if self.content_kind() == ContentKind::FormUrlEncoded {
                for (k, v) in form_urlencoded::parse(self.body.view()) {
                    params.insert(k.into_owned(), v.into_owned());
                }
            }
            params
        })
    }

    /// Look up a single parameter; empty string when absent.
    #[must_use]
    pub fn get_parameter(&self, key: &str) -> &str {
        self.parameters()
            .get(key)
            .map_or("", String::as_str)
    }

    /// Explicitly set a parameter.
    ///
    /// Seeding a parameter before first access suppresses query/body
    /// parsing entirely; afterwards it amends the cached map.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(params) = self.parameters.get_mut() {
            params.insert(key.into(), value.into());
        } else {
            let mut params = HashMap::new();
            params.insert(key.into(), value.into());
            let _ = self.parameters.set(params);
        }
    }

    // -----------------------------------------------------------------
    // JSON
    // -----------------------------------------------------------------

    fn json_cache(&self) -> &JsonCache {
        self.json.get_or_compute(|| {
            if self.is_stream_mode() {
                return JsonCache {
                    value: None,
                    error: Some("request body is in stream mode".to_owned()),
                };
            }
            let view = self.body.view();
            if view.is_empty() {
                return JsonCache::default();
            }
            match serde_json::from_slice(view) {
                Ok(value) => JsonCache {
                    value: Some(value),
                    error: None,
                },
                Err(e) => JsonCache {
                    value: None,
                    error: Some(e.to_string()),
                },
            }
        })
    }

    /// The body parsed as JSON, computed once. `None` for absent bodies
    /// and parse failures; failures never propagate to the caller.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json_cache().value.as_ref()
    }

    /// The JSON parse error message, when parsing failed; empty otherwise.
    #[must_use]
    pub fn json_error(&self) -> &str {
        self.json_cache().error.as_deref().unwrap_or("")
    }

    // -----------------------------------------------------------------
    // Body
    // -----------------------------------------------------------------

    /// Append received body bytes.
    ///
    /// In streaming mode the bytes are routed to the attached reader; in
    /// buffered mode they accumulate, spilling to disk past the
    /// configured threshold. The received-byte counter advances either
    /// way.
    pub fn append_to_body(&mut self, data: &[u8]) -> Result<(), BodyError> {
        self.real_content_length += data.len() as u64;
        if self.stream.status() == StreamStatus::Open {
            self.stream.push(Bytes::copy_from_slice(data));
            Ok(())
        } else {
            self.body.append(data, self.spill_threshold)
        }
    }

    /// Capacity hint for the expected body size. Optimization only.
    pub fn reserve_body_size(&mut self, expected: usize) {
        self.body.reserve(expected, self.spill_threshold);
    }

    /// Replace the body wholesale with an in-memory buffer.
    pub fn set_body(&mut self, body: impl Into<BytesMut>) {
        self.body.set(body);
    }

    /// Contiguous view of the buffered body. Empty in streaming mode.
    #[must_use]
    pub fn body_view(&self) -> &[u8] {
        if self.is_stream_mode() {
            return &[];
        }
        self.body.view()
    }

    /// Buffered body length. Zero in streaming mode.
    #[must_use]
    pub fn body_length(&self) -> usize {
        if self.is_stream_mode() {
            return 0;
        }
        self.body.len()
    }

    /// Whether the body spilled to a temporary file.
    #[must_use]
    pub fn body_is_spilled(&self) -> bool {
        self.body.is_spilled()
    }

    /// Decompress the buffered body in place according to its
    /// `Content-Encoding`.
    ///
    /// Fails closed: the compressed body is left untouched on every
    /// non-`Ok` outcome, and decoded output never exceeds the configured
    /// bound. Unavailable in streaming mode (there is no buffered body).
    pub fn decompress_body(&mut self) -> DecompressStatus {
        if self.is_stream_mode() {
            return DecompressStatus::NotSupported;
        }
        let encoding = self.headers.get_lower("content-encoding").to_owned();
        let decoded = decompress::decode(&encoding, self.body.view(), self.decompress_limit);
        let status = decoded.status();
        match decoded {
            Decoded::Ok(output) => {
                self.body.set(BytesMut::from(&output[..]));
                // The stored body is plain now; a second call must not
                // try to decode it again.
                self.headers.remove("content-encoding");
            }
            Decoded::Identity
            | Decoded::TooLarge
            | Decoded::Malformed
            | Decoded::NotSupported => {}
        }
        status
    }

    // -----------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------

    /// Enter streaming mode by attaching a reader (`None → Open`).
    ///
    /// Any bytes already buffered are flushed to the reader first, then
    /// the body store stops retaining data. Returns `false` if streaming
    /// already started.
    pub fn stream_start(&mut self, reader: Box<dyn BodyStreamReader>) -> bool {
        if !self.stream.start(reader) {
            return false;
        }
        let buffered = Bytes::copy_from_slice(self.body.view());
        self.body = BodyStore::Streaming;
        if !buffered.is_empty() {
            self.stream.push(buffered);
        }
        true
    }

    /// Signal end-of-body to the stream reader (`Open → Finish`).
    pub fn stream_finish(&mut self) {
        self.stream.finish();
    }

    /// Abort the stream with a fault (`Open → Error`).
    pub fn stream_error(&mut self, fault: StreamFault) {
        self.stream.error(fault);
    }

    /// Current streaming status.
    #[must_use]
    pub fn stream_status(&self) -> StreamStatus {
        self.stream.status()
    }

    /// Whether the request is in (or past) streaming mode.
    #[must_use]
    pub fn is_stream_mode(&self) -> bool {
        self.stream.is_streaming()
    }

    /// The fault attached to an aborted stream.
    #[must_use]
    pub fn stream_fault(&self) -> Option<&StreamFault> {
        self.stream.fault()
    }

    /// Register a completion callback; fires exactly once even when
    /// registered after the stream already ended.
    pub fn wait_for_stream_finish(&mut self, cb: impl FnOnce() + Send + 'static) {
        self.stream.wait_for_finish(cb);
    }

    /// Leave streaming mode and return to buffered semantics.
    pub fn quit_stream_mode(&mut self) {
        self.stream.quit();
        self.body = BodyStore::default();
    }

    // -----------------------------------------------------------------
    // Collaborator handles & lifecycle
    // -----------------------------------------------------------------

    /// Attach the opaque session handle.
    pub fn set_session(&mut self, session: Arc<dyn Any + Send + Sync>) {
        self.session = Some(session);
    }

    /// The opaque session handle, when a session store attached one.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.session.as_ref()
    }

    /// Per-request attributes, created lazily on first access.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut **self.attributes.get_or_insert_with(Box::default)
    }

    /// Per-request attributes, if any were set.
    #[must_use]
    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_deref()
    }

    /// Control whether the request bypasses filter processing.
    pub fn set_pass_through(&mut self, flag: bool) {
        self.pass_through = flag;
    }

    /// Whether the request bypasses filter processing.
    #[must_use]
    pub fn pass_through(&self) -> bool {
        self.pass_through
    }

    /// Mark the request as dispatched. Guards against double dispatch.
    pub fn start_processing(&mut self) {
        self.processing_started = true;
    }

    /// Whether dispatch has already begun for this request.
    #[must_use]
    pub fn is_processing_started(&self) -> bool {
        self.processing_started
    }
}
