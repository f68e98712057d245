//! In-flight HTTP request representation for the Riptide server.
//!
//! This crate owns the mutable request object and everything hanging off
//! it: case-insensitive headers and cookies, lazily computed derived views
//! (decoded path, query parameters, content type, JSON body), the
//! buffered/spilled/streaming body store, bounded decompression, and the
//! streaming-body controller with its finish/error signaling.
//!
//! Requests are produced by the connection layer in `riptide-net` and
//! consumed by an external dispatch collaborator through the read
//! accessors on [`Request`].

mod body;
mod cached;
mod content_type;
mod decompress;
mod headers;
mod method;
mod request;
mod stream;

pub use body::{BodyError, BodyStore, SpillFile};
pub use cached::Lazy;
pub use content_type::{ContentKind, strip_header_decoration};
pub use decompress::DecompressStatus;
pub use headers::{CookieJar, HeaderMap};
pub use method::{Method, Version};
pub use request::{Attributes, Request};
pub use stream::{BodyStreamReader, StreamController, StreamFault, StreamStatus};
