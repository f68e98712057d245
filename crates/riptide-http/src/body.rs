//! Request body storage.
//!
//! Bodies below a configurable threshold are kept in memory; larger bodies
//! are spilled to an unlinked temporary file so a single oversized upload
//! cannot pin arbitrary memory. In streaming mode no bytes are retained at
//! all — they are routed to the attached reader instead.
//!
//! The three representations are mutually exclusive by construction: the
//! store is a tagged union, so "buffered and spilled at the same time"
//! cannot be expressed.
//!
//! Spill writes are synchronous local I/O performed on the owning reactor
//! thread; they are bounded-latency by design and the only blocking-adjacent
//! operation in this crate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::{Bytes, BytesMut};
use tracing::warn;

/// Error type for body storage operations.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    /// Creating or writing the spill file failed.
    #[error("failed to spill request body to disk: {0}")]
    Spill(#[source] std::io::Error),
    /// Reading spilled data back failed.
    #[error("failed to read spilled request body: {0}")]
    Read(#[source] std::io::Error),
}

/// A request body spilled to an unlinked temporary file.
///
/// The file is created with [`tempfile::tempfile`], so it has no path and
/// is reclaimed by the OS as soon as the handle drops. The contiguous view
/// is materialized lazily on first access and cached; all readers see the
/// same accessor surface as the in-memory form.
pub struct SpillFile {
    file: File,
    len: usize,
    view: std::cell::OnceCell<Bytes>,
}

impl std::fmt::Debug for SpillFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillFile")
            .field("len", &self.len)
            .field("view_cached", &self.view.get().is_some())
            .finish()
    }
}

impl SpillFile {
    /// Create a spill file seeded with the bytes accumulated so far.
    fn create(initial: &[u8]) -> Result<Self, BodyError> {
        let mut file = tempfile::tempfile().map_err(BodyError::Spill)?;
        file.write_all(initial).map_err(BodyError::Spill)?;
        Ok(Self {
            file,
            len: initial.len(),
            view: std::cell::OnceCell::new(),
        })
    }

    /// Append bytes to the spill file.
    fn append(&mut self, data: &[u8]) -> Result<(), BodyError> {
        // Any previously materialized view is stale once we write more.
        self.view.take();
        self.file.write_all(data).map_err(BodyError::Spill)?;
        self.len += data.len();
        Ok(())
    }

    /// Total spilled length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the spill file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Contiguous view of the spilled bytes, read back and cached on first
    /// access.
    pub fn contiguous(&self) -> Result<&[u8], BodyError> {
        if let Some(view) = self.view.get() {
            return Ok(view);
        }
        let mut buf = Vec::with_capacity(self.len);
        // `&File` implements Read/Seek, so a shared borrow suffices here.
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0)).map_err(BodyError::Read)?;
        file.read_to_end(&mut buf).map_err(BodyError::Read)?;
        let _ = self.view.set(Bytes::from(buf));
        Ok(self.view.get().map_or(&[], |b| b.as_ref()))
    }
}

/// Tagged union over the three body representations.
#[derive(Debug)]
pub enum BodyStore {
    /// Body accumulated in memory.
    Buffered(BytesMut),
    /// Body spilled to a temporary file past the memory threshold.
    Spilled(SpillFile),
    /// Body bytes are pushed to a stream reader; nothing is retained.
    Streaming,
}

impl Default for BodyStore {
    fn default() -> Self {
        Self::Buffered(BytesMut::new())
    }
}

impl BodyStore {
    /// Append bytes, spilling to disk once the in-memory size would exceed
    /// `spill_threshold`.
    pub fn append(&mut self, data: &[u8], spill_threshold: usize) -> Result<(), BodyError> {
        match self {
            Self::Buffered(buf) => {
                if buf.len() + data.len() > spill_threshold {
                    let mut spill = SpillFile::create(buf)?;
                    spill.append(data)?;
                    *self = Self::Spilled(spill);
                } else {
                    buf.extend_from_slice(data);
                }
                Ok(())
            }
            Self::Spilled(spill) => spill.append(data),
            Self::Streaming => {
                // Streamed bytes go to the reader, never to the store.
                Ok(())
            }
        }
    }

    /// Capacity hint for an expected body size. Has no effect on spilled
    /// or streaming bodies.
    pub fn reserve(&mut self, additional: usize, spill_threshold: usize) {
        if let Self::Buffered(buf) = self {
            // Don't pre-allocate past the spill threshold.
            buf.reserve(additional.min(spill_threshold.saturating_sub(buf.len())));
        }
    }

    /// Replace the stored body wholesale with an in-memory buffer.
    pub fn set(&mut self, data: impl Into<BytesMut>) {
        *self = Self::Buffered(data.into());
    }

    /// Contiguous view of the body. Streaming bodies view as empty; a
    /// spill-file read failure degrades to empty with a warning.
    #[must_use]
    pub fn view(&self) -> &[u8] {
        match self {
            Self::Buffered(buf) => buf.as_ref(),
            Self::Spilled(spill) => match spill.contiguous() {
                Ok(view) => view,
                Err(e) => {
                    warn!(error = %e, "spilled body unreadable, reporting empty");
                    &[]
                }
            },
            Self::Streaming => &[],
        }
    }

    /// Stored body length. Streaming bodies report zero.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Buffered(buf) => buf.len(),
            Self::Spilled(spill) => spill.len(),
            Self::Streaming => 0,
        }
    }

    /// Whether the store holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the store is in streaming mode.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Whether the body has spilled to disk.
    #[must_use]
    pub fn is_spilled(&self) -> bool {
        matches!(self, Self::Spilled(_))
    }
}
