//! Streaming body delivery.
//!
//! In streaming mode request-body bytes are pushed to an attached reader as
//! they arrive instead of accumulating in the body store. The controller is
//! a one-directional state machine:
//!
//! ```text
//! None ──start──▶ Open ──finish──▶ Finish
//!                   │
//!                   └──error────▶ Error
//! ```
//!
//! `Finish` and `Error` are terminal. The only reverse transition is
//! [`StreamController::quit`], which returns the request to buffered
//! semantics for reuse paths — it is not a mid-stream recovery mechanism.

use bytes::Bytes;

/// Delivery state of a streamed request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StreamStatus {
    /// Buffered mode; no reader attached.
    #[default]
    None,
    /// A reader is attached and chunks are being delivered.
    Open,
    /// All bytes delivered, reader signaled success.
    Finish,
    /// Delivery aborted; the fault is retained for inspection.
    Error,
}

/// Fault payload attached to the `Error` terminal state.
///
/// Readers inspect the fault as a value; nothing is unwound through the
/// reactor thread.
#[derive(Debug)]
pub struct StreamFault {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StreamFault {
    /// Create a fault with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fault wrapping an underlying error.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Human-readable fault description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for StreamFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StreamFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Push-based consumer of streamed body chunks.
pub trait BodyStreamReader: Send {
    /// Deliver one body chunk. Returning `Err` rejects the stream and
    /// moves the controller to the `Error` terminal state.
    fn on_chunk(&mut self, chunk: Bytes) -> Result<(), StreamFault>;

    /// Terminal notification: `None` on success, the fault otherwise.
    fn on_end(&mut self, fault: Option<&StreamFault>);
}

/// State machine governing streamed body delivery for one request.
pub struct StreamController {
    status: StreamStatus,
    reader: Option<Box<dyn BodyStreamReader>>,
    finish_cb: Option<Box<dyn FnOnce() + Send>>,
    fault: Option<StreamFault>,
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("status", &self.status)
            .field("reader", &self.reader.as_ref().map(|_| "..."))
            .field("finish_cb", &self.finish_cb.as_ref().map(|_| "..."))
            .field("fault", &self.fault)
            .finish()
    }
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    /// Create a controller in buffered (`None`) mode.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StreamStatus::None,
            reader: None,
            finish_cb: None,
            fault: None,
        }
    }

    /// Current delivery state.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Whether the request is in (or past) streaming mode.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.status > StreamStatus::None
    }

    /// The fault attached to the `Error` state, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&StreamFault> {
        self.fault.as_ref()
    }

    /// Attach a reader: the `None → Open` transition.
    ///
    /// Returns `false` (without replacing anything) if the controller has
    /// already left buffered mode.
    pub fn start(&mut self, reader: Box<dyn BodyStreamReader>) -> bool {
        if self.status != StreamStatus::None {
            return false;
        }
        self.status = StreamStatus::Open;
        self.reader = Some(reader);
        true
    }

    /// Push one chunk to the attached reader.
    ///
    /// A reader rejection moves the controller to `Error` and notifies the
    /// reader of its own fault. Chunks pushed outside `Open` are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if self.status != StreamStatus::Open {
            return;
        }
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        if let Err(fault) = reader.on_chunk(chunk) {
            self.error(fault);
        }
    }

    /// End-of-body: the `Open → Finish` transition.
    ///
    /// Signals the reader, then fires the finish callback exactly once.
    pub fn finish(&mut self) {
        if self.status != StreamStatus::Open {
            return;
        }
        self.status = StreamStatus::Finish;
        if let Some(reader) = self.reader.as_mut() {
            reader.on_end(None);
        }
        self.fire_finish_cb();
    }

    /// Fault: the `Open → Error` transition.
    ///
    /// The fault is retained for inspection and the finish callback is
    /// unblocked so no waiter hangs on an aborted stream.
    pub fn error(&mut self, fault: StreamFault) {
        if self.status != StreamStatus::Open {
            return;
        }
        self.status = StreamStatus::Error;
        if let Some(reader) = self.reader.as_mut() {
            reader.on_end(Some(&fault));
        }
        self.fault = Some(fault);
        self.fire_finish_cb();
    }

    /// Register a callback for stream completion.
    ///
    /// Fires exactly once, at the terminal transition — or immediately if
    /// the stream has already reached a terminal state, so registration
    /// order cannot lose the notification.
    pub fn wait_for_finish(&mut self, cb: impl FnOnce() + Send + 'static) {
        match self.status {
            StreamStatus::Finish | StreamStatus::Error => cb(),
            StreamStatus::None | StreamStatus::Open => {
                self.finish_cb = Some(Box::new(cb));
            }
        }
    }

    /// Return to buffered mode, clearing all streaming state.
    ///
    /// The only reverse transition; intended for request-reuse paths.
    pub fn quit(&mut self) {
        self.status = StreamStatus::None;
        self.reader = None;
        self.finish_cb = None;
        self.fault = None;
    }

    fn fire_finish_cb(&mut self) {
        if let Some(cb) = self.finish_cb.take() {
            cb();
        }
    }
}
