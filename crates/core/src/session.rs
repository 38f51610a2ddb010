//! Stream sessions: one open provider stream plus its cancellation signal.
//!
//! A provider hands back a `StreamSession` when a request is dispatched. The
//! producing side (an HTTP reader task, or the offline simulator) pushes text
//! fragments into a bounded channel; the consuming side pulls them in order.
//!
//! Cancelling the session (explicitly or by dropping it) signals the producer
//! to stop and release its transport resources. After cancellation no further
//! fragments are yielded, and cancellation is never reported as an error.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// One item of a provider stream: a content fragment or a terminal error.
pub type FragmentResult = Result<String, ProviderError>;

/// The producing half of a session.
pub type FragmentSender = mpsc::Sender<FragmentResult>;

/// Channel capacity between producer and consumer.
pub const STREAM_BUFFER: usize = 64;

/// An ephemeral, independently cancellable provider stream.
pub struct StreamSession {
    provider: String,
    rx: mpsc::Receiver<FragmentResult>,
    cancel: CancellationToken,
    primed: Option<String>,
    finished: bool,
}

impl StreamSession {
    /// Create a session together with the sender its producer writes into.
    pub fn channel(provider: impl Into<String>, cancel: CancellationToken) -> (FragmentSender, Self) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let session = Self {
            provider: provider.into(),
            rx,
            cancel,
            primed: None,
            finished: false,
        };
        (tx, session)
    }

    /// Name of the provider producing this stream.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// A handle that cancels this session when triggered.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the stream. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Put back a fragment that was read ahead, so it is yielded next.
    pub fn prime(&mut self, fragment: String) {
        self.primed = Some(fragment);
    }

    /// Next fragment in upstream order.
    ///
    /// Returns `None` once the stream closed normally, after a terminal error
    /// has been yielded, or after the session was cancelled.
    pub async fn next_fragment(&mut self) -> Option<FragmentResult> {
        if self.finished || self.cancel.is_cancelled() {
            return None;
        }
        if let Some(fragment) = self.primed.take() {
            return Some(Ok(fragment));
        }

        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        };

        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }

    /// Drain the session into a single string.
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        let mut text = String::new();
        while let Some(item) = self.next_fragment().await {
            text.push_str(&item?);
        }
        Ok(text)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("provider", &self.provider)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.finished)
            .finish()
    }
}
