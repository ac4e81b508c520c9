//! Fragment-to-frame buffering.
//!
//! [`ChunkBuffer`] decides when accumulated token text is worth sending as a
//! frame. The first frame of a completion is held back until the upstream
//! says the completion is finished; after that, text is released at sentence
//! boundaries or once it reaches the flush threshold.
//!
//! ```text
//!   FirstMessage ──stop──▶ Streaming ──stop/length──▶ Done
//!        │                                              ▲
//!        └──────────────── finish() ───────────────────┘
//! ```

use crate::fragment::{FinishReason, TokenFragment};

/// Default number of characters that forces a flush while streaming.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

/// Lifecycle of a [`ChunkBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing flushed yet; only an explicit stop releases text.
    FirstMessage,
    /// At least one flush happened; text is released by length or punctuation.
    Streaming,
    /// Terminal. Further fragments are ignored.
    Done,
}

/// Per-generation buffer that turns token fragments into output frames.
#[derive(Debug)]
pub struct ChunkBuffer {
    buffer: String,
    state: BufferState,
    truncated: bool,
    threshold: usize,
}

impl ChunkBuffer {
    /// Buffer with the default threshold.
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FLUSH_THRESHOLD)
    }

    /// Buffer flushing at `threshold` characters while streaming.
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            buffer: String::new(),
            state: BufferState::FirstMessage,
            truncated: false,
            threshold,
        }
    }

    /// Feed one fragment. Returns the frame to emit, if any.
    pub fn push(&mut self, fragment: &TokenFragment) -> Option<String> {
        if self.state == BufferState::Done {
            return None;
        }
        self.buffer.push_str(&fragment.text);

        match self.state {
            BufferState::FirstMessage => {
                if fragment.finish_reason == Some(FinishReason::Stop) {
                    self.state = BufferState::Streaming;
                    self.take()
                } else {
                    None
                }
            }
            BufferState::Streaming => match fragment.finish_reason {
                Some(FinishReason::Length) => {
                    self.truncated = true;
                    self.state = BufferState::Done;
                    self.take()
                }
                Some(FinishReason::Stop) => {
                    self.state = BufferState::Done;
                    self.take()
                }
                _ if self.should_flush() => self.take(),
                _ => None,
            },
            BufferState::Done => None,
        }
    }

    /// Upstream ended without a terminal marker: release whatever is left.
    pub fn finish(&mut self) -> Option<String> {
        if self.state == BufferState::Done {
            return None;
        }
        self.state = BufferState::Done;
        self.take()
    }

    /// Drop unflushed text without emitting it.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.state = BufferState::Done;
    }

    /// Current state.
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Whether the buffer reached its terminal state.
    pub fn is_done(&self) -> bool {
        self.state == BufferState::Done
    }

    /// Whether the completion was cut at the token cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Characters currently held back.
    pub fn pending_chars(&self) -> usize {
        self.buffer.chars().count()
    }

    fn should_flush(&self) -> bool {
        if self.buffer.chars().count() >= self.threshold {
            return true;
        }
        matches!(
            self.buffer.trim_end().chars().last(),
            Some('.' | '!' | '?')
        ) || self.buffer.ends_with('\n')
    }

    fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
