//! # palaver-core
//!
//! Shared types for the streaming chat gateway.
//!
//! - Session and stream identifiers
//! - Chat messages as they arrive on the wire and as they go upstream
//! - [`TokenFragment`](fragment::TokenFragment), the unit of upstream output
//! - [`ChunkBuffer`](chunk_buffer::ChunkBuffer), which turns fragments into frames
//! - The [`CompletionProvider`](provider::CompletionProvider) seam
//! - Inbound request validation

#![deny(unsafe_code)]

pub mod chunk_buffer;
pub mod errors;
pub mod fragment;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod request;

pub use chunk_buffer::{BufferState, ChunkBuffer, DEFAULT_FLUSH_THRESHOLD};
pub use errors::{ProtocolError, SessionError, UpstreamError};
pub use fragment::{FinishReason, TokenFragment};
pub use ids::{SessionId, StreamId};
pub use messages::{ChatMessage, PromptMessage, Role};
pub use provider::{CompletionProvider, FragmentStream, GenerationParams};
pub use request::{ChatRequest, ClientRequest};
