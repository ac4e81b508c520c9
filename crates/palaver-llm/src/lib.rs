//! # palaver-llm
//!
//! [`CompletionProvider`](palaver_core::CompletionProvider) implementations.
//!
//! - [`azure::AzureOpenAiProvider`]: streaming chat completions from an Azure
//!   OpenAI deployment, optionally grounded on an Azure AI Search index
//! - [`mock::MockProvider`]: scripted fragments for deterministic tests
//! - [`sse`]: the Server-Sent Events line parser used by the Azure provider

#![deny(unsafe_code)]

pub mod azure;
pub mod mock;
pub mod sse;

pub use azure::{AzureOpenAiConfig, AzureOpenAiProvider, AzureSearchSource};
pub use mock::{MockProvider, MockResponse, MockStep};
