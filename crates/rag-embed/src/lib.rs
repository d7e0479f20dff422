//! rag-embed - Embedding providers
//!
//! This crate provides [`Embedder`] implementations:
//!
//! - [`MockEmbedder`]: deterministic hash-based vectors, no model needed.
//! - [`StubEmbedder`]: a fixed text-to-vector table for tests.
//! - [`CachedEmbedder`]: a caching decorator over any embedder.
//! - `OllamaEmbedder` (feature `ollama`): Ollama's `/api/embed`, one request per text.
//! - `OpenAiEmbedder` (feature `openai`): OpenAI-compatible `/embeddings`, one batched request.
//! - `OnnxEmbedder` (feature `onnx`): local ONNX Runtime inference.
//!
//! No provider retries: transient failures surface to the caller.

mod cache;
#[cfg(any(feature = "ollama", feature = "openai"))]
mod http;
mod mock;
#[cfg(feature = "ollama")]
mod ollama;
#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "openai")]
mod openai;

pub use cache::{CacheStats, CachedEmbedder};
pub use mock::{MockEmbedder, StubEmbedder};
#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;
#[cfg(feature = "openai")]
pub use openai::OpenAiEmbedder;

// Re-export the Embedder trait for convenience
pub use rag_core::Embedder;
