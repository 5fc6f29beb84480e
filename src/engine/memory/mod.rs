// Engram Salience: Memory Collaborators
//
// Boundaries to the systems that feed the ranking core. Only embeddings
// live here; chunking and storage bootstrap are owned elsewhere.
//
// Module layout:
//   embedding.rs: EmbeddingProvider trait, timeout wrapper, HTTP client

pub mod embedding;

pub use embedding::{
    classify_provider_status, embed_with_timeout, EmbeddingClient, EmbeddingConfig, EmbeddingProvider,
    ProviderStatus,
};
