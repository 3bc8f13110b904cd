//! Vector store clients.

/// Chroma-compatible remote vector store client.
pub mod chroma;
/// Vector store trait, distance metrics, and the in-memory test store.
pub mod vectorstore;

pub use chroma::ChromaStore;
pub use vectorstore::{CollectionInfo, DistanceMetric, InMemoryVectorStore, VectorStore};
