pub mod embeddings;
pub mod store;

pub use embeddings::{
    cosine_similarity, EmbeddingProvider, HashingEmbedder, HttpEmbeddingProvider,
    DEFAULT_HASHING_DIMS,
};
pub use store::EmbeddingIndex;
