pub mod memory;
pub mod qdrant;

pub use memory::InMemorySchemeRepository;
pub use qdrant::{QdrantConfig, QdrantStore};
