mod journal;
pub mod memory;
pub mod qdrant;

pub use memory::{MemoryHistoryStore, MemoryVectorStore, MemoryWeaknessStore};
pub use qdrant::QdrantStore;
