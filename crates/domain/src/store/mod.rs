pub mod engine;
pub mod memory;

pub use memory::InMemoryDocumentStore;
