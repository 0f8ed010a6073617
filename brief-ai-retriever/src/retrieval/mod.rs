pub mod chunking_strategy;
pub mod engine;
pub mod metadata_store;
pub mod vector_index;
