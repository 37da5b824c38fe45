mod chunker;
mod loader;

pub use chunker::Chunker;
pub use loader::DocumentLoader;
