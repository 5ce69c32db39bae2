pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod index;
mod loader;
pub mod render;
mod select;
pub mod source;
pub mod store;

pub use cache::{ArtifactCache, DiskCache};
pub use config::Config;
pub use error::{ResolveError, Warning};
pub use export::QuestionRecord;
pub use index::{SourceIndex, index_tree, standardize_identifier};
pub use loader::{Resolver, SourceFile, SourceTable};
pub use render::Renderer;
pub use select::{INCLUDEPDF_TEMPLATE, includepdf_formats};
pub use store::{DocumentStore, MemoryStore};
