mod project;
mod registry;

pub use project::{Indexer, Project};
pub use registry::Registry;
