//! The quad store and object cache shared by every AFF4 container: this is
//! the resolver the rest of the workspace builds on (spec §4.1).

pub mod cache;
pub mod graph;
pub mod resolver;

pub use cache::{ObjectCache, StreamFactory, StreamHandle};
pub use graph::{GraphId, QuadStore};
pub use resolver::Resolver;
