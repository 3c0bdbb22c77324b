//! ZIP64 archive backing store, segment streams, and the archive-level
//! metadata members (`version.txt`, `container.description`) required by
//! every AFF4 container.

pub mod archive;
pub mod container_meta;
pub mod escaping;
pub mod segment;

pub use archive::{Archive, StorageMethod};
pub use container_meta::{parse_properties, Version};
pub use escaping::EscapeDialect;
pub use segment::ArchiveSegmentStream;
