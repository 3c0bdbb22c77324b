//! Construction-time container configuration (spec §13 ADDED). There is no
//! environment-variable or file-based config layer here: this is a library
//! crate embedded by a caller that owns its own configuration surface.

use aff4_streams::compression::Compression;
use aff4_streams::image;

/// Geometry and policy knobs for `Container::create`/`create_encrypted`.
/// Opening an existing container never consults this — geometry there
/// comes from the container's own persisted triples (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerConfig {
    pub chunk_size: usize,
    pub chunks_per_segment: usize,
    pub compression: Compression,
    /// Files at or under this size are written resident (a single zip
    /// segment) instead of as an image stream, per `WriteStrategy::Resident`.
    pub max_segment_resident_size: u64,
    pub cache_capacity: usize,
    pub pbkdf2_iterations: u32,
    /// Whether `WriteStrategy::Deduplicated` defaults to content-defined
    /// chunking. Overridden per call by `WriteStrategy::Deduplicated`'s own
    /// field; this only affects the convenience constructors.
    pub dedup_content_defined: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            chunk_size: image::DEFAULT_CHUNK_SIZE,
            chunks_per_segment: image::DEFAULT_CHUNKS_PER_SEGMENT,
            compression: Compression::Deflate,
            max_segment_resident_size: 1024 * 1024,
            cache_capacity: 64,
            pbkdf2_iterations: aff4_crypto::DEFAULT_PBKDF2_ITERATIONS,
            dedup_content_defined: false,
        }
    }
}
