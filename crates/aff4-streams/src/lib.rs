//! Bevy-structured image streams, map streams, the block store, and
//! AES-XTS encrypted streams for AFF4 containers (spec §3, §4.2-§4.6).

pub mod bevy;
pub mod block_store;
pub mod byte_range;
pub mod compression;
pub mod encrypted;
pub mod file_backed;
pub mod image;
pub mod interval;
pub mod map;
pub mod symbolic;

pub use bevy::{decode_index, encode_index, BevyEntry};
pub use block_store::{write_deduplicated, BlockStore, CDC_MAX_CHUNK, CDC_TARGET_CHUNK, CDC_WINDOW};
pub use byte_range::ByteRangeStream;
pub use compression::Compression;
pub use encrypted::EncryptedStream;
pub use file_backed::FileBackedStream;
pub use image::ImageStream;
pub use interval::{Interval, IntervalTree};
pub use map::{MapStream, TargetResolver, WritableStream};
pub use symbolic::{FillPattern, SymbolicStream};
