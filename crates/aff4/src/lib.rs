//! The container façade (spec §4.8 ADDED): composes the resolver, archive,
//! and stream crates into `Container`/`EncryptedContainer`, the entry point
//! an embedder actually opens, creates, and writes logical images through.
//!
//! Grounded on pyaff4 `container.py`'s `Container`, `PhysicalImageContainer`,
//! `LogicalImageContainer`, `WritableLogicalImageContainer`,
//! `WritableHashBasedImageContainer`, and `EncryptedImageContainer`.

mod config;
mod container;
mod encrypted;
mod factory;

pub use config::ContainerConfig;
pub use container::{Container, LogicalImage, WriteStrategy};
pub use encrypted::EncryptedContainer;
