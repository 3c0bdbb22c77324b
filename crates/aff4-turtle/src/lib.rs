//! Minimal Turtle codec for the `information.turtle` metadata graph that
//! every AFF4 container carries. See [`codec`] for the grammar this
//! supports.

pub mod codec;
pub mod quad;

pub use codec::{read_turtle, write_turtle};
pub use quad::Quad;
