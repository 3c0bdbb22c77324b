//! The common capability interface every stream kind implements (spec §9
//! "Polymorphism"): a tagged variant over file-backed / archive-segment /
//! image / map / encrypted / byte-range / symbolic streams, behind one
//! trait rather than a class hierarchy with back-pointers.

use std::io::{Read, Seek};

use crate::{Result, Urn};

/// Every AFF4 stream kind implements this on top of `Read + Seek`.
///
/// `abort` takes `self: Box<Self>` because aborting is consuming: the spec
/// (§4.3 "Abort", §5 "Cancellation") treats it as tearing the stream down,
/// not a state it can continue operating in afterwards.
pub trait Aff4Stream: Read + Seek {
    fn urn(&self) -> &Urn;

    fn size(&self) -> u64;

    fn writable(&self) -> bool;

    fn dirty(&self) -> bool;

    /// Serializes any pending in-memory state to the backing archive.
    /// Idempotent: calling `flush_stream` on a clean object is a no-op
    /// (spec §7 "Flush is idempotent").
    fn flush_stream(&mut self) -> Result<()>;

    /// Discards pending state and removes any already-persisted artifacts
    /// for this stream. Idempotent (spec §7 "Abort is idempotent").
    fn abort(self: Box<Self>) -> Result<()>;
}
