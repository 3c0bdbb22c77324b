//! The encrypted stream (spec §3 "Random/Encrypted stream", §4.5): the
//! image stream's bevy layout with fixed chunk geometry, `stored`
//! compression, and per-chunk AES-XTS — and, unlike [`crate::image`],
//! random writes.
//!
//! Grounded on `totalimage-vaults`'s `Aff4Vault` for the bevy member-name
//! and archive-read shape, extended with the whole-bevy-buffered
//! random-write path pyaff4's `aff4_image.py`
//! `AFF4WritableStream.write_from` implements for `AFF4Map`'s backing
//! stream use case.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use aff4_core::{Aff4Stream, Error, Result, Urn};
use aff4_crypto::{decrypt_chunk, encrypt_chunk, Vek};
use aff4_zip::archive::{Archive, StorageMethod};
use aff4_zip::escaping::{member_name_for_urn, EscapeDialect};
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNKS_PER_SEGMENT: usize = 2048;

fn bevy_member_name(archive: &Archive, stream_urn: &Urn, bevy_number: u64) -> String {
    let relative = relative_to_volume(archive, stream_urn);
    let path = format!("{relative}/{bevy_number:08}");
    member_name_for_urn(&path, dialect_for(archive))
}

fn relative_to_volume(archive: &Archive, urn: &Urn) -> String {
    let vol = archive.volume_urn().as_str();
    urn.as_str().strip_prefix(vol).unwrap_or(urn.as_str()).to_string()
}

fn dialect_for(archive: &Archive) -> EscapeDialect {
    archive.dialect()
}

/// A random-access, AES-XTS-encrypted data stream, laid out as fixed-size
/// chunks (spec default 512 B) grouped into bevies (spec default 2048
/// chunks/bevy). Because chunks never compress to a variable length, a
/// chunk's offset within its bevy is `chunk_index * chunk_size` — no
/// parallel index member is needed the way [`crate::image::ImageStream`]
/// needs one.
pub struct EncryptedStream {
    urn: Urn,
    archive: Rc<RefCell<Archive>>,
    vek: Vek,
    chunk_size: usize,
    chunks_per_segment: usize,
    size: u64,
    writable: bool,
    dirty: bool,

    /// Number of the bevy currently buffered in `bevy_buf`.
    bevy_number: u64,
    /// Plaintext for every chunk of `bevy_number`, concatenated.
    /// Capacity-sized (`chunks_per_segment * chunk_size`); chunks beyond
    /// `chunks_filled` are zero and not yet written to the archive.
    bevy_buf: Vec<u8>,
    /// Count of whole chunks in the buffered bevy that hold real data
    /// (the prefix `bevy_buf[..chunks_filled * chunk_size]` that gets
    /// flushed — trailing never-written chunks aren't persisted).
    chunks_filled: usize,
    bevy_dirty: bool,
    /// Whether `bevy_buf` actually reflects `bevy_number`'s on-disk
    /// contents yet. `create` starts `true` (bevy 0 is trivially empty);
    /// `open` starts `false` so the first access always loads from disk.
    bevy_loaded: bool,

    read_ptr: u64,
}

impl EncryptedStream {
    pub fn create(
        archive: Rc<RefCell<Archive>>,
        urn: Urn,
        vek: Vek,
        chunk_size: usize,
        chunks_per_segment: usize,
    ) -> Self {
        Self {
            urn,
            archive,
            vek,
            chunk_size,
            chunks_per_segment,
            size: 0,
            writable: true,
            dirty: false,
            bevy_number: 0,
            bevy_buf: vec![0u8; chunk_size * chunks_per_segment],
            chunks_filled: 0,
            bevy_dirty: false,
            bevy_loaded: true,
            read_ptr: 0,
        }
    }

    /// Opens an existing encrypted stream, given its geometry and
    /// unwrapped VEK (resolved by the caller — see spec §4.5 "Key bag").
    /// `writable` lets the caller reopen in append mode for S4-style
    /// random overwrite scenarios.
    pub fn open(
        archive: Rc<RefCell<Archive>>,
        urn: Urn,
        vek: Vek,
        size: u64,
        chunk_size: usize,
        chunks_per_segment: usize,
        writable: bool,
    ) -> Self {
        Self {
            urn,
            archive,
            vek,
            chunk_size,
            chunks_per_segment,
            size,
            writable,
            dirty: false,
            bevy_number: 0,
            bevy_buf: vec![0u8; chunk_size * chunks_per_segment],
            chunks_filled: 0,
            bevy_dirty: false,
            bevy_loaded: false,
            read_ptr: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks_per_segment(&self) -> usize {
        self.chunks_per_segment
    }

    fn bevy_capacity_bytes(&self) -> u64 {
        (self.chunk_size * self.chunks_per_segment) as u64
    }

    fn bevy_of(&self, offset: u64) -> u64 {
        offset / self.bevy_capacity_bytes()
    }

    /// Loads `bevy` into `bevy_buf`, decrypting whatever chunks the
    /// archive already holds for it, or zero-initializes it if it has
    /// never been flushed.
    fn load_bevy(&mut self, bevy: u64) -> Result<()> {
        self.bevy_buf.clear();
        self.bevy_buf.resize(self.chunk_size * self.chunks_per_segment, 0);
        self.chunks_filled = 0;

        let name = bevy_member_name(&self.archive.borrow(), &self.urn, bevy);
        let raw = match self.archive.borrow().read_member(&name) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.bevy_number = bevy;
                self.bevy_loaded = true;
                return Ok(());
            }
        };

        let chunk_count = raw.len() / self.chunk_size;
        let base_lca = bevy * self.chunks_per_segment as u64;
        for i in 0..chunk_count {
            let ciphertext = &raw[i * self.chunk_size..(i + 1) * self.chunk_size];
            let plaintext = decrypt_chunk(&self.vek, base_lca + i as u64, ciphertext);
            self.bevy_buf[i * self.chunk_size..(i + 1) * self.chunk_size].copy_from_slice(&plaintext);
        }
        self.chunks_filled = chunk_count;
        self.bevy_number = bevy;
        self.bevy_loaded = true;
        Ok(())
    }

    /// Encrypts every filled chunk of the buffered bevy and (re)writes it
    /// and removes any stale copy first, per spec §4.5 "a full bevy
    /// triggers `_flush_bevy`, which removes the prior on-disk bevy...and
    /// rewrites them with updated contents."
    fn flush_bevy(&mut self) -> Result<()> {
        if !self.bevy_dirty || self.chunks_filled == 0 {
            self.bevy_dirty = false;
            return Ok(());
        }
        let name = bevy_member_name(&self.archive.borrow(), &self.urn, self.bevy_number);
        let base_lca = self.bevy_number * self.chunks_per_segment as u64;

        let mut ciphertext = Vec::with_capacity(self.chunks_filled * self.chunk_size);
        for i in 0..self.chunks_filled {
            let plaintext = &self.bevy_buf[i * self.chunk_size..(i + 1) * self.chunk_size];
            ciphertext.extend_from_slice(&encrypt_chunk(&self.vek, base_lca + i as u64, plaintext));
        }

        debug!(urn = %self.urn, bevy = self.bevy_number, chunks = self.chunks_filled, "flushing encrypted bevy");
        let _ = self.archive.borrow_mut().remove_members(std::slice::from_ref(&name));
        self.archive.borrow_mut().write_member(&name, ciphertext, StorageMethod::Stored)?;
        self.bevy_dirty = false;
        Ok(())
    }

    /// Ensures `bevy` is the buffered bevy, flushing and (re)loading as
    /// needed when crossing a bevy boundary.
    fn ensure_bevy(&mut self, bevy: u64) -> Result<()> {
        if bevy == self.bevy_number && self.bevy_loaded {
            return Ok(());
        }
        self.flush_bevy()?;
        self.load_bevy(bevy)?;
        Ok(())
    }

    /// Writes `data` at logical offset `offset`, extending `size` and
    /// splicing across bevy boundaries as needed (spec §4.5 "Random
    /// write").
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::invalid_state("encrypted stream is not writable"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mut pos = offset;
        let mut written = 0usize;
        while written < data.len() {
            let bevy = self.bevy_of(pos);
            self.ensure_bevy(bevy)?;

            let bevy_base = bevy * self.bevy_capacity_bytes();
            let in_bevy_offset = (pos - bevy_base) as usize;
            let chunk_index = in_bevy_offset / self.chunk_size;
            let in_chunk_offset = in_bevy_offset % self.chunk_size;

            let room_in_bevy = self.bevy_buf.len() - in_bevy_offset;
            let take = (data.len() - written).min(room_in_bevy);
            self.bevy_buf[in_bevy_offset..in_bevy_offset + take].copy_from_slice(&data[written..written + take]);

            let highest_chunk_touched = chunk_index + (in_chunk_offset + take).div_ceil(self.chunk_size).max(1) - 1;
            self.chunks_filled = self.chunks_filled.max(highest_chunk_touched + 1);
            self.bevy_dirty = true;

            written += take;
            pos += take as u64;
        }

        self.size = self.size.max(offset + data.len() as u64);
        self.dirty = true;
        Ok(written)
    }

    /// Truncates the stream's reported size. Spec §4.5 "Size bookkeeping":
    /// data beyond `n` is never re-read, though it may remain on disk
    /// until the bevies holding it are next rewritten.
    pub fn trim(&mut self, n: u64) {
        self.size = n;
        self.dirty = true;
    }
}

impl Read for EncryptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size.saturating_sub(self.read_ptr);
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }

        let mut written = 0usize;
        let mut pos = self.read_ptr;
        let end = self.read_ptr + want as u64;

        while pos < end {
            let bevy = self.bevy_of(pos);
            self.ensure_bevy(bevy).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

            let bevy_base = bevy * self.bevy_capacity_bytes();
            let in_bevy_offset = (pos - bevy_base) as usize;
            let avail_in_bevy = self.bevy_buf.len() - in_bevy_offset;
            let take = avail_in_bevy.min((end - pos) as usize);

            buf[written..written + take].copy_from_slice(&self.bevy_buf[in_bevy_offset..in_bevy_offset + take]);
            written += take;
            pos += take as u64;
            if take == 0 {
                break;
            }
        }

        self.read_ptr = pos;
        Ok(written)
    }
}

impl Seek for EncryptedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.size as i64 + delta,
            SeekFrom::Current(delta) => self.read_ptr as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative seek"));
        }
        self.read_ptr = new_pos as u64;
        Ok(self.read_ptr)
    }
}

/// Lets an `EncryptedStream` serve as a [`crate::map::WritableStream`]
/// backing stream: writes append at the current write position (tracked
/// via `size`, since `write_at` is random-access underneath).
impl Write for EncryptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let offset = self.size;
        self.write_at(offset, buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn flush(&mut self) -> io::Result<()> {
        Aff4Stream::flush_stream(self).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl Aff4Stream for EncryptedStream {
    fn urn(&self) -> &Urn {
        &self.urn
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn dirty(&self) -> bool {
        self.dirty
    }

    fn flush_stream(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.flush_bevy()?;
        self.dirty = false;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        let last_bevy = self.bevy_of(self.size.max(1) - 1);
        let mut names = Vec::new();
        for bevy in 0..=last_bevy {
            names.push(bevy_member_name(&self.archive.borrow(), &self.urn, bevy));
        }
        self.archive.borrow_mut().remove_members(&names)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn archive() -> Rc<RefCell<Archive>> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.aff4");
        let archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        std::mem::forget(dir);
        Rc::new(RefCell::new(archive))
    }

    #[test]
    fn write_then_read_round_trips_within_one_bevy() {
        let archive = archive();
        let vek = Vek::random();
        let mut stream = EncryptedStream::create(archive, Urn::new("aff4://vol/enc"), vek, 512, 8);
        stream.write_at(0, &[0xAAu8; 512]).unwrap();
        stream.write_at(512, &[0xBBu8; 512]).unwrap();
        Aff4Stream::flush_stream(&mut stream).unwrap();

        let mut buf = vec![0u8; 1024];
        stream.seek(SeekFrom::Start(0)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..512], &[0xAAu8; 512][..]);
        assert_eq!(&buf[512..], &[0xBBu8; 512][..]);
    }

    #[test]
    fn overwrite_after_reopen_replaces_earlier_write() {
        let archive = archive();
        let vek = Vek::random();
        {
            let mut stream = EncryptedStream::create(archive.clone(), Urn::new("aff4://vol/enc"), vek.clone(), 512, 4);
            stream.write_at(0, &[b'a'; 512]).unwrap();
            Aff4Stream::flush_stream(&mut stream).unwrap();
        }
        {
            let mut stream = EncryptedStream::open(archive.clone(), Urn::new("aff4://vol/enc"), vek.clone(), 512, 512, 4, true);
            stream.write_at(0, &[b'b'; 1]).unwrap();
            Aff4Stream::flush_stream(&mut stream).unwrap();
        }
        {
            let mut stream = EncryptedStream::open(archive, Urn::new("aff4://vol/enc"), vek, 512, 512, 4, false);
            let mut buf = vec![0u8; 512];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf[0], b'b');
            assert_eq!(&buf[1..], &[b'a'; 511][..]);
        }
    }

    #[test]
    fn write_crossing_bevy_boundary_persists_both_bevies() {
        let archive = archive();
        let vek = Vek::random();
        let chunk_size = 512usize;
        let chunks_per_segment = 4usize;
        let bevy_capacity = (chunk_size * chunks_per_segment) as u64;

        let mut stream = EncryptedStream::create(archive, Urn::new("aff4://vol/enc"), vek, chunk_size, chunks_per_segment);
        stream.write_at(0, &[b'a'; 512]).unwrap();
        stream.write_at(bevy_capacity + 2, &[b'c'; 512]).unwrap();
        Aff4Stream::flush_stream(&mut stream).unwrap();

        assert_eq!(stream.size(), bevy_capacity + 2 + 512);

        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut first = vec![0u8; 512];
        stream.read_exact(&mut first).unwrap();
        assert_eq!(first, vec![b'a'; 512]);

        stream.seek(SeekFrom::Start(bevy_capacity + 2)).unwrap();
        let mut second = vec![0u8; 512];
        stream.read_exact(&mut second).unwrap();
        assert_eq!(second, vec![b'c'; 512]);
    }

    #[test]
    fn trim_shrinks_reported_size() {
        let archive = archive();
        let vek = Vek::random();
        let mut stream = EncryptedStream::create(archive, Urn::new("aff4://vol/enc"), vek, 512, 4);
        stream.write_at(0, &[1u8; 512]).unwrap();
        stream.trim(100);
        assert_eq!(stream.size(), 100);
    }
}
