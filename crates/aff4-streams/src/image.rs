//! The bevy-structured image stream (spec §3 "Image stream", §4.3).
//! Grounded on `totalimage-vaults`'s `Aff4Vault` for the read path's
//! chunk-cache/decompress shape, extended here with the append-only write
//! path pyaff4's `aff4_image.py` `AFF4ImageStream` implements.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::rc::Rc;

use aff4_core::{Aff4Stream, Error, Result, Urn};
use aff4_zip::archive::{Archive, StorageMethod};
use aff4_zip::escaping::{member_name_for_urn, EscapeDialect};
use lru::LruCache;
use tracing::{debug, trace};

use crate::bevy::{decode_index, encode_index, BevyEntry};
use crate::compression::Compression;

pub const DEFAULT_CHUNK_SIZE: usize = 32_768;
pub const DEFAULT_CHUNKS_PER_SEGMENT: usize = 1024;

/// Decoded-chunk cache: process-wide per spec §4.3 ADDED, implemented as a
/// capacity-only LRU (this crate never runs more than one container per
/// thread — see spec §5 "scheduling model" — so a thread-local stands in
/// for pyaff4's module-level cache without introducing shared mutable
/// state across containers).
type ChunkCacheKey = (Urn, u64);
thread_local! {
    static DECODED_CHUNK_CACHE: RefCell<LruCache<ChunkCacheKey, Rc<Vec<u8>>>> =
        RefCell::new(LruCache::new(NonZeroUsize::new(1000).unwrap()));
}

fn bevy_member_name(archive: &Archive, stream_urn: &Urn, bevy_number: u64) -> String {
    let relative = relative_to_volume(archive, stream_urn);
    let path = format!("{relative}/{bevy_number:08}");
    member_name_for_urn(&path, dialect_for(archive))
}

fn bevy_index_member_name(archive: &Archive, stream_urn: &Urn, bevy_number: u64) -> String {
    format!("{}.index", bevy_member_name(archive, stream_urn, bevy_number))
}

fn relative_to_volume(archive: &Archive, urn: &Urn) -> String {
    let vol = archive.volume_urn().as_str();
    urn.as_str().strip_prefix(vol).unwrap_or(urn.as_str()).to_string()
}

fn dialect_for(archive: &Archive) -> EscapeDialect {
    archive.dialect()
}

/// A chunked, compressed, append-only data stream laid out as a sequence of
/// bevies (spec §3 "Image stream").
pub struct ImageStream {
    urn: Urn,
    archive: Rc<RefCell<Archive>>,
    chunk_size: usize,
    chunks_per_segment: usize,
    compression: Compression,
    size: u64,
    writable: bool,
    dirty: bool,

    /// Bytes appended but not yet sliced into whole chunks.
    write_tail: Vec<u8>,
    /// Total count of whole chunks committed to `current_bevy_*` or an
    /// already-flushed bevy.
    chunk_count: u64,
    /// Encoded chunk bytes for the bevy currently being assembled.
    current_bevy_data: Vec<u8>,
    current_bevy_index: Vec<BevyEntry>,
    /// Number of the bevy currently being assembled. Once `flush_bevy`
    /// commits it to the archive, this advances and `current_bevy_*`
    /// becomes empty again, so "is chunk X in the in-progress bevy" is
    /// just `bevy_of(X) == bevy_number && !current_bevy_index.is_empty()`.
    bevy_number: u64,

    read_ptr: u64,
    /// Parsed indexes for already-flushed bevies other than the current
    /// one, loaded lazily on first read.
    loaded_indexes: HashMap<u64, Vec<BevyEntry>>,
}

impl ImageStream {
    /// Creates a brand-new, empty, writable image stream.
    pub fn create(
        archive: Rc<RefCell<Archive>>,
        urn: Urn,
        chunk_size: usize,
        chunks_per_segment: usize,
        compression: Compression,
    ) -> Self {
        Self {
            urn,
            archive,
            chunk_size,
            chunks_per_segment,
            compression,
            size: 0,
            writable: true,
            dirty: false,
            write_tail: Vec::new(),
            chunk_count: 0,
            current_bevy_data: Vec::new(),
            current_bevy_index: Vec::new(),
            bevy_number: 0,
            read_ptr: 0,
            loaded_indexes: HashMap::new(),
        }
    }

    /// Opens an existing image stream for reading, given its geometry
    /// (already resolved by the caller from the stream's RDF triples —
    /// see spec §4.2; this crate doesn't depend on `aff4-resolver`'s quad
    /// store types for constructing geometry, only for dispatch).
    pub fn open(
        archive: Rc<RefCell<Archive>>,
        urn: Urn,
        size: u64,
        chunk_size: usize,
        chunks_per_segment: usize,
        compression: Compression,
    ) -> Self {
        Self {
            urn,
            archive,
            chunk_size,
            chunks_per_segment,
            compression,
            size,
            writable: false,
            dirty: false,
            write_tail: Vec::new(),
            chunk_count: size.div_ceil(chunk_size as u64),
            current_bevy_data: Vec::new(),
            current_bevy_index: Vec::new(),
            bevy_number: 0,
            read_ptr: 0,
            loaded_indexes: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks_per_segment(&self) -> usize {
        self.chunks_per_segment
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    fn bevy_of(&self, chunk_id: u64) -> u64 {
        chunk_id / self.chunks_per_segment as u64
    }

    fn index_in_bevy(&self, chunk_id: u64) -> usize {
        (chunk_id % self.chunks_per_segment as u64) as usize
    }

    /// Appends one whole `chunk_size`-byte (or, for a final padded chunk,
    /// shorter before padding but always `chunk_size` once padded) chunk to
    /// the in-memory current bevy, flushing the bevy if it's now full.
    fn push_chunk(&mut self, plaintext: &[u8]) -> Result<()> {
        let encoded = self.compression.encode_chunk(plaintext, self.chunk_size);
        let offset = self.current_bevy_data.len() as u64;
        self.current_bevy_data.extend_from_slice(&encoded);
        self.current_bevy_index.push(BevyEntry { offset, length: encoded.len() as u32 });
        self.chunk_count += 1;

        if self.current_bevy_index.len() >= self.chunks_per_segment {
            self.flush_bevy()?;
        }
        Ok(())
    }

    /// Serializes the in-progress bevy as two archive members and resets
    /// the in-memory buffers, advancing to the next bevy number.
    fn flush_bevy(&mut self) -> Result<()> {
        if self.current_bevy_index.is_empty() {
            return Ok(());
        }
        let data_name = bevy_member_name(&self.archive.borrow(), &self.urn, self.bevy_number);
        let index_name = bevy_index_member_name(&self.archive.borrow(), &self.urn, self.bevy_number);
        let encoded_index = encode_index(&self.current_bevy_index);

        debug!(urn = %self.urn, bevy = self.bevy_number, chunks = self.current_bevy_index.len(), "flushing bevy");

        self.archive.borrow_mut().write_member(&data_name, std::mem::take(&mut self.current_bevy_data), StorageMethod::Stored)?;
        self.archive.borrow_mut().write_member(&index_name, encoded_index, StorageMethod::Stored)?;

        self.current_bevy_data.clear();
        self.current_bevy_index.clear();
        self.bevy_number += 1;
        Ok(())
    }

    fn ensure_index_loaded(&mut self, bevy: u64) -> Result<()> {
        if bevy == self.bevy_number && !self.current_bevy_index.is_empty() {
            return Ok(());
        }
        if self.loaded_indexes.contains_key(&bevy) {
            return Ok(());
        }
        let index_name = bevy_index_member_name(&self.archive.borrow(), &self.urn, bevy);
        let raw = self.archive.borrow().read_member(&index_name)?;
        let data_name = bevy_member_name(&self.archive.borrow(), &self.urn, bevy);
        let bevy_size = self.archive.borrow().read_member(&data_name).map(|d| d.len() as u64).unwrap_or(0);
        let entries = decode_index(&raw, bevy_size)?;
        self.loaded_indexes.insert(bevy, entries);
        Ok(())
    }

    /// Returns the decoded plaintext for logical chunk `chunk_id`, using
    /// the 4-tier lookup order from spec §4.3: decoded cache, buffered
    /// tail (handled by the caller), in-progress bevy, on-disk bevy.
    fn read_chunk(&mut self, chunk_id: u64) -> Result<Rc<Vec<u8>>> {
        let key: ChunkCacheKey = (self.urn.clone(), chunk_id);
        if let Some(hit) = DECODED_CHUNK_CACHE.with(|c| c.borrow_mut().get(&key).cloned()) {
            trace!(urn = %self.urn, chunk_id, "decoded chunk cache hit");
            return Ok(hit);
        }

        let bevy = self.bevy_of(chunk_id);
        let in_bevy = self.index_in_bevy(chunk_id);

        let (encoded, is_final_partial) = if bevy == self.bevy_number && !self.current_bevy_index.is_empty() {
            let entry = *self
                .current_bevy_index
                .get(in_bevy)
                .ok_or_else(|| Error::not_found(format!("chunk {chunk_id} not yet written")))?;
            let start = entry.offset as usize;
            let end = start + entry.length as usize;
            (self.current_bevy_data[start..end].to_vec(), false)
        } else {
            self.ensure_index_loaded(bevy)?;
            let entries = self.loaded_indexes.get(&bevy).expect("just loaded");
            let entry = *entries.get(in_bevy).ok_or_else(|| Error::not_found(format!("chunk {chunk_id} out of range")))?;
            let data_name = bevy_member_name(&self.archive.borrow(), &self.urn, bevy);
            let bevy_data = self.archive.borrow().read_member(&data_name)?;
            let start = entry.offset as usize;
            let end = start + entry.length as usize;
            (bevy_data[start..end].to_vec(), false)
        };
        let _ = is_final_partial;

        let decoded = self.compression.decode_chunk(&encoded, self.chunk_size)?;
        let decoded = Rc::new(decoded);
        DECODED_CHUNK_CACHE.with(|c| c.borrow_mut().put(key, decoded.clone()));
        Ok(decoded)
    }
}

impl Read for ImageStream {
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
            let chunk_id = pos / self.chunk_size as u64;
            let chunk_start = chunk_id * self.chunk_size as u64;
            let in_chunk_offset = (pos - chunk_start) as usize;

            let decoded = self
                .read_chunk(chunk_id)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            let avail = decoded.len().saturating_sub(in_chunk_offset);
            let take = avail.min((end - pos) as usize);
            buf[written..written + take].copy_from_slice(&decoded[in_chunk_offset..in_chunk_offset + take]);

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

impl Seek for ImageStream {
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

/// Appends `data` to the stream. Image streams are append-only: there is
/// no seek-then-write random access (that's what [`crate::encrypted`]
/// streams are for).
impl ImageStream {
    pub fn write_append(&mut self, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::invalid_state("image stream is not writable"));
        }
        self.write_tail.extend_from_slice(data);
        self.size += data.len() as u64;
        self.dirty = true;

        while self.write_tail.len() >= self.chunk_size {
            let chunk: Vec<u8> = self.write_tail.drain(..self.chunk_size).collect();
            self.push_chunk(&chunk)?;
        }
        Ok(data.len())
    }
}

impl Aff4Stream for ImageStream {
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
        if !self.write_tail.is_empty() {
            let mut padded = std::mem::take(&mut self.write_tail);
            padded.resize(self.chunk_size, 0);
            self.push_chunk(&padded)?;
        }
        self.flush_bevy()?;
        self.dirty = false;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        let mut names = Vec::new();
        for bevy in 0..=self.bevy_number {
            names.push(bevy_member_name(&self.archive.borrow(), &self.urn, bevy));
            names.push(bevy_index_member_name(&self.archive.borrow(), &self.urn, bevy));
        }
        self.archive.borrow_mut().remove_members(&names)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aff4_zip::escaping::EscapeDialect;
    use tempfile::tempdir;

    fn archive() -> Rc<RefCell<Archive>> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.aff4");
        let archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        std::mem::forget(dir);
        Rc::new(RefCell::new(archive))
    }

    #[test]
    fn write_then_read_small_stream_round_trips() {
        let archive = archive();
        let urn = Urn::new("aff4://vol/image");
        let mut stream = ImageStream::create(archive.clone(), urn.clone(), 16, 4, Compression::Deflate);
        stream.write_append(b"hello world this is data").unwrap();
        stream.flush_stream().unwrap();
        archive.borrow_mut().flush().unwrap();

        let mut reader = ImageStream::open(archive, urn, stream.size(), 16, 4, Compression::Deflate);
        let mut out = vec![0u8; stream.size() as usize];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out[..25], b"hello world this is data");
    }

    #[test]
    fn write_across_multiple_bevies() {
        let archive = archive();
        let urn = Urn::new("aff4://vol/image2");
        let mut stream = ImageStream::create(archive.clone(), urn.clone(), 8, 2, Compression::Stored);
        // 5 chunks of 8 bytes = 2 full bevies (2 chunks each) + 1 chunk in a third bevy.
        let payload: Vec<u8> = (0..40u8).collect();
        stream.write_append(&payload).unwrap();
        stream.flush_stream().unwrap();
        archive.borrow_mut().flush().unwrap();
        assert_eq!(stream.bevy_number, 2);

        let mut reader = ImageStream::open(archive, urn, stream.size(), 8, 2, Compression::Stored);
        let mut out = vec![0u8; 40];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn partial_final_chunk_is_zero_padded() {
        let archive = archive();
        let urn = Urn::new("aff4://vol/image3");
        let mut stream = ImageStream::create(archive.clone(), urn.clone(), 16, 4, Compression::Stored);
        stream.write_append(b"short").unwrap();
        stream.flush_stream().unwrap();
        archive.borrow_mut().flush().unwrap();
        assert_eq!(stream.size(), 5);

        let mut reader = ImageStream::open(archive, urn, 5, 16, 4, Compression::Stored);
        let mut out = vec![0u8; 5];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, b"short");
    }

    #[test]
    fn abort_removes_all_bevy_members() {
        let archive = archive();
        let urn = Urn::new("aff4://vol/image4");
        let mut stream = ImageStream::create(archive.clone(), urn.clone(), 8, 2, Compression::Stored);
        stream.write_append(&(0..24u8).collect::<Vec<u8>>()).unwrap();
        stream.flush_stream().unwrap();
        Box::new(stream).abort().unwrap();
        assert!(!archive.borrow().contains_member(&bevy_member_name(&archive.borrow(), &urn, 0)));
    }
}
