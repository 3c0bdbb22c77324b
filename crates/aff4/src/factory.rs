//! Stream-type dispatch for the resolver's factory slot, implementing the
//! full five-step priority order of spec §4.2: symbolic stream, then hash
//! URN, then byte-range URN, then a persisted `AFF4_TYPE` triple mapped to a
//! registered handler, then URN scheme — falling back to treating the URN
//! as a zip segment when archive shape implies membership that was never an
//! explicit persisted triple (spec §4.1 ADDED note on implied facts).

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use aff4_core::{lexicon, Aff4Stream, Error, Result, Urn};
use aff4_crypto::Vek;
use aff4_resolver::{GraphId, QuadStore, StreamFactory};
use aff4_streams::byte_range::ByteRangeStream;
use aff4_streams::compression::Compression;
use aff4_streams::encrypted::{self, EncryptedStream};
use aff4_streams::file_backed::FileBackedStream;
use aff4_streams::image::{self, ImageStream};
use aff4_streams::map::{MapDialect, MapStream};
use aff4_streams::symbolic::SymbolicStream;
use aff4_zip::archive::Archive;
use aff4_zip::escaping::member_name_for_urn;
use aff4_zip::segment::ArchiveSegmentStream;

pub(crate) struct Aff4Factory {
    pub(crate) archive: Rc<RefCell<Archive>>,
    pub(crate) vek: Rc<RefCell<Option<Vek>>>,
    pub(crate) writable: bool,
}

impl StreamFactory for Aff4Factory {
    fn open(&self, urn: &Urn, store: &QuadStore) -> Result<Box<dyn Aff4Stream>> {
        // (1) symbolic stream — recognized purely from the URN's own
        // scheme, no triples needed.
        if let Some(sym) = SymbolicStream::for_urn(urn) {
            return Ok(Box::new(sym));
        }

        // (2) hash URN — dereferences `dataStream` to the byte-range
        // reference that actually holds the bytes.
        if urn.is_hash_urn() {
            let target = store
                .get_unique(GraphId::Any, urn, lexicon::AFF4_DATASTREAM)
                .and_then(|v| v.as_urn().cloned())
                .ok_or_else(|| Error::not_found(format!("hash URN has no dataStream triple: {urn}")))?;
            return self.open(&target, store);
        }

        // (3) byte-range URN — a window onto whatever the base URN
        // resolves to, constructed directly without consulting triples.
        if let Some((base, offset, length)) = urn.parse_byte_range() {
            let inner = self.open(&base, store)?;
            return Ok(Box::new(ByteRangeStream::new(urn.clone(), inner, offset, length)));
        }

        let types: Vec<String> = store
            .get(GraphId::Any, urn, lexicon::AFF4_TYPE)
            .into_iter()
            .filter_map(|v| v.as_urn().map(|u| u.as_str().to_string()))
            .collect();

        // (4) any persisted AFF4_TYPE triple mapped to a registered handler.
        if types.iter().any(|t| lexicon::is_map_type(t)) {
            let dialect = if types.iter().any(|t| t == lexicon::AFF4_SCUDETTE_MAP_TYPE) {
                MapDialect::ScudetteSwapped
            } else {
                MapDialect::Standard
            };
            let map = MapStream::open(self.archive.clone(), urn.clone(), dialect)?;
            return Ok(Box::new(map));
        }

        if types.iter().any(|t| t.as_str() == lexicon::AFF4_ENCRYPTEDSTREAM_TYPE) {
            let vek = self.vek.borrow().clone().ok_or_else(|| {
                Error::invalid_state("encrypted stream requested before container was keyed")
            })?;
            let size = read_u64(store, urn, lexicon::AFF4_STREAM_SIZE, lexicon::AFF4_LEGACY_STREAM_SIZE, 0);
            let chunk_size = read_u64(
                store,
                urn,
                lexicon::AFF4_IMAGE_CHUNK_SIZE,
                lexicon::AFF4_LEGACY_IMAGE_CHUNK_SIZE,
                encrypted::DEFAULT_CHUNK_SIZE as u64,
            ) as usize;
            let chunks_per_segment = read_u64(
                store,
                urn,
                lexicon::AFF4_IMAGE_CHUNKS_PER_SEGMENT,
                lexicon::AFF4_LEGACY_IMAGE_CHUNKS_PER_SEGMENT,
                encrypted::DEFAULT_CHUNKS_PER_SEGMENT as u64,
            ) as usize;
            let stream = EncryptedStream::open(
                self.archive.clone(),
                urn.clone(),
                vek,
                size,
                chunk_size,
                chunks_per_segment,
                self.writable,
            );
            return Ok(Box::new(stream));
        }

        if types.iter().any(|t| lexicon::is_image_type(t)) {
            let size = read_u64(store, urn, lexicon::AFF4_STREAM_SIZE, lexicon::AFF4_LEGACY_STREAM_SIZE, 0);
            let chunk_size = read_u64(
                store,
                urn,
                lexicon::AFF4_IMAGE_CHUNK_SIZE,
                lexicon::AFF4_LEGACY_IMAGE_CHUNK_SIZE,
                image::DEFAULT_CHUNK_SIZE as u64,
            ) as usize;
            let chunks_per_segment = read_u64(
                store,
                urn,
                lexicon::AFF4_IMAGE_CHUNKS_PER_SEGMENT,
                lexicon::AFF4_LEGACY_IMAGE_CHUNKS_PER_SEGMENT,
                image::DEFAULT_CHUNKS_PER_SEGMENT as u64,
            ) as usize;
            let compression_iri = store
                .get_unique(GraphId::Any, urn, lexicon::AFF4_IMAGE_COMPRESSION)
                .or_else(|| store.get_unique(GraphId::Any, urn, lexicon::AFF4_LEGACY_IMAGE_COMPRESSION))
                .and_then(|v| v.as_urn().map(|u| u.as_str().to_string()));
            let compression = match compression_iri {
                Some(iri) => Compression::from_iri(&iri)?,
                None => Compression::Deflate,
            };
            let stream = ImageStream::open(self.archive.clone(), urn.clone(), size, chunk_size, chunks_per_segment, compression);
            return Ok(Box::new(stream));
        }

        // (5) URN scheme — `file://` resolves straight to a filesystem path,
        // bypassing the archive. Anything else falls back to treating the
        // URN as an archive member whose type triple was never persisted
        // (spec §4.1 ADDED note on implied facts, e.g. zip segments).
        if urn.scheme() == Some("file") {
            if let Some(path) = FileBackedStream::path_for_urn(urn) {
                let stream = FileBackedStream::open(urn.clone(), Path::new(path))?;
                return Ok(Box::new(stream));
            }
        }

        let archive = self.archive.borrow();
        let relative = urn.as_str().strip_prefix(archive.volume_urn().as_str()).unwrap_or(urn.as_str());
        let member_name = member_name_for_urn(relative, archive.dialect());
        if archive.contains_member(&member_name) {
            drop(archive);
            let seg = ArchiveSegmentStream::open(self.archive.clone(), urn.clone(), member_name)?;
            return Ok(Box::new(seg));
        }
        drop(archive);
        Err(Error::unknown_type(urn.as_str()))
    }
}

fn read_u64(store: &QuadStore, urn: &Urn, pred: &str, legacy_pred: &str, default: u64) -> u64 {
    store
        .get_unique(GraphId::Any, urn, pred)
        .or_else(|| store.get_unique(GraphId::Any, urn, legacy_pred))
        .and_then(|v| v.as_integer())
        .map(|i| i.max(0) as u64)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use aff4_core::Value;
    use aff4_zip::escaping::EscapeDialect;
    use tempfile::tempdir;

    use super::*;

    fn factory() -> (Aff4Factory, QuadStore) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.aff4");
        let archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        std::mem::forget(dir);
        let factory = Aff4Factory {
            archive: Rc::new(RefCell::new(archive)),
            vek: Rc::new(RefCell::new(None)),
            writable: true,
        };
        (factory, QuadStore::new())
    }

    #[test]
    fn dispatches_symbolic_stream_before_consulting_any_triple() {
        let (factory, store) = factory();
        let mut stream = factory.open(&Urn::new("aff4://Zero"), &store).unwrap();
        let mut buf = [0xFFu8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0u8; 4]);
    }

    #[test]
    fn dereferences_hash_urn_through_its_data_stream_to_a_byte_range() {
        let (factory, mut store) = factory();
        let chunk_holder = Urn::new("aff4://Zero");
        let hash_urn = Urn::hash_sha512("abc123");
        store.set(GraphId::Persistent, &hash_urn, lexicon::AFF4_DATASTREAM, Value::Urn(chunk_holder.byte_range(0, 6)));

        let mut stream = factory.open(&hash_urn, &store).unwrap();
        let mut buf = [0xAAu8; 6];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0u8; 6]);
    }

    #[test]
    fn byte_range_urn_constructs_without_any_type_triple() {
        let (factory, store) = factory();
        let urn = Urn::new("aff4://SymbolicStream41").byte_range(0, 3);
        let mut stream = factory.open(&urn, &store).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x41; 3]);
    }

    #[test]
    fn unresolvable_hash_urn_is_an_error() {
        let (factory, store) = factory();
        assert!(factory.open(&Urn::hash_sha512("nope"), &store).is_err());
    }
}
