//! `Container`: open/create an AFF4 volume and enumerate, read, and write
//! its logical images (spec §4.8 ADDED).

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use aff4_core::{lexicon, Aff4Stream, Error, Result, Urn, Value};
use aff4_crypto::Vek;
use aff4_resolver::{GraphId, Resolver, StreamHandle};
use aff4_streams::block_store::{write_deduplicated, BlockStore};
use aff4_streams::image::ImageStream;
use aff4_streams::interval::IntervalTree;
use aff4_streams::map::{MapStream, TargetResolver};
use aff4_zip::archive::{Archive, StorageMethod};
use aff4_zip::container_meta::Version;
use aff4_zip::escaping::{member_name_for_urn, EscapeDialect};
use aff4_zip::segment::ArchiveSegmentStream;

use crate::config::ContainerConfig;
use crate::factory::Aff4Factory;

/// How `Container::write_logical` should back a logical file's bytes (spec
/// §4.8 ADDED, grounded on pyaff4's three writable container subclasses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// A single zip segment holding the whole file, uncompressed by the
    /// archive's own member-level deflate.
    Resident,
    /// A bevy-structured image stream, for files too large to buffer
    /// resident but not worth deduplicating.
    WholeFileImage,
    /// A map stream over the container's shared content-addressed block
    /// store; `content_defined` selects CDC over fixed-size chunking.
    Deduplicated { content_defined: bool },
}

/// One enumerable logical file inside a container (spec §3 "Logical image").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalImage {
    pub urn: Urn,
    pub path_name: String,
}

/// An open AFF4 volume: the archive backing store plus its resolver and,
/// once any deduplicated file has been written, the shared block store.
pub struct Container {
    pub(crate) path: PathBuf,
    pub(crate) archive: Rc<RefCell<Archive>>,
    pub(crate) resolver: Resolver,
    pub(crate) vek: Rc<RefCell<Option<Vek>>>,
    pub(crate) config: ContainerConfig,
    pub(crate) escape_dialect: EscapeDialect,
    pub(crate) version: Version,
    pub(crate) volume_urn: Urn,
    pub(crate) writable: bool,
    pub(crate) block_store: Option<BlockStore>,
}

impl Container {
    /// Creates a brand-new container at `path`. The archive is only
    /// buffered in memory until `close` flushes it (spec §4.7 "Archive
    /// backing store").
    pub fn create(path: impl AsRef<Path>, config: ContainerConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let volume_urn = Urn::random();
        let escape_dialect = EscapeDialect::V11;
        let version = Version::V1_1;

        let mut archive = Archive::create(&path, volume_urn.clone(), escape_dialect)?;
        archive.write_member("version.txt", version.format("aff4-rs").into_bytes(), StorageMethod::Stored)?;
        archive.write_member(
            "container.description",
            volume_urn.as_str().as_bytes().to_vec(),
            StorageMethod::Stored,
        )?;
        let archive = Rc::new(RefCell::new(archive));

        let vek = Rc::new(RefCell::new(None));
        let factory = Aff4Factory { archive: archive.clone(), vek: vek.clone(), writable: true };
        let resolver = Resolver::new(Box::new(factory), config.cache_capacity);

        Ok(Self {
            path,
            archive,
            resolver,
            vek,
            config,
            escape_dialect,
            version,
            volume_urn,
            writable: true,
            block_store: None,
        })
    }

    /// Creates a new encrypted container: an outer volume carrying a single
    /// `EncryptedStream` already keyed with a freshly minted VEK wrapped
    /// under `password` (spec §4.8 ADDED, §4.5 "Key bag").
    pub fn create_encrypted(
        path: impl AsRef<Path>,
        password: &str,
        config: ContainerConfig,
    ) -> Result<crate::encrypted::EncryptedContainer> {
        crate::encrypted::EncryptedContainer::create(path, password, config)
    }

    /// Opens an existing container read-only.
    pub fn open(path: impl AsRef<Path>, config: ContainerConfig) -> Result<Self> {
        Self::open_with_mode(path, config, false)
    }

    /// Opens an existing container for appending new logical images.
    pub fn open_append(path: impl AsRef<Path>, config: ContainerConfig) -> Result<Self> {
        Self::open_with_mode(path, config, true)
    }

    fn open_with_mode(path: impl AsRef<Path>, config: ContainerConfig, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Peek version.txt/container.description to learn the escape
        // dialect before constructing the archive that will be used for
        // real (dialect affects how every other member name is derived).
        let probe = Archive::open(&path, EscapeDialect::V11)?;
        let version = probe
            .read_member("version.txt")
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| Version::parse(&text))
            .unwrap_or(Version::V1_1);
        let volume_urn = probe
            .read_member("container.description")
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .map(Urn::new)
            .unwrap_or_else(|| probe.volume_urn().clone());
        let escape_dialect = if version.is_11_or_later() { EscapeDialect::V11 } else { EscapeDialect::V10 };
        drop(probe);

        let archive = if writable { Archive::open_append(&path, escape_dialect)? } else { Archive::open(&path, escape_dialect)? };
        let archive = Rc::new(RefCell::new(archive));

        let vek = Rc::new(RefCell::new(None));
        let factory = Aff4Factory { archive: archive.clone(), vek: vek.clone(), writable };
        let mut resolver = Resolver::new(Box::new(factory), config.cache_capacity);

        if let Ok(bytes) = archive.borrow().read_member("information.turtle") {
            if let Ok(text) = String::from_utf8(bytes) {
                resolver.load_turtle(&text)?;
            }
        }

        Ok(Self {
            path,
            archive,
            resolver,
            vek,
            config,
            escape_dialect,
            version,
            volume_urn,
            writable,
            block_store: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn volume_urn(&self) -> &Urn {
        &self.volume_urn
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Lists every `FileImage` registered in this container.
    pub fn images(&self) -> Vec<LogicalImage> {
        let target = Value::Urn(Urn::new(lexicon::AFF4_FILEIMAGE));
        self.resolver
            .query_predicate_object(GraphId::Persistent, lexicon::AFF4_TYPE, &target)
            .into_iter()
            .map(|urn| {
                let path_name = self
                    .resolver
                    .get_unique(GraphId::Persistent, &urn, lexicon::AFF4_PATH_NAME)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                LogicalImage { urn, path_name }
            })
            .collect()
    }

    /// Reads a logical image's full contents by following its
    /// `dataStream` triple to the backing segment/image/map object.
    pub fn read_logical(&mut self, image: &LogicalImage) -> Result<Vec<u8>> {
        let data_urn = self
            .resolver
            .get_unique(GraphId::Persistent, &image.urn, lexicon::AFF4_DATASTREAM)
            .and_then(|v| v.as_urn().cloned())
            .ok_or_else(|| Error::not_found(format!("no dataStream for {}", image.urn)))?;
        self.read_stream_full(&data_urn)
    }

    fn read_stream_full(&mut self, urn: &Urn) -> Result<Vec<u8>> {
        let types: Vec<String> = self
            .resolver
            .get(GraphId::Any, urn, lexicon::AFF4_TYPE)
            .into_iter()
            .filter_map(|v| v.as_urn().map(|u| u.as_str().to_string()))
            .collect();
        let is_map = types.iter().any(|t| lexicon::is_map_type(t));

        if is_map {
            let is_scudette = types.iter().any(|t| t == lexicon::AFF4_SCUDETTE_MAP_TYPE);
            let dialect = if is_scudette {
                aff4_streams::map::MapDialect::ScudetteSwapped
            } else {
                aff4_streams::map::MapDialect::Standard
            };
            let mut map = MapStream::open(self.archive.clone(), urn.clone(), dialect)?;
            let size = map.size() as usize;
            let mut out = vec![0u8; size];
            let mut filled = 0usize;
            let mut target_resolver = ResolverTargetResolver(&mut self.resolver);
            while filled < out.len() {
                let n = map.read_mapped(&mut out[filled..], &mut target_resolver)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            out.truncate(filled);
            Ok(out)
        } else {
            let handle = self.resolver.factory_open(urn)?;
            handle.borrow_mut().seek(SeekFrom::Start(0))?;
            let mut out = Vec::new();
            handle.borrow_mut().read_to_end(&mut out)?;
            Ok(out)
        }
    }

    /// Writes a logical file's bytes under `path_name`, routing to a zip
    /// segment, whole-file image stream, or the deduplicating block-store
    /// writer according to `strategy`, and registers its `FileImage`
    /// triples.
    pub fn write_logical(&mut self, path_name: &str, reader: &mut dyn Read, len: u64, strategy: WriteStrategy) -> Result<Urn> {
        if !self.writable {
            return Err(Error::invalid_state("container is not open for writing"));
        }

        let fragment = aff4_zip::escaping::arn_path_fragment_from_path(path_name);
        let file_urn = self.volume_urn.append(&fragment);

        let mut data = Vec::with_capacity(len as usize);
        reader.read_to_end(&mut data)?;

        let data_urn = match strategy {
            WriteStrategy::Resident => self.write_resident(&file_urn, &data)?,
            WriteStrategy::WholeFileImage => self.write_whole_file_image(&file_urn, &data)?,
            WriteStrategy::Deduplicated { content_defined } => self.write_deduplicated(&file_urn, &data, content_defined)?,
        };

        self.resolver.add(GraphId::Persistent, &file_urn, lexicon::AFF4_TYPE, Urn::new(lexicon::AFF4_FILEIMAGE));
        self.resolver.set(GraphId::Persistent, &file_urn, lexicon::AFF4_PATH_NAME, path_name);
        self.resolver.set(GraphId::Persistent, &file_urn, lexicon::AFF4_DATASTREAM, data_urn.clone());
        Ok(file_urn)
    }

    fn write_resident(&mut self, file_urn: &Urn, data: &[u8]) -> Result<Urn> {
        let relative = relative_to_volume(&self.archive.borrow(), file_urn);
        let member_name = member_name_for_urn(&relative, self.escape_dialect);
        let mut seg = ArchiveSegmentStream::create(self.archive.clone(), file_urn.clone(), member_name, StorageMethod::Deflated);
        seg.write_all(data)?;
        Aff4Stream::flush_stream(&mut seg)?;
        self.resolver.add(GraphId::Persistent, file_urn, lexicon::AFF4_TYPE, Urn::new(lexicon::AFF4_ZIP_SEGMENT_TYPE));
        Ok(file_urn.clone())
    }

    fn write_whole_file_image(&mut self, file_urn: &Urn, data: &[u8]) -> Result<Urn> {
        let data_urn = file_urn.append("data");
        let mut image = ImageStream::create(
            self.archive.clone(),
            data_urn.clone(),
            self.config.chunk_size,
            self.config.chunks_per_segment,
            self.config.compression,
        );
        image.write_append(data)?;
        Aff4Stream::flush_stream(&mut image)?;

        self.resolver.add(GraphId::Persistent, &data_urn, lexicon::AFF4_TYPE, Urn::new(lexicon::AFF4_IMAGE_TYPE));
        self.resolver.set(GraphId::Persistent, &data_urn, lexicon::AFF4_STREAM_SIZE, image.size() as i64);
        self.resolver.set(GraphId::Persistent, &data_urn, lexicon::AFF4_IMAGE_CHUNK_SIZE, self.config.chunk_size as i64);
        self.resolver.set(
            GraphId::Persistent,
            &data_urn,
            lexicon::AFF4_IMAGE_CHUNKS_PER_SEGMENT,
            self.config.chunks_per_segment as i64,
        );
        self.resolver.set(
            GraphId::Persistent,
            &data_urn,
            lexicon::AFF4_IMAGE_COMPRESSION,
            Urn::new(self.config.compression.type_iri()),
        );
        Ok(data_urn)
    }

    fn write_deduplicated(&mut self, file_urn: &Urn, data: &[u8], content_defined: bool) -> Result<Urn> {
        self.ensure_block_store();
        let data_urn = file_urn.append("map");
        let mut map = MapStream::create(self.archive.clone(), data_urn.clone());
        let mut tree = IntervalTree::new();
        {
            let block_store = self.block_store.as_mut().expect("ensure_block_store just populated it");
            write_deduplicated(&mut &data[..], &mut tree, block_store, self.resolver.store_mut(), self.config.chunk_size, content_defined)?;
        }
        materialize_tree_into_map(&tree, &mut map);
        Aff4Stream::flush_stream(&mut map)?;

        self.resolver.add(GraphId::Persistent, &data_urn, lexicon::AFF4_TYPE, Urn::new(lexicon::AFF4_MAP_TYPE));
        self.resolver.set(GraphId::Persistent, &data_urn, lexicon::AFF4_STREAM_SIZE, map.size() as i64);
        Ok(data_urn)
    }

    /// Creates the shared block store on first dedup write, or reopens the
    /// one a prior session already persisted (so an appended session keeps
    /// deduplicating against chunks written earlier) — it must carry the
    /// same `AFF4_TYPE`/chunking triples as any other image stream so a
    /// hash URN's `dataStream` byte-range can resolve it through the
    /// ordinary factory dispatch on reopen (spec §4.2 step 2).
    fn ensure_block_store(&mut self) {
        if self.block_store.is_some() {
            return;
        }
        let urn = self.volume_urn.append("blockstore");
        let compression = aff4_streams::compression::Compression::Snappy;
        let existing_size = self
            .resolver
            .get_unique(GraphId::Persistent, &urn, lexicon::AFF4_STREAM_SIZE)
            .and_then(|v| v.as_integer())
            .map(|i| i.max(0) as u64);

        let image = match existing_size {
            Some(size) => ImageStream::open(
                self.archive.clone(),
                urn,
                size,
                self.config.chunk_size,
                self.config.chunks_per_segment,
                compression,
            ),
            None => {
                let image = ImageStream::create(
                    self.archive.clone(),
                    urn.clone(),
                    self.config.chunk_size,
                    self.config.chunks_per_segment,
                    compression,
                );
                self.resolver.add(GraphId::Persistent, &urn, lexicon::AFF4_TYPE, Urn::new(lexicon::AFF4_IMAGE_TYPE));
                self.resolver.set(GraphId::Persistent, &urn, lexicon::AFF4_IMAGE_CHUNK_SIZE, self.config.chunk_size as i64);
                self.resolver.set(
                    GraphId::Persistent,
                    &urn,
                    lexicon::AFF4_IMAGE_CHUNKS_PER_SEGMENT,
                    self.config.chunks_per_segment as i64,
                );
                self.resolver.set(GraphId::Persistent, &urn, lexicon::AFF4_IMAGE_COMPRESSION, Urn::new(compression.type_iri()));
                image
            }
        };
        self.block_store = Some(BlockStore::new(image));
    }

    /// Flushes the resolver's RDF metadata and the archive's central
    /// directory, finalizing the container on disk.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut block_store) = self.block_store.take() {
            let urn = block_store.urn().clone();
            block_store.image_mut().flush_stream()?;
            let size = block_store.image_mut().size();
            self.resolver.set(GraphId::Persistent, &urn, lexicon::AFF4_STREAM_SIZE, size as i64);
        }
        let turtle = self.resolver.close()?;
        self.archive.borrow_mut().write_member("information.turtle", turtle.into_bytes(), StorageMethod::Deflated)?;
        self.archive.borrow_mut().flush()?;
        Ok(())
    }
}

fn relative_to_volume(archive: &Archive, urn: &Urn) -> String {
    let vol = archive.volume_urn().as_str();
    urn.as_str().strip_prefix(vol).unwrap_or(urn.as_str()).to_string()
}

fn materialize_tree_into_map(tree: &IntervalTree, map: &mut MapStream) {
    let extent = tree.extent();
    for iv in tree.query_range(0, extent.max(1)) {
        if let Some(target) = tree.target_for_id(iv.target_id) {
            map.add_range(iv.map_offset, iv.target_offset, iv.length, target);
        }
    }
}

/// Adapts the resolver's cache-backed `factory_open` to the map stream's
/// `TargetResolver` trait, so resolving a map's targets reuses already-open
/// cache entries instead of constructing a fresh stream per read.
struct ResolverTargetResolver<'a>(&'a mut Resolver);

impl TargetResolver for ResolverTargetResolver<'_> {
    fn open_target(&mut self, target: &Urn) -> Result<Box<dyn Aff4Stream>> {
        let handle = self.0.factory_open(target)?;
        Ok(Box::new(HandleStream(handle)))
    }
}

/// Wraps a `StreamHandle` as an owned `Box<dyn Aff4Stream>`, since
/// `TargetResolver::open_target` must hand back an owned trait object
/// rather than a cache handle.
struct HandleStream(StreamHandle);

impl Read for HandleStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.borrow_mut().read(buf)
    }
}

impl Seek for HandleStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.borrow_mut().seek(pos)
    }
}

impl Aff4Stream for HandleStream {
    fn urn(&self) -> &Urn {
        self.0.urn()
    }

    fn size(&self) -> u64 {
        self.0.borrow().size()
    }

    fn writable(&self) -> bool {
        self.0.borrow().writable()
    }

    fn dirty(&self) -> bool {
        self.0.borrow().dirty()
    }

    fn flush_stream(&mut self) -> Result<()> {
        self.0.borrow_mut().flush_stream()
    }

    fn abort(self: Box<Self>) -> Result<()> {
        Err(Error::invalid_state("cannot abort a cache-resolved map target directly"))
    }
}

