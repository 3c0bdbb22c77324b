//! The map stream (spec §3 "Map stream", §4.4): a sparse set of ranges
//! over one or more target streams, persisted as a `<urn>/map` interval
//! table plus a `<urn>/idx` target-URN list.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use aff4_core::{Aff4Stream, Error, Result, Urn};
use aff4_zip::archive::{Archive, StorageMethod};
use aff4_zip::escaping::member_name_for_urn;
use tracing::warn;

use crate::interval::{Interval, IntervalTree};

/// Resolves a target URN to a readable stream, so the map stream can serve
/// reads without depending on the resolver's concrete cache types.
pub trait TargetResolver {
    fn open_target(&mut self, target: &Urn) -> Result<Box<dyn Aff4Stream>>;
}

/// A backing stream for `write_mapped`: every concrete stream type in this
/// crate is both an `Aff4Stream` and a `Write`, but the trait object the
/// map stream needs has to name both.
pub trait WritableStream: Aff4Stream + Write {}
impl<T: Aff4Stream + Write> WritableStream for T {}

fn relative_to_volume(archive: &Archive, urn: &Urn) -> String {
    let vol = archive.volume_urn().as_str();
    urn.as_str().strip_prefix(vol).unwrap_or(urn.as_str()).to_string()
}

fn map_member_name(archive: &Archive, urn: &Urn) -> String {
    let relative = relative_to_volume(archive, urn);
    member_name_for_urn(&format!("{relative}/map"), archive.dialect())
}

fn idx_member_name(archive: &Archive, urn: &Urn) -> String {
    let relative = relative_to_volume(archive, urn);
    member_name_for_urn(&format!("{relative}/idx"), archive.dialect())
}

/// On-disk entry layout variant. Standard is always written; legacy is
/// read-only (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDialect {
    Standard,
    ScudetteSwapped,
}

/// `(u64 map_offset, u64 length, u64 target_offset, u32 target_id)`,
/// little-endian — 28 bytes/entry (spec §4.4 "Persistence"). The legacy
/// Scudette layout swaps `length` and `target_offset`.
const ENTRY_SIZE: usize = 28;

fn encode_entries(intervals: &[Interval]) -> Vec<u8> {
    let mut out = Vec::with_capacity(intervals.len() * ENTRY_SIZE);
    for iv in intervals {
        out.extend_from_slice(&iv.map_offset.to_le_bytes());
        out.extend_from_slice(&iv.length.to_le_bytes());
        out.extend_from_slice(&iv.target_offset.to_le_bytes());
        out.extend_from_slice(&iv.target_id.to_le_bytes());
    }
    out
}

fn decode_entries(raw: &[u8], dialect: MapDialect) -> Result<Vec<Interval>> {
    if raw.len() % ENTRY_SIZE != 0 {
        return Err(Error::decode("map entries: length is not a multiple of the entry size"));
    }
    let mut out = Vec::with_capacity(raw.len() / ENTRY_SIZE);
    for chunk in raw.chunks_exact(ENTRY_SIZE) {
        let map_offset = u64::from_le_bytes(chunk[0..8].try_into().unwrap());
        let field_b = u64::from_le_bytes(chunk[8..16].try_into().unwrap());
        let field_c = u64::from_le_bytes(chunk[16..24].try_into().unwrap());
        let target_id = u32::from_le_bytes(chunk[24..28].try_into().unwrap());
        let (length, target_offset) = match dialect {
            MapDialect::Standard => (field_b, field_c),
            MapDialect::ScudetteSwapped => (field_c, field_b),
        };
        out.push(Interval { map_offset, length, target_offset, target_id });
    }
    Ok(out)
}

fn encode_idx(targets: &[Urn]) -> Vec<u8> {
    let joined = targets.iter().map(Urn::as_str).collect::<Vec<_>>().join("\n");
    joined.into_bytes()
}

fn decode_idx(raw: &[u8]) -> Vec<Urn> {
    String::from_utf8_lossy(raw).lines().filter(|l| !l.is_empty()).map(Urn::new).collect()
}

/// A sparse stream composed of ranges onto other streams (spec §3 "Map
/// stream").
pub struct MapStream {
    urn: Urn,
    archive: Rc<RefCell<Archive>>,
    tree: IntervalTree,
    writable: bool,
    dirty: bool,
    read_ptr: u64,
    write_ptr: u64,
    backing_stream_urn: Option<Urn>,
}

impl MapStream {
    pub fn create(archive: Rc<RefCell<Archive>>, urn: Urn) -> Self {
        Self {
            urn,
            archive,
            tree: IntervalTree::new(),
            writable: true,
            dirty: false,
            read_ptr: 0,
            write_ptr: 0,
            backing_stream_urn: None,
        }
    }

    /// Loads an existing map stream's persisted `/map` and `/idx` members.
    pub fn open(archive: Rc<RefCell<Archive>>, urn: Urn, dialect: MapDialect) -> Result<Self> {
        let map_raw = archive.borrow().read_member(&map_member_name(&archive.borrow(), &urn))?;
        let idx_raw = archive.borrow().read_member(&idx_member_name(&archive.borrow(), &urn))?;
        let targets = decode_idx(&idx_raw);
        let entries = decode_entries(&map_raw, dialect)?;

        let mut tree = IntervalTree::new();
        for target in &targets {
            tree.target_id_for(target);
        }
        // Consecutive entries with identical target and contiguous offsets
        // are coalesced before insertion (spec §4.4).
        let mut pending: Option<Interval> = None;
        for entry in entries {
            match pending {
                Some(prev) if prev.target_id == entry.target_id && prev.map_end() == entry.map_offset && prev.target_end() == entry.target_offset => {
                    pending = Some(Interval { map_offset: prev.map_offset, length: prev.length + entry.length, target_offset: prev.target_offset, target_id: prev.target_id });
                }
                Some(prev) => {
                    tree.insert_raw(prev);
                    pending = Some(entry);
                }
                None => pending = Some(entry),
            }
        }
        if let Some(last) = pending {
            tree.insert_raw(last);
        }

        Ok(Self {
            urn,
            archive,
            tree,
            writable: false,
            dirty: false,
            read_ptr: 0,
            write_ptr: 0,
            backing_stream_urn: None,
        })
    }

    pub fn set_backing_stream(&mut self, urn: Urn) {
        self.backing_stream_urn = Some(urn);
    }

    pub fn add_range(&mut self, map_offset: u64, target_offset: u64, length: u64, target: &Urn) {
        self.tree.add_range(map_offset, target_offset, length, target);
        self.dirty = true;
    }

    pub fn targets(&self) -> &[Urn] {
        self.tree.targets()
    }

    /// Reads up to `buf.len()` bytes, resolving each covered interval's
    /// target via `resolver`. Gaps and target-open failures read back as
    /// zero bytes (spec §4.4 "a deliberate robustness choice").
    pub fn read_mapped(&mut self, buf: &mut [u8], resolver: &mut dyn TargetResolver) -> Result<usize> {
        let size = self.tree.extent();
        let remaining = size.saturating_sub(self.read_ptr);
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }

        let start = self.read_ptr;
        let end = start + want as u64;
        for b in &mut buf[..want] {
            *b = 0;
        }

        for interval in self.tree.query_range(start, end) {
            let overlap_start = interval.map_offset.max(start);
            let overlap_end = interval.map_end().min(end);
            if overlap_start >= overlap_end {
                continue;
            }
            let target = self
                .tree
                .target_for_id(interval.target_id)
                .cloned()
                .ok_or_else(|| Error::decode("map entry references unknown target id"))?;

            let target_offset = interval.target_offset + (overlap_start - interval.map_offset);
            let len = (overlap_end - overlap_start) as usize;
            let dest_start = (overlap_start - start) as usize;

            match resolver.open_target(&target) {
                Ok(mut stream) => {
                    if let Err(err) = stream.seek(SeekFrom::Start(target_offset)) {
                        warn!(%target, %err, "map target seek failed, zero-filling span");
                        continue;
                    }
                    let mut tmp = vec![0u8; len];
                    let mut filled = 0;
                    while filled < len {
                        match stream.read(&mut tmp[filled..]) {
                            Ok(0) => break,
                            Ok(n) => filled += n,
                            Err(err) => {
                                warn!(%target, %err, "map target read failed, zero-filling remainder");
                                break;
                            }
                        }
                    }
                    buf[dest_start..dest_start + filled].copy_from_slice(&tmp[..filled]);
                }
                Err(err) => {
                    warn!(%target, %err, "map target open failed, zero-filling span");
                }
            }
        }

        self.read_ptr = end;
        Ok(want)
    }

    /// Appends `data` to the backing stream and records a new range,
    /// advancing `write_ptr` (spec §4.4 `write`).
    pub fn write_mapped(&mut self, data: &[u8], backing: &mut dyn WritableStream) -> Result<usize> {
        if !self.writable {
            return Err(Error::invalid_state("map stream is not writable"));
        }
        let Some(backing_urn) = self.backing_stream_urn.clone() else {
            return Err(Error::invalid_state("map stream has no backing stream bound"));
        };
        let target_offset = backing.size();
        backing.seek(SeekFrom::Start(target_offset))?;
        backing.write_all(data)?;

        self.tree.add_range(self.write_ptr, target_offset, data.len() as u64, &backing_urn);
        self.write_ptr += data.len() as u64;
        self.dirty = true;
        Ok(data.len())
    }

    fn persist(&self) -> Result<()> {
        let extent = self.tree.extent();
        let intervals = self.tree.query_range(0, extent.max(1));

        let map_bytes = encode_entries(&intervals);
        let idx_bytes = encode_idx(self.tree.targets());

        let mut archive = self.archive.borrow_mut();
        archive.write_member(&map_member_name(&archive, &self.urn), map_bytes, StorageMethod::Deflated)?;
        archive.write_member(&idx_member_name(&archive, &self.urn), idx_bytes, StorageMethod::Deflated)?;
        Ok(())
    }
}

impl Aff4Stream for MapStream {
    fn urn(&self) -> &Urn {
        &self.urn
    }

    fn size(&self) -> u64 {
        self.tree.extent()
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
        self.persist()?;
        self.dirty = false;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        let names = vec![
            map_member_name(&self.archive.borrow(), &self.urn),
            idx_member_name(&self.archive.borrow(), &self.urn),
        ];
        self.archive.borrow_mut().remove_members(&names)?;
        Ok(())
    }
}

impl Read for MapStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "MapStream::read requires a TargetResolver; use read_mapped"))
    }
}

impl Seek for MapStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.size() as i64 + delta,
            SeekFrom::Current(delta) => self.read_ptr as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative seek"));
        }
        self.read_ptr = new_pos as u64;
        Ok(self.read_ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aff4_zip::escaping::EscapeDialect;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn archive() -> Rc<RefCell<Archive>> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.aff4");
        let archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        std::mem::forget(dir);
        Rc::new(RefCell::new(archive))
    }

    struct FakeTarget {
        urn: Urn,
        data: Vec<u8>,
        pos: u64,
    }
    impl Read for FakeTarget {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let avail = self.data.len().saturating_sub(self.pos as usize);
            let n = avail.min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos as usize..self.pos as usize + n]);
            self.pos += n as u64;
            Ok(n)
        }
    }
    impl Seek for FakeTarget {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            if let SeekFrom::Start(p) = pos {
                self.pos = p;
            }
            Ok(self.pos)
        }
    }
    impl Aff4Stream for FakeTarget {
        fn urn(&self) -> &Urn {
            &self.urn
        }
        fn size(&self) -> u64 {
            self.data.len() as u64
        }
        fn writable(&self) -> bool {
            false
        }
        fn dirty(&self) -> bool {
            false
        }
        fn flush_stream(&mut self) -> Result<()> {
            Ok(())
        }
        fn abort(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct FixedResolver(Vec<u8>, Urn);
    impl TargetResolver for FixedResolver {
        fn open_target(&mut self, target: &Urn) -> Result<Box<dyn Aff4Stream>> {
            assert_eq!(*target, self.1);
            Ok(Box::new(FakeTarget { urn: target.clone(), data: self.0.clone(), pos: 0 }))
        }
    }

    #[test]
    fn read_covers_gap_with_zeros() {
        let archive = archive();
        let target = Urn::new("aff4://vol/target");
        let mut map = MapStream::create(archive, Urn::new("aff4://vol/map1"));
        map.add_range(10, 0, 5, &target);

        let mut resolver = FixedResolver(b"ABCDE".to_vec(), target);
        let mut buf = vec![0xFFu8; 15];
        let n = map.read_mapped(&mut buf, &mut resolver).unwrap();
        assert_eq!(n, 15);
        assert_eq!(&buf[0..10], &[0u8; 10]);
        assert_eq!(&buf[10..15], b"ABCDE");
    }

    #[test]
    fn write_mapped_records_range_against_backing_stream() {
        let archive = archive();
        let backing_urn = Urn::new("aff4://vol/backing");
        let mut map = MapStream::create(archive.clone(), Urn::new("aff4://vol/map2"));
        map.set_backing_stream(backing_urn.clone());

        struct MemBacking {
            urn: Urn,
            buf: Vec<u8>,
            pos: u64,
        }
        impl Read for MemBacking {
            fn read(&mut self, _b: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        impl Seek for MemBacking {
            fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
                if let SeekFrom::Start(p) = pos {
                    self.pos = p;
                }
                Ok(self.pos)
            }
        }
        impl Write for MemBacking {
            fn write(&mut self, b: &[u8]) -> io::Result<usize> {
                self.buf.extend_from_slice(b);
                Ok(b.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        impl Aff4Stream for MemBacking {
            fn urn(&self) -> &Urn {
                &self.urn
            }
            fn size(&self) -> u64 {
                self.buf.len() as u64
            }
            fn writable(&self) -> bool {
                true
            }
            fn dirty(&self) -> bool {
                true
            }
            fn flush_stream(&mut self) -> Result<()> {
                Ok(())
            }
            fn abort(self: Box<Self>) -> Result<()> {
                Ok(())
            }
        }

        let mut backing = MemBacking { urn: backing_urn, buf: Vec::new(), pos: 0 };
        map.write_mapped(b"hello", &mut backing).unwrap();
        assert_eq!(map.write_ptr, 5);
        assert_eq!(backing.buf, b"hello");
    }
}
