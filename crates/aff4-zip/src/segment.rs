//! `ArchiveSegmentStream`: a byte-stream view of one archive member (spec
//! §3 "Stream (abstract)", §4.7).
//!
//! Both stored and deflated members are represented uniformly as an
//! in-memory buffer here; see [`crate::archive`] module docs for why the
//! spec's "stored members are a writable slice view of the backing file"
//! optimization is not implemented literally.

use std::cell::RefCell;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use aff4_core::{Aff4Stream, Result, Urn};

use crate::archive::{Archive, StorageMethod};

pub struct ArchiveSegmentStream {
    archive: Rc<RefCell<Archive>>,
    urn: Urn,
    member_name: String,
    method: StorageMethod,
    buffer: Cursor<Vec<u8>>,
    writable: bool,
    dirty: bool,
    loaded: bool,
}

impl ArchiveSegmentStream {
    /// Opens an existing member for reading (and, if the archive is
    /// writable, in-place rewriting).
    pub fn open(archive: Rc<RefCell<Archive>>, urn: Urn, member_name: String) -> Result<Self> {
        let data = archive.borrow().read_member(&member_name)?;
        let writable = archive.borrow().writable();
        Ok(Self {
            archive,
            urn,
            member_name,
            method: StorageMethod::Deflated,
            buffer: Cursor::new(data),
            writable,
            dirty: false,
            loaded: true,
        })
    }

    /// Creates a brand-new, empty, writable member.
    pub fn create(archive: Rc<RefCell<Archive>>, urn: Urn, member_name: String, method: StorageMethod) -> Self {
        Self {
            archive,
            urn,
            member_name,
            method,
            buffer: Cursor::new(Vec::new()),
            writable: true,
            dirty: true,
            loaded: true,
        }
    }

    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// Reads the full contents (used by single-shot consumers such as
    /// `version.txt`/`container.description` parsing).
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(0))?;
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for ArchiveSegmentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read(buf)
    }
}

impl Seek for ArchiveSegmentStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl Write for ArchiveSegmentStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "segment is not writable"));
        }
        let n = self.buffer.write(buf)?;
        self.dirty = true;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Aff4Stream for ArchiveSegmentStream {
    fn urn(&self) -> &Urn {
        &self.urn
    }

    fn size(&self) -> u64 {
        self.buffer.get_ref().len() as u64
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
        self.archive
            .borrow_mut()
            .write_member(&self.member_name, self.buffer.get_ref().clone(), self.method)?;
        self.dirty = false;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        self.archive.borrow_mut().remove_members(std::slice::from_ref(&self.member_name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escaping::EscapeDialect;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn create_write_flush_then_reopen_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.aff4");
        let archive = Rc::new(RefCell::new(Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap()));

        let mut seg = ArchiveSegmentStream::create(archive.clone(), Urn::new("aff4://vol/a.txt"), "a.txt".to_string(), StorageMethod::Stored);
        seg.write_all(b"hello").unwrap();
        seg.flush_stream().unwrap();
        archive.borrow_mut().flush().unwrap();

        let archive2 = Rc::new(RefCell::new(Archive::open(&path, EscapeDialect::V11).unwrap()));
        let mut reopened = ArchiveSegmentStream::open(archive2, Urn::new("aff4://vol/a.txt"), "a.txt".to_string()).unwrap();
        assert_eq!(reopened.read_all().unwrap(), b"hello");
    }
}
