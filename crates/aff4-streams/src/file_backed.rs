//! File-backed streams (spec §4.2 dispatch step 5, GLOSSARY "file-backed"):
//! a `file://` URN resolves directly to the file it names on the local
//! filesystem, read-only, bypassing the archive entirely. Used when a
//! container references an external file rather than material it stores
//! itself.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use aff4_core::{Aff4Stream, Result, Urn};

pub struct FileBackedStream {
    urn: Urn,
    file: File,
    size: u64,
}

impl FileBackedStream {
    pub fn open(urn: Urn, path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { urn, file, size })
    }

    /// Resolves a `file://` URN to its filesystem path. Plain Unix-style
    /// paths (mirrors pyaff4's lax `file://` parsing).
    pub fn path_for_urn(urn: &Urn) -> Option<&str> {
        urn.as_str().strip_prefix("file://")
    }
}

impl Read for FileBackedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileBackedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Aff4Stream for FileBackedStream {
    fn urn(&self) -> &Urn {
        &self.urn
    }

    fn size(&self) -> u64 {
        self.size
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn opens_and_reads_the_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::File::create(&path).unwrap().write_all(b"hello disk").unwrap();

        let urn = Urn::from_file_name(path.to_str().unwrap());
        let resolved = FileBackedStream::path_for_urn(&urn).unwrap();
        let mut stream = FileBackedStream::open(urn.clone(), Path::new(resolved)).unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello disk");
        assert_eq!(aff4_core::Aff4Stream::size(&stream), 10);
    }

    #[test]
    fn path_for_urn_strips_scheme() {
        assert_eq!(FileBackedStream::path_for_urn(&Urn::new("file:///tmp/x")), Some("/tmp/x"));
        assert_eq!(FileBackedStream::path_for_urn(&Urn::new("aff4://abc")), None);
    }
}
