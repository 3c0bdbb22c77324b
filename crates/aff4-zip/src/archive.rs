//! ZIP64 archive backing store (spec §4.7, §6 "Archive format").
//!
//! Members are tracked in memory between flushes: reads of already-on-disk
//! members are served by opening the committed file lazily; new or
//! replaced members are buffered as plain `Vec<u8>` and only materialized
//! on [`Archive::flush`], which rewrites the archive in one pass using the
//! `zip` crate's `raw_copy_file` to carry unmodified members forward
//! without recompressing them. This trades the spec's "append new local
//! headers after existing data" incremental model for a simpler and
//! equally-correct whole-archive rewrite-on-flush; see DESIGN.md for the
//! rationale (the archive format itself is an out-of-scope "black box"
//! collaborator per spec §1, supplied here only because this crate has no
//! separate front-end to own it).

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use aff4_core::{Error, Result, Urn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::escaping::EscapeDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMethod {
    Stored,
    Deflated,
}

impl From<StorageMethod> for CompressionMethod {
    fn from(value: StorageMethod) -> Self {
        match value {
            StorageMethod::Stored => CompressionMethod::Stored,
            StorageMethod::Deflated => CompressionMethod::Deflated,
        }
    }
}

struct PendingMember {
    data: Vec<u8>,
    method: StorageMethod,
}

/// A random-access, append-friendly ZIP64 archive.
pub struct Archive {
    path: PathBuf,
    volume_urn: Urn,
    dialect: EscapeDialect,
    pending: HashMap<String, PendingMember>,
    removed: HashSet<String>,
    committed: HashSet<String>,
    writable: bool,
}

impl Archive {
    /// Creates a brand-new, empty archive at `path`.
    pub fn create(path: impl AsRef<Path>, volume_urn: Urn, dialect: EscapeDialect) -> Result<Self> {
        let archive = Self {
            path: path.as_ref().to_path_buf(),
            volume_urn,
            dialect,
            pending: HashMap::new(),
            removed: HashSet::new(),
            committed: HashSet::new(),
            writable: true,
        };
        Ok(archive)
    }

    /// Opens an existing archive for read-only access.
    pub fn open(path: impl AsRef<Path>, dialect: EscapeDialect) -> Result<Self> {
        Self::open_with_mode(path, dialect, false)
    }

    /// Opens an existing archive for append (read + write new members).
    pub fn open_append(path: impl AsRef<Path>, dialect: EscapeDialect) -> Result<Self> {
        Self::open_with_mode(path, dialect, true)
    }

    fn open_with_mode(path: impl AsRef<Path>, dialect: EscapeDialect, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut zip = ZipArchive::new(file)
            .map_err(|e| Error::malformed_archive(format!("failed to open zip: {e}")))?;

        let mut committed = HashSet::new();
        for i in 0..zip.len() {
            let entry = zip
                .by_index(i)
                .map_err(|e| Error::malformed_archive(format!("corrupt central directory entry: {e}")))?;
            committed.insert(entry.name().to_string());
        }

        let volume_urn = zip
            .comment()
            .to_vec()
            .pipe(|bytes| String::from_utf8(bytes).ok())
            .filter(|s| !s.is_empty())
            .map(Urn::new)
            .unwrap_or_else(|| Urn::from_file_name(&path.to_string_lossy()));

        Ok(Self {
            path,
            volume_urn,
            dialect,
            pending: HashMap::new(),
            removed: HashSet::new(),
            committed,
            writable,
        })
    }

    pub fn volume_urn(&self) -> &Urn {
        &self.volume_urn
    }

    pub fn dialect(&self) -> EscapeDialect {
        self.dialect
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn contains_member(&self, name: &str) -> bool {
        if self.removed.contains(name) {
            return false;
        }
        self.pending.contains_key(name) || self.committed.contains(name)
    }

    pub fn member_names(&self) -> Vec<String> {
        let mut names: HashSet<String> = self.committed.difference(&self.removed).cloned().collect();
        names.extend(self.pending.keys().cloned());
        names.into_iter().collect()
    }

    /// Reads a member's full decompressed bytes, regardless of whether it
    /// is already committed to disk or only pending in memory.
    pub fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        if self.removed.contains(name) {
            return Err(Error::not_found(format!("member removed: {name}")));
        }
        if let Some(pending) = self.pending.get(name) {
            return Ok(pending.data.clone());
        }
        if !self.committed.contains(name) {
            return Err(Error::not_found(format!("no such member: {name}")));
        }
        let file = File::open(&self.path)?;
        let mut zip = ZipArchive::new(file)
            .map_err(|e| Error::malformed_archive(format!("failed to open zip: {e}")))?;
        let mut entry = zip
            .by_name(name)
            .map_err(|_| Error::not_found(format!("no such member: {name}")))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Buffers a member's full contents for write on the next flush.
    pub fn write_member(&mut self, name: &str, data: Vec<u8>, method: StorageMethod) -> Result<()> {
        if !self.writable {
            return Err(Error::invalid_state("archive is not open for writing"));
        }
        self.removed.remove(name);
        self.pending.insert(name.to_string(), PendingMember { data, method });
        Ok(())
    }

    /// Removes a set of members. Takes effect on the next flush.
    pub fn remove_members(&mut self, names: &[String]) -> Result<()> {
        if !self.writable {
            return Err(Error::invalid_state("archive is not open for writing"));
        }
        for name in names {
            self.pending.remove(name);
            self.removed.insert(name.clone());
        }
        Ok(())
    }

    /// Rewrites the archive, carrying forward unmodified committed
    /// members via `raw_copy_file` and materializing all pending writes.
    /// The archive comment is always (re)set to the volume URN.
    pub fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        if self.pending.is_empty() && self.removed.is_empty() && self.path.exists() {
            return Ok(());
        }

        let tmp_path = self.path.with_extension("aff4-tmp");
        let carry_forward: Vec<String> = self
            .committed
            .difference(&self.removed)
            .filter(|name| !self.pending.contains_key(*name))
            .cloned()
            .collect();

        {
            let mut out = ZipWriter::new(File::create(&tmp_path)?);

            if self.path.exists() && !carry_forward.is_empty() {
                let mut src = ZipArchive::new(File::open(&self.path)?)
                    .map_err(|e| Error::malformed_archive(format!("failed to reopen zip: {e}")))?;
                for name in &carry_forward {
                    let entry = src
                        .by_name(name)
                        .map_err(|_| Error::malformed_archive(format!("member vanished: {name}")))?;
                    out.raw_copy_file(entry)
                        .map_err(|e| Error::malformed_archive(format!("failed to copy member {name}: {e}")))?;
                }
            }

            for (name, member) in &self.pending {
                let options = SimpleFileOptions::default()
                    .compression_method(member.method.into())
                    .large_file(member.data.len() as u64 > u32::MAX as u64 / 2);
                out.start_file(name, options)
                    .map_err(|e| Error::malformed_archive(format!("failed to start member {name}: {e}")))?;
                out.write_all(&member.data)?;
            }

            out.set_comment(self.volume_urn.as_str());
            out.finish()
                .map_err(|e| Error::malformed_archive(format!("failed to finalize zip: {e}")))?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        self.committed = carry_forward.into_iter().chain(self.pending.keys().cloned()).collect();
        self.pending.clear();
        self.removed.clear();
        Ok(())
    }

    /// Total size of the backing file, used by abort-cleanliness tests
    /// (spec §8 property 8).
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.path.metadata().map(|m| m.len()).unwrap_or(0))
    }
}

trait Pipe: Sized {
    fn pipe<R>(self, f: impl FnOnce(Self) -> R) -> R {
        f(self)
    }
}
impl<T> Pipe for T {}

/// A cursor-backed view of a member's bytes, constructed for reading.
pub fn open_member_cursor(archive: &Archive, name: &str) -> Result<Cursor<Vec<u8>>> {
    Ok(Cursor::new(archive.read_member(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_flush_empty_archive_has_comment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aff4");
        let mut archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        archive.flush().unwrap();

        let reopened = Archive::open(&path, EscapeDialect::V11).unwrap();
        assert_eq!(reopened.volume_urn().as_str(), "aff4://vol");
    }

    #[test]
    fn write_then_read_member_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aff4");
        let mut archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        archive.write_member("a.txt", b"hello".to_vec(), StorageMethod::Deflated).unwrap();
        archive.flush().unwrap();

        let reopened = Archive::open(&path, EscapeDialect::V11).unwrap();
        assert!(reopened.contains_member("a.txt"));
        assert_eq!(reopened.read_member("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn append_preserves_prior_members() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aff4");
        {
            let mut archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
            archive.write_member("a.txt", b"hello".to_vec(), StorageMethod::Stored).unwrap();
            archive.flush().unwrap();
        }
        {
            let mut archive = Archive::open_append(&path, EscapeDialect::V11).unwrap();
            archive.write_member("b.txt", b"world".to_vec(), StorageMethod::Stored).unwrap();
            archive.flush().unwrap();
        }

        let reopened = Archive::open(&path, EscapeDialect::V11).unwrap();
        assert_eq!(reopened.read_member("a.txt").unwrap(), b"hello");
        assert_eq!(reopened.read_member("b.txt").unwrap(), b"world");
    }

    #[test]
    fn remove_members_drops_them_on_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aff4");
        let mut archive = Archive::create(&path, Urn::new("aff4://vol"), EscapeDialect::V11).unwrap();
        archive.write_member("a.txt", b"hello".to_vec(), StorageMethod::Stored).unwrap();
        archive.flush().unwrap();

        archive.remove_members(&["a.txt".to_string()]).unwrap();
        archive.flush().unwrap();

        let reopened = Archive::open(&path, EscapeDialect::V11).unwrap();
        assert!(!reopened.contains_member("a.txt"));
    }
}
