//! Growable byte containers stored as ordered pages.
//!
//! A blob is a row in `blobs` plus zero or more rows in `blob_pages`, each
//! holding the bytes that start at `start_pos`. Pages never overlap and
//! together cover `[0, length)` with no gaps. Content is only reachable
//! through a [`BlobFd`] obtained from a [`Blobs`] view, which works on a
//! plain connection or on an open transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{BlobError, Result};
use crate::models::BlobHandle;

/// Largest page a single insert writes. Bigger writes are split.
pub const PAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    Read,
    Write,
}

/// An open descriptor. Tracks the cursor and the content length as seen by
/// this descriptor.
#[derive(Debug)]
pub struct BlobFd {
    handle: BlobHandle,
    mode: BlobMode,
    position: u64,
    length: u64,
    closed: bool,
}

impl BlobFd {
    pub fn handle(&self) -> BlobHandle {
        self.handle
    }

    pub fn mode(&self) -> BlobMode {
        self.mode
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Blob operations bound to one connection (or transaction).
#[derive(Clone, Copy)]
pub struct Blobs<'c> {
    conn: &'c Connection,
}

impl<'c> Blobs<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Allocate a new, empty container.
    pub fn create_empty(&self) -> Result<BlobHandle> {
        self.conn.execute(
            "INSERT INTO blobs (created_at) VALUES (?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(BlobHandle(self.conn.last_insert_rowid()))
    }

    pub fn exists(&self, handle: BlobHandle) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM blobs WHERE handle = ?1",
                params![handle.0],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Open for appending. The cursor starts at the end of the content.
    pub fn open_for_write(&self, handle: BlobHandle) -> Result<BlobFd> {
        let length = self.content_length(handle)?;
        Ok(BlobFd {
            handle,
            mode: BlobMode::Write,
            position: length,
            length,
            closed: false,
        })
    }

    pub fn open_for_read(&self, handle: BlobHandle) -> Result<BlobFd> {
        let length = self.content_length(handle)?;
        Ok(BlobFd {
            handle,
            mode: BlobMode::Read,
            position: 0,
            length,
            closed: false,
        })
    }

    /// Append `data` at the cursor. Returns the number of bytes stored.
    pub fn write_chunk(&self, fd: &mut BlobFd, data: &[u8]) -> Result<usize> {
        self.check_writable(fd)?;
        if fd.position != fd.length {
            return Err(BlobError::NonSequentialWrite {
                position: fd.position,
                length: fd.length,
            }
            .into());
        }

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO blob_pages (handle, start_pos, data) VALUES (?1, ?2, ?3)
             RETURNING length(data)",
        )?;

        let mut total = 0usize;
        for page in data.chunks(PAGE_SIZE) {
            let stored: i64 = stmt.query_row(
                params![fd.handle.0, fd.position as i64, page],
                |row| row.get(0),
            )?;
            let stored = stored as usize;
            if stored < page.len() {
                return Err(BlobError::ShortWrite {
                    expected: page.len(),
                    written: stored,
                }
                .into());
            }
            fd.position += stored as u64;
            fd.length = fd.position;
            total += stored;
        }

        Ok(total)
    }

    /// Cut the content down to `len` bytes and move the cursor there.
    pub fn truncate(&self, fd: &mut BlobFd, len: u64) -> Result<()> {
        self.check_writable(fd)?;
        if len > fd.length {
            return Err(BlobError::InvalidTruncate {
                requested: len,
                length: fd.length,
            }
            .into());
        }

        let len = len as i64;
        self.conn.execute(
            "DELETE FROM blob_pages WHERE handle = ?1 AND start_pos >= ?2",
            params![fd.handle.0, len],
        )?;
        self.conn.execute(
            "UPDATE blob_pages SET data = substr(data, 1, ?2 - start_pos)
             WHERE handle = ?1 AND start_pos < ?2 AND start_pos + length(data) > ?2",
            params![fd.handle.0, len],
        )?;

        fd.length = len as u64;
        fd.position = fd.length;
        Ok(())
    }

    /// Read up to `max` bytes from the cursor. An empty result means the
    /// end of the content.
    pub fn read_chunk(&self, fd: &mut BlobFd, max: usize) -> Result<Vec<u8>> {
        if fd.closed {
            return Err(BlobError::Closed(fd.handle.0).into());
        }
        if fd.position >= fd.length || max == 0 {
            return Ok(Vec::new());
        }

        let start = fd.position;
        let end = fd.length.min(start + max as u64);

        let mut stmt = self.conn.prepare_cached(
            "SELECT start_pos, data FROM blob_pages
             WHERE handle = ?1 AND start_pos < ?3 AND start_pos + length(data) > ?2
             ORDER BY start_pos",
        )?;
        let pages = stmt.query_map(params![fd.handle.0, start as i64, end as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::with_capacity((end - start) as usize);
        for page in pages {
            let (page_start, data) = page?;
            let page_start = page_start as u64;
            let page_end = page_start + data.len() as u64;
            let from = start.max(page_start) - page_start;
            let to = end.min(page_end) - page_start;
            out.extend_from_slice(&data[from as usize..to as usize]);
        }

        if out.len() as u64 != end - start {
            return Err(BlobError::LengthMismatch {
                handle: fd.handle.0,
                stored: start + out.len() as u64,
                expected: end,
            }
            .into());
        }

        fd.position = end;
        Ok(out)
    }

    /// Close the descriptor. A second close is a no-op.
    ///
    /// A write descriptor whose length disagrees with the stored content
    /// fails with [`BlobError::LengthMismatch`]; the descriptor is closed
    /// either way.
    pub fn close(&self, fd: &mut BlobFd) -> Result<()> {
        if fd.closed {
            return Ok(());
        }
        fd.closed = true;

        if fd.mode == BlobMode::Write {
            let stored = self.stored_length(fd.handle)?;
            if stored != fd.length {
                return Err(BlobError::LengthMismatch {
                    handle: fd.handle.0,
                    stored,
                    expected: fd.length,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Drop a container and its pages. Returns `false` if it did not exist.
    pub fn delete(&self, handle: BlobHandle) -> Result<bool> {
        self.conn.execute(
            "DELETE FROM blob_pages WHERE handle = ?1",
            params![handle.0],
        )?;
        let affected = self
            .conn
            .execute("DELETE FROM blobs WHERE handle = ?1", params![handle.0])?;
        Ok(affected > 0)
    }

    /// Move every page of `from` onto the end of `fd`'s content and drop
    /// `from`. Returns the number of bytes moved.
    pub fn splice(&self, fd: &mut BlobFd, from: BlobHandle) -> Result<u64> {
        self.check_writable(fd)?;
        if fd.position != fd.length {
            return Err(BlobError::NonSequentialWrite {
                position: fd.position,
                length: fd.length,
            }
            .into());
        }
        if from == fd.handle {
            return Err(BlobError::SpliceIntoSelf(from.0).into());
        }

        let moved = self.content_length(from)?;
        self.conn.execute(
            "UPDATE blob_pages SET handle = ?1, start_pos = start_pos + ?2 WHERE handle = ?3",
            params![fd.handle.0, fd.length as i64, from.0],
        )?;
        self.conn
            .execute("DELETE FROM blobs WHERE handle = ?1", params![from.0])?;

        fd.length += moved;
        fd.position = fd.length;
        Ok(moved)
    }

    /// Drop containers created before `older_than` that no record points
    /// at. These are left behind by uploads that never finished.
    pub fn purge_orphans(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let cutoff = older_than.to_rfc3339();
        self.conn.execute(
            "DELETE FROM blob_pages WHERE handle IN (
                 SELECT handle FROM blobs
                 WHERE created_at < ?1
                   AND handle NOT IN (SELECT blob_handle FROM user_data))",
            params![cutoff],
        )?;
        let purged = self.conn.execute(
            "DELETE FROM blobs
             WHERE created_at < ?1
               AND handle NOT IN (SELECT blob_handle FROM user_data)",
            params![cutoff],
        )?;
        Ok(purged)
    }

    fn content_length(&self, handle: BlobHandle) -> Result<u64> {
        if !self.exists(handle)? {
            return Err(BlobError::NotFound(handle.0).into());
        }
        self.stored_length(handle)
    }

    fn stored_length(&self, handle: BlobHandle) -> Result<u64> {
        let len: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(length(data)), 0) FROM blob_pages WHERE handle = ?1",
            params![handle.0],
            |row| row.get(0),
        )?;
        Ok(len as u64)
    }

    fn check_writable(&self, fd: &BlobFd) -> Result<()> {
        if fd.closed {
            return Err(BlobError::Closed(fd.handle.0).into());
        }
        if fd.mode != BlobMode::Write {
            return Err(BlobError::ReadOnly(fd.handle.0).into());
        }
        Ok(())
    }
}

/// Owns a descriptor and closes it when dropped, whatever path the caller
/// leaves by.
pub struct BlobGuard<'c> {
    blobs: Blobs<'c>,
    fd: BlobFd,
}

impl<'c> BlobGuard<'c> {
    pub fn new(blobs: Blobs<'c>, fd: BlobFd) -> Self {
        Self { blobs, fd }
    }

    pub fn fd(&self) -> &BlobFd {
        &self.fd
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.blobs.write_chunk(&mut self.fd, data)
    }

    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        self.blobs.read_chunk(&mut self.fd, max)
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.blobs.truncate(&mut self.fd, len)
    }

    pub fn splice(&mut self, from: BlobHandle) -> Result<u64> {
        self.blobs.splice(&mut self.fd, from)
    }

    /// Close now and surface the result. Dropping the guard afterwards does
    /// nothing.
    pub fn close(mut self) -> Result<()> {
        self.blobs.close(&mut self.fd)
    }
}

impl Drop for BlobGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.blobs.close(&mut self.fd) {
            tracing::warn!(handle = %self.fd.handle, error = %e, "failed to close blob descriptor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::StoreError;
    use crate::records::Catalog;
    use strongbox_shared::RecordKind;

    fn read_all(blobs: &Blobs<'_>, handle: BlobHandle, step: usize) -> Vec<u8> {
        let mut fd = blobs.open_for_read(handle).unwrap();
        let mut out = Vec::new();
        loop {
            let chunk = blobs.read_chunk(&mut fd, step).unwrap();
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        blobs.close(&mut fd).unwrap();
        out
    }

    #[test]
    fn test_new_blob_is_empty() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_read(handle).unwrap();
        assert!(fd.is_empty());
        assert!(blobs.read_chunk(&mut fd, 16).unwrap().is_empty());
    }

    #[test]
    fn test_sequential_writes_read_back_across_pages() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let first: Vec<u8> = (0..PAGE_SIZE + 10).map(|i| (i % 251) as u8).collect();
        let second = b"tail".to_vec();

        let mut fd = blobs.open_for_write(handle).unwrap();
        assert_eq!(blobs.write_chunk(&mut fd, &first).unwrap(), first.len());
        assert_eq!(blobs.write_chunk(&mut fd, &second).unwrap(), 4);
        blobs.close(&mut fd).unwrap();

        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        // Odd step so reads straddle page boundaries.
        assert_eq!(read_all(&blobs, handle, 4097), expected);
    }

    #[test]
    fn test_reopened_writer_appends() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        blobs.write_chunk(&mut fd, b"abc").unwrap();
        blobs.close(&mut fd).unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        assert_eq!(fd.position(), 3);
        blobs.write_chunk(&mut fd, b"def").unwrap();
        blobs.close(&mut fd).unwrap();

        assert_eq!(read_all(&blobs, handle, 2), b"abcdef");
    }

    #[test]
    fn test_truncate_inside_a_page_then_rewrite() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        blobs.write_chunk(&mut fd, b"hello ").unwrap();
        blobs.write_chunk(&mut fd, b"world").unwrap();
        blobs.truncate(&mut fd, 8).unwrap();
        assert_eq!(fd.len(), 8);
        blobs.write_chunk(&mut fd, b"!").unwrap();
        blobs.close(&mut fd).unwrap();

        assert_eq!(read_all(&blobs, handle, 100), b"hello wo!");
    }

    #[test]
    fn test_truncate_to_zero_empties_content() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        blobs.write_chunk(&mut fd, b"old content").unwrap();
        blobs.truncate(&mut fd, 0).unwrap();
        blobs.write_chunk(&mut fd, b"new").unwrap();
        blobs.close(&mut fd).unwrap();

        assert_eq!(read_all(&blobs, handle, 100), b"new");
    }

    #[test]
    fn test_truncate_past_end_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        blobs.write_chunk(&mut fd, b"abc").unwrap();
        assert!(matches!(
            blobs.truncate(&mut fd, 4),
            Err(StoreError::Blob(BlobError::InvalidTruncate { requested: 4, length: 3 }))
        ));
    }

    #[test]
    fn test_read_descriptor_cannot_write() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_read(handle).unwrap();
        assert!(matches!(
            blobs.write_chunk(&mut fd, b"x"),
            Err(StoreError::Blob(BlobError::ReadOnly(_)))
        ));
    }

    #[test]
    fn test_closed_descriptor_is_unusable_and_close_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        blobs.close(&mut fd).unwrap();
        blobs.close(&mut fd).unwrap();
        assert!(fd.is_closed());
        assert!(matches!(
            blobs.write_chunk(&mut fd, b"x"),
            Err(StoreError::Blob(BlobError::Closed(_)))
        ));
    }

    #[test]
    fn test_close_detects_concurrent_length_change() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut a = blobs.open_for_write(handle).unwrap();
        let mut b = blobs.open_for_write(handle).unwrap();
        blobs.write_chunk(&mut b, b"sneaky").unwrap();
        blobs.close(&mut b).unwrap();

        assert!(matches!(
            blobs.close(&mut a),
            Err(StoreError::Blob(BlobError::LengthMismatch { stored: 6, expected: 0, .. }))
        ));
    }

    #[test]
    fn test_missing_blob_cannot_be_opened() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        assert!(matches!(
            blobs.open_for_read(BlobHandle(42)),
            Err(StoreError::Blob(BlobError::NotFound(42)))
        ));
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        {
            let mut guard = BlobGuard::new(blobs, blobs.open_for_write(handle).unwrap());
            guard.write(b"kept").unwrap();
        }

        assert_eq!(read_all(&blobs, handle, 2), b"kept");
    }

    #[test]
    fn test_delete_removes_pages() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        blobs.write_chunk(&mut fd, b"bytes").unwrap();
        blobs.close(&mut fd).unwrap();

        assert!(blobs.delete(handle).unwrap());
        assert!(!blobs.exists(handle).unwrap());
        assert!(!blobs.delete(handle).unwrap());

        let pages: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM blob_pages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(pages, 0);
    }

    #[test]
    fn test_splice_appends_and_drops_source() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let target = blobs.create_empty().unwrap();
        let source = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(target).unwrap();
        blobs.write_chunk(&mut fd, b"head ").unwrap();
        blobs.close(&mut fd).unwrap();

        let big: Vec<u8> = (0..PAGE_SIZE + 3).map(|i| (i % 241) as u8).collect();
        let mut src = blobs.open_for_write(source).unwrap();
        blobs.write_chunk(&mut src, &big).unwrap();
        blobs.close(&mut src).unwrap();

        let mut fd = blobs.open_for_write(target).unwrap();
        assert_eq!(blobs.splice(&mut fd, source).unwrap(), big.len() as u64);
        assert_eq!(fd.len(), 5 + big.len() as u64);
        blobs.write_chunk(&mut fd, b"!").unwrap();
        blobs.close(&mut fd).unwrap();

        let mut expected = b"head ".to_vec();
        expected.extend_from_slice(&big);
        expected.push(b'!');
        assert_eq!(read_all(&blobs, target, 7919), expected);
        assert!(!blobs.exists(source).unwrap());
    }

    #[test]
    fn test_splice_into_itself_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty().unwrap();

        let mut fd = blobs.open_for_write(handle).unwrap();
        assert!(matches!(
            blobs.splice(&mut fd, handle),
            Err(StoreError::Blob(BlobError::SpliceIntoSelf(_)))
        ));
    }

    #[test]
    fn test_purge_orphans_keeps_referenced_and_recent_blobs() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Blobs::new(db.conn());
        let user = db.create_user("alice", "hash").unwrap();

        let orphan = blobs.create_empty().unwrap();
        let mut fd = blobs.open_for_write(orphan).unwrap();
        blobs.write_chunk(&mut fd, b"abandoned").unwrap();
        blobs.close(&mut fd).unwrap();

        let kept = blobs.create_empty().unwrap();
        Catalog::new(db.conn())
            .insert(user, &RecordKind::Text, "note", kept)
            .unwrap();

        // Nothing is older than a cutoff in the past.
        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(blobs.purge_orphans(past).unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(blobs.purge_orphans(future).unwrap(), 1);
        assert!(!blobs.exists(orphan).unwrap());
        assert!(blobs.exists(kept).unwrap());

        let pages: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM blob_pages WHERE handle = ?1",
                params![orphan.0],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(pages, 0);
    }
}
