//! Transactional storage engine.
//!
//! Uploads stream into a staging blob that no record points at. Each chunk
//! is written in its own short write transaction, so a slow client never
//! holds the database write lock while the server waits for its next
//! chunk. Once the stream ends cleanly a final short transaction publishes
//! the staged content: a new catalog row for a create, or a swap onto the
//! record's existing blob for an update. Until then nothing is visible to
//! other readers; any error, or a chunk source that reports cancellation,
//! drops the staging blob.
//!
//! Operations are synchronous and meant to run on a blocking thread. The
//! inbound side of a stream is any iterator of chunks, so the HTTP layer
//! can feed it from a channel and tests can feed it from a `Vec`.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use strongbox_shared::constants::CHUNK_SIZE;
use strongbox_shared::protocol::{GetDataFrame, SaveDataRequest, UpdateDataRequest};
use strongbox_shared::types::{RecordId, RecordKind, UserId};
use strongbox_store::{
    BlobFd, BlobGuard, BlobHandle, Blobs, Catalog, Database, Pool, RecordSummary, StoreError,
    Transaction,
};

#[derive(Debug, Error)]
pub enum EngineError {
    /// A create stream closed before its first chunk.
    #[error("no data received")]
    NoData,

    /// An update stream carried no bytes at all.
    #[error("no data to update")]
    NothingToUpdate,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("record not found")]
    NotFound,

    /// The inbound stream ended without a clean half-close.
    #[error("stream cancelled")]
    Cancelled,

    #[error("failed to write chunk {index}: {source}")]
    ChunkWrite {
        index: u64,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("storage worker failed: {0}")]
    Worker(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Clone)]
pub struct StorageEngine {
    pool: Arc<Pool>,
}

impl StorageEngine {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Store a new record from a chunk stream.
    ///
    /// The first chunk names the record and is checked before anything is
    /// staged. Every non-empty chunk is appended in arrival order.
    pub fn create<I>(&self, caller: UserId, chunks: I) -> EngineResult<RecordId>
    where
        I: IntoIterator<Item = EngineResult<SaveDataRequest>>,
    {
        let mut chunks = chunks.into_iter();
        let first = match chunks.next() {
            Some(chunk) => chunk?,
            None => return Err(EngineError::NoData),
        };

        check_claimed_owner(caller, first.user_uid.as_deref())?;
        let kind = first.kind.clone().ok_or_else(|| {
            EngineError::InvalidArgument("first chunk must carry the record type".into())
        })?;
        let name = first.name.clone().unwrap_or_default();

        let mut db = self.pool.get()?;
        let mut staged = Staged::begin(&mut db)?;
        let (chunk_count, byte_count) =
            staged.fill(std::iter::once(Ok(first)).chain(chunks).map(|c| c.map(|c| c.data)))?;

        let record_id = staged.publish(|tx, handle| {
            Ok(Catalog::new(tx).insert(caller, &kind, &name, handle)?)
        })?;

        tracing::info!(
            user = %caller,
            record = %record_id,
            chunks = chunk_count,
            bytes = byte_count,
            "record created"
        );
        Ok(record_id)
    }

    /// Replace the content of an existing record from a chunk stream.
    ///
    /// The first chunk names the target. The record keeps its blob handle,
    /// type and name; only the content changes, and only once the whole
    /// stream has arrived.
    pub fn update<I>(&self, caller: UserId, chunks: I) -> EngineResult<RecordId>
    where
        I: IntoIterator<Item = EngineResult<UpdateDataRequest>>,
    {
        let mut chunks = chunks.into_iter();
        let first = match chunks.next() {
            Some(chunk) => chunk?,
            None => return Err(EngineError::NoData),
        };

        check_claimed_owner(caller, first.user_uid.as_deref())?;
        let record_id = parse_record_id(first.data_id.as_deref())?;

        let mut db = self.pool.get()?;
        let record = Catalog::new(db.conn())
            .get(caller, record_id)
            .map_err(not_found)?;
        if let Some(kind) = first.kind.as_ref().filter(|k| **k != record.kind) {
            tracing::debug!(
                record = %record_id,
                stored = %record.kind,
                requested = %kind,
                "ignoring type change on update"
            );
        }

        let mut staged = Staged::begin(&mut db)?;
        let (chunk_count, byte_count) =
            staged.fill(std::iter::once(Ok(first)).chain(chunks).map(|c| c.map(|c| c.data)))?;
        if byte_count == 0 {
            return Err(EngineError::NothingToUpdate);
        }

        staged.publish(|tx, staged_handle| {
            // Looked up again: the record may have gone while the upload ran.
            let record = Catalog::new(tx).get(caller, record_id).map_err(not_found)?;
            let blobs = Blobs::new(tx);
            let mut blob = BlobGuard::new(blobs, blobs.open_for_write(record.blob_handle)?);
            blob.truncate(0)?;
            blob.splice(staged_handle)?;
            blob.close()?;
            Ok(())
        })?;

        tracing::info!(
            user = %caller,
            record = %record_id,
            chunks = chunk_count,
            bytes = byte_count,
            "record updated"
        );
        Ok(record_id)
    }

/// Stream a record out: one header frame with the stored type, then the
    /// content in chunks of at most [`CHUNK_SIZE`] bytes.
    ///
    /// `emit` failing stops the read; it is how a gone receiver cancels.
    pub fn read<F>(&self, caller: UserId, id: RecordId, mut emit: F) -> EngineResult<()>
    where
        F: FnMut(GetDataFrame) -> EngineResult<()>,
    {
        let mut db = self.pool.get()?;
        let tx = db.begin_read()?;

        let byte_count = {
            let record = Catalog::new(&tx).get(caller, id).map_err(not_found)?;
            emit(GetDataFrame::Header { kind: record.kind })?;

            let blobs = Blobs::new(&tx);
            let mut blob = BlobGuard::new(blobs, blobs.open_for_read(record.blob_handle)?);

            let mut byte_count = 0u64;
            loop {
                let data = blob.read(CHUNK_SIZE)?;
                if data.is_empty() {
                    break;
                }
                byte_count += data.len() as u64;
                emit(GetDataFrame::Chunk { data })?;
            }
            byte_count
        };

        tx.commit().map_err(StoreError::from)?;

        tracing::debug!(user = %caller, record = %id, bytes = byte_count, "record read");
        Ok(())
    }

    /// Read a whole record into memory.
    pub fn read_all(&self, caller: UserId, id: RecordId) -> EngineResult<(RecordKind, Vec<u8>)> {
        let mut kind = None;
        let mut content = Vec::new();
        self.read(caller, id, |frame| {
            match frame {
                GetDataFrame::Header { kind: k } => kind = Some(k),
                GetDataFrame::Chunk { data } => content.extend_from_slice(&data),
            }
            Ok(())
        })?;

        let kind = kind.ok_or_else(|| EngineError::Worker("read produced no header".into()))?;
        Ok((kind, content))
    }

    pub fn list(&self, caller: UserId) -> EngineResult<Vec<RecordSummary>> {
        let db = self.pool.get()?;
        Ok(Catalog::new(db.conn()).list_by_owner(caller)?)
    }

    /// Remove a record and reclaim its blob.
    pub fn delete(&self, caller: UserId, id: RecordId) -> EngineResult<()> {
        let mut db = self.pool.get()?;
        let tx = db.begin()?;

        let handle = Catalog::new(&tx)
            .delete(caller, id)?
            .ok_or(EngineError::NotFound)?;
        Blobs::new(&tx).delete(handle)?;

        tx.commit().map_err(StoreError::from)?;

        tracing::info!(user = %caller, record = %id, "record deleted");
        Ok(())
    }

    /// Reclaim staging blobs older than `max_age` that were never
    /// published, e.g. after a crash mid-upload.
    pub fn purge_orphans(&self, max_age: chrono::Duration) -> EngineResult<usize> {
        let mut db = self.pool.get()?;
        let tx = db.begin()?;
        let purged = Blobs::new(&tx).purge_orphans(Utc::now() - max_age)?;
        tx.commit().map_err(StoreError::from)?;

        if purged > 0 {
            tracing::info!(removed = purged, "purged orphaned blobs");
        }
        Ok(purged)
    }
}

/// Content being uploaded into a blob no record points at yet.
///
/// Every write is its own short transaction. Dropping a stage that was
/// never published deletes its blob.
struct Staged<'d> {
    db: &'d mut Database,
    fd: BlobFd,
    published: bool,
}

impl<'d> Staged<'d> {
    fn begin(db: &'d mut Database) -> EngineResult<Self> {
        let blobs = Blobs::new(db.conn());
        let handle = blobs.create_empty()?;
        let fd = blobs.open_for_write(handle)?;
        tracing::debug!(handle = %handle, "staging upload");
        Ok(Self {
            db,
            fd,
            published: false,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StoreError> {
        let tx = self.db.begin()?;
        let written = Blobs::new(&tx).write_chunk(&mut self.fd, data)?;
        tx.commit()?;
        Ok(written)
    }

    /// Append every chunk in order. Returns `(chunks, bytes)`.
    fn fill<I>(&mut self, chunks: I) -> EngineResult<(u64, u64)>
    where
        I: Iterator<Item = EngineResult<Vec<u8>>>,
    {
        let mut chunk_count = 0u64;
        let mut byte_count = 0u64;
        for data in chunks {
            let data = data?;
            if !data.is_empty() {
                self.write(&data).map_err(|source| EngineError::ChunkWrite {
                    index: chunk_count,
                    source,
                })?;
                byte_count += data.len() as u64;
            }
            chunk_count += 1;
        }
        Ok((chunk_count, byte_count))
    }

    /// Close the staged content and run `f` on it in one write
    /// transaction. The stage is kept only if `f` and the commit succeed.
    fn publish<T, F>(mut self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Transaction<'_>, BlobHandle) -> EngineResult<T>,
    {
        let handle = self.fd.handle();
        let tx = self.db.begin()?;
        Blobs::new(&tx).close(&mut self.fd)?;
        let out = f(&tx, handle)?;
        tx.commit().map_err(StoreError::from)?;
        self.published = true;
        Ok(out)
    }
}

impl Drop for Staged<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        let handle = self.fd.handle();
        let discarded = self.db.begin().and_then(|tx| {
            Blobs::new(&tx).delete(handle)?;
            tx.commit()?;
            Ok(())
        });
        match discarded {
            Ok(()) => tracing::debug!(handle = %handle, "discarded staged upload"),
            Err(e) => tracing::warn!(
                handle = %handle,
                error = %e,
                "failed to discard staged upload, leaving it to the orphan purge"
            ),
        }
    }
}

/// A chunk may restate the owner; if it does, it must be the caller.
fn check_claimed_owner(caller: UserId, claimed: Option<&str>) -> EngineResult<()> {
    let Some(raw) = claimed.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    match UserId::parse(raw) {
        Ok(id) if id == caller => Ok(()),
        _ => Err(EngineError::PermissionDenied(
            "userUid does not match the authenticated caller".into(),
        )),
    }
}

fn parse_record_id(raw: Option<&str>) -> EngineResult<RecordId> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::InvalidArgument("first chunk must carry the record id".into()))?;
    RecordId::parse(raw).map_err(|_| EngineError::InvalidArgument(format!("invalid record id: {raw}")))
}

fn not_found(e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound => EngineError::NotFound,
        other => EngineError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: StorageEngine,
        alice: UserId,
        bob: UserId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(Pool::open(&dir.path().join("vault.db")).unwrap());
        let (alice, bob) = {
            let db = pool.get().unwrap();
            (
                db.create_user("alice", "hash").unwrap(),
                db.create_user("bob", "hash").unwrap(),
            )
        };
        Fixture {
            _dir: dir,
            engine: StorageEngine::new(pool),
            alice,
            bob,
        }
    }

    fn save_chunks(owner: UserId, kind: RecordKind, name: &str, parts: &[&[u8]]) -> Vec<EngineResult<SaveDataRequest>> {
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                let mut chunk = SaveDataRequest {
                    data: part.to_vec(),
                    chunk_index: Some(i as u32),
                    ..Default::default()
                };
                if i == 0 {
                    chunk.user_uid = Some(owner.to_string());
                    chunk.kind = Some(kind.clone());
                    chunk.name = Some(name.to_string());
                }
                Ok(chunk)
            })
            .collect()
    }

    fn update_chunks(id: RecordId, parts: &[&[u8]]) -> Vec<EngineResult<UpdateDataRequest>> {
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                Ok(UpdateDataRequest {
                    data_id: (i == 0).then(|| id.to_string()),
                    data: part.to_vec(),
                    ..Default::default()
                })
            })
            .collect()
    }

    fn blob_count(engine: &StorageEngine) -> i64 {
        let db = engine.pool().get().unwrap();
        db.conn()
            .query_row("SELECT COUNT(*) FROM blobs", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_create_then_read_round_trips() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "note", &[b"hello"]))
            .unwrap();

        let (kind, content) = f.engine.read_all(f.alice, id).unwrap();
        assert_eq!(kind, RecordKind::Text);
        assert_eq!(content, b"hello");
    }

    #[test]
    fn test_multi_megabyte_create_reads_back_in_bounded_chunks() {
        let f = fixture();
        let payload: Vec<u8> = (0..(2 * CHUNK_SIZE + CHUNK_SIZE / 2))
            .map(|i| (i % 253) as u8)
            .collect();
        let parts: Vec<&[u8]> = payload.chunks(CHUNK_SIZE).collect();

        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::File, "doc", &parts))
            .unwrap();

        let mut frames = Vec::new();
        f.engine
            .read(f.alice, id, |frame| {
                frames.push(frame);
                Ok(())
            })
            .unwrap();

        assert_eq!(frames[0], GetDataFrame::Header { kind: RecordKind::File });
        let mut content = Vec::new();
        for frame in &frames[1..] {
            let GetDataFrame::Chunk { data } = frame else {
                panic!("unexpected second header");
            };
            assert!(data.len() <= CHUNK_SIZE);
            content.extend_from_slice(data);
        }
        assert_eq!(content, payload);
    }

    #[test]
    fn test_empty_stream_creates_nothing() {
        let f = fixture();
        let err = f.engine.create(f.alice, Vec::new()).unwrap_err();

        assert!(matches!(err, EngineError::NoData));
        assert!(f.engine.list(f.alice).unwrap().is_empty());
        assert_eq!(blob_count(&f.engine), 0);
    }

    #[test]
    fn test_failure_mid_stream_leaves_no_record() {
        let f = fixture();
        let mut chunks = save_chunks(f.alice, RecordKind::File, "doc", &[b"one", b"two"]);
        chunks.push(Err(EngineError::Cancelled));

        let err = f.engine.create(f.alice, chunks).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(f.engine.list(f.alice).unwrap().is_empty());
        assert_eq!(blob_count(&f.engine), 0);
    }

    #[test]
    fn test_first_chunk_must_name_a_type() {
        let f = fixture();
        let chunks = vec![Ok(SaveDataRequest {
            data: b"x".to_vec(),
            ..Default::default()
        })];

        assert!(matches!(
            f.engine.create(f.alice, chunks),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_for_someone_else_is_denied() {
        let f = fixture();
        let err = f
            .engine
            .create(f.alice, save_chunks(f.bob, RecordKind::Text, "n", &[b"x"]))
            .unwrap_err();

        assert!(matches!(err, EngineError::PermissionDenied(_)));
        assert!(f.engine.list(f.bob).unwrap().is_empty());
    }

    #[test]
    fn test_update_replaces_whole_content() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "n", &[b"abc", b"def"]))
            .unwrap();

        f.engine.update(f.alice, update_chunks(id, &[b"x", b"y"])).unwrap();

        let (kind, content) = f.engine.read_all(f.alice, id).unwrap();
        assert_eq!(kind, RecordKind::Text);
        assert_eq!(content, b"xy");
        assert_eq!(f.engine.list(f.alice).unwrap().len(), 1);
    }

    #[test]
    fn test_update_with_only_empty_chunks_is_rejected_and_keeps_content() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "n", &[b"keep"]))
            .unwrap();

        let err = f.engine.update(f.alice, update_chunks(id, &[b"", b""])).unwrap_err();
        assert!(matches!(err, EngineError::NothingToUpdate));
        assert_eq!(f.engine.read_all(f.alice, id).unwrap().1, b"keep");

        let err = f.engine.update(f.alice, Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::NoData));
    }

    #[test]
    fn test_records_are_private_to_their_owner() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Password, "mail", &[b"secret"]))
            .unwrap();

        assert!(matches!(f.engine.read_all(f.bob, id), Err(EngineError::NotFound)));
        assert!(matches!(
            f.engine.update(f.bob, update_chunks(id, &[b"pwned"])),
            Err(EngineError::NotFound)
        ));
        assert!(matches!(f.engine.delete(f.bob, id), Err(EngineError::NotFound)));
        assert_eq!(f.engine.read_all(f.alice, id).unwrap().1, b"secret");
    }

    #[test]
    fn test_delete_removes_record_and_blob() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Card, "visa", &[b"4111"]))
            .unwrap();

        f.engine.delete(f.alice, id).unwrap();
        assert!(f.engine.list(f.alice).unwrap().is_empty());
        assert_eq!(blob_count(&f.engine), 0);
        assert!(matches!(f.engine.delete(f.alice, id), Err(EngineError::NotFound)));
    }

    #[test]
    fn test_unknown_type_is_stored_opaquely() {
        let f = fixture();
        let kind = RecordKind::Other("totp".into());
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, kind.clone(), "2fa", &[&[0xff, 0x00]]))
            .unwrap();

        assert_eq!(f.engine.read_all(f.alice, id).unwrap(), (kind, vec![0xff, 0x00]));
    }

    #[test]
    fn test_concurrent_creates_are_isolated() {
        let f = fixture();
        let ids: Vec<(RecordId, Vec<u8>)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8u8)
                .map(|n| {
                    let engine = f.engine.clone();
                    let alice = f.alice;
                    s.spawn(move || {
                        let body = vec![n; 1000 + n as usize];
                        let parts: Vec<&[u8]> = body.chunks(300).collect();
                        let id = engine
                            .create(alice, save_chunks(alice, RecordKind::File, &format!("f{n}"), &parts))
                            .unwrap();
                        (id, body)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut distinct: Vec<RecordId> = ids.iter().map(|(id, _)| *id).collect();
        distinct.sort_by_key(|id| id.0);
        distinct.dedup();
        assert_eq!(distinct.len(), 8);

        for (id, body) in &ids {
            assert_eq!(&f.engine.read_all(f.alice, *id).unwrap().1, body);
        }
        assert_eq!(f.engine.list(f.alice).unwrap().len(), 8);
    }

    #[test]
    fn test_emit_failure_stops_the_read() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "n", &[b"data"]))
            .unwrap();

        let err = f
            .engine
            .read(f.alice, id, |_| Err(EngineError::Cancelled))
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_stalled_upload_does_not_block_other_writers() {
        let f = fixture();
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let engine = f.engine.clone();
        let alice = f.alice;
        let upload = std::thread::spawn(move || {
            let head = save_chunks(alice, RecordKind::File, "slow", &[b"first part"]);
            let stall = std::iter::from_fn(move || {
                let _ = reached_tx.send(());
                let _ = release_rx.recv();
                None
            });
            engine.create(alice, head.into_iter().chain(stall))
        });

        // The first chunk is staged and the client has gone quiet.
        reached_rx.recv().unwrap();

        let started = Instant::now();
        let session = f
            .engine
            .pool()
            .get()
            .unwrap()
            .issue_session(f.bob, chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(session.user_id, f.bob);
        f.engine
            .create(f.bob, save_chunks(f.bob, RecordKind::Text, "quick", &[b"x"]))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        // Staged bytes are not a record yet.
        assert!(f.engine.list(f.alice).unwrap().is_empty());

        release_tx.send(()).unwrap();
        let id = upload.join().unwrap().unwrap();
        assert_eq!(f.engine.read_all(f.alice, id).unwrap().1, b"first part");
    }

    #[test]
    fn test_cancelled_update_keeps_content_and_discards_stage() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "n", &[b"original"]))
            .unwrap();

        let mut chunks = update_chunks(id, &[b"partial"]);
        chunks.push(Err(EngineError::Cancelled));
        let err = f.engine.update(f.alice, chunks).unwrap_err();

        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(f.engine.read_all(f.alice, id).unwrap().1, b"original");
        assert_eq!(blob_count(&f.engine), 1);
    }

    #[test]
    fn test_update_keeps_the_blob_handle() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::File, "f", &[b"v1"]))
            .unwrap();
        let handle_of = |engine: &StorageEngine| {
            let db = engine.pool().get().unwrap();
            Catalog::new(db.conn()).handle_for(f.alice, id).unwrap()
        };
        let before = handle_of(&f.engine);

        f.engine.update(f.alice, update_chunks(id, &[b"v2", b"!"])).unwrap();

        assert_eq!(handle_of(&f.engine), before);
        assert_eq!(blob_count(&f.engine), 1);
        assert_eq!(f.engine.read_all(f.alice, id).unwrap().1, b"v2!");
    }

    #[test]
    fn test_update_of_record_deleted_mid_stream_is_not_found() {
        let f = fixture();
        let id = f
            .engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "n", &[b"x"]))
            .unwrap();

        let engine = f.engine.clone();
        let alice = f.alice;
        let chunks = update_chunks(id, &[b"new"]).into_iter().chain(std::iter::from_fn(move || {
            engine.delete(alice, id).unwrap();
            None
        }));

        assert!(matches!(f.engine.update(f.alice, chunks), Err(EngineError::NotFound)));
        assert_eq!(blob_count(&f.engine), 0);
    }

    #[test]
    fn test_purge_orphans_reclaims_unpublished_blobs() {
        let f = fixture();
        f.engine
            .create(f.alice, save_chunks(f.alice, RecordKind::Text, "kept", &[b"x"]))
            .unwrap();
        {
            let db = f.engine.pool().get().unwrap();
            Blobs::new(db.conn()).create_empty().unwrap();
        }
        assert_eq!(blob_count(&f.engine), 2);

        assert_eq!(f.engine.purge_orphans(chrono::Duration::hours(1)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(f.engine.purge_orphans(chrono::Duration::zero()).unwrap(), 1);
        assert_eq!(blob_count(&f.engine), 1);
        assert_eq!(f.engine.list(f.alice).unwrap().len(), 1);
    }
}
