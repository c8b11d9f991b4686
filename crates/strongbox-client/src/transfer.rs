//! Client side of the chunked transfer.
//!
//! Small values go out as one frame. Password and card values are sealed
//! with the client key first. Files are read in [`CHUNK_SIZE`] pieces on a
//! background task and streamed as they are read, so neither side holds the
//! whole file. Downloads are read frame by frame with [`FrameReader`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use strongbox_shared::constants::CHUNK_SIZE;
use strongbox_shared::crypto::{open_text, seal_text, SymmetricKey};
use strongbox_shared::protocol::{encode_frame, FrameDecoder, GetDataFrame};
use strongbox_shared::{ProtocolError, RecordKind};

use crate::error::{ClientError, Result};
use crate::values::Payload;

/// Turn a value into the bytes stored for `kind`: sealed for sensitive
/// kinds, plain UTF-8 otherwise.
pub fn seal_value(kind: &RecordKind, plaintext: &str, key: Option<&SymmetricKey>) -> Result<Vec<u8>> {
    if !kind.requires_encryption() {
        return Ok(plaintext.as_bytes().to_vec());
    }
    let key = key.ok_or_else(|| ClientError::MissingKey(kind.clone()))?;
    Ok(seal_text(key, plaintext)?.into_bytes())
}

/// Inverse of [`seal_value`]. Decryption failures are returned, never
/// turned into empty output.
pub fn open_value(kind: &RecordKind, content: Vec<u8>, key: Option<&SymmetricKey>) -> Result<Payload> {
    if !kind.is_textual() {
        return Ok(Payload::Bytes(content));
    }

    let text = String::from_utf8(content).map_err(|_| {
        ClientError::Protocol(ProtocolError::UnexpectedFrame("text record is not valid UTF-8"))
    })?;

    if kind.requires_encryption() {
        let key = key.ok_or_else(|| ClientError::MissingKey(kind.clone()))?;
        return Ok(Payload::Text(open_text(key, &text)?));
    }
    Ok(Payload::Text(text))
}

/// Body stream fed by a reader task.
pub struct FrameStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for FrameStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Read `file` in chunks and encode one frame per non-empty chunk.
///
/// `build(index, data)` makes the message for each chunk; it is expected to
/// attach metadata only at index 0. The task resolves to the number of
/// frames sent.
pub fn spawn_file_frames<T, F>(mut file: tokio::fs::File, mut build: F) -> (FrameStream, JoinHandle<Result<u32>>)
where
    T: Serialize + Send + 'static,
    F: FnMut(u32, Vec<u8>) -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(2);

    let task = tokio::spawn(async move {
        let mut index = 0u32;
        loop {
            let chunk = match read_chunk(&mut file).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                    return Err(e.into());
                }
            };
            if chunk.is_empty() {
                break;
            }

            let frame = encode_frame(&build(index, chunk))?;
            if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                // Request side gave up; its error is the one to report.
                break;
            }
            index += 1;
        }
        tracing::debug!(frames = index, "file stream finished");
        Ok(index)
    });

    (FrameStream { rx }, task)
}

/// Fill up to [`CHUNK_SIZE`] bytes; shorter only at end of file.
async fn read_chunk(file: &mut tokio::fs::File) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Number of frames a file of `len` bytes is sent in.
pub fn chunk_count(len: u64) -> u32 {
    len.div_ceil(CHUNK_SIZE as u64) as u32
}

/// Pulls `GetDataFrame`s off a response body.
pub struct FrameReader {
    response: reqwest::Response,
    decoder: FrameDecoder,
    finished: bool,
}

impl FrameReader {
    pub fn new(response: reqwest::Response, max_frame: usize) -> Self {
        Self {
            response,
            decoder: FrameDecoder::new(max_frame),
            finished: false,
        }
    }

    /// Next frame, or `None` at a clean end of body.
    pub async fn next(&mut self) -> Result<Option<GetDataFrame>> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(Some(frame));
            }
            if self.finished {
                self.decoder.finish()?;
                return Ok(None);
            }
            match self.response.chunk().await? {
                Some(bytes) => self.decoder.extend(&bytes),
                None => self.finished = true,
            }
        }
    }

    /// The leading header frame.
    pub async fn header(&mut self) -> Result<RecordKind> {
        match self.next().await? {
            Some(GetDataFrame::Header { kind }) => Ok(kind),
            Some(GetDataFrame::Chunk { .. }) => {
                Err(ProtocolError::UnexpectedFrame("content before header").into())
            }
            None => Err(ProtocolError::UnexpectedFrame("empty response").into()),
        }
    }

    /// Next content chunk, or `None` at the end.
    pub async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next().await? {
            Some(GetDataFrame::Chunk { data }) => Ok(Some(data)),
            Some(GetDataFrame::Header { .. }) => {
                Err(ProtocolError::UnexpectedFrame("second header").into())
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use strongbox_shared::crypto::generate_symmetric_key;
    use strongbox_shared::protocol::SaveDataRequest;

    use super::*;

    #[test]
    fn test_plain_kinds_are_not_sealed() {
        let stored = seal_value(&RecordKind::Text, "hello", None).unwrap();
        assert_eq!(stored, b"hello");
        assert_eq!(
            open_value(&RecordKind::Text, stored, None).unwrap(),
            Payload::Text("hello".into())
        );
    }

    #[test]
    fn test_sensitive_kinds_are_sealed() {
        let key = generate_symmetric_key();
        let stored = seal_value(&RecordKind::Password, "hunter2", Some(&key)).unwrap();

        assert!(!String::from_utf8_lossy(&stored).contains("hunter2"));
        assert_eq!(
            open_value(&RecordKind::Password, stored, Some(&key)).unwrap(),
            Payload::Text("hunter2".into())
        );
    }

    #[test]
    fn test_wrong_key_is_a_crypto_error() {
        let stored = seal_value(&RecordKind::Card, "{}", Some(&generate_symmetric_key())).unwrap();
        let err = open_value(&RecordKind::Card, stored, Some(&generate_symmetric_key())).unwrap_err();
        assert!(matches!(err, ClientError::Crypto(_)));
    }

    #[test]
    fn test_sensitive_kind_needs_a_key() {
        assert!(matches!(
            seal_value(&RecordKind::Password, "x", None),
            Err(ClientError::MissingKey(RecordKind::Password))
        ));
    }

    #[test]
    fn test_files_pass_through() {
        let bytes = vec![0xff, 0x00, 0x10];
        assert_eq!(
            open_value(&RecordKind::File, bytes.clone(), None).unwrap(),
            Payload::Bytes(bytes)
        );
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64 * 2 + 1), 3);
    }

    #[tokio::test]
    async fn test_file_frames_carry_metadata_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.bin");
        let content: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 241) as u8).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let (stream, task) = spawn_file_frames(file, |index, data| SaveDataRequest {
            name: (index == 0).then(|| "doc".to_string()),
            kind: (index == 0).then_some(RecordKind::File),
            data,
            chunk_index: Some(index),
            total_chunks: Some(3),
            ..Default::default()
        });

        let parts: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(task.await.unwrap().unwrap(), 3);

        let mut decoder = FrameDecoder::new(CHUNK_SIZE * 2);
        for part in &parts {
            decoder.extend(part);
        }
        let mut frames: Vec<SaveDataRequest> = Vec::new();
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
        decoder.finish().unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].name.as_deref(), Some("doc"));
        assert!(frames[1].name.is_none() && frames[2].kind.is_none());
        assert_eq!(frames[0].data.len(), CHUNK_SIZE);
        assert_eq!(frames[2].data.len(), 17);

        let joined: Vec<u8> = frames.into_iter().flat_map(|f| f.data).collect();
        assert_eq!(joined, content);
    }

    #[tokio::test]
    async fn test_empty_file_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        tokio::fs::write(&path, b"").await.unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let (stream, task) = spawn_file_frames(file, |_, data| SaveDataRequest {
            data,
            ..Default::default()
        });

        assert_eq!(stream.count().await, 0);
        assert_eq!(task.await.unwrap().unwrap(), 0);
    }
}
