//! Glue between HTTP bodies and the blocking storage engine.
//!
//! Uploads: [`forward_frames`] decodes length-prefixed frames from the
//! request body and pushes them into a bounded channel; the engine pulls
//! them through a [`ChannelSource`]. Only a clean end of body produces
//! [`Inbound::End`]; a channel that closes without it is a cancellation.
//!
//! Downloads: the engine pushes [`GetDataFrame`]s into a channel and
//! [`frame_stream`] turns them into response body bytes.

use std::io;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use strongbox_shared::protocol::{encode_frame, FrameDecoder, GetDataFrame};

use crate::engine::{EngineError, EngineResult};
use crate::error::ServerError;

/// Frames buffered between the HTTP side and the engine.
pub const STREAM_BUFFER: usize = 4;

#[derive(Debug)]
pub enum Inbound<T> {
    Chunk(T),
    End,
}

/// Blocking iterator over an inbound channel.
///
/// Yields chunks until [`Inbound::End`], or a single
/// [`EngineError::Cancelled`] if the sender goes away first.
pub struct ChannelSource<T> {
    rx: mpsc::Receiver<Inbound<T>>,
    done: bool,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: mpsc::Receiver<Inbound<T>>) -> Self {
        Self { rx, done: false }
    }
}

impl<T> Iterator for ChannelSource<T> {
    type Item = EngineResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rx.blocking_recv() {
            Some(Inbound::Chunk(chunk)) => Some(Ok(chunk)),
            Some(Inbound::End) => {
                self.done = true;
                None
            }
            None => {
                self.done = true;
                Some(Err(EngineError::Cancelled))
            }
        }
    }
}

/// Decode `body` into frames of `T` and send them to `tx`.
///
/// Returns `Ok` once the body ended cleanly and the end marker was sent, or
/// as soon as the receiver is gone (the engine stopped early and owns the
/// outcome). Any transport or framing problem returns an error without
/// sending the end marker.
pub async fn forward_frames<T>(
    body: Body,
    max_frame: usize,
    idle_timeout: Option<Duration>,
    tx: mpsc::Sender<Inbound<T>>,
) -> Result<(), ServerError>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut data = body.into_data_stream();
    let mut decoder = FrameDecoder::new(max_frame);
    let mut frames = 0u64;

    loop {
        let next = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, data.next()).await.map_err(|_| {
                tracing::warn!(frames, "upload stalled, cancelling");
                ServerError::InvalidArgument("stream idle timeout".into())
            })?,
            None => data.next().await,
        };

        match next {
            Some(Ok(bytes)) => {
                decoder.extend(&bytes);
                while let Some(msg) = decoder.decode::<T>()? {
                    frames += 1;
                    if tx.send(Inbound::Chunk(msg)).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Some(Err(e)) => {
                return Err(ServerError::InvalidArgument(format!(
                    "failed to read request body: {e}"
                )));
            }
            None => break,
        }
    }

    decoder.finish()?;
    let _ = tx.send(Inbound::End).await;
    Ok(())
}

/// Response body for a read: `first`, then whatever the engine sends.
///
/// An engine error after the header aborts the body, which the client sees
/// as a truncated stream.
pub fn frame_stream(
    first: GetDataFrame,
    rx: mpsc::Receiver<EngineResult<GetDataFrame>>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let rest = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    futures::stream::once(async move { Ok(first) })
        .chain(rest)
        .map(|item| {
            let frame = item.map_err(|e| {
                tracing::error!(error = %e, "read failed mid-stream");
                io::Error::other(e.to_string())
            })?;
            encode_frame(&frame)
                .map(Bytes::from)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
}

#[cfg(test)]
mod tests {
    use strongbox_shared::protocol::SaveDataRequest;

    use super::*;

    fn chunk(data: &[u8]) -> SaveDataRequest {
        SaveDataRequest {
            data: data.to_vec(),
            ..Default::default()
        }
    }

    fn body_of(frames: &[SaveDataRequest]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| encode_frame(f).unwrap())
            .collect()
    }

    async fn collect(body: Body, max: usize) -> (Result<(), ServerError>, Vec<EngineResult<SaveDataRequest>>) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let reader = tokio::task::spawn_blocking(move || ChannelSource::new(rx).collect::<Vec<_>>());
        let forwarded = forward_frames(body, max, None, tx).await;
        (forwarded, reader.await.unwrap())
    }

    #[tokio::test]
    async fn test_clean_body_ends_the_source() {
        let wire = body_of(&[chunk(b"a"), chunk(b"b"), chunk(b"c")]);
        let (forwarded, items) = collect(Body::from(wire), 1024).await;

        forwarded.unwrap();
        let data: Vec<Vec<u8>> = items.into_iter().map(|i| i.unwrap().data).collect();
        assert_eq!(data, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_truncated_body_cancels_the_source() {
        let mut wire = body_of(&[chunk(b"abc"), chunk(b"def")]);
        wire.truncate(wire.len() - 1);
        let (forwarded, items) = collect(Body::from(wire), 1024).await;

        assert!(matches!(forwarded, Err(ServerError::InvalidArgument(_))));
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_oversized_frame_cancels_the_source() {
        let wire = body_of(&[chunk(&[0u8; 256])]);
        let (forwarded, items) = collect(Body::from(wire), 64).await;

        assert!(matches!(forwarded, Err(ServerError::InvalidArgument(_))));
        assert!(matches!(items.as_slice(), [Err(EngineError::Cancelled)]));
    }

    #[tokio::test]
    async fn test_empty_body_yields_no_chunks() {
        let (forwarded, items) = collect(Body::empty(), 1024).await;
        forwarded.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let (_keep_open, rx) = mpsc::channel::<io::Result<Bytes>>(1);
        let pending = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let (tx, _rx) = mpsc::channel::<Inbound<SaveDataRequest>>(STREAM_BUFFER);

        let result = forward_frames(
            Body::from_stream(pending),
            1024,
            Some(Duration::from_millis(20)),
            tx,
        )
        .await;
        assert!(matches!(result, Err(ServerError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_frame_stream_encodes_header_then_chunks() {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tx.send(Ok(GetDataFrame::Chunk { data: b"xy".to_vec() }))
            .await
            .unwrap();
        drop(tx);

        let parts: Vec<Bytes> = frame_stream(
            GetDataFrame::Header {
                kind: strongbox_shared::RecordKind::Text,
            },
            rx,
        )
        .map(|r| r.unwrap())
        .collect()
        .await;

        let mut decoder = FrameDecoder::new(1024);
        for part in &parts {
            decoder.extend(part);
        }
        assert!(matches!(
            decoder.decode::<GetDataFrame>().unwrap(),
            Some(GetDataFrame::Header { .. })
        ));
        assert_eq!(
            decoder.decode::<GetDataFrame>().unwrap(),
            Some(GetDataFrame::Chunk { data: b"xy".to_vec() })
        );
        decoder.finish().unwrap();
    }
}
