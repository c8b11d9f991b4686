use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::FRAME_HEADER_SIZE;
use crate::error::ProtocolError;
use crate::types::RecordKind;

// ---------------------------------------------------------------------------
// Unary messages (JSON)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub login: String,
    pub password: String,
}

/// Returned by both `Login` and `Registration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_uid: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUserDataListRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUserDataListResponse {
    pub items: Vec<UserDataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDataRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDataRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteDataResponse {}

/// Acknowledgement of a completed `SaveData` stream. Carries nothing: the
/// caller lists its records to confirm what was stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveDataResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDataResponse {}

/// JSON body of every failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Streamed messages (framed bincode)
// ---------------------------------------------------------------------------

/// One chunk of a `SaveData` stream.
///
/// Only the first chunk's metadata is read by the server; later chunks
/// usually leave it empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveDataRequest {
    pub user_uid: Option<String>,
    pub kind: Option<RecordKind>,
    pub name: Option<String>,
    pub data: Vec<u8>,
    pub chunk_index: Option<u32>,
    pub total_chunks: Option<u32>,
}

/// One chunk of an `UpdateData` stream. The first chunk names the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDataRequest {
    pub user_uid: Option<String>,
    pub kind: Option<RecordKind>,
    pub data_id: Option<String>,
    pub data: Vec<u8>,
    pub chunk_index: Option<u32>,
    pub total_chunks: Option<u32>,
}

/// Frames of a `GetData` response: exactly one header, then content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetDataFrame {
    Header { kind: RecordKind },
    Chunk { data: Vec<u8> },
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Serialize one message as `len (u32 BE) || bincode(msg)`.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(msg)?;
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Incremental decoder for a body made of length-prefixed frames.
///
/// Bytes arrive in arbitrary pieces; [`FrameDecoder::decode`] yields a
/// message once a whole frame is buffered.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;

        // reject before buffering the oversized payload
        if len > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }

        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_SIZE);
        let payload = self.buf.split_to(len);
        let msg = bincode::deserialize(&payload)?;
        Ok(Some(msg))
    }

    /// Call at end of body: leftover bytes mean the peer stopped mid-frame.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TruncatedFrame(self.buf.len()))
        }
    }
}
