use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(#[from] hex::FromHexError),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame of {size} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Stream ended inside a frame ({0} bytes left over)")]
    TruncatedFrame(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(&'static str),
}
