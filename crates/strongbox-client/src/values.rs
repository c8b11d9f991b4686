//! Structured secrets and what a download turns into.

use serde::{Deserialize, Serialize};

use strongbox_shared::RecordKind;

use crate::error::Result;

/// A stored login for some other service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Payment card data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub holder: String,
    /// `MM/YY`
    pub expiry: String,
    pub cvc: String,
}

impl Credentials {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl CardDetails {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Decoded content of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text, password and card records, already decrypted.
    Text(String),
    /// Files and kinds this client does not know.
    Bytes(Vec<u8>),
}

/// A downloaded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    pub kind: RecordKind,
    pub payload: Payload,
}

impl Retrieved {
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }

    /// Parse a password record.
    pub fn credentials(&self) -> Option<Credentials> {
        (self.kind == RecordKind::Password)
            .then(|| self.as_text().and_then(|t| Credentials::from_json(t).ok()))
            .flatten()
    }

    /// Parse a card record.
    pub fn card(&self) -> Option<CardDetails> {
        (self.kind == RecordKind::Card)
            .then(|| self.as_text().and_then(|t| CardDetails::from_json(t).ok()))
            .flatten()
    }
}
