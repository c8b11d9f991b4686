use std::path::Path;

use reqwest::{Body, Certificate, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use strongbox_shared::constants::{
    AUTHORIZATION_HEADER, DEFAULT_MAX_MESSAGE_SIZE, DELETE_DATA_PATH, GET_DATA_PATH,
    GET_USER_DATA_LIST_PATH, LOGIN_PATH, REGISTRATION_PATH, SAVE_DATA_PATH, UPDATE_DATA_PATH,
    USER_UID_HEADER,
};
use strongbox_shared::crypto::SymmetricKey;
use strongbox_shared::protocol::{
    encode_frame, AuthResponse, DeleteDataRequest, DeleteDataResponse, ErrorBody, GetDataRequest,
    GetUserDataListRequest, GetUserDataListResponse, LoginRequest, RegistrationRequest,
    SaveDataRequest, SaveDataResponse, UpdateDataRequest, UpdateDataResponse, UserDataItem,
};
use strongbox_shared::RecordKind;

use crate::error::{ClientError, Result};
use crate::transfer::{chunk_count, open_value, seal_value, spawn_file_frames, FrameReader};
use crate::values::{CardDetails, Credentials, Retrieved};

/// Session credentials sent as call metadata.
#[derive(Clone)]
pub struct SessionInfo {
    pub user_uid: String,
    pub token: String,
}

impl std::fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInfo")
            .field("user_uid", &self.user_uid)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Connection to a vault server.
pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
    key: Option<SymmetricKey>,
    session: Option<SessionInfo>,
    max_frame: usize,
}

impl VaultClient {
    /// `ca_cert_pem` adds a trusted root for servers with a private CA.
    pub fn new(base_url: &str, ca_cert_pem: Option<&[u8]>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = ca_cert_pem {
            let roots = Certificate::from_pem_bundle(pem)?;
            if roots.is_empty() {
                return Err(ClientError::EmptyCaBundle);
            }
            for root in roots {
                builder = builder.add_root_certificate(root);
            }
        }

        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: None,
            session: None,
            max_frame: DEFAULT_MAX_MESSAGE_SIZE,
        })
    }

    /// Key used to seal password and card values.
    pub fn with_key(mut self, key: SymmetricKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub async fn register(&mut self, login: &str, password: &str) -> Result<SessionInfo> {
        let req = RegistrationRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        let resp: AuthResponse = self.unary(REGISTRATION_PATH, &req, false).await?;
        info!(user = %resp.user_uid, "registered");
        Ok(self.remember(resp))
    }

    pub async fn login(&mut self, login: &str, password: &str) -> Result<SessionInfo> {
        let req = LoginRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        let resp: AuthResponse = self.unary(LOGIN_PATH, &req, false).await?;
        info!(user = %resp.user_uid, "logged in");
        Ok(self.remember(resp))
    }

    fn remember(&mut self, resp: AuthResponse) -> SessionInfo {
        let session = SessionInfo {
            user_uid: resp.user_uid,
            token: resp.token,
        };
        self.session = Some(session.clone());
        session
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    pub async fn list(&self) -> Result<Vec<UserDataItem>> {
        let resp: GetUserDataListResponse = self
            .unary(GET_USER_DATA_LIST_PATH, &GetUserDataListRequest {}, true)
            .await?;
        Ok(resp.items)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let _: DeleteDataResponse = self
            .unary(DELETE_DATA_PATH, &DeleteDataRequest { id: id.to_string() }, true)
            .await?;
        Ok(())
    }

    /// Download a record and decode it for its type.
    pub async fn get(&self, id: &str) -> Result<Retrieved> {
        let mut reader = self.open_read(id).await?;
        let kind = reader.header().await?;

        let mut content = Vec::new();
        while let Some(chunk) = reader.chunk().await? {
            content.extend_from_slice(&chunk);
        }
        debug!(record = %id, bytes = content.len(), "downloaded");

        let payload = open_value(&kind, content, self.key.as_ref())?;
        Ok(Retrieved { kind, payload })
    }

    /// Download a record into `dest`. File content is written as it
    /// arrives; sealed values are opened before anything is written.
    pub async fn download_to(&self, id: &str, dest: &Path) -> Result<RecordKind> {
        let mut reader = self.open_read(id).await?;
        let kind = reader.header().await?;

        if kind.requires_encryption() {
            let mut content = Vec::new();
            while let Some(chunk) = reader.chunk().await? {
                content.extend_from_slice(&chunk);
            }
            let payload = open_value(&kind, content, self.key.as_ref())?;
            let retrieved = Retrieved { kind, payload };
            tokio::fs::write(dest, retrieved.as_bytes()).await?;
            return Ok(retrieved.kind);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = reader.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        info!(record = %id, bytes = written, path = %dest.display(), "saved to file");
        Ok(kind)
    }

    pub async fn put_text(&self, name: &str, text: &str) -> Result<()> {
        self.put_value(RecordKind::Text, name, text).await
    }

    pub async fn put_password(&self, name: &str, creds: &Credentials) -> Result<()> {
        self.put_value(RecordKind::Password, name, &creds.to_json()?).await
    }

    pub async fn put_card(&self, name: &str, card: &CardDetails) -> Result<()> {
        self.put_value(RecordKind::Card, name, &card.to_json()?).await
    }

    /// Upload a local file in chunks.
    pub async fn put_file(&self, name: &str, path: &Path) -> Result<()> {
        let session = self.require_session()?.clone();
        let file = tokio::fs::File::open(path).await?;
        let total = chunk_count(file.metadata().await?.len());
        let record_name = name.to_string();

        let (stream, reader) = spawn_file_frames(file, move |index, data| {
            let first = index == 0;
            SaveDataRequest {
                user_uid: first.then(|| session.user_uid.clone()),
                kind: first.then_some(RecordKind::File),
                name: first.then(|| record_name.clone()),
                data,
                chunk_index: Some(index),
                total_chunks: Some(total),
            }
        });

        let _: SaveDataResponse = self
            .upload_stream(SAVE_DATA_PATH, Body::wrap_stream(stream), reader)
            .await?;
        info!(name, chunks = total, "file uploaded");
        Ok(())
    }

    pub async fn update_text(&self, id: &str, text: &str) -> Result<()> {
        self.update_value(RecordKind::Text, id, text).await
    }

    pub async fn update_password(&self, id: &str, creds: &Credentials) -> Result<()> {
        self.update_value(RecordKind::Password, id, &creds.to_json()?).await
    }

    pub async fn update_card(&self, id: &str, card: &CardDetails) -> Result<()> {
        self.update_value(RecordKind::Card, id, &card.to_json()?).await
    }

    /// Replace a record's content with a local file.
    pub async fn update_file(&self, id: &str, path: &Path) -> Result<()> {
        let session = self.require_session()?.clone();
        let file = tokio::fs::File::open(path).await?;
        let total = chunk_count(file.metadata().await?.len());
        let id = id.to_string();

        let (stream, reader) = spawn_file_frames(file, move |index, data| {
            let first = index == 0;
            UpdateDataRequest {
                user_uid: first.then(|| session.user_uid.clone()),
                kind: first.then_some(RecordKind::File),
                data_id: first.then(|| id.clone()),
                data,
                chunk_index: Some(index),
                total_chunks: Some(total),
            }
        });

        let _: UpdateDataResponse = self
            .upload_stream(UPDATE_DATA_PATH, Body::wrap_stream(stream), reader)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    async fn put_value(&self, kind: RecordKind, name: &str, plaintext: &str) -> Result<()> {
        let session = self.require_session()?;
        let data = seal_value(&kind, plaintext, self.key.as_ref())?;
        let frame = encode_frame(&SaveDataRequest {
            user_uid: Some(session.user_uid.clone()),
            kind: Some(kind),
            name: Some(name.to_string()),
            data,
            chunk_index: Some(0),
            total_chunks: Some(1),
        })?;

        let resp = self.post(SAVE_DATA_PATH, true)?.body(frame).send().await?;
        let _: SaveDataResponse = decode_response(resp).await?;
        Ok(())
    }

    async fn update_value(&self, kind: RecordKind, id: &str, plaintext: &str) -> Result<()> {
        let session = self.require_session()?;
        let data = seal_value(&kind, plaintext, self.key.as_ref())?;
        let frame = encode_frame(&UpdateDataRequest {
            user_uid: Some(session.user_uid.clone()),
            kind: Some(kind),
            data_id: Some(id.to_string()),
            data,
            chunk_index: Some(0),
            total_chunks: Some(1),
        })?;

        let resp = self.post(UPDATE_DATA_PATH, true)?.body(frame).send().await?;
        let _: UpdateDataResponse = decode_response(resp).await?;
        Ok(())
    }

    async fn upload_stream<Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: Body,
        reader: tokio::task::JoinHandle<Result<u32>>,
    ) -> Result<Resp> {
        let sent = self.post(path, true)?.body(body).send().await;
        let read = reader
            .await
            .map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?;

        // A local read failure explains a broken upload better than the
        // transport error it caused.
        let frames = read?;
        let resp = decode_response(sent?).await?;
        debug!(frames, path, "upload finished");
        Ok(resp)
    }

    async fn open_read(&self, id: &str) -> Result<FrameReader> {
        let resp = self
            .post(GET_DATA_PATH, true)?
            .json(&GetDataRequest { id: id.to_string() })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(FrameReader::new(resp, self.max_frame))
    }

    async fn unary<Req, Resp>(&self, path: &str, req: &Req, authed: bool) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let resp = self.post(path, authed)?.json(req).send().await?;
        decode_response(resp).await
    }

    fn post(&self, path: &str, authed: bool) -> Result<RequestBuilder> {
        let mut builder = self.http.post(format!("{}{}", self.base_url, path));
        if authed {
            let session = self.require_session()?;
            builder = builder
                .header(AUTHORIZATION_HEADER, &session.token)
                .header(USER_UID_HEADER, &session.user_uid);
        }
        Ok(builder)
    }

    fn require_session(&self) -> Result<&SessionInfo> {
        self.session.as_ref().ok_or(ClientError::NotLoggedIn)
    }
}

/// Turn a non-success status into [`ClientError::Rpc`].
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Rpc {
            code: body.code,
            message: body.error,
        },
        Err(_) => ClientError::Rpc {
            code: status.as_u16().to_string(),
            message: if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            },
        },
    })
}

async fn decode_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let resp = check_status(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
